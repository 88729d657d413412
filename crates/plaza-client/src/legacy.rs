//! Callback-style request objects, kept for panels that have not moved
//! to the async client. Same header seam, same 401 observation; only the
//! delivery shape differs.

use plaza_client_core::lifecycle::{StatusClass, classify_status};
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use tokio::task::JoinHandle;

use crate::dispatch::{HttpDispatcher, RequestBody, RequestSpec};
use crate::error::ApiError;

type CompleteHandler = Box<dyn FnOnce(LegacyResponse) + Send + 'static>;
type ErrorHandler = Box<dyn FnOnce(ApiError) + Send + 'static>;

/// What a completed request hands to `on_complete`. Every server answer
/// lands here, rejections included; `on_error` is reserved for transport
/// failures.
#[derive(Debug, Clone)]
pub struct LegacyResponse {
    pub status: u16,
    pub body: String,
}

impl LegacyResponse {
    #[must_use]
    pub fn ok(&self) -> bool {
        classify_status(self.status) == StatusClass::Success
    }
}

#[derive(Clone)]
pub struct LegacyGateway {
    dispatcher: HttpDispatcher,
}

impl LegacyGateway {
    #[must_use]
    pub fn new(dispatcher: HttpDispatcher) -> Self {
        Self { dispatcher }
    }

    #[must_use]
    pub fn open(&self, method: Method, target: impl Into<String>) -> LegacyRequest {
        LegacyRequest {
            dispatcher: self.dispatcher.clone(),
            spec: RequestSpec::new(method, target),
            complete: None,
            error: None,
        }
    }
}

/// A single request in the making. Configure it, then `send` it; exactly
/// one of the two handlers runs, on the runtime rather than the caller's
/// stack.
pub struct LegacyRequest {
    dispatcher: HttpDispatcher,
    spec: RequestSpec,
    complete: Option<CompleteHandler>,
    error: Option<ErrorHandler>,
}

impl LegacyRequest {
    /// Sets a request header. An unparseable name or value is logged and
    /// skipped. Headers set here win over the session fill-in.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::try_from(name),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.spec.headers.insert(name, value);
            }
            _ => {
                tracing::warn!(target: "plaza.http", name, "dropping unparseable header");
            }
        }
    }

    pub fn skip_auth(&mut self) {
        self.spec.skip_auth = true;
    }

    /// Raw text body, as the old transport sent it. Callers set their own
    /// content type.
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.spec.body = Some(RequestBody::Text(body.into()));
    }

    pub fn on_complete(&mut self, handler: impl FnOnce(LegacyResponse) + Send + 'static) {
        self.complete = Some(Box::new(handler));
    }

    pub fn on_error(&mut self, handler: impl FnOnce(ApiError) + Send + 'static) {
        self.error = Some(Box::new(handler));
    }

    /// Dispatches in the background. The returned handle resolves once
    /// the handler has run.
    pub fn send(self) -> JoinHandle<()> {
        let Self {
            dispatcher,
            spec,
            complete,
            error,
        } = self;
        tokio::spawn(async move {
            let outcome = dispatch_for_callback(&dispatcher, &spec).await;
            match outcome {
                Ok(response) => {
                    if let Some(handler) = complete {
                        handler(response);
                    }
                }
                Err(api_error) => {
                    if let Some(handler) = error {
                        handler(api_error);
                    }
                }
            }
        })
    }
}

async fn dispatch_for_callback(
    dispatcher: &HttpDispatcher,
    spec: &RequestSpec,
) -> Result<LegacyResponse, ApiError> {
    let response = dispatcher.dispatch(spec).await?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|error| ApiError::Network {
        message: error.to_string(),
    })?;
    Ok(LegacyResponse { status, body })
}
