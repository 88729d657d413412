//! The single outbound HTTP engine. The panel runner, the legacy
//! gateway, and the request client all funnel through [`HttpDispatcher`],
//! which is where the shared header and 401 seams live.

use plaza_client_core::{SessionEventBus, TokenStore};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response};

use crate::error::ApiError;
use crate::intercept;

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
}

/// One outbound request, fully described before dispatch.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub target: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub skip_auth: bool,
}

impl RequestSpec {
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            skip_auth: false,
        }
    }

    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Leaves the session headers out. Login and refresh must not carry a
    /// stale credential.
    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}

#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
    store: TokenStore,
    bus: SessionEventBus,
}

impl HttpDispatcher {
    #[must_use]
    pub fn new(base_url: impl Into<String>, store: TokenStore, bus: SessionEventBus) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            store,
            bus,
        }
    }

    /// Absolute targets pass through untouched; everything else joins the
    /// configured base URL.
    #[must_use]
    pub fn endpoint(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }

    /// Sends one request: header fill-in (unless skipped), transport, and
    /// the shared 401 observation. Classification of the body is left to
    /// the caller.
    pub async fn dispatch(&self, spec: &RequestSpec) -> Result<Response, ApiError> {
        let url = self.endpoint(&spec.target);
        let mut headers = spec.headers.clone();
        if !spec.skip_auth {
            intercept::apply_auth_headers(&mut headers, &self.store);
        }

        let mut request = self
            .client
            .request(spec.method.clone(), &url)
            .headers(headers);
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        request = match &spec.body {
            Some(RequestBody::Json(value)) => request.json(value),
            Some(RequestBody::Text(text)) => request.body(text.clone()),
            None => request,
        };

        let response = request.send().await.map_err(|error| ApiError::Network {
            message: error.to_string(),
        })?;
        intercept::observe_response(response.status().as_u16(), &url, &self.bus);
        Ok(response)
    }

    pub(crate) fn store(&self) -> &TokenStore {
        &self.store
    }

    pub(crate) fn bus(&self) -> &SessionEventBus {
        &self.bus
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}
