//! The general-purpose request client: timeout, bounded linear-backoff
//! retry, payload digestion, and chunked upload with progress. Layered
//! on the dispatcher so it shares the header and 401 seams with the
//! other adapters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use plaza_client_core::lifecycle::{StatusClass, classify_status};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method, Response};
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::dispatch::{HttpDispatcher, RequestSpec};
use crate::error::{ApiError, ErrorBody};
use crate::intercept;

pub const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Per-call knobs. `retries` counts additional attempts beyond the
/// first; delay and timeout fall back to the client-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub retries: u32,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    pub headers: HeaderMap,
    pub skip_auth: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}

/// A digested response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

impl Payload {
    /// JSON view of the payload. `Empty` reads as `null`; text is a
    /// decode failure, not something to guess at.
    pub fn into_json(self) -> Result<serde_json::Value, ApiError> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Empty => Ok(serde_json::Value::Null),
            Self::Text(text) => Err(ApiError::Decode {
                message: format!("expected JSON, got text ({} bytes)", text.len()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub percent: u8,
    pub loaded: u64,
    pub total: u64,
}

impl UploadProgress {
    fn new(loaded: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            u8::try_from(loaded.saturating_mul(100) / total).unwrap_or(100).min(100)
        };
        Self {
            percent,
            loaded,
            total,
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub enum UploadSource {
    File(PathBuf),
    Bytes { file_name: String, content: Vec<u8> },
}

#[derive(Clone)]
pub struct ApiClient {
    dispatcher: HttpDispatcher,
    retry_delay: Duration,
    timeout: Duration,
}

impl ApiClient {
    #[must_use]
    pub fn new(dispatcher: HttpDispatcher, config: &ClientConfig) -> Self {
        Self {
            dispatcher,
            retry_delay: config.retry_delay,
            timeout: config.request_timeout,
        }
    }

    /// Full-control request path. Attempts run under a hard timeout;
    /// network faults, timeouts, and 5xx answers are retried with the
    /// delay growing linearly per retry. 4xx answers are terminal.
    pub async fn request(
        &self,
        method: Method,
        target: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<Payload, ApiError> {
        let mut spec = RequestSpec::new(method, target);
        spec.headers = options.headers;
        spec.skip_auth = options.skip_auth;
        if let Some(body) = body {
            spec = spec.json(body);
        }

        let timeout = options.timeout.unwrap_or(self.timeout);
        let delay = options.retry_delay.unwrap_or(self.retry_delay);

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(delay * attempt).await;
            }
            match self.attempt(&spec, timeout).await {
                Ok(payload) => return Ok(payload),
                Err(error) if error.retryable() && attempt < options.retries => {
                    tracing::warn!(target: "plaza.http", %error, attempt, "retrying request");
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn attempt(&self, spec: &RequestSpec, timeout: Duration) -> Result<Payload, ApiError> {
        let exchange = async {
            let response = self.dispatcher.dispatch(spec).await?;
            digest(response).await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ApiError::Timeout { elapsed: timeout }),
        }
    }

    pub async fn get(&self, target: &str, options: RequestOptions) -> Result<Payload, ApiError> {
        self.request(Method::GET, target, None, options).await
    }

    pub async fn post(
        &self,
        target: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<Payload, ApiError> {
        self.request(Method::POST, target, Some(body), options).await
    }

    pub async fn put(
        &self,
        target: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<Payload, ApiError> {
        self.request(Method::PUT, target, Some(body), options).await
    }

    pub async fn patch(
        &self,
        target: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<Payload, ApiError> {
        self.request(Method::PATCH, target, Some(body), options).await
    }

    pub async fn delete(&self, target: &str, options: RequestOptions) -> Result<Payload, ApiError> {
        self.request(Method::DELETE, target, None, options).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let value = self.get(target, options).await?.into_json()?;
        serde_json::from_value(value).map_err(|error| ApiError::Decode {
            message: error.to_string(),
        })
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        target: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let value = self.post(target, body, options).await?.into_json()?;
        serde_json::from_value(value).map_err(|error| ApiError::Decode {
            message: error.to_string(),
        })
    }

    /// Multipart upload with incremental progress. The file goes out as
    /// a streamed `file` part in fixed-size chunks, ticking the progress
    /// callback after each chunk. No automatic retry; a timeout applies
    /// only when the options carry one.
    pub async fn upload(
        &self,
        target: &str,
        source: UploadSource,
        options: RequestOptions,
        on_progress: Option<ProgressFn>,
    ) -> Result<Payload, ApiError> {
        let (file_name, content) = resolve_source(source).await?;
        let total = content.len() as u64;
        if total == 0 && let Some(tick) = &on_progress {
            tick(UploadProgress::new(0, 0));
        }

        let part = Part::stream_with_length(
            Body::wrap_stream(progress_chunks(content, on_progress)),
            total,
        )
        .file_name(file_name);
        let form = Form::new().part("file", part);

        let url = self.dispatcher.endpoint(target);
        let mut headers = options.headers;
        if !options.skip_auth {
            intercept::apply_auth_headers(&mut headers, self.dispatcher.store());
        }

        let request = self
            .dispatcher
            .client()
            .post(&url)
            .headers(headers)
            .multipart(form);
        let exchange = async {
            let response = request.send().await.map_err(|error| ApiError::Network {
                message: error.to_string(),
            })?;
            intercept::observe_response(response.status().as_u16(), &url, self.dispatcher.bus());
            digest(response).await
        };
        match options.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ApiError::Timeout { elapsed: timeout }),
            },
            None => exchange.await,
        }
    }
}

/// Turns a response into a payload or a classified error. Success bodies
/// parse by declared content type; error bodies contribute their
/// envelope detail.
pub(crate) async fn digest(response: Response) -> Result<Payload, ApiError> {
    let status = response.status().as_u16();
    let url = response.url().to_string();

    match classify_status(status) {
        StatusClass::Success => {
            if status == 204 {
                return Ok(Payload::Empty);
            }
            let json_declared = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.contains("json"));
            let text = response.text().await.map_err(|error| ApiError::Network {
                message: error.to_string(),
            })?;
            if json_declared {
                match serde_json::from_str(&text) {
                    Ok(value) => Ok(Payload::Json(value)),
                    Err(error) => Err(ApiError::Decode {
                        message: error.to_string(),
                    }),
                }
            } else {
                Ok(Payload::Text(text))
            }
        }
        StatusClass::Unauthorized => Err(ApiError::Unauthorized { url }),
        StatusClass::Forbidden => Err(ApiError::Forbidden { url }),
        StatusClass::ClientError => {
            let text = response.text().await.unwrap_or_default();
            Err(ApiError::Validation {
                status,
                message: ErrorBody::detail(&text)
                    .unwrap_or_else(|| "request rejected".to_string()),
            })
        }
        StatusClass::ServerError => {
            let text = response.text().await.unwrap_or_default();
            Err(ApiError::Server {
                status,
                message: ErrorBody::detail(&text).unwrap_or_else(|| "server error".to_string()),
            })
        }
    }
}

async fn resolve_source(source: UploadSource) -> Result<(String, Vec<u8>), ApiError> {
    match source {
        UploadSource::File(path) => {
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(ToString::to_string)
                .ok_or_else(|| ApiError::InvalidRequest {
                    message: format!("upload path has no file name: {}", path.display()),
                })?;
            let content =
                tokio::fs::read(&path)
                    .await
                    .map_err(|error| ApiError::InvalidRequest {
                        message: format!("cannot read {}: {error}", path.display()),
                    })?;
            Ok((file_name, content))
        }
        UploadSource::Bytes { file_name, content } => Ok((file_name, content)),
    }
}

fn progress_chunks(
    content: Vec<u8>,
    progress: Option<ProgressFn>,
) -> impl futures::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    let total = content.len() as u64;
    futures::stream::unfold(
        (content, 0usize, progress),
        move |(buffer, offset, progress)| async move {
            if offset >= buffer.len() {
                return None;
            }
            let end = usize::min(offset + UPLOAD_CHUNK_BYTES, buffer.len());
            let chunk = buffer[offset..end].to_vec();
            if let Some(tick) = &progress {
                tick(UploadProgress::new(end as u64, total));
            }
            Some((Ok(chunk), (buffer, end, progress)))
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::StreamExt;

    use super::{Payload, ProgressFn, RequestOptions, UploadProgress, progress_chunks};

    #[test]
    fn payload_json_view() {
        assert_eq!(
            Payload::Json(serde_json::json!({"a": 1}))
                .into_json()
                .ok(),
            Some(serde_json::json!({"a": 1}))
        );
        assert_eq!(Payload::Empty.into_json().ok(), Some(serde_json::Value::Null));
        assert!(Payload::Text("<html>".into()).into_json().is_err());
    }

    #[test]
    fn progress_percent_math() {
        assert_eq!(UploadProgress::new(0, 0).percent, 100);
        assert_eq!(UploadProgress::new(50, 200).percent, 25);
        assert_eq!(UploadProgress::new(200, 200).percent, 100);
    }

    #[test]
    fn options_compose() {
        let options = RequestOptions::default()
            .retries(2)
            .timeout(std::time::Duration::from_secs(5))
            .without_auth();
        assert_eq!(options.retries, 2);
        assert!(options.skip_auth);
        assert!(options.retry_delay.is_none());
    }

    #[tokio::test]
    async fn chunking_ticks_progress_monotonically() {
        let ticks: Arc<Mutex<Vec<UploadProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let progress: ProgressFn = Arc::new(move |update| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(update);
            }
        });

        let content = vec![7u8; 150 * 1024];
        let chunks: Vec<_> = progress_chunks(content, Some(progress)).collect().await;

        assert_eq!(chunks.len(), 3);
        let seen = ticks.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|pair| pair[0].loaded < pair[1].loaded));
        assert!(seen.windows(2).all(|pair| pair[0].percent <= pair[1].percent));
        assert_eq!(seen[2].percent, 100);
        assert_eq!(seen[2].loaded, 150 * 1024);
    }
}
