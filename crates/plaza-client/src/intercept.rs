//! The shared request/response seam. Every adapter builds headers and
//! observes responses through these two functions, so the cascade sees
//! every 401 exactly the same way.

use plaza_client_core::lifecycle::{StatusClass, classify_status};
use plaza_client_core::{SessionEvent, SessionEventBus, TokenStore};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

pub(crate) const SESSION_ID_HEADER: &str = "x-session-id";

/// Fills the session headers in, never overwriting caller-provided
/// values.
pub(crate) fn apply_auth_headers(headers: &mut HeaderMap, store: &TokenStore) {
    let auth = store.auth_headers();
    if !headers.contains_key(AUTHORIZATION)
        && let Some(value) = auth.authorization
        && let Ok(parsed) = HeaderValue::from_str(&value)
    {
        headers.insert(AUTHORIZATION, parsed);
    }
    if !headers.contains_key(SESSION_ID_HEADER)
        && let Some(value) = auth.session_id
        && let Ok(parsed) = HeaderValue::from_str(&value)
    {
        headers.insert(SESSION_ID_HEADER, parsed);
    }
}

/// Classifies the response and feeds a 401 into the session bus. The
/// emitting side never decides about redirects; that stays with the
/// session listener.
pub(crate) fn observe_response(status: u16, url: &str, bus: &SessionEventBus) -> StatusClass {
    let class = classify_status(status);
    if class == StatusClass::Unauthorized {
        tracing::debug!(target: "plaza.http", url, "unauthorized response");
        bus.emit(SessionEvent::Unauthorized {
            url: url.to_string(),
        });
    }
    class
}
