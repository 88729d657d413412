//! Plaza's session and request-authorization layer: the session
//! manager, the token store wiring, and the three request adapters
//! that share one credential seam and one 401 cascade.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
mod intercept;
pub mod legacy;
pub mod panel;
pub mod session;
pub mod wire;

pub use api::{ApiClient, Payload, ProgressFn, RequestOptions, UploadProgress, UploadSource};
pub use bootstrap::SecurityServices;
pub use config::ClientConfig;
pub use dispatch::{HttpDispatcher, RequestBody, RequestSpec};
pub use error::{ApiError, AuthError};
pub use legacy::{LegacyGateway, LegacyRequest, LegacyResponse};
pub use panel::{ActionOutcome, ActionVerb, PanelAction, PanelActionRunner};
pub use plaza_client_core::lifecycle::SessionPhase;
pub use plaza_client_core::{SessionEvent, SessionEventBus, TokenStore, UserProfile};
pub use session::{InertNavigator, LoginOutcome, Navigator, SessionManager};
