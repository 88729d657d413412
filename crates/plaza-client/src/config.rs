//! Client configuration. Constructed by the embedding shell, with a
//! couple of environment overrides for deployments.

use std::path::PathBuf;
use std::time::Duration;

use plaza_client_core::input::normalize_base_url;
use plaza_client_core::lifecycle::REFRESH_LEAD_SECONDS;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_LOGIN_ROUTE: &str = "/auth/login";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RESEND_MIN_INTERVAL: Duration = Duration::from_secs(60);

const ENV_BASE_URL: &str = "PLAZA_API_BASE_URL";
const ENV_DATA_DIR: &str = "PLAZA_DATA_DIR";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Shell route of the login page. The expiry cascade lands here.
    pub login_route: String,
    pub refresh_lead_seconds: i64,
    pub resend_min_interval: Duration,
    pub request_timeout: Duration,
    pub retry_delay: Duration,
    /// Public workspaces render without a session; 401s there must not
    /// bounce the visitor to the login page.
    pub public_workspace: bool,
    /// Directory for the persistent tier. `None` picks the platform
    /// default.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            refresh_lead_seconds: REFRESH_LEAD_SECONDS,
            resend_min_interval: DEFAULT_RESEND_MIN_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            public_workspace: false,
            data_dir: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults plus whatever the environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `PLAZA_API_BASE_URL` and `PLAZA_DATA_DIR` when set. An
    /// unusable base URL is logged and ignored rather than breaking boot.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(ENV_BASE_URL) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                match normalize_base_url(trimmed) {
                    Ok(normalized) => self.base_url = normalized,
                    Err(error) => {
                        tracing::warn!(
                            target: "plaza.security",
                            %error,
                            value = trimmed,
                            "ignoring {ENV_BASE_URL} override"
                        );
                    }
                }
            }
        }
        if let Ok(raw) = std::env::var(ENV_DATA_DIR) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.data_dir = Some(PathBuf::from(trimmed));
            }
        }
        self
    }
}
