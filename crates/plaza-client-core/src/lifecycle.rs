//! Pure session lifecycle math: phase labels, refresh scheduling, and the
//! response-status classification every request path shares.

use chrono::{DateTime, Duration, Utc};

/// Seconds before expiry at which a proactive refresh runs.
pub const REFRESH_LEAD_SECONDS: i64 = 300;

/// Derived session phase. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    TwoFactorPending,
    Authenticated,
    Refreshing,
    Expired,
}

impl SessionPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::TwoFactorPending => "two-factor-pending",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
        }
    }
}

/// What to do about the refresh timer for the token at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDirective {
    /// Arm a one-shot timer for this delay.
    ArmIn(std::time::Duration),
    /// The lead window already opened; refresh immediately.
    RefreshNow,
    /// The token is past expiry. Clear locally; a refresh attempt would
    /// only bounce, and redirecting at boot would loop.
    AlreadyExpired,
}

/// Plans the proactive refresh for a token expiring at `expires_at`,
/// aiming `lead_seconds` ahead of the expiry.
#[must_use]
pub fn plan_refresh(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    lead_seconds: i64,
) -> RefreshDirective {
    if now >= expires_at {
        return RefreshDirective::AlreadyExpired;
    }
    let refresh_at = expires_at - Duration::seconds(lead_seconds);
    if refresh_at <= now {
        return RefreshDirective::RefreshNow;
    }
    match (refresh_at - now).to_std() {
        Ok(delay) => RefreshDirective::ArmIn(delay),
        Err(_) => RefreshDirective::RefreshNow,
    }
}

/// Coarse response classification. One implementation so the three
/// request adapters cannot drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// The session credential was rejected. Feeds the expiry cascade.
    Unauthorized,
    /// Authenticated but not permitted. Never feeds the cascade.
    Forbidden,
    ClientError,
    ServerError,
}

#[must_use]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Unauthorized,
        403 => StatusClass::Forbidden,
        400..=499 => StatusClass::ClientError,
        _ => StatusClass::ServerError,
    }
}
