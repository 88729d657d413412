//! Wire contracts for the session endpoints. Request bodies borrow, the
//! grant owns; field names follow the server's camelCase JSON.

use serde::{Deserialize, Serialize};

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const VERIFY_2FA_PATH: &str = "/api/auth/2fa/verify";
pub const RESEND_2FA_PATH: &str = "/api/auth/2fa/resend";
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const ME_PATH: &str = "/api/auth/me";

/// Paths the unauthorized cascade must never escalate on. A rejected
/// login is a failed attempt, not an expired session, and a rejected
/// refresh is already handled by the refresh failure path.
pub const CASCADE_EXEMPT_PATHS: [&str; 2] = [LOGIN_PATH, REFRESH_PATH];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub secret: &'a str,
    pub remember: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTwoFactorRequest<'a> {
    pub challenge_handle: &'a str,
    pub code: &'a str,
    pub trust_device: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendTwoFactorRequest<'a> {
    pub challenge_handle: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Session grant returned by login, verify, and refresh. Login answers
/// with only `requiresTwoFactor` and `challengeHandle` set when a second
/// factor is pending.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, not an absolute timestamp.
    pub expires_in: Option<i64>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub requires_two_factor: bool,
    pub challenge_handle: Option<String>,
}
