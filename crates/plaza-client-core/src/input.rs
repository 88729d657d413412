//! Normalization for values the user types before they reach the wire.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("identifier must not be empty")]
    EmptyIdentifier,
    #[error("verification code must not be empty")]
    EmptyVerificationCode,
    #[error("verification code must be six digits")]
    InvalidVerificationCode,
}

/// Lowercases and trims a login identifier (email or account name).
pub fn normalize_identifier(raw: &str) -> Result<String, AuthInputError> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(AuthInputError::EmptyIdentifier);
    }
    Ok(normalized)
}

/// Reduces a second-factor code to its six digits, tolerating the spaces
/// and separators people paste along with it.
pub fn normalize_verification_code(raw: &str) -> Result<String, AuthInputError> {
    let collapsed = raw.split_whitespace().collect::<String>();
    if collapsed.is_empty() {
        return Err(AuthInputError::EmptyVerificationCode);
    }

    let digits = collapsed
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect::<String>();
    if digits.len() != 6 {
        return Err(AuthInputError::InvalidVerificationCode);
    }
    Ok(digits)
}

/// Validates an API base URL and drops any trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or(AuthInputError::InvalidBaseUrl)?;
    if without_scheme.is_empty() || without_scheme.starts_with('/') {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
