//! Two-tier credential store shared by every request path.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::storage::StorageTier;
use crate::user::UserProfile;

/// Storage keys. The same namespace is used in both tiers; the read path
/// checks the persistent tier first so a session created elsewhere wins.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "plaza-access-token";
    pub const REFRESH_TOKEN: &str = "plaza-refresh-token";
    pub const SESSION_ID: &str = "plaza-session-id";
    pub const TOKEN_EXPIRES: &str = "plaza-token-expires";
    pub const USER: &str = "plaza-user";
    pub const REMEMBER: &str = "plaza-remember";

    pub const ALL: [&str; 6] = [
        ACCESS_TOKEN,
        REFRESH_TOKEN,
        SESSION_ID,
        TOKEN_EXPIRES,
        USER,
        REMEMBER,
    ];
}

/// Credential snapshot handed to the request adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeaders {
    /// Full `Authorization` header value, already in `Bearer` form.
    pub authorization: Option<String>,
    pub session_id: Option<String>,
}

/// Owner of every persisted session field.
///
/// Writes pick exactly one tier and evict the session from the other, so
/// the two tiers are never both populated for the same key. `clear` wipes
/// both unconditionally. Clones share the tiers.
#[derive(Clone)]
pub struct TokenStore {
    persistent: Arc<dyn StorageTier>,
    ephemeral: Arc<dyn StorageTier>,
}

impl TokenStore {
    pub fn new(persistent: Arc<dyn StorageTier>, ephemeral: Arc<dyn StorageTier>) -> Self {
        Self {
            persistent,
            ephemeral,
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        self.persistent
            .get(key)
            .or_else(|| self.ephemeral.get(key))
    }

    /// Selected tier first, evicted tier second.
    fn tiers(&self, persistent: bool) -> (&dyn StorageTier, &dyn StorageTier) {
        if persistent {
            (self.persistent.as_ref(), self.ephemeral.as_ref())
        } else {
            (self.ephemeral.as_ref(), self.persistent.as_ref())
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read(keys::ACCESS_TOKEN)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.read(keys::REFRESH_TOKEN)
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.read(keys::SESSION_ID)
    }

    /// Stores a token grant in the tier selected by `persistent`.
    ///
    /// `expires_in_seconds` is turned into an absolute expiry at write time.
    /// Passing `refresh: None` drops any stored refresh token; callers that
    /// want to keep one across a rotation pass the previous value through.
    pub fn set_tokens(
        &self,
        access: &str,
        refresh: Option<&str>,
        expires_in_seconds: Option<i64>,
        persistent: bool,
    ) {
        let (selected, evicted) = self.tiers(persistent);
        for key in keys::ALL {
            evicted.remove(key);
        }

        selected.put(keys::ACCESS_TOKEN, access);
        match refresh {
            Some(refresh) => selected.put(keys::REFRESH_TOKEN, refresh),
            None => selected.remove(keys::REFRESH_TOKEN),
        }
        match expires_in_seconds {
            Some(seconds) => {
                let expires_at = Utc::now() + chrono::Duration::seconds(seconds);
                selected.put(
                    keys::TOKEN_EXPIRES,
                    &expires_at.timestamp_millis().to_string(),
                );
            }
            None => selected.remove(keys::TOKEN_EXPIRES),
        }
        selected.put(keys::REMEMBER, if persistent { "true" } else { "false" });
    }

    pub fn set_session_id(&self, session_id: &str, persistent: bool) {
        let (selected, evicted) = self.tiers(persistent);
        evicted.remove(keys::SESSION_ID);
        selected.put(keys::SESSION_ID, session_id);
    }

    /// Removes every session key from both tiers.
    pub fn clear(&self) {
        for key in keys::ALL {
            self.persistent.remove(key);
            self.ephemeral.remove(key);
        }
    }

    /// True iff a token exists and has not passed its expiry. A token with
    /// no stored expiry never expires locally; a malformed expiry value is
    /// treated the same way.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.access_token().is_none() {
            return false;
        }
        match self.expires_at() {
            Some(expires_at) => Utc::now() < expires_at,
            None => true,
        }
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.read(keys::TOKEN_EXPIRES)?;
        let millis = raw.parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Whether the current session asked to survive shell restarts.
    #[must_use]
    pub fn remember(&self) -> bool {
        self.read(keys::REMEMBER).as_deref() == Some("true")
    }

    /// Mirrors the fetched profile next to the session it belongs to.
    pub fn cache_user(&self, user: &UserProfile, persistent: bool) {
        let encoded = match serde_json::to_string(user) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(target: "plaza.storage", error = %error, "user profile not cached");
                return;
            }
        };
        let (selected, evicted) = self.tiers(persistent);
        evicted.remove(keys::USER);
        selected.put(keys::USER, &encoded);
    }

    #[must_use]
    pub fn cached_user(&self) -> Option<UserProfile> {
        let raw = self.read(keys::USER)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(error) => {
                tracing::warn!(target: "plaza.storage", error = %error, "ignoring corrupt cached user");
                None
            }
        }
    }

    /// Credential snapshot for the interceptor layer.
    #[must_use]
    pub fn auth_headers(&self) -> AuthHeaders {
        AuthHeaders {
            authorization: self.access_token().map(|token| format!("Bearer {token}")),
            session_id: self.session_id(),
        }
    }
}
