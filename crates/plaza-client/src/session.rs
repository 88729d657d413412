//! Session orchestration: login, two-factor verification, logout,
//! proactive and reactive refresh, and the unauthorized/expiry cascade.
//!
//! The manager owns the refresh timer and the terminal "navigating"
//! flag. Timers never call back into the manager directly; they post a
//! command that the listener task executes, so there is exactly one
//! place where a refresh can start.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use plaza_client_core::input::{normalize_identifier, normalize_verification_code};
use plaza_client_core::lifecycle::{RefreshDirective, SessionPhase, plan_refresh};
use plaza_client_core::{SessionEvent, SessionEventBus, TokenStore, UserProfile};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::api::{Payload, digest};
use crate::config::ClientConfig;
use crate::dispatch::{HttpDispatcher, RequestSpec};
use crate::error::{ApiError, AuthError, classify_login_failure, classify_verify_failure};
use crate::intercept::SESSION_ID_HEADER;
use crate::wire::{
    CASCADE_EXEMPT_PATHS, LOGIN_PATH, LOGOUT_PATH, LoginRequest, ME_PATH, REFRESH_PATH,
    RESEND_2FA_PATH, RefreshRequest, ResendTwoFactorRequest, SessionGrant, VERIFY_2FA_PATH,
    VerifyTwoFactorRequest,
};

/// Shell navigation seam. The manager decides when to move; the shell
/// owns how.
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> String;
    fn navigate(&self, location: &str);
}

/// Navigator for embeddings without a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct InertNavigator;

impl Navigator for InertNavigator {
    fn current_location(&self) -> String {
        "/".to_string()
    }

    fn navigate(&self, _location: &str) {}
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated { user: Option<UserProfile> },
    TwoFactorRequired { challenge_handle: String },
}

struct PendingChallenge {
    handle: String,
    last_sent: tokio::time::Instant,
}

enum SessionCommand {
    RefreshDue,
}

#[derive(Clone)]
pub struct SessionManager {
    config: Arc<ClientConfig>,
    store: TokenStore,
    bus: SessionEventBus,
    dispatcher: HttpDispatcher,
    navigator: Arc<dyn Navigator>,
    user: Arc<RwLock<Option<UserProfile>>>,
    challenge: Arc<Mutex<Option<PendingChallenge>>>,
    authenticating: Arc<AtomicBool>,
    refresh_in_flight: Arc<AtomicBool>,
    /// Bumped once per completed refresh flight. A waiter that entered
    /// before the bump adopts the flight's outcome instead of starting
    /// its own.
    refresh_epoch: Arc<AtomicU64>,
    /// Serializes flights and holds the last outcome for late waiters.
    refresh_gate: Arc<tokio::sync::Mutex<bool>>,
    refresh_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Claimed by the first expiry; makes the terminal transition run
    /// once no matter how many 401s race in.
    navigating: Arc<AtomicBool>,
    commands: UnboundedSender<SessionCommand>,
    command_feed: Arc<Mutex<Option<UnboundedReceiver<SessionCommand>>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        config: ClientConfig,
        store: TokenStore,
        bus: SessionEventBus,
        dispatcher: HttpDispatcher,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (commands, command_feed) = mpsc::unbounded_channel();
        let cached = store.cached_user();
        Self {
            config: Arc::new(config),
            store,
            bus,
            dispatcher,
            navigator,
            user: Arc::new(RwLock::new(cached)),
            challenge: Arc::new(Mutex::new(None)),
            authenticating: Arc::new(AtomicBool::new(false)),
            refresh_in_flight: Arc::new(AtomicBool::new(false)),
            refresh_epoch: Arc::new(AtomicU64::new(0)),
            refresh_gate: Arc::new(tokio::sync::Mutex::new(false)),
            refresh_task: Arc::new(Mutex::new(None)),
            navigating: Arc::new(AtomicBool::new(false)),
            commands,
            command_feed: Arc::new(Mutex::new(Some(command_feed))),
        }
    }

    /// Starts the listener that runs due refreshes and escalates
    /// unauthorized responses. Call once, from within the runtime.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let mut events = self.bus.subscribe();
        let feed = self
            .command_feed
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        let manager = self.clone();
        tokio::spawn(async move {
            let Some(mut commands) = feed else {
                tracing::warn!(target: "plaza.auth", "session listener already running");
                return;
            };
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(SessionEvent::Unauthorized { url }) => {
                            manager.escalate_unauthorized(&url);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(
                                target: "plaza.auth",
                                missed,
                                "session listener lagged"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    command = commands.recv() => match command {
                        Some(SessionCommand::RefreshDue) => {
                            let _ = manager.refresh().await;
                        }
                        None => break,
                    },
                }
            }
        })
    }

    /// Evaluates the stored session at boot: arms the timer, refreshes,
    /// or quietly clears a session that expired while the app was gone.
    pub fn resume(&self) {
        tracing::debug!(target: "plaza.auth", "resuming stored session");
        self.schedule_refresh();
    }

    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        remember: bool,
    ) -> Result<LoginOutcome, AuthError> {
        let identifier = normalize_identifier(identifier)?;
        if secret.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        self.authenticating.store(true, Ordering::Release);
        let outcome = self.perform_login(&identifier, secret, remember).await;
        self.authenticating.store(false, Ordering::Release);
        outcome
    }

    async fn perform_login(
        &self,
        identifier: &str,
        secret: &str,
        remember: bool,
    ) -> Result<LoginOutcome, AuthError> {
        let spec = RequestSpec::new(Method::POST, LOGIN_PATH)
            .json(encode(&LoginRequest {
                identifier,
                secret,
                remember,
            }))
            .without_auth();
        let grant = self
            .exchange_for_grant(&spec)
            .await
            .map_err(classify_login_failure)?;

        if grant.requires_two_factor {
            let Some(handle) = grant.challenge_handle else {
                return Err(AuthError::Api(ApiError::Decode {
                    message: "two-factor response without a challenge handle".into(),
                }));
            };
            if let Ok(mut slot) = self.challenge.lock() {
                *slot = Some(PendingChallenge {
                    handle: handle.clone(),
                    last_sent: tokio::time::Instant::now(),
                });
            }
            tracing::info!(target: "plaza.auth", "two-factor challenge issued");
            return Ok(LoginOutcome::TwoFactorRequired {
                challenge_handle: handle,
            });
        }

        let Some(access) = grant.access_token.as_deref() else {
            return Err(AuthError::Api(ApiError::Decode {
                message: "login response without an access token".into(),
            }));
        };
        self.install_session(
            access,
            grant.refresh_token.as_deref(),
            grant.expires_in,
            grant.session_id.as_deref(),
            remember,
        );
        if let Ok(mut slot) = self.challenge.lock() {
            *slot = None;
        }
        let user = self.fetch_current_user().await.ok().flatten();
        self.bus.emit(SessionEvent::Login { user: user.clone() });
        tracing::info!(target: "plaza.auth", "login completed");
        Ok(LoginOutcome::Authenticated { user })
    }

    /// Completes a pending challenge. A wrong code leaves the challenge
    /// standing for another try; an expired challenge drops it, and the
    /// next step is a fresh login.
    pub async fn verify_two_factor(
        &self,
        challenge_handle: &str,
        code: &str,
        trust_device: bool,
    ) -> Result<Option<UserProfile>, AuthError> {
        let code = normalize_verification_code(code)?;
        let pending = self
            .challenge
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|pending| pending.handle.clone()));
        if pending.as_deref() != Some(challenge_handle) {
            return Err(AuthError::TwoFactorRequired);
        }

        let spec = RequestSpec::new(Method::POST, VERIFY_2FA_PATH)
            .json(encode(&VerifyTwoFactorRequest {
                challenge_handle,
                code: &code,
                trust_device,
            }))
            .without_auth();
        let grant = match self.exchange_for_grant(&spec).await {
            Ok(grant) => grant,
            Err(error) => return Err(self.classify_challenge_failure(error)),
        };

        let Some(access) = grant.access_token.as_deref() else {
            return Err(AuthError::Api(ApiError::Decode {
                message: "verification response without an access token".into(),
            }));
        };
        self.install_session(
            access,
            grant.refresh_token.as_deref(),
            grant.expires_in,
            grant.session_id.as_deref(),
            trust_device,
        );
        if let Ok(mut slot) = self.challenge.lock() {
            *slot = None;
        }
        let user = self.fetch_current_user().await.ok().flatten();
        self.bus.emit(SessionEvent::Login { user: user.clone() });
        tracing::info!(target: "plaza.auth", "two-factor verification completed");
        Ok(user)
    }

    /// Asks the server to send a fresh code. Sends for the same
    /// challenge are spaced by the configured minimum interval no matter
    /// what the UI shows.
    pub async fn resend_two_factor(&self, challenge_handle: &str) -> Result<(), AuthError> {
        let now = tokio::time::Instant::now();
        {
            let Ok(mut slot) = self.challenge.lock() else {
                return Err(AuthError::TwoFactorRequired);
            };
            let Some(pending) = slot.as_mut() else {
                return Err(AuthError::TwoFactorRequired);
            };
            if pending.handle != challenge_handle {
                return Err(AuthError::TwoFactorRequired);
            }
            let since_last = now.duration_since(pending.last_sent);
            if since_last < self.config.resend_min_interval {
                return Err(AuthError::ResendThrottled {
                    retry_after: self.config.resend_min_interval - since_last,
                });
            }
            pending.last_sent = now;
        }

        let spec = RequestSpec::new(Method::POST, RESEND_2FA_PATH)
            .json(encode(&ResendTwoFactorRequest { challenge_handle }))
            .without_auth();
        match self.exchange(&spec).await {
            Ok(_) => Ok(()),
            Err(error) => Err(self.classify_challenge_failure(error)),
        }
    }

    fn classify_challenge_failure(&self, error: ApiError) -> AuthError {
        let classified = classify_verify_failure(error);
        if matches!(classified, AuthError::ChallengeExpired)
            && let Ok(mut slot) = self.challenge.lock()
        {
            *slot = None;
        }
        classified
    }

    /// Exchanges the refresh token for a new grant. Returns `false`
    /// without a refresh token. Concurrent callers share one flight and
    /// its outcome; only the flight itself touches the wire, and only
    /// the flight escalates a failure.
    pub async fn refresh(&self) -> bool {
        if self.store.refresh_token().is_none() {
            return false;
        }
        let entered_at = self.refresh_epoch.load(Ordering::Acquire);
        let mut outcome_slot = self.refresh_gate.lock().await;
        if self.refresh_epoch.load(Ordering::Acquire) != entered_at {
            return *outcome_slot;
        }

        self.refresh_in_flight.store(true, Ordering::Release);
        let refreshed = self.perform_refresh().await;
        self.refresh_in_flight.store(false, Ordering::Release);
        *outcome_slot = refreshed;
        self.refresh_epoch.fetch_add(1, Ordering::AcqRel);

        if !refreshed {
            self.handle_refresh_failure();
        }
        refreshed
    }

    async fn perform_refresh(&self) -> bool {
        let Some(refresh_token) = self.store.refresh_token() else {
            return false;
        };
        let spec = RequestSpec::new(Method::POST, REFRESH_PATH)
            .json(encode(&RefreshRequest {
                refresh_token: &refresh_token,
            }))
            .without_auth();

        let grant: SessionGrant = match self.exchange_for_grant(&spec).await {
            Ok(grant) => grant,
            Err(error) => {
                tracing::warn!(target: "plaza.auth", %error, "refresh rejected");
                return false;
            }
        };
        let Some(access) = grant.access_token.as_deref() else {
            tracing::warn!(target: "plaza.auth", "refresh response without an access token");
            return false;
        };

        // A grant that omits the refresh token keeps the current one.
        let kept = grant.refresh_token.or(Some(refresh_token));
        self.install_session(
            access,
            kept.as_deref(),
            grant.expires_in,
            grant.session_id.as_deref(),
            self.store.remember(),
        );
        tracing::debug!(target: "plaza.auth", "session refreshed");
        true
    }

    /// Best-effort server notification, then local teardown and a move
    /// to the login route. Cleanup happens first so a rejection of the
    /// notification cannot re-enter the expiry cascade.
    pub async fn logout(&self) {
        let access = self.store.access_token();
        let session_id = self.store.session_id();
        self.clear_local_session();
        self.bus.emit(SessionEvent::Logout);
        tracing::info!(target: "plaza.auth", "logged out");

        if let Some(token) = access {
            let mut spec = RequestSpec::new(Method::POST, LOGOUT_PATH).without_auth();
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                spec.headers.insert(AUTHORIZATION, value);
            }
            if let Some(session_id) = session_id
                && let Ok(value) = HeaderValue::from_str(&session_id)
            {
                spec.headers.insert(SESSION_ID_HEADER, value);
            }
            if let Err(error) = self.exchange(&spec).await {
                tracing::warn!(target: "plaza.auth", %error, "logout notification failed");
            }
        }
        self.navigator.navigate(&self.config.login_route);
    }

    /// Fetches the profile behind the current token. A 401 means the
    /// token is already dead: the session is cleared quietly and `None`
    /// comes back.
    pub async fn fetch_current_user(&self) -> Result<Option<UserProfile>, ApiError> {
        let spec = RequestSpec::new(Method::GET, ME_PATH);
        match self.exchange(&spec).await {
            Ok(payload) => {
                let value = payload.into_json()?;
                let user: UserProfile =
                    serde_json::from_value(value).map_err(|error| ApiError::Decode {
                        message: error.to_string(),
                    })?;
                self.store.cache_user(&user, self.store.remember());
                self.set_cached_user(Some(user.clone()));
                self.bus.emit(SessionEvent::UserUpdated { user: user.clone() });
                Ok(Some(user))
            }
            Err(ApiError::Unauthorized { .. }) => {
                tracing::debug!(target: "plaza.auth", "profile fetch rejected; clearing session");
                self.clear_local_session();
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<UserProfile> {
        self.user.read().ok().and_then(|slot| slot.clone())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.store.is_valid()
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.current_user().is_some_and(|user| user.has_role(role))
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.current_user().is_some_and(|user| user.has_any_role(roles))
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.current_user().is_some_and(|user| user.is_admin())
    }

    /// Derived phase, computed from flags and the store.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.authenticating.load(Ordering::Acquire) {
            return SessionPhase::Authenticating;
        }
        if self
            .challenge
            .lock()
            .ok()
            .is_some_and(|slot| slot.is_some())
        {
            return SessionPhase::TwoFactorPending;
        }
        if self.refresh_in_flight.load(Ordering::Acquire) {
            return SessionPhase::Refreshing;
        }
        if self.store.is_valid() {
            return SessionPhase::Authenticated;
        }
        if self.store.access_token().is_some() {
            return SessionPhase::Expired;
        }
        SessionPhase::Anonymous
    }

    fn install_session(
        &self,
        access: &str,
        refresh: Option<&str>,
        expires_in: Option<i64>,
        session_id: Option<&str>,
        persistent: bool,
    ) {
        self.store.set_tokens(access, refresh, expires_in, persistent);
        if let Some(session_id) = session_id {
            self.store.set_session_id(session_id, persistent);
        }
        self.navigating.store(false, Ordering::Release);
        self.schedule_refresh();
    }

    /// Cancels any armed timer and plans the next refresh for the stored
    /// expiry. Timers only post a command; the listener runs the actual
    /// refresh.
    fn schedule_refresh(&self) {
        self.cancel_refresh_timer();
        let Some(expires_at) = self.store.expires_at() else {
            return;
        };
        match plan_refresh(expires_at, Utc::now(), self.config.refresh_lead_seconds) {
            RefreshDirective::ArmIn(delay) => {
                tracing::debug!(target: "plaza.auth", delay_seconds = delay.as_secs(), "refresh timer armed");
                let commands = self.commands.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = commands.send(SessionCommand::RefreshDue);
                });
                if let Ok(mut slot) = self.refresh_task.lock() {
                    *slot = Some(handle);
                }
            }
            RefreshDirective::RefreshNow => {
                tracing::debug!(target: "plaza.auth", "inside refresh lead; refreshing now");
                let _ = self.commands.send(SessionCommand::RefreshDue);
            }
            RefreshDirective::AlreadyExpired => {
                tracing::info!(
                    target: "plaza.auth",
                    "stored session already expired; clearing locally"
                );
                self.clear_local_session();
            }
        }
    }

    fn cancel_refresh_timer(&self) {
        if let Ok(mut slot) = self.refresh_task.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }

    fn handle_refresh_failure(&self) {
        tracing::warn!(target: "plaza.auth", "session refresh failed");
        self.bus.emit(SessionEvent::TokenExpired);
        self.expire_session(None);
    }

    /// Filter in front of the terminal transition: auth endpoints answer
    /// 401 as part of their own protocol, public workspaces never
    /// redirect, anonymous visitors have nothing to expire, and a shell
    /// already at the login page stays put.
    fn escalate_unauthorized(&self, url: &str) {
        if CASCADE_EXEMPT_PATHS.iter().any(|path| url.contains(path)) {
            return;
        }
        if self.config.public_workspace {
            return;
        }
        if self.store.access_token().is_none() {
            return;
        }
        if self
            .navigator
            .current_location()
            .starts_with(&self.config.login_route)
        {
            return;
        }
        tracing::info!(target: "plaza.auth", url, "unauthorized response escalated");
        self.expire_session(Some(url));
    }

    /// Terminal transition. The first caller claims it; everyone after
    /// is a no-op until a successful authentication re-arms it.
    fn expire_session(&self, url: Option<&str>) {
        if self
            .navigating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let current = self.navigator.current_location();
        self.bus.emit(SessionEvent::SessionExpired {
            url: url.unwrap_or(&current).to_string(),
        });
        self.clear_local_session();

        if current.starts_with(&self.config.login_route) {
            return;
        }
        let destination = format!(
            "{}?expired=1&redirect={}",
            self.config.login_route,
            urlencoding::encode(&current)
        );
        self.navigator.navigate(&destination);
    }

    fn clear_local_session(&self) {
        self.cancel_refresh_timer();
        self.store.clear();
        self.set_cached_user(None);
        if let Ok(mut slot) = self.challenge.lock() {
            *slot = None;
        }
    }

    fn set_cached_user(&self, user: Option<UserProfile>) {
        if let Ok(mut slot) = self.user.write() {
            *slot = user;
        }
    }

    async fn exchange(&self, spec: &RequestSpec) -> Result<Payload, ApiError> {
        let response = self.dispatcher.dispatch(spec).await?;
        digest(response).await
    }

    async fn exchange_for_grant(&self, spec: &RequestSpec) -> Result<SessionGrant, ApiError> {
        let value = self.exchange(spec).await?.into_json()?;
        serde_json::from_value(value).map_err(|error| ApiError::Decode {
            message: error.to_string(),
        })
    }
}

fn encode<T: serde::Serialize>(payload: &T) -> serde_json::Value {
    serde_json::to_value(payload).unwrap_or_default()
}
