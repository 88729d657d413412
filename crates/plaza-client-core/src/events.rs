//! Typed session lifecycle events and their broadcast fan-out.

use tokio::sync::broadcast;

use crate::user::UserProfile;

/// Events buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

/// Everything panels may react to. This enum is the whole contract;
/// payload shapes are checked at compile time.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A login completed. The profile is absent when the follow-up
    /// profile fetch failed; the session itself is established either way.
    Login { user: Option<UserProfile> },
    Logout,
    /// The session ended because a refresh failed or the token ran out.
    TokenExpired,
    /// Some request observed a 401. Stage one of the expiry cascade.
    Unauthorized { url: String },
    /// Stage two: the session is actually dead.
    SessionExpired { url: String },
    /// The security layer finished wiring at shell start.
    SecurityReady,
    UserUpdated { user: UserProfile },
}

impl SessionEvent {
    /// Stable label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::TokenExpired => "token-expired",
            Self::Unauthorized { .. } => "unauthorized",
            Self::SessionExpired { .. } => "session-expired",
            Self::SecurityReady => "security-ready",
            Self::UserUpdated { .. } => "user-updated",
        }
    }
}

/// Process-wide fan-out for [`SessionEvent`]. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Delivery is best-effort: without subscribers the
    /// event is dropped, and that is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(target: "plaza.events", event = kind, receivers, "session event");
            }
            Err(_) => {
                tracing::debug!(target: "plaza.events", event = kind, "session event had no subscribers");
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}
