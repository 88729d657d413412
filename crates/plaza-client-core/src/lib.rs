//! State and protocol core for the Plaza client shell: storage tiers, the
//! token store, session lifecycle events, and the pure lifecycle math shared
//! by every request path. Nothing in this crate touches the network.
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod input;
pub mod lifecycle;
pub mod storage;
pub mod store;
pub mod user;

pub use events::{SessionEvent, SessionEventBus};
pub use lifecycle::{RefreshDirective, SessionPhase, StatusClass, classify_status, plan_refresh};
pub use storage::{FileTier, MemoryTier, StorageTier};
pub use store::{AuthHeaders, TokenStore};
pub use user::UserProfile;
