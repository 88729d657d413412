//! Boot wiring. One call builds the storage tiers, the bus, the
//! dispatcher, the three adapters, and the session manager, then
//! resumes whatever session survived the last run.

use std::sync::Arc;

use plaza_client_core::storage::{FileTier, MemoryTier};
use plaza_client_core::{SessionEvent, SessionEventBus, TokenStore};
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::dispatch::HttpDispatcher;
use crate::legacy::LegacyGateway;
use crate::panel::PanelActionRunner;
use crate::session::{Navigator, SessionManager};

/// The assembled session layer. Shells hold one of these for the life
/// of the process.
pub struct SecurityServices {
    pub config: ClientConfig,
    pub store: TokenStore,
    pub bus: SessionEventBus,
    pub session: SessionManager,
    pub api: ApiClient,
    pub actions: PanelActionRunner,
    pub legacy: LegacyGateway,
    listener: JoinHandle<()>,
}

impl SecurityServices {
    /// Builds the stack, starts the session listener, and evaluates any
    /// stored session. Runs within the runtime. Never fails: an
    /// unusable data directory degrades to storage warnings, not a
    /// failed boot.
    #[must_use]
    pub fn initialize(config: ClientConfig, navigator: Arc<dyn Navigator>) -> Self {
        let document = config
            .data_dir
            .as_deref()
            .map_or_else(FileTier::default_path, FileTier::document_path);
        tracing::info!(
            target: "plaza.security",
            document = %document.display(),
            base_url = config.base_url,
            "initializing session layer"
        );

        let store = TokenStore::new(
            Arc::new(FileTier::open(document)),
            Arc::new(MemoryTier::new()),
        );
        let bus = SessionEventBus::new();
        let dispatcher = HttpDispatcher::new(&config.base_url, store.clone(), bus.clone());

        let session = SessionManager::new(
            config.clone(),
            store.clone(),
            bus.clone(),
            dispatcher.clone(),
            navigator,
        );
        let listener = session.spawn_listener();
        session.resume();

        let api = ApiClient::new(dispatcher.clone(), &config);
        let actions = PanelActionRunner::new(dispatcher.clone());
        let legacy = LegacyGateway::new(dispatcher);

        bus.emit(SessionEvent::SecurityReady);
        Self {
            config,
            store,
            bus,
            session,
            api,
            actions,
            legacy,
            listener,
        }
    }

    /// Stops the session listener. Armed refresh timers die with their
    /// manager; this only tears down the long-lived task.
    pub fn shutdown(&self) {
        self.listener.abort();
        tracing::info!(target: "plaza.security", "session layer stopped");
    }
}
