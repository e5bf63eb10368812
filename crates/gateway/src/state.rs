//! Shared application state passed to all transports and RPC handlers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use coda_domain::config::Config;
use coda_domain::error::Result;
use coda_domain::event::AgentEvent;
use coda_extensions::{Extension, ExtensionBus, UiBridge};
use coda_providers::{CredentialCache, ProviderRegistry};
use coda_sessions::SessionLog;
use coda_tools::process::ProcessManager;
use coda_tools::ToolRegistry;

use crate::api::events::EventBroadcaster;
use crate::runtime::Scheduler;

/// Everything the transports share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,
    pub creds: Arc<CredentialCache>,

    // ── Tools & extensions ────────────────────────────────────────────
    pub processes: Arc<ProcessManager>,
    pub tools: Arc<ToolRegistry>,
    pub bus: Arc<ExtensionBus>,
    pub ui: Arc<UiBridge>,

    // ── Event & session plane ─────────────────────────────────────────
    pub events: EventBroadcaster,
    /// The session currently exposed by the control plane. Swapped by
    /// `new_session` / `switch_session`.
    scheduler: Arc<RwLock<Arc<Scheduler>>>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    pub shutdown: CancellationToken,
    ready: Arc<AtomicBool>,
    /// The most recent host-initiated `bash` process, for `abort_bash`.
    pub current_bash: Arc<Mutex<Option<String>>>,
}

impl AppState {
    /// Build the full application state and open (or create) the initial
    /// session.
    pub async fn build(config: Arc<Config>, extensions: Vec<Arc<dyn Extension>>) -> Result<Self> {
        let creds = Arc::new(CredentialCache::new());
        let providers = Arc::new(ProviderRegistry::from_config(&config.llm, creds.clone())?);
        Self::build_with_providers(config, extensions, providers, creds).await
    }

    /// Build with an already-constructed provider registry (embedded
    /// hosts, tests with scripted providers).
    pub async fn build_with_providers(
        config: Arc<Config>,
        extensions: Vec<Arc<dyn Extension>>,
        providers: Arc<ProviderRegistry>,
        creds: Arc<CredentialCache>,
    ) -> Result<Self> {
        let events = EventBroadcaster::new();

        let processes = Arc::new(ProcessManager::new());
        let mut tools = ToolRegistry::builtin(&config.tools, processes.clone());
        for extension in &extensions {
            for tool in extension.tools() {
                if let Some(warning) = tools.register(tool) {
                    events.emit_agent(AgentEvent::Warning { message: warning });
                }
            }
        }
        let tools = Arc::new(tools);

        let ui = Arc::new(UiBridge::new(events.sink()));
        let bus = Arc::new(ExtensionBus::new(extensions, events.sink()));

        let log = SessionLog::create(&config.session.resolved_state_dir())?;
        let scheduler = Scheduler::new(
            config.clone(),
            providers.clone(),
            bus.clone(),
            tools.clone(),
            ui.clone(),
            events.clone(),
            log,
        );

        let state = Self {
            config,
            providers,
            creds,
            processes,
            tools,
            bus,
            ui,
            events,
            scheduler: Arc::new(RwLock::new(scheduler)),
            shutdown: CancellationToken::new(),
            ready: Arc::new(AtomicBool::new(false)),
            current_bash: Arc::new(Mutex::new(None)),
        };

        state
            .bus
            .initialize(state.scheduler().extension_context())
            .await;
        state.ready.store(true, Ordering::Release);
        Ok(state)
    }

    /// The scheduler for the currently exposed session.
    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.read().clone()
    }

    /// Swap the exposed session (new_session / switch_session).
    pub fn replace_scheduler(&self, scheduler: Arc<Scheduler>) {
        *self.scheduler.write() = scheduler;
    }

    /// Build a scheduler over an existing log with the shared services.
    pub fn scheduler_for(&self, log: SessionLog) -> Arc<Scheduler> {
        Scheduler::new(
            self.config.clone(),
            self.providers.clone(),
            self.bus.clone(),
            self.tools.clone(),
            self.ui.clone(),
            self.events.clone(),
            log,
        )
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config.session.resolved_state_dir()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Begin graceful shutdown: notify extensions, reject pending UI
    /// round-trips, and wake every transport waiting on the token.
    pub async fn begin_shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("shutting down");
        self.bus
            .shutdown(self.scheduler().extension_context())
            .await;
        self.ui.shutdown();
        self.shutdown.cancel();
    }
}
