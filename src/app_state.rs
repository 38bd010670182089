use crate::backend::{BackendClient, SessionProvider};
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::models::RuntimeDiagnostics;
use crate::queue::QueueManager;
use crate::store::ClientStore;
use crate::usage::TierGate;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// The application context: constructed once at startup and passed by
/// reference to every consumer. There are no module-level singletons.
pub struct AppState {
    pub store: ClientStore,
    pub monitor: Arc<ConnectivityMonitor>,
    pub queue: QueueManager,
    pub gate: TierGate,
}

impl AppState {
    pub fn initialize(
        store: ClientStore,
        backend: BackendClient,
        session: Arc<dyn SessionProvider>,
        initial_connectivity: ConnectivityState,
    ) -> Result<Self> {
        store.init()?;
        let monitor = Arc::new(ConnectivityMonitor::new(initial_connectivity));
        let queue = QueueManager::new(store.clone(), backend.clone(), Arc::clone(&monitor))?;
        let gate = TierGate::new(store.clone(), backend, session);
        Ok(Self {
            store,
            monitor,
            queue,
            gate,
        })
    }

    /// Forwards the shell's connectivity signal. Only a real
    /// Offline -> Online transition triggers a drain.
    pub async fn notify_online(&self) -> Result<()> {
        if self.monitor.set_online() {
            self.queue.process_queue().await?;
        }
        Ok(())
    }

    pub fn notify_offline(&self) {
        self.monitor.set_offline();
    }

    pub fn runtime_diagnostics(&self) -> RuntimeDiagnostics {
        RuntimeDiagnostics {
            data_dir: self.store.base_dir.display().to_string(),
            db_path: self.store.db_path.display().to_string(),
            schema_ok: self.store.schema_ok(),
            queue_size: self.queue.queue_size(),
            connectivity: self.monitor.state().as_str().to_string(),
        }
    }
}

/// Default location for the client database.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
        .join("carivox")
}
