//! Client core for the Carivox voice studio: an offline request queue with
//! bounded, strictly ordered replay, and a tier-based usage gate over the
//! hosted synthesis backend. The embedding shell (desktop or web) feeds
//! connectivity signals in and renders whatever these components report.

mod app_state;
mod backend;
mod connectivity;
mod error;
mod models;
mod queue;
mod store;
mod usage;

pub use app_state::{default_data_dir, AppState};
pub use backend::{
    BackendClient, Session, SessionProvider, StaticSession, SynthesisResponse,
    GENERATE_SPEECH_PATH, SUBSCRIPTION_PATH, USAGE_PATH,
};
pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use error::StorageError;
pub use models::{
    DrainReport, GenerationOutcome, GenerationRequest, QueuedRequest, QuotaRejection,
    ReplayOutcome, ReplayPolicy, ReplayRecord, RuntimeDiagnostics, Tier, UsageSnapshot,
};
pub use queue::QueueManager;
pub use store::{ClientStore, QUEUE_CAPACITY};
pub use usage::{TierGate, USAGE_WARN_THRESHOLD};
