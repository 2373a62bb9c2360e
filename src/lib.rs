// ops-pilot - A self-tuning remediation agent
// Learns which setup actions bring a multi-service system to readiness

pub mod analysis;
pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod logging;
pub mod reinforcement;

pub use crate::core::{Engine, RunSummary, TrialRecord};
pub use config::{ConfigLoader, EngineConfig, StoragePaths};
pub use error::{EngineError, EngineResult};
pub use executor::{ActionExecutor, ActionHandler, ActionOutcome};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
