pub mod backoff;
pub mod engine;
pub mod storage;
pub mod trial;

pub use backoff::{compute_delay_ms, Backoff};
pub use engine::{Engine, LoopPhase, RunSummary};
pub use storage::{load_q_table, load_q_table_or_empty, save_q_table, TrialLog};
pub use trial::{Termination, TrialRecord};
