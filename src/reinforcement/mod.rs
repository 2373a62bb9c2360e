// Main module for Reinforcement Learning components
// State encoding, action catalog, epsilon-greedy policy, TD learning and rewards

pub mod action;
pub mod policy;
pub mod probe;
pub mod q_learning;
pub mod reward;
pub mod state;

// Re-export main components for easier access
pub use action::{ActionCatalog, ActionSpec, Category, CategoryWeights};
pub use policy::{EpsilonGreedy, ExplorationSchedule, Policy, Selection, SelectionMode};
pub use probe::{ProgressProbe, ReadinessProbe};
pub use q_learning::{td_update, Learner, QRow, QTable};
pub use reward::{calculate_reward, ErrorClass, RewardConfig};
pub use state::{Dimension, DimensionKind, Readiness, StateKey, StateSchema, StateSnapshot};
