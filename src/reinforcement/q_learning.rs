// Q-Learning implementation for the reinforcement learning agent
// Holds the value table and the temporal-difference update that trains it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

use crate::reinforcement::action::ActionCatalog;
use crate::reinforcement::policy::EpsilonGreedy;
use crate::reinforcement::state::StateKey;

/// Values of the actions tried in one state
pub type QRow = BTreeMap<String, f64>;

/// Learned mapping from (state, action) to expected cumulative reward
///
/// Entries are created on first update and never removed. Ordered maps keep
/// the persisted form stable between saves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QTable {
    entries: BTreeMap<StateKey, QRow>,
}

impl QTable {
    /// Create an empty Q-table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the Q-value for a state-action pair, 0.0 when unseen
    pub fn value(&self, state: &StateKey, action: &str) -> f64 {
        self.entries
            .get(state)
            .and_then(|row| row.get(action))
            .copied()
            .unwrap_or(0.0)
    }

    /// Row of recorded action values for a state
    pub fn row(&self, state: &StateKey) -> Option<&QRow> {
        self.entries.get(state)
    }

    /// Highest recorded value in a state, 0.0 when nothing is recorded
    pub fn max_value(&self, state: &StateKey) -> f64 {
        self.entries
            .get(state)
            .and_then(|row| row.values().copied().reduce(f64::max))
            .unwrap_or(0.0)
    }

    /// Number of states with at least one recorded action
    pub fn state_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of recorded (state, action) pairs
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(|row| row.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate states and their rows in key order
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &QRow)> {
        self.entries.iter()
    }

    /// Action the greedy policy exploits in each state: (state, action, value)
    ///
    /// Actions missing from a row count as 0.0 and equal values resolve to
    /// the earliest catalog entry, exactly as during selection.
    pub fn best_actions(&self, catalog: &ActionCatalog) -> Vec<(StateKey, String, f64)> {
        self.entries
            .iter()
            .filter_map(|(state, row)| {
                EpsilonGreedy::greedy(Some(row), catalog).map(|action| {
                    let value = row.get(&action.name).copied().unwrap_or(0.0);
                    (state.clone(), action.name.clone(), value)
                })
            })
            .collect()
    }

    fn set(&mut self, state: &StateKey, action: &str, value: f64) {
        self.entries
            .entry(state.clone())
            .or_default()
            .insert(action.to_string(), value);
    }
}

/// Owner and sole mutator of the Q-table
#[derive(Debug, Clone)]
pub struct Learner {
    /// Q-table mapping state-action pairs to expected future rewards
    q_table: QTable,
    /// Learning rate (α) - how quickly new information overrides old
    learning_rate: f64,
    /// Discount factor (γ) - importance of future rewards
    discount_factor: f64,
    /// Number of updates applied during this process
    updates: u64,
}

impl Learner {
    /// Create a learner around an existing table
    pub fn new(q_table: QTable, learning_rate: f64, discount_factor: f64) -> Self {
        Self {
            q_table,
            learning_rate,
            discount_factor,
            updates: 0,
        }
    }

    /// Read-only view for the policy and for persistence
    pub fn q_table(&self) -> &QTable {
        &self.q_table
    }

    /// Consume the learner, returning the trained table
    pub fn into_q_table(self) -> QTable {
        self.q_table
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Apply one temporal-difference update and return the new value
    ///
    /// Q(s,a) ← Q(s,a) + α[r + γ·max_a' Q(s',a') - Q(s,a)]
    pub fn update(
        &mut self,
        state: &StateKey,
        action: &str,
        reward: f64,
        next_state: &StateKey,
    ) -> f64 {
        let new_q = td_update(
            &mut self.q_table,
            state,
            action,
            reward,
            next_state,
            self.learning_rate,
            self.discount_factor,
        );
        self.updates += 1;
        new_q
    }
}

/// Temporal-difference update on a table
///
/// An unseen next state contributes a future value of 0.0 and is not
/// inserted; only the (state, action) pair being updated is materialized.
pub fn td_update(
    q_table: &mut QTable,
    state: &StateKey,
    action: &str,
    reward: f64,
    next_state: &StateKey,
    alpha: f64,
    gamma: f64,
) -> f64 {
    let current_q = q_table.value(state, action);
    let max_next_q = q_table.max_value(next_state);

    let target = reward + gamma * max_next_q;
    let new_q = current_q + alpha * (target - current_q);
    q_table.set(state, action, new_q);

    trace!(
        state = %state,
        action,
        reward,
        current_q,
        target,
        new_q,
        "Applied TD update"
    );
    new_q
}
