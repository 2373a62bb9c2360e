// Epsilon-greedy action selection
// Exploits the best known action or explores with category-weighted draws

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::reinforcement::action::{ActionCatalog, ActionSpec, CategoryWeights};
use crate::reinforcement::q_learning::{QRow, QTable};
use crate::reinforcement::state::StateKey;

/// How an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Explore,
    Exploit,
}

/// Result of one policy decision
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub action: &'a ActionSpec,
    pub mode: SelectionMode,
}

/// Trait defining the interface for an action selection policy
pub trait Policy {
    /// Probability of choosing `action` in `state` at the given exploration rate
    fn action_probability(
        &self,
        state: &StateKey,
        action: &str,
        q_table: &QTable,
        epsilon: f64,
        catalog: &ActionCatalog,
    ) -> f64;

    /// Choose an action for `state`
    fn select<'a>(
        &self,
        state: &StateKey,
        q_table: &QTable,
        epsilon: f64,
        catalog: &'a ActionCatalog,
        rng: &mut dyn RngCore,
    ) -> Selection<'a>;
}

/// Stateless epsilon-greedy policy with category-weighted exploration
#[derive(Debug, Clone, Default)]
pub struct EpsilonGreedy {
    weights: CategoryWeights,
}

impl EpsilonGreedy {
    pub fn new(weights: CategoryWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &CategoryWeights {
        &self.weights
    }

    /// Best-valued action in declaration order; the first of equal maxima wins
    pub fn greedy<'a>(q_row: Option<&QRow>, catalog: &'a ActionCatalog) -> Option<&'a ActionSpec> {
        let mut best: Option<(&ActionSpec, f64)> = None;
        for action in catalog.iter() {
            let value = q_row
                .and_then(|row| row.get(&action.name))
                .copied()
                .unwrap_or(0.0);
            match best {
                Some((_, best_value)) if value <= best_value => {}
                _ => best = Some((action, value)),
            }
        }
        best.map(|(action, _)| action)
    }

    /// Weighted random draw over the catalog
    ///
    /// Falls back to a uniform draw when every weight is zero.
    pub fn explore<'a, R: Rng + ?Sized>(
        &self,
        catalog: &'a ActionCatalog,
        rng: &mut R,
    ) -> Option<&'a ActionSpec> {
        if catalog.is_empty() {
            return None;
        }
        let weights = catalog.exploration_weights(&self.weights);
        let index = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(rng),
            Err(e) => {
                warn!("Exploration weights unusable ({}), drawing uniformly", e);
                rng.random_range(0..catalog.len())
            }
        };
        catalog.iter().nth(index)
    }

    fn exploration_share(&self, action: &str, catalog: &ActionCatalog) -> f64 {
        let weights = catalog.exploration_weights(&self.weights);
        let total: f64 = weights.iter().sum();
        let position = catalog.names().position(|n| n == action);
        match position {
            Some(i) if total > 0.0 => weights[i] / total,
            Some(_) => 1.0 / catalog.len() as f64,
            None => 0.0,
        }
    }
}

impl Policy for EpsilonGreedy {
    fn action_probability(
        &self,
        state: &StateKey,
        action: &str,
        q_table: &QTable,
        epsilon: f64,
        catalog: &ActionCatalog,
    ) -> f64 {
        if !catalog.contains(action) {
            return 0.0;
        }
        let greedy = Self::greedy(q_table.row(state), catalog);
        let exploit = if greedy.map(|a| a.name.as_str()) == Some(action) {
            1.0 - epsilon
        } else {
            0.0
        };
        exploit + epsilon * self.exploration_share(action, catalog)
    }

    fn select<'a>(
        &self,
        state: &StateKey,
        q_table: &QTable,
        epsilon: f64,
        catalog: &'a ActionCatalog,
        rng: &mut dyn RngCore,
    ) -> Selection<'a> {
        let roll: f64 = rng.random();
        let (action, mode) = if roll < epsilon {
            (self.explore(catalog, rng), SelectionMode::Explore)
        } else {
            (
                Self::greedy(q_table.row(state), catalog),
                SelectionMode::Exploit,
            )
        };

        // Catalogs are validated non-empty at construction.
        let action = match action {
            Some(action) => action,
            None => unreachable!("action catalog is never empty"),
        };

        debug!(
            state = %state,
            action = %action.name,
            ?mode,
            epsilon,
            "Selected action"
        );
        Selection { action, mode }
    }
}

/// Decaying exploration rate owned by the trial loop
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorationSchedule {
    epsilon: f64,
    min_epsilon: f64,
    decay: f64,
}

impl ExplorationSchedule {
    pub fn new(initial_epsilon: f64, min_epsilon: f64, decay: f64) -> Self {
        Self {
            epsilon: initial_epsilon.max(min_epsilon),
            min_epsilon,
            decay,
        }
    }

    /// Resume after a previous run that last used `last_epsilon`
    pub fn resume(last_epsilon: f64, min_epsilon: f64, decay: f64) -> Self {
        let mut schedule = Self::new(last_epsilon, min_epsilon, decay);
        schedule.decay();
        schedule
    }

    /// Current exploration rate
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// epsilon = max(min_epsilon, epsilon * decay); returns the new value
    pub fn decay(&mut self) -> f64 {
        self.epsilon = (self.epsilon * self.decay).max(self.min_epsilon);
        self.epsilon
    }
}
