use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::reinforcement::action::{Category, CategoryWeights};
use crate::reinforcement::reward::RewardConfig;

/// Tuning parameters for one engine run
///
/// Every field has a default, so a partial TOML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Learning rate (α)
    pub learning_rate: f64,
    /// Discount factor (γ)
    pub discount_factor: f64,
    pub initial_epsilon: f64,
    pub min_epsilon: f64,
    /// Multiplied into epsilon after every trial
    pub epsilon_decay: f64,
    /// Trials executed per run
    pub max_trials: u64,
    /// Persist the Q-table every this many trials
    pub checkpoint_interval: u64,
    /// Inter-trial delay with no failure streak
    pub base_delay_ms: u64,
    /// Ceiling for the backoff delay
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter fraction added to each delay
    pub jitter_fraction: f64,
    /// Failure streak above which backoff and state keys stop distinguishing
    pub failure_exponent_cap: u32,
    /// Seed for exploration and jitter; random when absent
    pub seed: Option<u64>,
    /// Window size for rolling success rates in reports
    pub analysis_window: usize,
    pub reward: RewardConfig,
    pub category_weights: CategoryWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            initial_epsilon: 1.0,
            min_epsilon: 0.05,
            epsilon_decay: 0.995,
            max_trials: 100,
            checkpoint_interval: 10,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter_fraction: 0.1,
            failure_exponent_cap: 5,
            seed: None,
            analysis_window: 10,
            reward: RewardConfig::default(),
            category_weights: CategoryWeights::default(),
        }
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> EngineResult<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::invalid_config(message()))
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> EngineResult<Self> {
        toml::from_str(content).map_err(|e| EngineError::invalid_config(e.to_string()))
    }

    /// Reject nonsensical parameter combinations
    pub fn validate(&self) -> EngineResult<()> {
        check(
            self.learning_rate > 0.0 && self.learning_rate <= 1.0,
            || format!("learning_rate must be in (0, 1], got {}", self.learning_rate),
        )?;
        check(
            (0.0..=1.0).contains(&self.discount_factor),
            || format!("discount_factor must be in [0, 1], got {}", self.discount_factor),
        )?;
        check(
            (0.0..=1.0).contains(&self.initial_epsilon),
            || format!("initial_epsilon must be in [0, 1], got {}", self.initial_epsilon),
        )?;
        check(
            (0.0..=1.0).contains(&self.min_epsilon),
            || format!("min_epsilon must be in [0, 1], got {}", self.min_epsilon),
        )?;
        check(self.min_epsilon <= self.initial_epsilon, || {
            format!(
                "min_epsilon ({}) must not exceed initial_epsilon ({})",
                self.min_epsilon, self.initial_epsilon
            )
        })?;
        check(
            self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0,
            || format!("epsilon_decay must be in (0, 1], got {}", self.epsilon_decay),
        )?;
        check(self.max_trials > 0, || "max_trials must be positive".to_string())?;
        check(self.checkpoint_interval > 0, || {
            "checkpoint_interval must be positive".to_string()
        })?;
        check(self.max_delay_ms >= self.base_delay_ms, || {
            format!(
                "max_delay_ms ({}) must be at least base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )
        })?;
        check(
            (0.0..=1.0).contains(&self.jitter_fraction),
            || format!("jitter_fraction must be in [0, 1], got {}", self.jitter_fraction),
        )?;
        check(self.analysis_window > 0, || {
            "analysis_window must be positive".to_string()
        })?;
        for (name, value) in self.reward.constants() {
            check(value.is_finite(), || {
                format!("reward.{} must be a finite number, got {}", name, value)
            })?;
        }
        check(self.reward.very_fast_ms <= self.reward.fast_ms, || {
            format!(
                "reward.very_fast_ms ({}) must not exceed reward.fast_ms ({})",
                self.reward.very_fast_ms, self.reward.fast_ms
            )
        })?;
        for category in Category::ALL {
            let weight = self.category_weights.weight(category);
            check(weight.is_finite() && weight >= 0.0, || {
                format!("category weight for {} must be non-negative, got {}", category, weight)
            })?;
        }
        Ok(())
    }
}
