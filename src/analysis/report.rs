use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::core::storage::write_json_atomic;
use crate::error::EngineResult;
use crate::reinforcement::action::Category;
use crate::reinforcement::reward::ErrorClass;

/// Totals for one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStats {
    pub action: String,
    /// None when the action is not in the catalog
    pub category: Option<Category>,
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub average_reward: f64,
    pub average_duration_ms: f64,
    pub most_common_error: Option<String>,
}

/// Totals for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: Category,
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub average_reward: f64,
}

/// Success rate of the window ending at `end_trial`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPoint {
    pub end_trial: u64,
    pub success_rate: f64,
}

/// Direction of the success rate between the first and last window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    /// Fewer than two full windows of history
    InsufficientData,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Declining => write!(f, "declining"),
            Trend::Stable => write!(f, "stable"),
            Trend::InsufficientData => write!(f, "insufficient data"),
        }
    }
}

/// Derived summary of a trial history
///
/// Regenerable from the trial log at any time and never fed back into
/// learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub total_trials: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub total_reward: f64,
    pub average_reward: f64,
    /// Share of trials whose action came from exploration
    pub exploration_share: f64,
    pub window: usize,
    pub rolling_success: Vec<WindowPoint>,
    pub trend: Trend,
    pub actions: Vec<ActionStats>,
    pub categories: Vec<CategoryStats>,
    pub error_classes: BTreeMap<ErrorClass, usize>,
    pub recommendations: Vec<String>,
}

impl AnalysisReport {
    /// Write the report as pretty JSON
    pub fn write(&self, path: &Path) -> EngineResult<()> {
        write_json_atomic(self, path)?;
        info!("Wrote analysis report to {}", path.display());
        Ok(())
    }

    /// Format a human-readable summary
    pub fn format_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str(&format!("Trial Analysis - {}\n", self.generated_at.format("%Y-%m-%d %H:%M:%S")));
        summary.push_str(&format!("Trials: {}\n", self.total_trials));
        if self.total_trials == 0 {
            summary.push_str("No trials recorded yet.\n");
            return summary;
        }
        summary.push_str(&format!(
            "  Successes: {} ({:.1}%)\n",
            self.successes,
            self.success_rate * 100.0
        ));
        summary.push_str(&format!("  Failures: {}\n", self.failures));
        summary.push_str(&format!(
            "Reward: total {:.2}, average {:.2}\n",
            self.total_reward, self.average_reward
        ));
        summary.push_str(&format!(
            "Exploration share: {:.1}%\n",
            self.exploration_share * 100.0
        ));
        summary.push_str(&format!("Trend (window {}): {}\n", self.window, self.trend));

        if !self.actions.is_empty() {
            summary.push_str("\nActions:\n");
            for stats in &self.actions {
                summary.push_str(&format!(
                    "- {}: {}/{} succeeded, avg reward {:.2}, avg {:.0}ms\n",
                    stats.action,
                    stats.successes,
                    stats.attempts,
                    stats.average_reward,
                    stats.average_duration_ms
                ));
            }
        }

        if !self.categories.is_empty() {
            summary.push_str("\nCategories:\n");
            for stats in &self.categories {
                summary.push_str(&format!(
                    "- {}: {:.1}% of {} attempts\n",
                    stats.category,
                    stats.success_rate * 100.0,
                    stats.attempts
                ));
            }
        }

        if !self.recommendations.is_empty() {
            summary.push_str("\nRecommendations:\n");
            for recommendation in &self.recommendations {
                summary.push_str(&format!("- {}\n", recommendation));
            }
        }

        summary
    }
}
