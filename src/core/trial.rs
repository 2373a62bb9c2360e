// Trial records
// One line of history per executed trial

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reinforcement::policy::SelectionMode;

/// Everything recorded about a single trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based, continues across resumed runs
    pub trial_number: u64,
    /// Action chosen by the policy
    pub action: String,
    pub success: bool,
    pub reward: f64,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Failure streak after this trial
    pub consecutive_failures: u32,
    /// Exploration rate used to choose the action
    pub epsilon: f64,
    /// Whether the action came from exploration or exploitation
    #[serde(default)]
    pub mode: Option<SelectionMode>,
    /// Run that produced this record
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl TrialRecord {
    /// Whether the record came from an exploration step
    pub fn explored(&self) -> bool {
        self.mode == Some(SelectionMode::Explore)
    }
}

/// Termination reason for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The trial budget for this run was used up
    MaxTrials,
    /// The goal predicate held before the budget ran out
    GoalReached,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::MaxTrials => "max_trials",
            Termination::GoalReached => "goal_reached",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_record_deserializes() {
        let line = r#"{"trial_number":3,"action":"deploy_backend","success":false,"reward":-13.0,"duration_ms":812,"error":"deployment failed","consecutive_failures":2,"epsilon":0.81}"#;
        let record: TrialRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.trial_number, 3);
        assert_eq!(record.error.as_deref(), Some("deployment failed"));
        assert!(record.mode.is_none());
        assert!(!record.explored());
        assert!(record.run_id.is_none());
    }
}
