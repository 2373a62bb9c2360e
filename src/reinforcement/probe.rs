// Readiness probes
// Report how far each readiness dimension has progressed

use std::collections::HashSet;

use crate::core::trial::TrialRecord;
use crate::executor::ActionOutcome;
use crate::reinforcement::action::ActionCatalog;
use crate::reinforcement::state::Readiness;

/// Source of readiness readings for the state encoder
///
/// Readings may be partial; the schema fills in anything missing.
pub trait ReadinessProbe: Send {
    /// Current reading for each dimension the probe knows about
    fn readiness(&self) -> Vec<(String, Readiness)>;

    /// Learn from an execution outcome
    fn observe(&mut self, outcome: &ActionOutcome);

    /// Rebuild internal progress from an earlier trial history
    fn replay(&mut self, _records: &[TrialRecord]) {}
}

#[derive(Debug, Clone)]
struct Group {
    dimension: String,
    members: Vec<String>,
}

/// Tracks which actions have succeeded at least once
///
/// A dimension is `Not` until one of its actions has succeeded, `Partial`
/// while only some have, and `Full` once all of them have.
#[derive(Debug, Clone, Default)]
pub struct ProgressProbe {
    groups: Vec<Group>,
    completed: HashSet<String>,
}

impl ProgressProbe {
    /// Probe with no dimensions
    pub fn new() -> Self {
        Self::default()
    }

    /// One dimension per category present in the catalog
    pub fn for_catalog(catalog: &ActionCatalog) -> Self {
        catalog
            .categories()
            .into_iter()
            .fold(Self::new(), |probe, category| {
                let members = catalog
                    .in_category(category)
                    .map(|a| a.name.clone())
                    .collect();
                probe.with_group(category.as_str(), members)
            })
    }

    /// Add a dimension made up of the given actions
    pub fn with_group(mut self, dimension: impl Into<String>, members: Vec<String>) -> Self {
        self.groups.push(Group {
            dimension: dimension.into(),
            members,
        });
        self
    }

    /// Whether an action has ever succeeded
    pub fn is_completed(&self, action: &str) -> bool {
        self.completed.contains(action)
    }
}

impl ReadinessProbe for ProgressProbe {
    fn readiness(&self) -> Vec<(String, Readiness)> {
        self.groups
            .iter()
            .map(|group| {
                let done = group
                    .members
                    .iter()
                    .filter(|m| self.completed.contains(*m))
                    .count();
                let readiness = if done == 0 {
                    Readiness::Not
                } else if done == group.members.len() {
                    Readiness::Full
                } else {
                    Readiness::Partial
                };
                (group.dimension.clone(), readiness)
            })
            .collect()
    }

    fn observe(&mut self, outcome: &ActionOutcome) {
        if outcome.success {
            self.completed.insert(outcome.action.clone());
        }
    }

    fn replay(&mut self, records: &[TrialRecord]) {
        for record in records.iter().filter(|r| r.success) {
            self.completed.insert(record.action.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reinforcement::action::{ActionSpec, Category};

    fn catalog() -> ActionCatalog {
        ActionCatalog::new(vec![
            ActionSpec::new("configure_keys", Category::Configuration),
            ActionSpec::new("configure_db", Category::Configuration),
            ActionSpec::new("deploy", Category::Deployment),
        ])
        .unwrap()
    }

    fn outcome(action: &str, success: bool) -> ActionOutcome {
        ActionOutcome {
            action: action.to_string(),
            category: None,
            success,
            error: None,
            details: serde_json::Value::Null,
            duration_ms: 1,
        }
    }

    fn reading(probe: &ProgressProbe, name: &str) -> Readiness {
        probe
            .readiness()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
            .unwrap()
    }

    #[test]
    fn test_progression_not_partial_full() {
        let mut probe = ProgressProbe::for_catalog(&catalog());
        assert_eq!(reading(&probe, "configuration"), Readiness::Not);

        probe.observe(&outcome("configure_keys", false));
        assert_eq!(reading(&probe, "configuration"), Readiness::Not);

        probe.observe(&outcome("configure_keys", true));
        assert_eq!(reading(&probe, "configuration"), Readiness::Partial);

        probe.observe(&outcome("configure_db", true));
        assert_eq!(reading(&probe, "configuration"), Readiness::Full);
        assert_eq!(reading(&probe, "deployment"), Readiness::Not);
    }

    #[test]
    fn test_only_catalog_categories_reported() {
        let probe = ProgressProbe::for_catalog(&catalog());
        let names: Vec<String> = probe.readiness().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["configuration".to_string(), "deployment".to_string()]);
    }

    #[test]
    fn test_replay_from_history() {
        let record = |action: &str, success| TrialRecord {
            trial_number: 1,
            action: action.to_string(),
            success,
            reward: 0.0,
            duration_ms: 1,
            error: None,
            consecutive_failures: 0,
            epsilon: 1.0,
            mode: None,
            run_id: None,
            started_at: None,
        };
        let mut probe = ProgressProbe::for_catalog(&catalog())
            .with_group("payments", vec!["configure_keys".to_string(), "deploy".to_string()]);
        probe.replay(&[record("deploy", true), record("configure_db", false)]);
        assert!(probe.is_completed("deploy"));
        assert!(!probe.is_completed("configure_db"));
        assert_eq!(reading(&probe, "deployment"), Readiness::Full);
        assert_eq!(reading(&probe, "payments"), Readiness::Partial);
    }
}
