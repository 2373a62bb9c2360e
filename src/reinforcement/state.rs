// State representation for Reinforcement Learning
// Captures the readiness of the managed services plus trial bookkeeping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::reinforcement::action::Category;

/// How far along a readiness dimension is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Not,
    Partial,
    Full,
}

/// Vocabulary used to label a dimension's readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Configured,
    Tested,
    Deployed,
    Integrated,
    Hardened,
    Installed,
}

impl DimensionKind {
    /// Natural vocabulary for a category's dimension
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Configuration => DimensionKind::Configured,
            Category::Testing => DimensionKind::Tested,
            Category::Deployment => DimensionKind::Deployed,
            Category::Integration => DimensionKind::Integrated,
            Category::Resilience => DimensionKind::Hardened,
            Category::Tooling => DimensionKind::Installed,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            DimensionKind::Configured => "configured",
            DimensionKind::Tested => "tested",
            DimensionKind::Deployed => "deployed",
            DimensionKind::Integrated => "integrated",
            DimensionKind::Hardened => "hardened",
            DimensionKind::Installed => "installed",
        }
    }

    /// Label such as `not-deployed` or `partially-configured`
    pub fn label(&self, readiness: Readiness) -> String {
        let prefix = match readiness {
            Readiness::Not => "not",
            Readiness::Partial => "partially",
            Readiness::Full => "fully",
        };
        format!("{}-{}", prefix, self.verb())
    }
}

/// One named readiness dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
}

/// Ordered set of dimensions every snapshot is expressed in
///
/// The order is the serialization order of the state key and never changes
/// for the lifetime of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSchema {
    dimensions: Vec<Dimension>,
    /// Consecutive failures above this value share one key bucket
    failure_cap: u32,
}

impl StateSchema {
    /// Create a schema from an ordered list of dimensions
    pub fn new(dimensions: Vec<Dimension>, failure_cap: u32) -> Self {
        let mut seen = std::collections::HashSet::new();
        let dimensions = dimensions
            .into_iter()
            .filter(|d| {
                let fresh = seen.insert(d.name.clone());
                if !fresh {
                    warn!("Ignoring duplicate readiness dimension '{}'", d.name);
                }
                fresh
            })
            .collect();
        Self {
            dimensions,
            failure_cap,
        }
    }

    /// One dimension per category, named after the category
    pub fn for_categories(categories: &[Category], failure_cap: u32) -> Self {
        Self::new(
            categories
                .iter()
                .map(|c| Dimension {
                    name: c.as_str().to_string(),
                    kind: DimensionKind::for_category(*c),
                })
                .collect(),
            failure_cap,
        )
    }

    /// Append a dimension, keeping existing order
    pub fn with_dimension(mut self, name: impl Into<String>, kind: DimensionKind) -> Self {
        let name = name.into();
        if !self.dimensions.iter().any(|d| d.name == name) {
            self.dimensions.push(Dimension { name, kind });
        }
        self
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn failure_cap(&self) -> u32 {
        self.failure_cap
    }

    /// Build a total snapshot from possibly partial readings
    ///
    /// Dimensions without a reading default to `Readiness::Not`; readings for
    /// dimensions outside the schema are dropped.
    pub fn snapshot(
        &self,
        readings: impl IntoIterator<Item = (String, Readiness)>,
        trial_number: u64,
        consecutive_failures: u32,
        last_action: Option<&str>,
    ) -> StateSnapshot {
        let mut readings: BTreeMap<String, Readiness> = readings.into_iter().collect();
        let mut values = Vec::with_capacity(self.dimensions.len());
        for dimension in &self.dimensions {
            let readiness = readings.remove(&dimension.name).unwrap_or_else(|| {
                warn!(
                    dimension = %dimension.name,
                    "No readiness reading, assuming {}",
                    dimension.kind.label(Readiness::Not)
                );
                Readiness::Not
            });
            values.push((dimension.clone(), readiness));
        }
        for name in readings.keys() {
            warn!("Dropping reading for unknown dimension '{}'", name);
        }

        StateSnapshot {
            dimensions: values,
            trial_number,
            consecutive_failures,
            last_action: last_action.map(str::to_string),
        }
    }

    /// Canonical key for a snapshot
    ///
    /// Layout: `name=label|...|failures=N|last=action`. The trial number is
    /// bookkeeping and is left out so that equivalent situations share
    /// learned values; consecutive failures are capped at `failure_cap`.
    pub fn encode(&self, snapshot: &StateSnapshot) -> StateKey {
        let mut parts = Vec::with_capacity(self.dimensions.len() + 2);
        for dimension in &self.dimensions {
            let readiness = snapshot.readiness(&dimension.name).unwrap_or(Readiness::Not);
            parts.push(format!(
                "{}={}",
                dimension.name,
                dimension.kind.label(readiness)
            ));
        }
        parts.push(format!(
            "failures={}",
            snapshot.consecutive_failures.min(self.failure_cap)
        ));
        parts.push(format!(
            "last={}",
            snapshot.last_action.as_deref().unwrap_or("none")
        ));
        StateKey(parts.join("|"))
    }

    /// Whether every dimension is fully ready
    pub fn is_fully_ready(&self, snapshot: &StateSnapshot) -> bool {
        self.dimensions
            .iter()
            .all(|d| snapshot.readiness(&d.name) == Some(Readiness::Full))
    }
}

/// Readiness of every dimension at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Dimension values in schema order
    pub dimensions: Vec<(Dimension, Readiness)>,
    /// Trial this snapshot was taken for
    pub trial_number: u64,
    /// Failure streak at snapshot time
    pub consecutive_failures: u32,
    /// Previously executed action, if any
    pub last_action: Option<String>,
}

impl StateSnapshot {
    /// Readiness of a named dimension
    pub fn readiness(&self, name: &str) -> Option<Readiness> {
        self.dimensions
            .iter()
            .find(|(d, _)| d.name == name)
            .map(|(_, r)| *r)
    }

    /// Number of dimensions at each readiness level: (not, partial, full)
    pub fn readiness_counts(&self) -> (usize, usize, usize) {
        self.dimensions
            .iter()
            .fold((0, 0, 0), |(n, p, f), (_, r)| match r {
                Readiness::Not => (n + 1, p, f),
                Readiness::Partial => (n, p + 1, f),
                Readiness::Full => (n, p, f + 1),
            })
    }
}

/// Canonical serialization of a snapshot, used only as a lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateKey {
    fn from(value: &str) -> Self {
        StateKey(value.to_string())
    }
}

impl From<String> for StateKey {
    fn from(value: String) -> Self {
        StateKey(value)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> StateSchema {
        StateSchema::for_categories(&Category::ALL, 5)
    }

    #[test]
    fn test_equal_snapshots_encode_identically() {
        let schema = schema();
        let readings = || {
            vec![
                ("deployment".to_string(), Readiness::Partial),
                ("configuration".to_string(), Readiness::Full),
            ]
        };
        let a = schema.snapshot(readings(), 3, 1, Some("deploy_backend"));
        let b = schema.snapshot(readings().into_iter().rev(), 3, 1, Some("deploy_backend"));
        assert_eq!(a, b);
        assert_eq!(schema.encode(&a), schema.encode(&b));
    }

    #[test]
    fn test_missing_dimensions_default_to_not() {
        let schema = schema();
        let snapshot = schema.snapshot(Vec::new(), 1, 0, None);
        assert_eq!(snapshot.dimensions.len(), 6);
        assert!(snapshot
            .dimensions
            .iter()
            .all(|(_, r)| *r == Readiness::Not));
        assert_eq!(
            schema.encode(&snapshot).as_str(),
            "configuration=not-configured|testing=not-tested|deployment=not-deployed|\
             integration=not-integrated|resilience=not-hardened|tooling=not-installed|\
             failures=0|last=none"
        );
    }

    #[test]
    fn test_trial_number_not_part_of_key() {
        let schema = schema();
        let early = schema.snapshot(Vec::new(), 1, 0, None);
        let late = schema.snapshot(Vec::new(), 99, 0, None);
        assert_eq!(schema.encode(&early), schema.encode(&late));
    }

    #[test]
    fn test_failure_streak_is_capped_in_key() {
        let schema = schema();
        let five = schema.snapshot(Vec::new(), 1, 5, None);
        let nine = schema.snapshot(Vec::new(), 1, 9, None);
        let two = schema.snapshot(Vec::new(), 1, 2, None);
        assert_eq!(schema.encode(&five), schema.encode(&nine));
        assert_ne!(schema.encode(&five), schema.encode(&two));
    }

    #[test]
    fn test_distinct_contexts_do_not_collide() {
        let schema = schema();
        let a = schema.snapshot(
            vec![("deployment".to_string(), Readiness::Full)],
            1,
            0,
            Some("deploy_backend"),
        );
        let b = schema.snapshot(
            vec![("deployment".to_string(), Readiness::Partial)],
            1,
            0,
            Some("deploy_backend"),
        );
        let c = schema.snapshot(
            vec![("deployment".to_string(), Readiness::Full)],
            1,
            0,
            Some("deploy_frontend"),
        );
        assert_ne!(schema.encode(&a), schema.encode(&b));
        assert_ne!(schema.encode(&a), schema.encode(&c));
    }

    #[test]
    fn test_unknown_readings_dropped_and_duplicates_ignored() {
        let schema = StateSchema::new(
            vec![
                Dimension {
                    name: "payments".to_string(),
                    kind: DimensionKind::Configured,
                },
                Dimension {
                    name: "payments".to_string(),
                    kind: DimensionKind::Deployed,
                },
            ],
            3,
        );
        assert_eq!(schema.dimensions().len(), 1);
        let snapshot = schema.snapshot(
            vec![
                ("payments".to_string(), Readiness::Partial),
                ("marketing".to_string(), Readiness::Full),
            ],
            1,
            0,
            None,
        );
        assert_eq!(snapshot.dimensions.len(), 1);
        assert_eq!(
            schema.encode(&snapshot).as_str(),
            "payments=partially-configured|failures=0|last=none"
        );
    }

    #[test]
    fn test_fully_ready_detection() {
        let schema = StateSchema::for_categories(&[Category::Testing], 5)
            .with_dimension("email", DimensionKind::Configured);
        let partial = schema.snapshot(
            vec![("testing".to_string(), Readiness::Full)],
            1,
            0,
            None,
        );
        assert!(!schema.is_fully_ready(&partial));
        let done = schema.snapshot(
            vec![
                ("testing".to_string(), Readiness::Full),
                ("email".to_string(), Readiness::Full),
            ],
            2,
            0,
            None,
        );
        assert!(schema.is_fully_ready(&done));
        assert_eq!(done.readiness_counts(), (0, 0, 2));
    }
}
