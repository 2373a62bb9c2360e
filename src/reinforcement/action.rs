// Action catalog for the reinforcement learning agent
// Each action is a named remediation or setup step grouped into a category

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Groups of actions, each carrying its own exploration weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Credentials, keys, OAuth clients
    Configuration,
    /// Connectivity and smoke tests
    Testing,
    /// Shipping services
    Deployment,
    /// Wiring services to each other
    Integration,
    /// Health checks, retries, backups
    Resilience,
    /// Developer and operator tooling
    Tooling,
}

impl Category {
    /// All categories in canonical order
    pub const ALL: [Category; 6] = [
        Category::Configuration,
        Category::Testing,
        Category::Deployment,
        Category::Integration,
        Category::Resilience,
        Category::Tooling,
    ];

    /// Stable lowercase name used in keys, logs and manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Configuration => "configuration",
            Category::Testing => "testing",
            Category::Deployment => "deployment",
            Category::Integration => "integration",
            Category::Resilience => "resilience",
            Category::Tooling => "tooling",
        }
    }

    /// Parse a category from its lowercase name
    pub fn parse(name: &str) -> Option<Category> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exploration weight per category
///
/// During exploration an action is drawn with probability proportional to
/// the weight of its category, so configuration steps are tried more often
/// while the system is still unconfigured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub configuration: f64,
    pub testing: f64,
    pub deployment: f64,
    pub integration: f64,
    pub resilience: f64,
    pub tooling: f64,
}

impl CategoryWeights {
    /// Same weight for every category
    pub fn uniform(weight: f64) -> Self {
        Self {
            configuration: weight,
            testing: weight,
            deployment: weight,
            integration: weight,
            resilience: weight,
            tooling: weight,
        }
    }

    /// Weight for a category
    pub fn weight(&self, category: Category) -> f64 {
        match category {
            Category::Configuration => self.configuration,
            Category::Testing => self.testing,
            Category::Deployment => self.deployment,
            Category::Integration => self.integration,
            Category::Resilience => self.resilience,
            Category::Tooling => self.tooling,
        }
    }

    /// Override the weight for a category
    pub fn set(&mut self, category: Category, weight: f64) {
        match category {
            Category::Configuration => self.configuration = weight,
            Category::Testing => self.testing = weight,
            Category::Deployment => self.deployment = weight,
            Category::Integration => self.integration = weight,
            Category::Resilience => self.resilience = weight,
            Category::Tooling => self.tooling = weight,
        }
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            configuration: 3.0,
            testing: 1.5,
            deployment: 1.0,
            integration: 2.0,
            resilience: 1.0,
            tooling: 1.0,
        }
    }
}

/// Immutable description of one action the agent can take
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Unique action name, also the handler registry key
    pub name: String,
    /// Category the action belongs to
    pub category: Category,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }
}

/// Fixed, ordered list of actions
///
/// Declaration order matters: greedy selection breaks ties in favour of the
/// action declared first.
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    actions: Vec<ActionSpec>,
    index: HashMap<String, usize>,
}

impl ActionCatalog {
    /// Build a catalog, rejecting empty or duplicate names
    pub fn new(actions: Vec<ActionSpec>) -> EngineResult<Self> {
        if actions.is_empty() {
            return Err(EngineError::manifest_error("action catalog is empty"));
        }

        let mut index = HashMap::with_capacity(actions.len());
        for (i, action) in actions.iter().enumerate() {
            if action.name.trim().is_empty() {
                return Err(EngineError::manifest_error(format!(
                    "action #{} has an empty name",
                    i + 1
                )));
            }
            if index.insert(action.name.clone(), i).is_some() {
                return Err(EngineError::manifest_error(format!(
                    "duplicate action name '{}'",
                    action.name
                )));
            }
        }

        Ok(Self { actions, index })
    }

    /// Built-in catalog: three actions per category
    pub fn default_catalog() -> Self {
        let specs = [
            ("configure_payment_keys", Category::Configuration),
            ("configure_oauth_clients", Category::Configuration),
            ("configure_database_url", Category::Configuration),
            ("test_database_connection", Category::Testing),
            ("test_payment_api", Category::Testing),
            ("test_oauth_flow", Category::Testing),
            ("deploy_backend", Category::Deployment),
            ("deploy_frontend", Category::Deployment),
            ("run_database_migrations", Category::Deployment),
            ("wire_payment_webhooks", Category::Integration),
            ("wire_social_publishing", Category::Integration),
            ("wire_email_notifications", Category::Integration),
            ("setup_health_checks", Category::Resilience),
            ("setup_retry_policies", Category::Resilience),
            ("setup_database_backups", Category::Resilience),
            ("install_cli_tools", Category::Tooling),
            ("setup_ci_pipeline", Category::Tooling),
            ("setup_log_rotation", Category::Tooling),
        ]
        .into_iter()
        .map(|(name, category)| ActionSpec::new(name, category))
        .collect::<Vec<_>>();

        let index = specs
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
        Self {
            actions: specs,
            index,
        }
    }

    /// Look up an action by name
    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.index.get(name).map(|&i| &self.actions[i])
    }

    /// Whether the catalog contains an action
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Actions in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.iter()
    }

    /// Action names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.name.as_str())
    }

    /// Actions belonging to one category, in declaration order
    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &ActionSpec> {
        self.actions.iter().filter(move |a| a.category == category)
    }

    /// Categories that have at least one action, in canonical order
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .iter()
            .copied()
            .filter(|c| self.actions.iter().any(|a| a.category == *c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Exploration weight for each action, in declaration order
    pub fn exploration_weights(&self, weights: &CategoryWeights) -> Vec<f64> {
        self.actions
            .iter()
            .map(|a| weights.weight(a.category))
            .collect()
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}
