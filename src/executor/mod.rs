// Action executor: the boundary between the engine and external collaborators
// Dispatches an action name to its registered handler and captures the outcome

pub mod adapters;
pub mod manifest;
pub mod simulated;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::reinforcement::action::{ActionCatalog, ActionSpec, Category};

pub use adapters::{CommandHandler, EnvHandler, HttpHandler};
pub use manifest::{ActionManifest, HandlerSpec};
pub use simulated::{ScriptedHandler, SimulatedWorld};

/// Error reported for names without a catalog entry or handler
pub const UNKNOWN_ACTION: &str = "unknown action";

/// A pluggable capability that performs one concrete action
///
/// Returning `Err` marks the action as failed; the error chain becomes the
/// outcome's error message. Handlers are expected to enforce their own
/// timeouts.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Short human-readable description for logs
    fn describe(&self) -> String;

    /// Perform the action, returning handler-specific details on success
    async fn run(&self, action: &ActionSpec) -> anyhow::Result<serde_json::Value>;
}

/// Uniform record of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Action name as requested
    pub action: String,
    /// Category from the catalog, None for unknown actions
    pub category: Option<Category>,
    pub success: bool,
    pub error: Option<String>,
    pub details: serde_json::Value,
    /// Wall-clock duration of the handler call
    pub duration_ms: u64,
}

/// Catalog entries and handlers that do not line up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryReport {
    /// Catalog actions that will fail as unknown at execution time
    pub missing_handlers: Vec<String>,
    /// Registered handlers no catalog action refers to
    pub orphan_handlers: Vec<String>,
}

impl RegistryReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_handlers.is_empty() && self.orphan_handlers.is_empty()
    }
}

/// Registry of handlers keyed by action name
pub struct ActionExecutor {
    catalog: Arc<ActionCatalog>,
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl ActionExecutor {
    /// Create an executor with no handlers registered
    pub fn new(catalog: Arc<ActionCatalog>) -> Self {
        Self {
            catalog,
            handlers: HashMap::new(),
        }
    }

    /// Register (or replace) the handler for an action
    pub fn register(&mut self, action: impl Into<String>, handler: Box<dyn ActionHandler>) {
        let action = action.into();
        if self.handlers.insert(action.clone(), handler).is_some() {
            warn!("Replacing handler for action '{}'", action);
        }
    }

    /// Builder-style registration
    pub fn with_handler(mut self, action: impl Into<String>, handler: Box<dyn ActionHandler>) -> Self {
        self.register(action, handler);
        self
    }

    pub fn catalog(&self) -> &Arc<ActionCatalog> {
        &self.catalog
    }

    pub fn has_handler(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Compare catalog and handlers, logging every mismatch
    pub fn validate(&self) -> RegistryReport {
        let missing_handlers: Vec<String> = self
            .catalog
            .names()
            .filter(|name| !self.handlers.contains_key(*name))
            .map(str::to_string)
            .collect();

        let mut orphan_handlers: Vec<String> = self
            .handlers
            .keys()
            .filter(|name| !self.catalog.contains(name))
            .cloned()
            .collect();
        orphan_handlers.sort();

        for name in &missing_handlers {
            warn!(action = %name, "No handler registered; action will fail as unknown");
        }
        for name in &orphan_handlers {
            warn!(action = %name, "Handler registered for an action missing from the catalog");
        }
        if missing_handlers.is_empty() && orphan_handlers.is_empty() {
            info!(
                actions = self.catalog.len(),
                "Every catalog action has a handler"
            );
        }

        RegistryReport {
            missing_handlers,
            orphan_handlers,
        }
    }

    /// Execute an action by name
    ///
    /// Never fails: handler errors, panics and unknown names all become
    /// failed outcomes. Duration is measured for every call.
    pub async fn execute(&self, action: &str) -> ActionOutcome {
        let started = Instant::now();
        let spec = self.catalog.get(action);

        let result = match (spec, self.handlers.get(action)) {
            (Some(spec), Some(handler)) => {
                debug!(action, handler = %handler.describe(), "Executing action");
                match AssertUnwindSafe(handler.run(spec)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(anyhow!("handler panicked: {}", panic_message(&*panic))),
                }
            }
            _ => Err(anyhow!(UNKNOWN_ACTION)),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let category = spec.map(|s| s.category);

        match result {
            Ok(details) => {
                debug!(action, duration_ms, "Action succeeded");
                ActionOutcome {
                    action: action.to_string(),
                    category,
                    success: true,
                    error: None,
                    details,
                    duration_ms,
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                debug!(action, duration_ms, error = %message, "Action failed");
                ActionOutcome {
                    action: action.to_string(),
                    category,
                    success: false,
                    error: Some(message),
                    details: serde_json::Value::Null,
                    duration_ms,
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
