// Action manifest loading
// Declares the action catalog and each action's handler in a TOML file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{map_io_err, EngineError, EngineResult};
use crate::executor::adapters::{CommandHandler, EnvHandler, HttpHandler};
use crate::executor::{ActionExecutor, ActionHandler};
use crate::reinforcement::action::{ActionCatalog, ActionSpec, Category};
use crate::reinforcement::state::DimensionKind;

fn default_method() -> String {
    "GET".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    120
}

/// How an action is carried out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Require environment variables to be set
    Env { vars: Vec<String> },
    /// Probe an HTTP endpoint
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        /// Variable holding a bearer token sent with the request
        #[serde(default)]
        bearer_token_env: Option<String>,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
    },
    /// Run a program
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
        #[serde(default = "default_command_timeout")]
        timeout_secs: u64,
    },
}

impl HandlerSpec {
    /// Instantiate the handler
    pub fn build(&self) -> EngineResult<Box<dyn ActionHandler>> {
        let handler: Box<dyn ActionHandler> = match self {
            HandlerSpec::Env { vars } => {
                if vars.is_empty() {
                    return Err(EngineError::manifest_error(
                        "env handler needs at least one variable",
                    ));
                }
                Box::new(EnvHandler::new(vars.clone()))
            }
            HandlerSpec::Http {
                url,
                method,
                bearer_token_env,
                timeout_secs,
            } => Box::new(HttpHandler::new(
                method,
                url.clone(),
                bearer_token_env.clone(),
                Duration::from_secs(*timeout_secs),
            )?),
            HandlerSpec::Command {
                program,
                args,
                env,
                working_dir,
                timeout_secs,
            } => Box::new(
                CommandHandler::new(program.clone(), args.clone(), Duration::from_secs(*timeout_secs))
                    .with_env(env.clone())
                    .with_working_dir(working_dir.clone()),
            ),
        };
        Ok(handler)
    }
}

/// One `[[action]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestAction {
    pub name: String,
    pub category: Category,
    /// Extra readiness dimension this action contributes to
    #[serde(default)]
    pub dimension: Option<String>,
    /// Actions without a handler stay in the catalog and fail as unknown
    #[serde(default)]
    pub handler: Option<HandlerSpec>,
}

/// Parsed manifest file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionManifest {
    #[serde(rename = "action", default)]
    pub actions: Vec<ManifestAction>,
}

impl ActionManifest {
    /// Parse manifest text
    pub fn parse(content: &str) -> EngineResult<Self> {
        toml::from_str(content)
            .map_err(|e| EngineError::manifest_error(e.to_string()))
    }

    /// Load and parse a manifest file
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(map_io_err(path))?;
        let manifest = Self::parse(&content)?;
        info!(
            "Loaded {} actions from manifest {}",
            manifest.actions.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Catalog in manifest order
    pub fn catalog(&self) -> EngineResult<ActionCatalog> {
        ActionCatalog::new(
            self.actions
                .iter()
                .map(|a| ActionSpec::new(a.name.clone(), a.category))
                .collect(),
        )
    }

    /// Extra readiness dimensions in first-declared order
    ///
    /// Each entry carries the kind implied by its first action's category and
    /// the names of every action declaring it.
    pub fn dimensions(&self) -> Vec<(String, DimensionKind, Vec<String>)> {
        let mut dimensions: Vec<(String, DimensionKind, Vec<String>)> = Vec::new();
        for action in &self.actions {
            let Some(name) = &action.dimension else {
                continue;
            };
            match dimensions.iter_mut().find(|(n, _, _)| *n == *name) {
                Some((_, _, members)) => members.push(action.name.clone()),
                None => dimensions.push((
                    name.clone(),
                    DimensionKind::for_category(action.category),
                    vec![action.name.clone()],
                )),
            }
        }
        dimensions
    }

    /// Build the catalog and an executor with every declared handler
    pub fn into_executor(self) -> EngineResult<ActionExecutor> {
        let catalog = Arc::new(self.catalog()?);
        let mut executor = ActionExecutor::new(catalog);
        for action in self.actions {
            match action.handler {
                Some(spec) => {
                    let handler = spec.build().map_err(|e| {
                        EngineError::manifest_error(format!("action '{}': {}", action.name, e))
                    })?;
                    executor.register(action.name, handler);
                }
                None => warn!(action = %action.name, "Manifest action declares no handler"),
            }
        }
        Ok(executor)
    }
}
