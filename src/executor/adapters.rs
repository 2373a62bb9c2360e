// Concrete action handlers
// Environment checks, HTTP probes and subprocess commands

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::executor::ActionHandler;
use crate::reinforcement::action::ActionSpec;

/// Characters of subprocess output kept in outcome details
const OUTPUT_TAIL_CHARS: usize = 2_000;

/// Succeeds when every listed environment variable is set and non-empty
#[derive(Debug, Clone)]
pub struct EnvHandler {
    vars: Vec<String>,
}

impl EnvHandler {
    pub fn new(vars: Vec<String>) -> Self {
        Self { vars }
    }
}

#[async_trait]
impl ActionHandler for EnvHandler {
    fn describe(&self) -> String {
        format!("env check [{}]", self.vars.join(", "))
    }

    async fn run(&self, action: &ActionSpec) -> anyhow::Result<serde_json::Value> {
        for var in &self.vars {
            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {}
                _ => bail!("{} not configured", var),
            }
        }
        debug!(action = %action.name, "All required variables present");
        Ok(json!({ "checked": self.vars }))
    }
}

/// Probes an HTTP endpoint; any 2xx status is success
pub struct HttpHandler {
    client: reqwest::Client,
    method: reqwest::Method,
    url: String,
    bearer_token_env: Option<String>,
}

impl HttpHandler {
    /// Create a probe with its own request timeout
    pub fn new(
        method: &str,
        url: impl Into<String>,
        bearer_token_env: Option<String>,
        timeout: Duration,
    ) -> EngineResult<Self> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| EngineError::manifest_error(format!("Invalid HTTP method '{}'", method)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            method,
            url: url.into(),
            bearer_token_env,
        })
    }
}

#[async_trait]
impl ActionHandler for HttpHandler {
    fn describe(&self) -> String {
        format!("http {} {}", self.method, self.url)
    }

    async fn run(&self, _action: &ActionSpec) -> anyhow::Result<serde_json::Value> {
        let mut request = self.client.request(self.method.clone(), &self.url);

        if let Some(var) = &self.bearer_token_env {
            let token = std::env::var(var)
                .ok()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| anyhow!("{} not configured", var))?;
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => bail!("request to {} timed out", self.url),
            Err(e) if e.is_connect() => bail!("connection refused or unreachable: {}", self.url),
            Err(e) => return Err(e).context(format!("request to {} failed", self.url)),
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            bail!("authentication failed: HTTP {} from {}", status.as_u16(), self.url);
        }
        if !status.is_success() {
            bail!("HTTP {} from {}", status.as_u16(), self.url);
        }

        Ok(json!({
            "url": self.url,
            "status": status.as_u16(),
        }))
    }
}

/// Runs a program; exit status zero is success
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
            working_dir: None,
            timeout,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }
}

#[async_trait]
impl ActionHandler for CommandHandler {
    fn describe(&self) -> String {
        if self.args.is_empty() {
            format!("command {}", self.program)
        } else {
            format!("command {} {}", self.program, self.args.join(" "))
        }
    }

    async fn run(&self, action: &ActionSpec) -> anyhow::Result<serde_json::Value> {
        let program = which::which(&self.program)
            .map_err(|_| anyhow!("{} not configured: not found on PATH", self.program))?;

        let mut command = Command::new(&program);
        command.args(&self.args).envs(&self.env).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(action = %action.name, program = %program.display(), "Spawning command");
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.with_context(|| format!("failed to run {}", self.program))?,
            Err(_) => bail!(
                "{} timed out after {}s",
                self.program,
                self.timeout.as_secs_f64()
            ),
        };

        let stdout = tail(&String::from_utf8_lossy(&output.stdout));
        if !output.status.success() {
            let stderr = tail(&String::from_utf8_lossy(&output.stderr));
            bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        Ok(json!({
            "program": self.program,
            "exit_code": output.status.code(),
            "stdout": stdout,
        }))
    }
}

fn tail(text: &str) -> String {
    let count = text.chars().count();
    if count <= OUTPUT_TAIL_CHARS {
        text.to_string()
    } else {
        text.chars().skip(count - OUTPUT_TAIL_CHARS).collect()
    }
}
