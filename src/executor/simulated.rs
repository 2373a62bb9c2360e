// Stand-in handlers for dry runs and tests
// Scripted handlers replay fixed results; the simulated world models dependencies between steps

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::core::trial::TrialRecord;
use crate::executor::{ActionExecutor, ActionHandler};
use crate::reinforcement::action::{ActionCatalog, ActionSpec, Category};

#[derive(Debug, Clone)]
enum Scripted {
    Ok(serde_json::Value),
    Err(String),
    Panic(String),
}

/// Handler that replays a fixed sequence of results
///
/// The last scripted result repeats once the sequence is exhausted.
#[derive(Debug)]
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Scripted>,
    delay: Duration,
}

impl ScriptedHandler {
    fn from_script(script: Vec<Scripted>) -> Self {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| Scripted::Err("empty script".to_string()));
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            delay: Duration::ZERO,
        }
    }

    pub fn always_ok(details: serde_json::Value) -> Self {
        Self::from_script(vec![Scripted::Ok(details)])
    }

    pub fn always_err(message: impl Into<String>) -> Self {
        Self::from_script(vec![Scripted::Err(message.into())])
    }

    /// Handler that panics on every call
    pub fn panicking(message: impl Into<String>) -> Self {
        Self::from_script(vec![Scripted::Panic(message.into())])
    }

    /// Replay results in order, `Err` strings becoming failures
    pub fn sequence(results: Vec<Result<serde_json::Value, String>>) -> Self {
        Self::from_script(
            results
                .into_iter()
                .map(|r| match r {
                    Ok(details) => Scripted::Ok(details),
                    Err(message) => Scripted::Err(message),
                })
                .collect(),
        )
    }

    /// Sleep before answering, so durations are observable
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn next(&self) -> Scripted {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        match script.pop_front() {
            Some(step) => {
                *self.last.lock().unwrap_or_else(|e| e.into_inner()) = step.clone();
                step
            }
            None => self.last.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

#[async_trait]
impl ActionHandler for ScriptedHandler {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn run(&self, _action: &ActionSpec) -> anyhow::Result<serde_json::Value> {
        let step = self.next();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match step {
            Scripted::Ok(details) => Ok(details),
            Scripted::Err(message) => Err(anyhow!(message)),
            Scripted::Panic(message) => panic!("{}", message),
        }
    }
}

/// Categories that must have at least one completed action first
fn prerequisites(category: Category) -> &'static [Category] {
    match category {
        Category::Configuration | Category::Tooling => &[],
        Category::Testing => &[Category::Configuration],
        Category::Deployment => &[Category::Configuration],
        Category::Integration => &[Category::Configuration, Category::Deployment],
        Category::Resilience => &[Category::Deployment],
    }
}

fn success_probability(category: Category) -> f64 {
    match category {
        Category::Configuration => 0.8,
        Category::Testing => 0.7,
        Category::Deployment => 0.6,
        Category::Integration => 0.65,
        Category::Resilience => 0.75,
        Category::Tooling => 0.9,
    }
}

fn failure_message(category: Category) -> &'static str {
    match category {
        Category::Configuration => "invalid api key",
        Category::Testing => "connection refused by test target",
        Category::Deployment => "deployment failed: build error",
        Category::Integration => "authentication failed: webhook secret rejected",
        Category::Resilience => "health endpoint timed out",
        Category::Tooling => "installer exited with status 1",
    }
}

#[derive(Debug)]
struct WorldState {
    rng: StdRng,
    completed: HashSet<String>,
    completed_categories: HashSet<Category>,
}

/// Seeded model of a system being brought to readiness
///
/// Actions fail as not configured until their prerequisite categories have
/// a completed action, then succeed with a per-category probability.
#[derive(Debug, Clone)]
pub struct SimulatedWorld {
    state: Arc<Mutex<WorldState>>,
    max_latency_ms: u64,
}

impl SimulatedWorld {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(WorldState {
                rng: StdRng::seed_from_u64(seed),
                completed: HashSet::new(),
                completed_categories: HashSet::new(),
            })),
            max_latency_ms: 40,
        }
    }

    /// Upper bound of the simulated latency per action
    pub fn with_max_latency(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    /// Register a simulated handler for every catalog action
    pub fn register_all(&self, executor: &mut ActionExecutor) {
        let names: Vec<String> = executor.catalog().names().map(str::to_string).collect();
        for name in names {
            executor.register(
                name,
                Box::new(SimulatedHandler {
                    world: self.clone(),
                }),
            );
        }
    }

    /// Mark the successful actions of earlier trials as completed
    ///
    /// Keeps a resumed world consistent with the readiness replayed from the
    /// same history. Records for actions outside the catalog are ignored.
    pub fn replay(&self, records: &[TrialRecord], catalog: &ActionCatalog) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for record in records.iter().filter(|r| r.success) {
            if let Some(spec) = catalog.get(&record.action) {
                state.completed.insert(spec.name.clone());
                state.completed_categories.insert(spec.category);
            }
        }
        debug!(completed = state.completed.len(), "Simulated world replayed history");
    }

    /// Actions that have succeeded at least once
    pub fn completed(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut completed: Vec<String> = state.completed.iter().cloned().collect();
        completed.sort();
        completed
    }

    fn attempt(&self, action: &ActionSpec) -> (Result<(), String>, u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let latency = if self.max_latency_ms == 0 {
            0
        } else {
            state.rng.random_range(0..=self.max_latency_ms)
        };

        if let Some(missing) = prerequisites(action.category)
            .iter()
            .find(|c| !state.completed_categories.contains(*c))
        {
            return (
                Err(format!("{} prerequisite not configured", missing.as_str())),
                latency,
            );
        }

        if state.rng.random_bool(success_probability(action.category)) {
            state.completed.insert(action.name.clone());
            state.completed_categories.insert(action.category);
            (Ok(()), latency)
        } else {
            (Err(failure_message(action.category).to_string()), latency)
        }
    }
}

/// Handler backed by a shared simulated world
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    world: SimulatedWorld,
}

#[async_trait]
impl ActionHandler for SimulatedHandler {
    fn describe(&self) -> String {
        "simulated".to_string()
    }

    async fn run(&self, action: &ActionSpec) -> anyhow::Result<serde_json::Value> {
        let (result, latency_ms) = self.world.attempt(action);
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
        match result {
            Ok(()) => Ok(json!({ "simulated": true, "latency_ms": latency_ms })),
            Err(message) => bail!(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_result() {
        let handler = ScriptedHandler::sequence(vec![
            Err("not configured".to_string()),
            Ok(json!({"ok": true})),
        ]);
        let spec = ActionSpec::new("a", Category::Testing);
        assert!(handler.run(&spec).await.is_err());
        assert!(handler.run(&spec).await.is_ok());
        assert!(handler.run(&spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_prerequisites_gate_success() {
        let world = SimulatedWorld::new(3).with_max_latency(0);
        let deploy = ActionSpec::new("deploy_backend", Category::Deployment);
        let handler = SimulatedHandler {
            world: world.clone(),
        };
        let err = handler.run(&deploy).await.unwrap_err();
        assert_eq!(err.to_string(), "configuration prerequisite not configured");

        // Tooling has no prerequisites and a high success rate.
        let tooling = ActionSpec::new("install_cli_tools", Category::Tooling);
        let mut succeeded = false;
        for _ in 0..20 {
            if handler.run(&tooling).await.is_ok() {
                succeeded = true;
                break;
            }
        }
        assert!(succeeded);
        assert_eq!(world.completed(), vec!["install_cli_tools".to_string()]);
    }

    fn success_record(trial_number: u64, action: &str) -> TrialRecord {
        TrialRecord {
            trial_number,
            action: action.to_string(),
            success: true,
            reward: 25.0,
            duration_ms: 5,
            error: None,
            consecutive_failures: 0,
            epsilon: 0.5,
            mode: None,
            run_id: None,
            started_at: None,
        }
    }

    #[tokio::test]
    async fn test_replayed_history_satisfies_prerequisites() {
        let catalog = ActionCatalog::default_catalog();
        let world = SimulatedWorld::new(5).with_max_latency(0);
        let mut failed = success_record(2, "deploy_backend");
        failed.success = false;
        world.replay(
            &[
                success_record(1, "configure_payment_keys"),
                failed,
                success_record(3, "not_in_catalog"),
            ],
            &catalog,
        );
        assert_eq!(world.completed(), vec!["configure_payment_keys".to_string()]);

        let handler = SimulatedHandler {
            world: world.clone(),
        };
        let deploy = catalog.get("deploy_backend").unwrap();
        // Configuration is done, so deployment no longer fails on it; it may
        // still fail with its own error.
        for _ in 0..10 {
            if let Err(e) = handler.run(deploy).await {
                assert!(!e.to_string().contains("prerequisite"), "{}", e);
            }
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_outcomes() {
        let catalog = Arc::new(ActionCatalog::default_catalog());
        let run = |seed| {
            let catalog = catalog.clone();
            async move {
                let world = SimulatedWorld::new(seed).with_max_latency(0);
                let mut executor = ActionExecutor::new(catalog.clone());
                world.register_all(&mut executor);
                let mut results = Vec::new();
                for name in catalog.names() {
                    results.push(executor.execute(name).await.success);
                }
                results
            }
        };
        assert_eq!(run(11).await, run(11).await);
    }
}
