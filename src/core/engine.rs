// Trial loop driving the learning engine
// state -> action -> execute -> reward -> learn -> decay -> checkpoint -> paced delay

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{Analyzer, AnalysisReport};
use crate::config::{EngineConfig, StoragePaths};
use crate::core::backoff::Backoff;
use crate::core::storage::{load_q_table_or_empty, save_q_table, TrialLog};
use crate::core::trial::{Termination, TrialRecord};
use crate::error::EngineResult;
use crate::executor::ActionExecutor;
use crate::reinforcement::action::ActionCatalog;
use crate::reinforcement::policy::{EpsilonGreedy, ExplorationSchedule, Policy};
use crate::reinforcement::probe::{ProgressProbe, ReadinessProbe};
use crate::reinforcement::q_learning::{Learner, QTable};
use crate::reinforcement::reward::calculate_reward;
use crate::reinforcement::state::{StateSchema, StateSnapshot};

/// Predicate that ends a run early once it holds
pub type GoalPredicate = Box<dyn Fn(&StateSnapshot) -> bool + Send + Sync>;

/// Where the loop is within a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Running,
    Succeeded,
    Failed,
    Checkpointing,
    Terminal,
}

/// Outcome of one call to `Engine::run`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub termination: Termination,
    /// Trials executed by this run
    pub trials_run: u64,
    /// Number of the last trial, counting resumed history
    pub last_trial: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_reward: f64,
    pub final_epsilon: f64,
    pub q_states: usize,
    pub q_entries: usize,
    /// Q-table saves that failed during the run
    pub checkpoint_failures: u32,
    /// Analysis over the complete history, resumed records included
    pub report: AnalysisReport,
}

/// The learning engine: owns the Q-table, exploration rate and trial bookkeeping
pub struct Engine {
    config: EngineConfig,
    catalog: Arc<ActionCatalog>,
    schema: StateSchema,
    executor: ActionExecutor,
    probe: Box<dyn ReadinessProbe>,
    goal: Option<GoalPredicate>,
    learner: Learner,
    policy: EpsilonGreedy,
    schedule: ExplorationSchedule,
    backoff: Backoff,
    rng: StdRng,

    q_table_path: Option<PathBuf>,
    trial_log: Option<TrialLog>,
    report_path: Option<PathBuf>,
    delays: bool,

    run_id: String,
    phase: LoopPhase,
    trial_number: u64,
    consecutive_failures: u32,
    last_action: Option<String>,
    /// Records loaded from an earlier run
    prior: Vec<TrialRecord>,
    /// Records produced by this process
    history: Vec<TrialRecord>,
    checkpoint_failures: u32,
}

impl Engine {
    /// Create an engine with an empty Q-table and a progress-based probe
    ///
    /// Fails only on invalid configuration.
    pub fn new(config: EngineConfig, executor: ActionExecutor) -> EngineResult<Self> {
        config.validate()?;

        let catalog = executor.catalog().clone();
        let registry = executor.validate();
        if !registry.is_consistent() {
            warn!(
                missing = registry.missing_handlers.len(),
                orphaned = registry.orphan_handlers.len(),
                "Action catalog and handler registry disagree"
            );
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let run_id = Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            actions = catalog.len(),
            alpha = config.learning_rate,
            gamma = config.discount_factor,
            epsilon = config.initial_epsilon,
            "Engine created"
        );

        Ok(Self {
            schema: StateSchema::for_categories(&catalog.categories(), config.failure_exponent_cap),
            probe: Box::new(ProgressProbe::for_catalog(&catalog)),
            goal: None,
            learner: Learner::new(QTable::new(), config.learning_rate, config.discount_factor),
            policy: EpsilonGreedy::new(config.category_weights.clone()),
            schedule: ExplorationSchedule::new(
                config.initial_epsilon,
                config.min_epsilon,
                config.epsilon_decay,
            ),
            backoff: Backoff::new(
                config.base_delay_ms,
                config.max_delay_ms,
                config.failure_exponent_cap,
                config.jitter_fraction,
            ),
            rng,
            q_table_path: None,
            trial_log: None,
            report_path: None,
            delays: true,
            run_id,
            phase: LoopPhase::Idle,
            trial_number: 0,
            consecutive_failures: 0,
            last_action: None,
            prior: Vec::new(),
            history: Vec::new(),
            checkpoint_failures: 0,
            catalog,
            executor,
            config,
        })
    }

    /// Start from previously learned values
    pub fn with_q_table(mut self, q_table: QTable) -> Self {
        self.learner = Learner::new(q_table, self.config.learning_rate, self.config.discount_factor);
        self
    }

    /// Replace the readiness dimensions
    pub fn with_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Replace the readiness probe
    pub fn with_probe(mut self, probe: Box<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// End the run as soon as `goal` holds for the current state
    ///
    /// Without a goal the run ends early once every dimension is fully ready.
    pub fn with_goal(mut self, goal: impl Fn(&StateSnapshot) -> bool + Send + Sync + 'static) -> Self {
        self.goal = Some(Box::new(goal));
        self
    }

    /// Persist the Q-table, trial log and report at these paths
    pub fn with_storage(mut self, paths: &StoragePaths) -> Self {
        self.q_table_path = Some(paths.q_table.clone());
        self.trial_log = Some(TrialLog::new(paths.trial_log.clone()));
        self.report_path = Some(paths.report.clone());
        self
    }

    /// Skip inter-trial sleeps
    pub fn without_delays(mut self) -> Self {
        self.delays = false;
        self
    }

    /// Load the Q-table and trial history from the configured storage
    ///
    /// A missing or unreadable Q-table means starting empty; unreadable
    /// history means starting without it.
    pub fn restore(self) -> Self {
        let q_table = match &self.q_table_path {
            Some(path) => load_q_table_or_empty(path),
            None => QTable::new(),
        };
        let records = match &self.trial_log {
            Some(log) => log.load().unwrap_or_else(|e| {
                warn!("Could not read trial log: {}; starting without history", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        self.with_q_table(q_table).resume(records)
    }

    /// Continue after an earlier run's trial history
    ///
    /// Trial numbering, the failure streak and the last action carry over,
    /// epsilon resumes one decay step after the last recorded value and the
    /// probe replays the history.
    pub fn resume(mut self, records: Vec<TrialRecord>) -> Self {
        if let Some(last) = records.last() {
            self.trial_number = last.trial_number;
            self.consecutive_failures = last.consecutive_failures;
            self.last_action = Some(last.action.clone());
            self.schedule = ExplorationSchedule::resume(
                last.epsilon,
                self.config.min_epsilon,
                self.config.epsilon_decay,
            );
            self.probe.replay(&records);
            info!(
                trials = records.len(),
                last_trial = self.trial_number,
                epsilon = self.schedule.epsilon(),
                "Resuming from trial history"
            );
        }
        self.prior = records;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Number of the last executed trial
    pub fn trial_number(&self) -> u64 {
        self.trial_number
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Exploration rate for the next trial
    pub fn epsilon(&self) -> f64 {
        self.schedule.epsilon()
    }

    pub fn q_table(&self) -> &QTable {
        self.learner.q_table()
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Records produced by this process
    pub fn history(&self) -> &[TrialRecord] {
        &self.history
    }

    /// Snapshot of the current state for the upcoming trial
    pub fn current_state(&self) -> StateSnapshot {
        self.snapshot(self.trial_number + 1)
    }

    fn snapshot(&self, trial_number: u64) -> StateSnapshot {
        self.schema.snapshot(
            self.probe.readiness(),
            trial_number,
            self.consecutive_failures,
            self.last_action.as_deref(),
        )
    }

    fn set_phase(&mut self, phase: LoopPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Loop phase change");
            self.phase = phase;
        }
    }

    /// Whether the goal predicate holds for the current state
    pub fn goal_reached(&self) -> bool {
        let snapshot = self.current_state();
        match &self.goal {
            Some(goal) => goal(&snapshot),
            None => self.schema.is_fully_ready(&snapshot),
        }
    }

    /// Execute one full trial and return its record
    pub async fn run_trial(&mut self) -> TrialRecord {
        self.set_phase(LoopPhase::Running);
        self.trial_number += 1;
        let started_at = Utc::now();

        let snapshot = self.snapshot(self.trial_number);
        let state = self.schema.encode(&snapshot);
        let epsilon = self.schedule.epsilon();

        let selection = self.policy.select(
            &state,
            self.learner.q_table(),
            epsilon,
            &self.catalog,
            &mut self.rng,
        );
        let action = selection.action.name.clone();
        let mode = selection.mode;

        let outcome = self.executor.execute(&action).await;
        let reward = calculate_reward(&outcome, &self.config.reward);

        self.probe.observe(&outcome);
        if outcome.success {
            self.set_phase(LoopPhase::Succeeded);
            self.consecutive_failures = 0;
        } else {
            self.set_phase(LoopPhase::Failed);
            self.consecutive_failures += 1;
        }
        self.last_action = Some(action.clone());

        let next_state = self.schema.encode(&self.snapshot(self.trial_number + 1));
        let new_q = self.learner.update(&state, &action, reward, &next_state);
        self.schedule.decay();

        let record = TrialRecord {
            trial_number: self.trial_number,
            action,
            success: outcome.success,
            reward,
            duration_ms: outcome.duration_ms,
            error: outcome.error,
            consecutive_failures: self.consecutive_failures,
            epsilon,
            mode: Some(mode),
            run_id: Some(self.run_id.clone()),
            started_at: Some(started_at),
        };

        info!(
            trial = record.trial_number,
            action = %record.action,
            ?mode,
            success = record.success,
            reward = record.reward,
            q = new_q,
            failures = record.consecutive_failures,
            "Trial complete"
        );
        if let Some(error) = &record.error {
            debug!(trial = record.trial_number, "Trial error: {}", error);
        }

        if let Some(log) = &self.trial_log {
            if let Err(e) = log.append(&record) {
                warn!("Failed to append trial {} to log: {}", record.trial_number, e);
            }
        }
        self.history.push(record.clone());

        if self.trial_number % self.config.checkpoint_interval == 0 {
            self.checkpoint();
        }
        self.set_phase(LoopPhase::Idle);
        record
    }

    /// Persist the Q-table if a path is configured; failures are logged
    pub fn checkpoint(&mut self) -> bool {
        let Some(path) = self.q_table_path.clone() else {
            return true;
        };
        let previous = self.phase;
        self.set_phase(LoopPhase::Checkpointing);
        let saved = match save_q_table(self.learner.q_table(), &path) {
            Ok(()) => {
                info!(
                    trial = self.trial_number,
                    entries = self.learner.q_table().entry_count(),
                    "Checkpointed Q-table"
                );
                true
            }
            Err(e) => {
                self.checkpoint_failures += 1;
                warn!("Q-table checkpoint failed: {}", e);
                false
            }
        };
        self.set_phase(previous);
        saved
    }

    async fn pause(&mut self) {
        if !self.delays {
            return;
        }
        let delay = self.backoff.delay(self.consecutive_failures, &mut self.rng);
        debug!(
            failures = self.consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "Waiting before next trial"
        );
        tokio::time::sleep(delay).await;
    }

    /// Run trials until the budget is spent or the goal holds
    pub async fn run(&mut self) -> RunSummary {
        let max_trials = self.config.max_trials;
        info!(
            run_id = %self.run_id,
            max_trials,
            first_trial = self.trial_number + 1,
            epsilon = self.schedule.epsilon(),
            "Starting run"
        );

        let first_index = self.history.len();
        let mut executed = 0u64;
        let termination = loop {
            if self.goal_reached() {
                break Termination::GoalReached;
            }
            if executed >= max_trials {
                break Termination::MaxTrials;
            }
            if executed > 0 {
                self.pause().await;
            }
            self.run_trial().await;
            executed += 1;
        };

        self.finish(termination, first_index)
    }

    fn finish(&mut self, termination: Termination, first_index: usize) -> RunSummary {
        self.set_phase(LoopPhase::Terminal);
        self.checkpoint();

        let run_records = &self.history[first_index..];
        let successes = run_records.iter().filter(|r| r.success).count() as u64;
        let total_reward = run_records.iter().map(|r| r.reward).sum();

        let full_history: Vec<TrialRecord> = self
            .prior
            .iter()
            .chain(self.history.iter())
            .cloned()
            .collect();
        let report = Analyzer::new(self.config.analysis_window).analyze(&full_history, Some(&*self.catalog));
        if let Some(path) = &self.report_path {
            if let Err(e) = report.write(path) {
                warn!("Failed to write analysis report: {}", e);
            }
        }

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            termination,
            trials_run: run_records.len() as u64,
            last_trial: self.trial_number,
            successes,
            failures: run_records.len() as u64 - successes,
            total_reward,
            final_epsilon: self.schedule.epsilon(),
            q_states: self.learner.q_table().state_count(),
            q_entries: self.learner.q_table().entry_count(),
            checkpoint_failures: self.checkpoint_failures,
            report,
        };

        info!(
            termination = termination.as_str(),
            trials = summary.trials_run,
            successes = summary.successes,
            success_rate = summary.report.success_rate,
            epsilon = summary.final_epsilon,
            q_entries = summary.q_entries,
            "Run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::load_q_table;
    use crate::executor::{ScriptedHandler, SimulatedWorld};
    use crate::reinforcement::action::{ActionSpec, Category, CategoryWeights};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_config() -> EngineConfig {
        let mut weights = CategoryWeights::uniform(1.0);
        weights.set(Category::Configuration, 3.0);
        EngineConfig {
            initial_epsilon: 1.0,
            seed: Some(7),
            category_weights: weights,
            ..EngineConfig::default()
        }
    }

    fn executor_with(catalog: ActionCatalog, handler: impl Fn(&ActionSpec) -> ScriptedHandler) -> ActionExecutor {
        let catalog = Arc::new(catalog);
        let mut executor = ActionExecutor::new(catalog.clone());
        for action in catalog.iter() {
            executor.register(action.name.clone(), Box::new(handler(action)));
        }
        executor
    }

    #[tokio::test]
    async fn test_single_failing_trial_from_empty_table() {
        let config = test_config();
        let executor = executor_with(ActionCatalog::default_catalog(), |_| {
            ScriptedHandler::always_err("not configured")
        });
        let mut engine = Engine::new(config.clone(), executor).unwrap().without_delays();

        let record = engine.run_trial().await;

        assert_eq!(record.trial_number, 1);
        assert!(!record.success);
        assert_eq!(record.reward, config.reward.failure_base);
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(engine.consecutive_failures(), 1);
        assert_eq!(record.epsilon, 1.0);
        assert_eq!(
            engine.epsilon(),
            (1.0 * config.epsilon_decay).max(config.min_epsilon)
        );
        assert_eq!(engine.q_table().entry_count(), 1);
        let (state, row) = engine.q_table().iter().next().unwrap();
        let value = row[&record.action];
        assert!((value - config.learning_rate * config.reward.failure_base).abs() < 1e-12);
        assert!(state.as_str().ends_with("failures=0|last=none"));
        assert_eq!(engine.phase(), LoopPhase::Idle);
    }

    #[tokio::test]
    async fn test_fast_deployment_success_resets_streak() {
        let config = test_config();
        let executor = executor_with(ActionCatalog::default_catalog(), |action| {
            if action.category == Category::Deployment {
                ScriptedHandler::always_ok(json!({"deployed": true}))
                    .with_delay(Duration::from_millis(50))
            } else {
                ScriptedHandler::always_err("not configured")
            }
        });
        let mut engine = Engine::new(config.clone(), executor).unwrap().without_delays();

        let mut deployment = None;
        for _ in 0..200 {
            let record = engine.run_trial().await;
            if record.success {
                deployment = Some(record);
                break;
            }
        }
        let record = deployment.expect("a deployment action is eventually explored");
        let category = engine.catalog().get(&record.action).unwrap().category;
        assert_eq!(category, Category::Deployment);
        assert!(record.duration_ms >= 50);
        assert_eq!(
            record.reward,
            config.reward.success_base + config.reward.deployment_bonus + config.reward.very_fast_bonus
        );
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(engine.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_bad_handlers_never_stop_the_loop() {
        let catalog = ActionCatalog::new(vec![
            ActionSpec::new("flaky", Category::Testing),
            ActionSpec::new("unwired", Category::Tooling),
        ])
        .unwrap();
        let executor = ActionExecutor::new(Arc::new(catalog))
            .with_handler("flaky", Box::new(ScriptedHandler::panicking("adapter bug")));
        let config = EngineConfig {
            max_trials: 7,
            ..test_config()
        };
        let mut engine = Engine::new(config, executor).unwrap().without_delays();

        let summary = engine.run().await;
        assert_eq!(summary.termination, Termination::MaxTrials);
        assert_eq!(summary.trials_run, 7);
        assert_eq!(summary.failures, 7);
        assert_eq!(engine.consecutive_failures(), 7);
        assert!(engine.history().iter().all(|r| r.error.is_some()));
        // Streaks beyond the cap share a state key.
        assert!(engine
            .q_table()
            .iter()
            .all(|(state, _)| !state.as_str().contains("failures=6")));
    }

    #[tokio::test]
    async fn test_goal_reached_ends_run_early() {
        let catalog =
            ActionCatalog::new(vec![ActionSpec::new("install_cli_tools", Category::Tooling)]).unwrap();
        let executor = executor_with(catalog, |_| ScriptedHandler::always_ok(json!({})));
        let config = EngineConfig {
            max_trials: 10,
            ..test_config()
        };
        let mut engine = Engine::new(config, executor).unwrap().without_delays();

        let summary = engine.run().await;
        assert_eq!(summary.termination, Termination::GoalReached);
        assert_eq!(summary.trials_run, 1);
        assert_eq!(engine.phase(), LoopPhase::Terminal);
    }

    #[tokio::test]
    async fn test_custom_goal_checked_before_first_trial() {
        let executor = executor_with(ActionCatalog::default_catalog(), |_| {
            ScriptedHandler::always_err("not configured")
        });
        let mut engine = Engine::new(test_config(), executor)
            .unwrap()
            .without_delays()
            .with_goal(|_| true);
        let summary = engine.run().await;
        assert_eq!(summary.termination, Termination::GoalReached);
        assert_eq!(summary.trials_run, 0);
        assert!(engine.q_table().is_empty());
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        let executor = executor_with(ActionCatalog::default_catalog(), |_| {
            ScriptedHandler::always_ok(json!({}))
        });
        let config = EngineConfig {
            max_trials: 0,
            ..EngineConfig::default()
        };
        let err = Engine::new(config, executor).err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_checkpoint_and_resume() {
        let dir = tempdir().unwrap();
        let paths = StoragePaths::in_dir(dir.path());
        let config = EngineConfig {
            max_trials: 4,
            checkpoint_interval: 2,
            ..test_config()
        };
        let simulated = |seed| {
            let world = SimulatedWorld::new(seed).with_max_latency(0);
            let mut executor = ActionExecutor::new(Arc::new(ActionCatalog::default_catalog()));
            world.register_all(&mut executor);
            executor
        };

        let mut first = Engine::new(config.clone(), simulated(1))
            .unwrap()
            .with_storage(&paths)
            .without_delays()
            .restore();
        let summary = first.run().await;
        assert_eq!(summary.trials_run, 4);
        assert_eq!(summary.report.total_trials, 4);
        assert!(paths.report.exists());
        assert_eq!(
            load_q_table(&paths.q_table).unwrap().unwrap(),
            first.q_table().clone()
        );

        let mut second = Engine::new(config.clone(), simulated(2))
            .unwrap()
            .with_storage(&paths)
            .without_delays()
            .restore();
        assert_eq!(second.trial_number(), 4);
        assert!((second.epsilon() - first.epsilon()).abs() < 1e-12);
        assert_eq!(second.q_table(), first.q_table());
        assert_eq!(second.consecutive_failures(), first.consecutive_failures());

        let summary = second.run().await;
        assert_eq!(summary.last_trial, 8);
        assert_eq!(summary.report.total_trials, 8);

        let records = TrialLog::new(paths.trial_log.clone()).load().unwrap();
        let numbers: Vec<u64> = records.iter().map(|r| r.trial_number).collect();
        assert_eq!(numbers, (1..=8).collect::<Vec<u64>>());
        assert_ne!(records[0].run_id, records[7].run_id);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_stop_run() {
        let dir = tempdir().unwrap();
        // A directory where the Q-table file should be makes every save fail.
        let blocked = dir.path().join("q_table.json");
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();
        let paths = StoragePaths::in_dir(dir.path());

        let executor = executor_with(ActionCatalog::default_catalog(), |_| {
            ScriptedHandler::always_err("not configured")
        });
        let config = EngineConfig {
            max_trials: 3,
            checkpoint_interval: 1,
            ..test_config()
        };
        let mut engine = Engine::new(config, executor)
            .unwrap()
            .with_storage(&paths)
            .without_delays();
        let summary = engine.run().await;
        assert_eq!(summary.trials_run, 3);
        assert_eq!(summary.checkpoint_failures, 4);
    }
}
