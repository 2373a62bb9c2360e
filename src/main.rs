// ops-pilot command line
// Thin harness around the library: run, analyze, inspect and validate

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use ops_pilot::analysis::Analyzer;
use ops_pilot::config::{ConfigLoader, ConfigOverrides, StoragePaths};
use ops_pilot::core::{load_q_table, TrialLog};
use ops_pilot::executor::{ActionExecutor, ActionManifest, SimulatedWorld};
use ops_pilot::reinforcement::{ActionCatalog, ProgressProbe, StateSchema};
use ops_pilot::Engine;

/// Learns which setup actions bring a system to readiness
#[derive(Parser, Debug)]
#[command(name = "ops-pilot", version)]
struct Cli {
    /// Path to the TOML engine configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trial loop
    Run {
        /// TOML manifest of actions and their handlers
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(long)]
        q_table: Option<PathBuf>,
        #[arg(long)]
        trial_log: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
        /// Trials to run in this invocation
        #[arg(long)]
        max_trials: Option<u64>,
        /// Seed for exploration and the simulated world
        #[arg(long)]
        seed: Option<u64>,
        /// Use simulated handlers instead of real adapters; progress from
        /// an earlier trial log carries over into the simulated world
        #[arg(long)]
        simulate: bool,
        /// Skip the delay between trials
        #[arg(long)]
        no_delay: bool,
    },
    /// Rebuild the analysis report from a trial log
    Analyze {
        #[arg(long)]
        trial_log: Option<PathBuf>,
        /// Rolling window size for success rates
        #[arg(long, default_value_t = 10)]
        window: usize,
        #[arg(long)]
        report: Option<PathBuf>,
        /// Manifest whose catalog is checked for never-attempted actions
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Print the greedy action for every learned state
    Inspect {
        #[arg(long)]
        q_table: Option<PathBuf>,
        /// Manifest whose catalog the table was learned with
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Check the configuration and the catalog/handler registry
    Validate {
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    ops_pilot::logging::init_logging(true, cli.verbose);

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };

    match cli.command {
        Command::Run {
            manifest,
            q_table,
            trial_log,
            report,
            max_trials,
            seed,
            simulate,
            no_delay,
        } => {
            let overrides = ConfigOverrides { max_trials, seed };
            let config = loader
                .load_with(&overrides)
                .context("Failed to load configuration")?;
            let paths = StoragePaths::default().with_overrides(q_table, trial_log, report);

            let setup = build_setup(manifest.as_deref(), config.failure_exponent_cap)?;
            let mut executor = setup.executor;
            if simulate {
                let world_seed = config.seed.unwrap_or_else(rand::random);
                info!(seed = world_seed, "Using simulated handlers");
                let world = SimulatedWorld::new(world_seed);
                match TrialLog::new(paths.trial_log.clone()).load() {
                    Ok(records) => world.replay(&records, executor.catalog()),
                    Err(e) => warn!("Could not replay trial log into the simulated world: {}", e),
                }
                world.register_all(&mut executor);
            } else if !executor.catalog().names().any(|name| executor.has_handler(name)) {
                bail!("No action handlers are registered; pass --manifest or --simulate");
            }

            let mut engine = Engine::new(config, executor)
                .context("Failed to create engine")?
                .with_schema(setup.schema)
                .with_probe(Box::new(setup.probe))
                .with_storage(&paths);
            if no_delay {
                engine = engine.without_delays();
            }
            let mut engine = engine.restore();

            let summary = engine.run().await;
            println!("{}", summary.report.format_summary());
            println!(
                "Run {} ended ({}) after {} trials (last trial #{}): {} succeeded, {} failed, total reward {:.1}, epsilon {:.3}",
                summary.run_id,
                summary.termination.as_str(),
                summary.trials_run,
                summary.last_trial,
                summary.successes,
                summary.failures,
                summary.total_reward,
                summary.final_epsilon,
            );
            println!(
                "Q-table: {} states, {} entries ({})",
                summary.q_states,
                summary.q_entries,
                paths.q_table.display()
            );
            if summary.checkpoint_failures > 0 {
                warn!(failures = summary.checkpoint_failures, "Some checkpoints could not be saved");
            }
        }
        Command::Analyze {
            trial_log,
            window,
            report,
            manifest,
        } => {
            let paths = StoragePaths::default().with_overrides(None, trial_log, report);
            let records = TrialLog::new(paths.trial_log.clone())
                .load()
                .with_context(|| format!("Failed to read trial log {}", paths.trial_log.display()))?;
            if records.is_empty() {
                println!("No trials recorded in {}", paths.trial_log.display());
                return Ok(());
            }

            let catalog = match manifest {
                Some(path) => Some(ActionManifest::load(&path)?.catalog()?),
                None => None,
            };
            let analysis = Analyzer::new(window).analyze(&records, catalog.as_ref());
            analysis
                .write(&paths.report)
                .with_context(|| format!("Failed to write report {}", paths.report.display()))?;
            println!("{}", analysis.format_summary());
            info!(path = %paths.report.display(), "Report written");
        }
        Command::Inspect { q_table, manifest } => {
            let paths = StoragePaths::default().with_overrides(q_table, None, None);
            let Some(table) = load_q_table(&paths.q_table)? else {
                println!("No Q-table at {}", paths.q_table.display());
                return Ok(());
            };

            println!(
                "{} states, {} entries in {}",
                table.state_count(),
                table.entry_count(),
                paths.q_table.display()
            );
            let catalog = match manifest {
                Some(path) => ActionManifest::load(&path)?.catalog()?,
                None => ActionCatalog::default_catalog(),
            };
            for (state, action, value) in table.best_actions(&catalog) {
                println!("{:>9.3}  {:<32}  {}", value, action, state);
            }
        }
        Command::Validate { manifest } => {
            let config = loader.load().context("Invalid configuration")?;
            println!(
                "Configuration OK ({}): alpha {}, gamma {}, epsilon {} -> {}, {} trials",
                loader.config_path().display(),
                config.learning_rate,
                config.discount_factor,
                config.initial_epsilon,
                config.min_epsilon,
                config.max_trials,
            );

            let setup = build_setup(manifest.as_deref(), config.failure_exponent_cap)?;
            let registry = setup.executor.validate();
            println!(
                "Catalog: {} actions in {} categories, {} state dimensions",
                setup.executor.catalog().len(),
                setup.executor.catalog().categories().len(),
                setup.schema.dimensions().len(),
            );
            if registry.is_consistent() {
                println!("Every action has a handler");
            } else {
                for name in &registry.missing_handlers {
                    println!("  missing handler: {}", name);
                }
                for name in &registry.orphan_handlers {
                    println!("  handler without catalog entry: {}", name);
                }
            }
        }
    }

    Ok(())
}

/// Executor, state schema and probe built from the same catalog
struct Setup {
    executor: ActionExecutor,
    schema: StateSchema,
    probe: ProgressProbe,
}

/// Read the manifest, or fall back to the built-in catalog with no handlers
fn build_setup(manifest: Option<&Path>, failure_cap: u32) -> Result<Setup> {
    let Some(path) = manifest else {
        let catalog = ActionCatalog::default_catalog();
        return Ok(Setup {
            schema: StateSchema::for_categories(&catalog.categories(), failure_cap),
            probe: ProgressProbe::for_catalog(&catalog),
            executor: ActionExecutor::new(Arc::new(catalog)),
        });
    };

    let manifest = ActionManifest::load(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    let catalog = manifest.catalog()?;
    let mut schema = StateSchema::for_categories(&catalog.categories(), failure_cap);
    let mut probe = ProgressProbe::for_catalog(&catalog);
    for (name, kind, members) in manifest.dimensions() {
        schema = schema.with_dimension(name.clone(), kind);
        probe = probe.with_group(name, members);
    }

    Ok(Setup {
        executor: manifest.into_executor()?,
        schema,
        probe,
    })
}
