use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "ops_pilot=info";

/// Initialize logging to stderr
///
/// `verbose` lowers the default level to debug; `RUST_LOG` always wins.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(ansi_colors: bool, verbose: bool) {
    let default = if verbose { "ops_pilot=debug" } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let result = fmt::Subscriber::builder()
        .with_ansi(ansi_colors)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(verbose)
        .try_init();

    match result {
        Ok(()) => info!("Initializing ops-pilot v{}", crate::version()),
        Err(e) => eprintln!("Warning: Logger initialization failed: {}", e),
    }
}
