use anyhow::Result;
use std::env;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` directives refine the base level,
/// which comes from `--verbose` or the `LOG_LEVEL` variable.
pub fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose {
        Level::DEBUG
    } else {
        env::var("LOG_LEVEL")
            .map(|level| match level.to_lowercase().as_str() {
                "error" => Level::ERROR,
                "warn" => Level::WARN,
                "info" => Level::INFO,
                "debug" => Level::DEBUG,
                "trace" => Level::TRACE,
                _ => Level::INFO,
            })
            .unwrap_or(Level::INFO)
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))?;

    Ok(())
}
