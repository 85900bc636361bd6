//! Opt-in log output for binaries and examples embedding the resolver.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable read for the log filter before `RUST_LOG`.
pub const LOG_ENV: &str = "FLOWPROPS_LOG";

/// Install a global `tracing` subscriber printing to stderr.
///
/// The filter is taken from `FLOWPROPS_LOG`, then `RUST_LOG`, falling back to
/// `info`. Fails if a global subscriber was already installed.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
