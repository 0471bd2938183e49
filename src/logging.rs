//! Tracing setup for the binary and the tests.

use anyhow::{Context, Result};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::FmtSubscriber;

/// Install the global subscriber with `filter` (`RUST_LOG` syntax).
pub fn configure(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .with_context(|| format!("invalid log filter {:?} @{}:{}", filter, file!(), line!()))?;

    let fmt_subscriber = FmtSubscriber::builder()
        .with_ansi(true)
        .with_thread_names(true)
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .with_context(|| format!("failed to setup tracing @{}:{}", file!(), line!()))?;

    Ok(())
}

/// Dump logs during tests when `TEST_LOGS` is set, e.g. `TEST_LOGS=debug cargo test`.
///
/// Safe to call from every test; only the first call installs a subscriber.
#[cfg(test)]
pub(crate) fn enable_test_logging() {
    if let Ok(filter) = std::env::var("TEST_LOGS") {
        let _ = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new(filter))
            .with_test_writer()
            .try_init();
    }
}
