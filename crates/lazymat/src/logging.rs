//! Tracing subscriber setup.

use tracing_subscriber::filter::EnvFilter;

const DEFAULT_FILTER: &str = "warn";

fn filter() -> EnvFilter {
    let directive = crate::env::log_filter().unwrap_or_else(|| DEFAULT_FILTER.to_string());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a global fmt subscriber filtered by `LAZYMAT_LOG` (default `warn`).
///
/// Returns `false` when another subscriber is already installed; repeated calls are harmless.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Like [`init`], but writes through the test harness so output is captured per test.
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init()
        .is_ok()
}
