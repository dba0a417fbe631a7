use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing once: installs a compact fmt subscriber honoring
/// `RUST_LOG` (default `info`). Safe to call from every test.
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(build_env_filter())
            .with_target(true)
            .with_level(true)
            .compact()
            .init();
    });
}

/// Run a sync test body with the shared tracing subscriber installed.
pub fn with_test_tracing<F, T>(_test_name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    init();
    f()
}
