//! Tracing setup for the reconciler binary.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber.
///
/// Verbosity maps `-v` counts to levels; `NODESYNC_LOG` overrides per-target
/// the way `RUST_LOG` would.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("NODESYNC_LOG")
        .from_env_lossy();

    // try_init so tests that initialize twice don't panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn level_from_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
