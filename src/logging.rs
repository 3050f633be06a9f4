//! Logging initialization: `tracing` + `tracing-subscriber` with `EnvFilter`.
//!
//! This is a headless daemon — no TUI capture layer is needed, unlike the
//! teacher's interactive mode, which also drives a `ratatui` log pane.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global subscriber. `verbose` forces `debug` level
/// regardless of `RUST_LOG`; otherwise `RUST_LOG` is honored, falling back
/// to `info`.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
