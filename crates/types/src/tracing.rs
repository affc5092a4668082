use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install the global `fmt` subscriber on stderr.
///
/// Filtering follows `RUST_LOG` (for example `RUST_LOG=runtime=debug,info`)
/// and falls back to `info`. Calls after the first are no-ops.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(false)
            .with_env_filter(filter)
            .try_init();
    });
}
