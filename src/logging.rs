use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `default`
/// when set. Calling this twice is harmless.
pub fn init(default: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .try_init();
}
