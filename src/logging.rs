use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Structured JSON logs on stdout. `RUST_LOG` overrides the default level.
pub fn init(debug: bool) {
    let default_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .init();
}
