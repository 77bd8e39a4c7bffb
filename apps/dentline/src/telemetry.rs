use tracing_subscriber::EnvFilter;

/// Initialize structured logging for a binary. `RUST_LOG` wins; otherwise
/// `default_directive` applies.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
