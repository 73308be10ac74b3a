//! Tracing initialization for embedding binaries.

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`. Call once at process startup,
/// before connecting anything.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
