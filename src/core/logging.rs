//! Logging initialization and utilities

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable.
///
/// # Example
/// ```
/// scenestream::core::logging::init();
/// log::info!("Streaming core started");
/// ```
pub fn init() {
    init_with_filter("info");
}

/// Initialize logging with an explicit default filter (e.g. `"scenestream=debug"`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_with_filter(default_filter: &str) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter)
    ).try_init();
}
