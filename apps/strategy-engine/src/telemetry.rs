//! Tracing setup for the engine.
//!
//! # Configuration
//!
//! - `RUST_LOG`: standard `EnvFilter` directives (default: `info`)
//!
//! # Usage
//!
//! ```rust,ignore
//! strategy_engine::telemetry::init();
//! ```

use tracing_subscriber::EnvFilter;

/// Initialize console tracing with an environment-driven filter.
///
/// Safe to call more than once; subsequent calls are no-ops (useful in
/// tests where several cases race to initialize).
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
