//! Logging setup
//!
//! One `tracing-subscriber` registry for the whole process. The filter
//! comes from `RUST_LOG` when set, otherwise from the level named here;
//! debug builds print for a terminal, release builds emit JSON lines
//! suitable for log collection.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber filtered at `log_level`.
///
/// A `RUST_LOG` value in the environment overrides the argument. Repeat
/// calls are dropped silently, so this is safe to call after an earlier
/// bootstrap install.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!("{},vigil_engine={}", log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Installs the global subscriber at "info", for startup code that runs
/// before configuration is loaded.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
