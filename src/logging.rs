//! # Structured Logging Module
//!
//! Environment-aware tracing setup for hosts that don't bring their own
//! subscriber. Level comes from `COMPS_LOG` (falling back to `info`); set
//! `COMPS_LOG_FORMAT=json` for machine-readable output.

use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// Uses `try_init` so an embedding host that already installed a global
/// subscriber keeps it; this is not an error.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env("COMPS_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let json = std::env::var("COMPS_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().json().with_target(true))
                .with(filter)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .with(filter)
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized, continuing");
        }
    });
}
