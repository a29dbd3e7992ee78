//! Global subscriber setup for the controller binary.
//!
//! `log` records from the library are bridged into `tracing`, so pipeline
//! spans and plain log lines end up in the same output.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;

/// Installs the global subscriber. `RUST_LOG` overrides `level`.
///
/// Only the first call takes effect.
pub fn init(format: LogFormat, level: &str) {
    let bridged = tracing_log::LogTracer::init().is_ok();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(false)),
        ),
    };

    if result.is_err() || !bridged {
        log::debug!("Tracing subscriber already set");
    }
}
