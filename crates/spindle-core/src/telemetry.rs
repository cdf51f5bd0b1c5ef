//! tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoUtc;

use crate::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` overrides `cfg.level`.
///
/// Returns false when a subscriber was already installed (tests, embedding apps).
pub fn init_tracing(cfg: &LoggingConfig) -> bool {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| cfg.level.clone());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .is_ok()
    }
}
