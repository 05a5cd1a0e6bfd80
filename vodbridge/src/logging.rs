//! Tracing setup for the binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "vodbridge=info,rangefetch=info,fmp4=info,tower_http=warn";

/// Initialize the global subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
