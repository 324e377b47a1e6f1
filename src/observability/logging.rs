//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Respect `RUST_LOG` over the configured default level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. The environment filter wins over
/// `default_filter` when set.
pub fn init(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
