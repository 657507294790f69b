//! Memoree API Gateway
//!
//! HTTP surface over the Memoree runtime:
//! - Serves ranked, trust-flagged leaderboards
//! - Relays identity mappings on behalf of signers
//! - Reports confirmation status of relayed transactions

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod types;

/// Install the global subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
