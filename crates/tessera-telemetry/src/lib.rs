//! Logging bootstrap and span helpers for Tessera.
//!
//! Libraries in this workspace only emit `tracing` events; the embedding
//! application calls [`init`] once to install a subscriber. Verbosity comes
//! from `RUST_LOG` when set:
//!
//! ```bash
//! RUST_LOG=tessera_client=debug,tessera_store=trace my-app
//! ```

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: `RUST_LOG` filter (falling back to
/// `default_directive`) and a stderr fmt layer.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Subscriber for tests: output captured by the test harness, safe to call
/// from every test.
pub fn try_init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Span for one document replica operation ("open", "close", "apply", …).
pub fn replica_span(context_id: &str, op: &'static str) -> Span {
    tracing::info_span!("replica", context_id = %context_id, op)
}

/// Span for one subscription operation ("start", "stop", "page", …).
pub fn subscription_span(subscription_id: &str, op: &'static str) -> Span {
    tracing::info_span!("subscription", subscription_id = %subscription_id, op)
}
