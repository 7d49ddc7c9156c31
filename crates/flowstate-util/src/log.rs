//! Tracing subscriber setup for processes embedding flowstate.
//!
//! The library crates only emit events; whoever hosts them decides where
//! the events go. `RUST_LOG` always overrides the filter given here.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when the host has no opinion: store lifecycle at info,
/// per-file traffic hidden.
pub const DEFAULT_FILTER: &str = "flowstate_context=info";

/// Filter installed by [`init_for_tests`].
const TEST_FILTER: &str = "flowstate_context=debug";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Send flowstate events to stderr, filtered by `RUST_LOG` or `default`.
///
/// Returns `false` when the process already has a global subscriber, in
/// which case that subscriber keeps receiving the events.
pub fn init(default: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()
        .is_ok()
}

/// Route logs through the test harness's captured output.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter(TEST_FILTER))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
