//! Tracing setup shared by the builder binaries.
//!
//! Diagnostics go to stderr and are filtered through `RUST_LOG`. Per-job
//! generator output is separate: it lands in `generator.log_dir` when that is
//! configured, regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,builder=info,builder_server=info";

/// Install the global subscriber: `EnvFilter` plus a compact stderr layer.
///
/// ```bash
/// RUST_LOG=builder=debug,tower_http=debug builder-server
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
