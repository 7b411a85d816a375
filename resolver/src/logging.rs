//! Diagnostic tracing for resolver runs.
//!
//! Output goes to stderr so stdout stays reserved for command results
//! (plans and outcomes as JSON).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `info` for this crate and `warn` elsewhere.
///
/// # Example
/// ```bash
/// RUST_LOG=resolver=debug resolver solve-issue --repository octo/demo --issue 7
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,resolver=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
