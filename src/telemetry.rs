//! Tracing setup.
//!
//! Controlled by environment variables: `FANOUT_LOG` sets the filter
//! (default `warn`), `FANOUT_LOG_FORMAT=json` switches to JSON lines.
//! All diagnostics go to stderr so stdout stays parseable.

use tracing_subscriber::EnvFilter;

/// Guard returned by [`init`]; kept alive for the life of the process.
pub struct Telemetry;

/// Initialize the global tracing subscriber. Safe to call once from `main`.
pub fn init() -> Telemetry {
    let filter = EnvFilter::try_from_env("FANOUT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = std::env::var("FANOUT_LOG_FORMAT").is_ok_and(|v| v == "json");

    if json {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .without_time()
            .try_init();
    }

    Telemetry
}
