//! Process-wide tracing setup for the binary.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const LOG_ENV_VAR: &str = "SCHEMASYNC_LOG";

/// Builds the log filter from `SCHEMASYNC_LOG`, falling back to `info` when
/// the variable is unset or unparsable.
#[must_use]
pub fn env_filter() -> EnvFilter {
    let directives = std::env::var(LOG_ENV_VAR).unwrap_or_default();
    filter_from(&directives)
}

fn filter_from(directives: &str) -> EnvFilter {
    if directives.trim().is_empty() {
        return EnvFilter::new("info");
    }
    EnvFilter::from_str(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
