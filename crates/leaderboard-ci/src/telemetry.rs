//! Tracing setup for the pipeline binary.
//!
//! Logs go to stderr: stdout is reserved for workflow commands (annotations)
//! and step outputs, which the host parses line by line.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset: `level` for this workspace's
/// crates, warnings for everything else.
pub fn default_filter(level: Level) -> String {
    format!("warn,leaderboard_ci={level},leaderboard={level}").to_lowercase()
}

/// Install the global subscriber. Only the first call takes effect.
///
/// `json` switches to newline-delimited JSON log lines.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_scopes_crates() {
        assert_eq!(
            default_filter(Level::DEBUG),
            "warn,leaderboard_ci=debug,leaderboard=debug"
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
