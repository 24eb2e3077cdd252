//! Tracing subscriber set-up for the `ycfleet` binary.
//!
//! Library code only emits events; installing the subscriber is left to the
//! process entry point.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "YCFLEET_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Builds the event filter from [`LOG_ENV`], falling back to `info` when the
/// variable is unset or does not parse.
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs a compact stderr subscriber. A subscriber that is already set is
/// left in place.
pub fn init() {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;

    #[tokio::test]
    async fn falls_back_to_info_without_directives() {
        let _guard = EnvGuard::remove_vars(&[LOG_ENV]).await;
        assert_eq!(env_filter().to_string(), "info");
    }

    #[tokio::test]
    async fn honours_configured_directives() {
        let _guard = EnvGuard::set_vars(&[(LOG_ENV, "ycfleet=debug")]).await;
        assert_eq!(env_filter().to_string(), "ycfleet=debug");
    }

    #[test]
    fn repeated_initialisation_is_harmless() {
        init();
        init();
    }
}
