//! Process-wide tracing subscriber set-up.

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Builds the log filter for `config`, falling back to `info` if the
/// directive does not parse.
pub fn log_filter(config: &Config) -> EnvFilter {
    let level = config.logging.effective_level(config.app.environment);
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Call once, before anything logs.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_tracing(config: &Config) {
    let filter = log_filter(config);

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrade_types::Environment;

    #[test]
    fn filter_follows_environment() {
        let mut config = Config::default();
        assert_eq!(log_filter(&config).to_string(), "debug");

        config.app.environment = Environment::Production;
        assert_eq!(log_filter(&config).to_string(), "info");
    }

    #[test]
    fn invalid_directive_falls_back_to_info() {
        let mut config = Config::default();
        config.logging.level = Some("autotrade=loud".to_string());
        assert_eq!(log_filter(&config).to_string(), "info");
    }
}
