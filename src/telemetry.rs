//! Tracing subscriber set-up.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingSection};

/// Build the filter used when `RUST_LOG` is not set.
///
/// `verbose` forces `debug` for pipedeck regardless of the configured level.
pub fn default_directives(logging: &LoggingSection, verbose: bool) -> String {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.to_lowercase()
    };
    format!("pipedeck={level},tower_http={level}")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(logging: &LoggingSection, verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(logging, verbose)))
        .map_err(|e| anyhow!("Invalid log filter: {}", e))?;

    let installed = match logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_use_configured_level() {
        let logging = LoggingSection {
            level: "WARN".to_string(),
            format: LogFormat::Pretty,
        };
        assert_eq!(
            default_directives(&logging, false),
            "pipedeck=warn,tower_http=warn"
        );
    }

    #[test]
    fn test_verbose_forces_debug() {
        let logging = LoggingSection::default();
        assert_eq!(
            default_directives(&logging, true),
            "pipedeck=debug,tower_http=debug"
        );
    }
}
