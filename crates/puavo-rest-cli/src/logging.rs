//! Console logging for the command-line client
//!
//! Everything goes to stderr so response bodies on stdout stay clean.
//! `RUST_LOG` takes precedence; otherwise the level comes from
//! `PUAVO_REST_LOG_LEVEL` or `--verbose`. Request diagnostics are shown
//! whenever the client has them enabled.

use puavo_rest_client::diagnostics::VERBOSE_TARGET;
use puavo_rest_client::options::VERBOSE_ENV;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Environment variable selecting the default log level
pub const LOG_LEVEL_ENV: &str = "PUAVO_REST_LOG_LEVEL";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// Let request diagnostics through regardless of `level`
    pub diagnostics: bool,
    /// Include targets and source locations
    pub detailed: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            diagnostics: false,
            detailed: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_env(verbose: bool) -> Self {
        Self::resolve(
            verbose,
            std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
            std::env::var_os(VERBOSE_ENV).is_some(),
        )
    }

    fn resolve(verbose: bool, level: Option<&str>, diagnostics_env: bool) -> Self {
        let level = if verbose {
            Level::INFO
        } else {
            level.and_then(|v| v.parse().ok()).unwrap_or(Level::WARN)
        };

        Self {
            level,
            diagnostics: verbose || diagnostics_env,
            detailed: level >= Level::DEBUG,
        }
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        if self.diagnostics {
            format!("{level},{VERBOSE_TARGET}=info")
        } else {
            level
        }
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.detailed)
        .with_file(config.detailed)
        .with_line_number(config.detailed)
        .with_filter(filter);

    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}
