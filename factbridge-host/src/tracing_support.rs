//! Tracing subscriber setup for hosts.
//!
//! The bridge itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can use [`init_subscriber`]. Output goes to stderr:
//! stdout is reserved for the host's fact output.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable format with colors.
    Pretty,

    /// Compact single-line format.
    Compact,

    /// JSON lines.
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "warn".
    pub level: Option<tracing::Level>,

    /// Output format.
    pub format: TracingFormat,

    /// Include timestamps in output.
    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Compact,
            timestamps: true,
            target: true,
        }
    }
}

/// Initialize a stderr subscriber filtered by `RUST_LOG`.
///
/// Returns false if a global subscriber was already installed.
///
/// # Environment Variables
///
/// - `RUST_LOG=debug` - Include navigation and custom fact loading diagnostics
/// - `RUST_LOG=factbridge::ruby=debug` - Only messages logged by custom facts
pub fn init_subscriber() -> bool {
    init_subscriber_with_config(TracingConfig::default())
}

/// Initialize a stderr subscriber with custom configuration.
///
/// # Example
///
/// ```no_run
/// use factbridge_host::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
///
/// init_subscriber_with_config(TracingConfig {
///     format: TracingFormat::Json,
///     timestamps: false,
///     ..Default::default()
/// });
/// ```
pub fn init_subscriber_with_config(config: TracingConfig) -> bool {
    let filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(filter)
        .try_init()
        .is_ok()
}

fn fmt_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.target)
        .with_span_events(FmtSpan::NONE);

    match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => layer.pretty().boxed(),
        (TracingFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => layer.compact().boxed(),
        (TracingFormat::Compact, false) => layer.compact().without_time().boxed(),
        (TracingFormat::Json, true) => layer.json().boxed(),
        (TracingFormat::Json, false) => layer.json().without_time().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.format, TracingFormat::Compact);
        assert!(config.level.is_none());
        assert!(config.timestamps);
        assert!(config.target);
    }
}
