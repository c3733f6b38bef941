mod metrics;

pub use metrics::{HistogramSummary, MetricsRecorder, MetricsSnapshot};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive. Overridden by RUST_LOG.
    pub default_directive: String,
    /// Emit JSON-formatted log lines instead of the human format.
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".into(),
            json_output: false,
        }
    }
}

/// Initialize tracing. Call once at startup; subsequent calls are no-ops so
/// tests can share a process.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    if config.json_output {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).try_init().ok();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).try_init().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_plain_info() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_directive, "info");
        assert!(!config.json_output);
    }

    #[test]
    fn init_is_reentrant() {
        let config = TelemetryConfig::default();
        init_telemetry(&config);
        // A second init must not panic.
        init_telemetry(&config);
    }
}
