//! Logging and OpenTelemetry setup
//!
//! Installs a `tracing` subscriber with an env filter and a text or JSON
//! formatter. With the `telemetry` feature and an OTLP endpoint configured,
//! spans are also exported over OTLP.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
    /// Service name reported to the collector
    pub service_name: String,
    /// Sampling rate (0.0 to 1.0)
    pub sampling_rate: f64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            otlp_endpoint: None,
            service_name: "cypher-pipeline".to_string(),
            sampling_rate: 1.0,
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `level`
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| PipelineError::Telemetry(format!("invalid log level '{}': {}", level, e))),
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(&config.level)?;
    let fmt_layer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };
    let subscriber = Registry::default().with(filter).with(fmt_layer);

    #[cfg(feature = "telemetry")]
    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = otlp::tracer(endpoint, config)?;
        return subscriber
            .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
            .try_init()
            .map_err(|e| PipelineError::Telemetry(e.to_string()));
    }

    subscriber
        .try_init()
        .map_err(|e| PipelineError::Telemetry(e.to_string()))?;

    #[cfg(not(feature = "telemetry"))]
    if config.otlp_endpoint.is_some() {
        tracing::warn!("otlp_endpoint is set but the telemetry feature is disabled");
    }
    Ok(())
}

/// Shutdown OpenTelemetry gracefully
pub fn shutdown_telemetry() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(feature = "telemetry")]
mod otlp {
    use super::LoggingConfig;
    use crate::error::{PipelineError, Result};
    use opentelemetry::global;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer};
    use opentelemetry_sdk::Resource;
    use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

    pub(super) fn tracer(endpoint: &str, config: &LoggingConfig) -> Result<Tracer> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);
        let resource = Resource::new(vec![
            KeyValue::new(SERVICE_NAME, config.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ]);

        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                opentelemetry_sdk::trace::Config::default()
                    .with_sampler(Sampler::TraceIdRatioBased(config.sampling_rate))
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(resource),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(|e| PipelineError::Telemetry(e.to_string()))
    }
}
