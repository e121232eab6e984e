use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pmbuddy_core::config::TelemetryConfig;

const DEFAULT_FILTER: &str = "pmbuddy=info,warn";
const DEBUG_FILTER: &str = "pmbuddy=debug,info";

/// Keeps the OTLP pipeline alive; call [`Telemetry::shutdown`] before exit
/// so batched spans are flushed.
pub struct Telemetry {
    provider: Option<TracerProvider>,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush telemetry: {e}");
            }
        }
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new(DEBUG_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// OTLP endpoint from config, falling back to `OTEL_EXPORTER_OTLP_ENDPOINT`.
fn otlp_endpoint(config: &TelemetryConfig) -> Option<String> {
    config
        .otlp_endpoint
        .clone()
        .or_else(|| std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok())
        .filter(|e| !e.trim().is_empty())
}

fn tracer_provider(endpoint: &str, service_name: &str) -> anyhow::Result<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build())
}

/// Install the global subscriber: fmt output plus an OTLP span exporter
/// when an endpoint is configured. Must run inside the tokio runtime.
pub fn init(config: &TelemetryConfig, debug: bool) -> anyhow::Result<Telemetry> {
    let provider = match otlp_endpoint(config) {
        Some(endpoint) => Some(tracer_provider(&endpoint, &config.service_name)?),
        None => None,
    };

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("pm-buddy")));

    tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(otel_layer)
        .try_init()?;

    if let Some(endpoint) = otlp_endpoint(config) {
        tracing::info!(
            service = %config.service_name,
            endpoint = %endpoint,
            "OTLP tracing enabled"
        );
    }

    Ok(Telemetry { provider })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_endpoint_wins() {
        let config = TelemetryConfig {
            otlp_endpoint: Some("http://localhost:4317".into()),
            ..TelemetryConfig::default()
        };
        assert_eq!(otlp_endpoint(&config).as_deref(), Some("http://localhost:4317"));
    }

    #[test]
    fn test_blank_endpoint_is_ignored() {
        let config = TelemetryConfig {
            otlp_endpoint: Some("  ".into()),
            ..TelemetryConfig::default()
        };
        assert_eq!(otlp_endpoint(&config), None);
    }
}
