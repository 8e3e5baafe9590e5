//! Structured logging, with span export to an OTLP collector when one is
//! configured.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `SPINSCAN_LOG_FORMAT=json` | Newline-delimited JSON instead of compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector base URL, e.g. `http://localhost:4318`. |
//!
//! ```rust,no_run
//! let _guard = spinscan_runtime::telemetry::init_tracing("spinscan");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Output format of the console layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Parse a `SPINSCAN_LOG_FORMAT` value; anything but `json` is compact.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Install the global subscriber.  Call once, before the Tokio runtime is
/// built, and hold the returned guard until exit.
///
/// The per-scan `handle_scan` spans of the dispatchers are exported when an
/// OTLP endpoint is configured.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let format = LogFormat::from_env_value(std::env::var("SPINSCAN_LOG_FORMAT").ok().as_deref());
    let provider = build_provider(service_name);

    let console = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_target(true)
            .json()
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .boxed(),
    };
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("spinscan")));

    tracing_subscriber::registry()
        .with(console)
        .with(otel)
        .with(env_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    TracerProviderGuard(provider)
}

/// Flushes and shuts down the span exporter on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[spinscan] span exporter shutdown failed: {e}");
        }
    }
}

/// Directive from `RUST_LOG`, falling back to `info` when absent or invalid.
fn env_filter(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// `None` unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set and the exporter builds.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[spinscan] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Synchronous export: no runtime exists yet when this runs.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_provider_without_endpoint() {
        // SAFETY: single-threaded test; no other thread reads this env-var.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("test-service").is_none());
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        drop(TracerProviderGuard(None));
    }

    #[test]
    fn log_format_defaults_to_compact() {
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_value(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_value(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some(" json ")), LogFormat::Json);
    }

    #[test]
    fn invalid_directive_falls_back_to_info() {
        let fallback = EnvFilter::new(DEFAULT_FILTER).to_string();
        assert_eq!(env_filter(Some("spinscan=loud")).to_string(), fallback);
        assert_eq!(env_filter(None).to_string(), fallback);
        assert_ne!(env_filter(Some("spinscan_runtime=debug")).to_string(), fallback);
    }
}
