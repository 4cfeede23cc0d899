//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use kairos_observe::TracingOptions;
//!
//! // Plain structured logging
//! kairos_observe::init_tracing(&TracingOptions::default()).unwrap();
//!
//! // JSON lines plus OpenTelemetry export to stdout
//! let options = TracingOptions { json: true, otel: true, ..TracingOptions::default() };
//! kairos_observe::init_tracing(&options).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel: bool,
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            json: false,
            otel: false,
            default_directive: "info".to_string(),
        }
    }
}

impl TracingOptions {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Initialize the global tracing subscriber.
///
/// - Installs a `fmt` layer (plain or JSON) with target visibility and span
///   close timing, so each `agent` span reports how long the agent ran.
/// - With `otel`, additionally bridges spans to OpenTelemetry through a
///   stdout exporter (swap the exporter for OTLP in production).
/// - Respects `RUST_LOG`, falling back to `default_directive`.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let plain = (!options.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let json = options.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
    });

    let otel = if options.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("kairos");

        // Store the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(options.env_filter())
        .with(plain)
        .with(json)
        .with(otel)
        .try_init()?;
    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    let Some(provider) = TRACER_PROVIDER.get() else {
        return;
    };
    if let Err(e) = provider.shutdown() {
        eprintln!("Warning: OTel tracer provider shutdown error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_plain_info() {
        let options = TracingOptions::default();
        assert!(!options.json);
        assert!(!options.otel);
        assert_eq!(options.default_directive, "info");
    }

    #[test]
    fn second_init_is_refused() {
        let options = TracingOptions {
            default_directive: "kairos_core=debug".to_string(),
            ..TracingOptions::default()
        };
        init_tracing(&options).unwrap();
        tracing::info!("subscriber installed");
        assert!(init_tracing(&options).is_err());
        shutdown_tracing();
    }
}
