//! # Platform exporter factories
//!
//! Turns a validated configuration into the terminal export stage for the
//! selected backend family. Dispatch goes through the closed [`Platform`]
//! enum, so an unknown platform can never reach this module.
//!
//! Transport availability is decided at compile time through the `grpc` and
//! `http` cargo features. A configured transport that was compiled out
//! degrades to the other one with a warning; with neither feature the
//! factory fails and (in permissive mode) the caller substitutes a
//! no-export pipeline root.

pub mod arize;
pub mod mlflow;

use opentelemetry_sdk::trace::SpanProcessor;

use crate::config::{Platform, TraceConfig};
use crate::error::ConfigurationError;

/// CA certificate bundle path read by the OTLP exporter builders.
pub const OTEL_EXPORTER_OTLP_CERTIFICATE: &str = "OTEL_EXPORTER_OTLP_CERTIFICATE";
/// mTLS client private key path.
pub const OTEL_EXPORTER_OTLP_CLIENT_KEY: &str = "OTEL_EXPORTER_OTLP_CLIENT_KEY";
/// mTLS client certificate chain path.
pub const OTEL_EXPORTER_OTLP_CLIENT_CERTIFICATE: &str = "OTEL_EXPORTER_OTLP_CLIENT_CERTIFICATE";
/// Trace-signal request headers, `k1=v1,k2=v2` form.
pub const OTEL_EXPORTER_OTLP_TRACES_HEADERS: &str = "OTEL_EXPORTER_OTLP_TRACES_HEADERS";

/// Build the export stage for the configured platform.
pub(crate) fn create_export_stage(
    config: &TraceConfig,
) -> Result<Box<dyn SpanProcessor>, ConfigurationError> {
    match config.platform {
        Platform::Arize => arize::create_export_stage(config),
        Platform::Mlflow => mlflow::create_export_stage(config),
    }
}

/// Set a process environment variable unless the caller already did.
///
/// The OTLP exporter builders read credentials and TLS material from the
/// environment, so configuration fields are bridged through it; a value the
/// caller set beforehand always wins. Returns whether the value was written.
pub(crate) fn set_env_if_absent(key: &str, value: &str) -> bool {
    if std::env::var_os(key).is_some() {
        return false;
    }
    std::env::set_var(key, value);
    true
}

/// Wrap an exporter in the batching or the synchronous processor.
pub(crate) fn wrap_stage(
    exporter: opentelemetry_otlp::SpanExporter,
    batch: bool,
) -> Box<dyn SpanProcessor> {
    if batch {
        Box::new(opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter).build())
    } else {
        Box::new(opentelemetry_sdk::trace::SimpleSpanProcessor::new(
            exporter,
        ))
    }
}

#[cfg(feature = "grpc")]
fn build_grpc(
    endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    use opentelemetry_otlp::WithExportConfig;

    // The tonic channel can only be created from inside a tokio runtime;
    // outside of one the builder panics instead of erroring.
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(ConfigurationError::ExporterBuild(
            "grpc transport requires a running tokio runtime".to_string(),
        ));
    }

    let mut builder = opentelemetry_otlp::SpanExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    builder
        .build()
        .map_err(|e| ConfigurationError::ExporterBuild(e.to_string()))
}

#[cfg(feature = "http")]
fn build_http(
    endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    use opentelemetry_otlp::WithExportConfig;

    let mut builder = opentelemetry_otlp::SpanExporter::builder().with_http();
    if let Some(endpoint) = endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    builder
        .build()
        .map_err(|e| ConfigurationError::ExporterBuild(e.to_string()))
}

#[cfg(all(not(feature = "grpc"), not(feature = "http")))]
fn no_transport() -> ConfigurationError {
    ConfigurationError::ExporterBuild(
        "no transport support compiled in, enable the `grpc` or `http` feature".to_string(),
    )
}

/// Preferred gRPC path with HTTP fallback when `grpc` is compiled out.
#[cfg(feature = "grpc")]
pub(crate) fn grpc_or_fallback(
    endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    build_grpc(endpoint)
}

#[cfg(all(not(feature = "grpc"), feature = "http"))]
pub(crate) fn grpc_or_fallback(
    endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    opentelemetry::otel_warn!(
        name: "TraceBootstrap.Exporter.GrpcUnavailable",
        message = "grpc transport not compiled in, falling back to http"
    );
    build_http(endpoint)
}

#[cfg(all(not(feature = "grpc"), not(feature = "http")))]
pub(crate) fn grpc_or_fallback(
    _endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    Err(no_transport())
}

/// Preferred HTTP path with gRPC fallback when `http` is compiled out.
#[cfg(feature = "http")]
pub(crate) fn http_or_fallback(
    endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    build_http(endpoint)
}

#[cfg(all(not(feature = "http"), feature = "grpc"))]
pub(crate) fn http_or_fallback(
    endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    opentelemetry::otel_warn!(
        name: "TraceBootstrap.Exporter.HttpUnavailable",
        message = "http transport not compiled in, falling back to grpc"
    );
    build_grpc(endpoint)
}

#[cfg(all(not(feature = "http"), not(feature = "grpc")))]
pub(crate) fn http_or_fallback(
    _endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    Err(no_transport())
}

/// HTTP with no fallback, for backends that only ingest over HTTP.
#[cfg(feature = "http")]
pub(crate) fn http_only(
    endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    build_http(endpoint)
}

#[cfg(not(feature = "http"))]
pub(crate) fn http_only(
    _endpoint: Option<&str>,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigurationError> {
    Err(ConfigurationError::ExporterBuild(
        "backend requires the `http` feature".to_string(),
    ))
}
