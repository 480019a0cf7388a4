//! Arize exporter factory.
//!
//! Credentials and TLS material are bridged into the process environment
//! rather than passed to the builder, because the OTLP exporter reads both
//! from there; the bridge never overrides values the caller already set.

use opentelemetry_sdk::trace::SpanProcessor;

use crate::config::{ArizeConfig, TraceConfig, Transport};
use crate::error::ConfigurationError;
use crate::platform::{
    grpc_or_fallback, http_or_fallback, set_env_if_absent, wrap_stage,
    OTEL_EXPORTER_OTLP_CERTIFICATE, OTEL_EXPORTER_OTLP_CLIENT_CERTIFICATE,
    OTEL_EXPORTER_OTLP_CLIENT_KEY, OTEL_EXPORTER_OTLP_TRACES_HEADERS,
};

pub(super) fn create_export_stage(
    config: &TraceConfig,
) -> Result<Box<dyn SpanProcessor>, ConfigurationError> {
    let arize = config.arize.as_ref().ok_or_else(|| {
        ConfigurationError::ExporterBuild("arize: section missing for platform \"arize\"".into())
    })?;

    bridge_tls(arize);
    if let Some(headers) = credential_headers(arize) {
        set_env_if_absent(OTEL_EXPORTER_OTLP_TRACES_HEADERS, &headers);
    }

    let endpoint = arize.endpoint.as_deref().filter(|e| !e.is_empty());
    let exporter = match arize.transport {
        Transport::Grpc => grpc_or_fallback(endpoint)?,
        Transport::Http => http_or_fallback(endpoint)?,
    };
    Ok(wrap_stage(exporter, arize.batch))
}

fn bridge_tls(arize: &ArizeConfig) {
    for (key, path) in [
        (OTEL_EXPORTER_OTLP_CERTIFICATE, &arize.certificate_file),
        (OTEL_EXPORTER_OTLP_CLIENT_KEY, &arize.client_key_file),
        (
            OTEL_EXPORTER_OTLP_CLIENT_CERTIFICATE,
            &arize.client_certificate_file,
        ),
    ] {
        if let Some(path) = path {
            set_env_if_absent(key, &path.to_string_lossy());
        }
    }
}

/// `space_id` and `api_key` in OTLP header-list form, when present.
fn credential_headers(arize: &ArizeConfig) -> Option<String> {
    let mut headers = Vec::new();
    if let Some(space_id) = arize.space_id.as_deref().filter(|v| !v.is_empty()) {
        headers.push(format!("space_id={space_id}"));
    }
    if let Some(api_key) = arize.api_key.as_deref().filter(|v| !v.is_empty()) {
        headers.push(format!("api_key={api_key}"));
    }
    if headers.is_empty() {
        None
    } else {
        Some(headers.join(","))
    }
}
