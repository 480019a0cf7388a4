//! MLflow exporter factory.
//!
//! MLflow ingests OTLP traces over HTTP only; the trace endpoint hangs off
//! the tracking server URI. The experiment is carried as a request header,
//! bridged through the environment like the Arize credentials.

use opentelemetry_sdk::trace::SpanProcessor;

use crate::config::TraceConfig;
use crate::error::ConfigurationError;
use crate::platform::{
    http_only, set_env_if_absent, wrap_stage, OTEL_EXPORTER_OTLP_TRACES_HEADERS,
};

pub(super) fn create_export_stage(
    config: &TraceConfig,
) -> Result<Box<dyn SpanProcessor>, ConfigurationError> {
    let mlflow = config.mlflow.as_ref().ok_or_else(|| {
        ConfigurationError::ExporterBuild("mlflow: section missing for platform \"mlflow\"".into())
    })?;

    let tracking_uri = mlflow
        .tracking_uri
        .as_deref()
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| {
            ConfigurationError::ExporterBuild("mlflow.tracking_uri: must be non-empty".into())
        })?;

    if let Some(experiment) = mlflow
        .experiment_name
        .as_deref()
        .filter(|name| !name.is_empty())
    {
        set_env_if_absent(
            OTEL_EXPORTER_OTLP_TRACES_HEADERS,
            &format!("x-mlflow-experiment={experiment}"),
        );
    }

    let endpoint = trace_endpoint(tracking_uri);
    let exporter = http_only(Some(&endpoint))?;
    Ok(wrap_stage(exporter, true))
}

fn trace_endpoint(tracking_uri: &str) -> String {
    format!(
        "{}/api/2.0/otel/v1/traces",
        tracking_uri.trim_end_matches('/')
    )
}
