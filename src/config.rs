//! # Trace bootstrap configuration
//!
//! This module defines the configuration structures for the trace pipeline
//! and the resolver that turns a file path, environment variable or in-memory
//! document into a validated [`TraceConfig`].

pub mod env;
pub mod resolver;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigurationError;

pub use resolver::{resolve, ConfigSource, ResolvedConfig, CONFIG_PATH_ENV};

/// Fully-resolved trace pipeline configuration.
///
/// Top-level keys not listed here are parsed but ignored, so a single file
/// can carry sections for several platforms and only the one selected by
/// `platform` takes effect.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    /// Selects which exporter factory runs.
    pub platform: Platform,

    #[serde(default)]
    pub arize: Option<ArizeConfig>,

    #[serde(default)]
    pub mlflow: Option<MlflowConfig>,

    #[serde(default)]
    pub instrumentation: InstrumentationConfig,

    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Identity of the instrumented service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,
}

/// Closed set of backend families an exporter can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Arize,
    Mlflow,
}

impl Platform {
    /// Get a platform by its configuration name.
    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            "arize" => Ok(Platform::Arize),
            "mlflow" => Ok(Platform::Mlflow),
            _ => Err(ConfigurationError::UnknownPlatform(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Arize => "arize",
            Platform::Mlflow => "mlflow",
        }
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Platform::from_name(&name).map_err(serde::de::Error::custom)
    }
}

/// Wire transport used to reach an OTLP-compatible collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Grpc,
    Http,
}

/// Section for the Arize platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArizeConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub space_id: Option<String>,

    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(default)]
    pub transport: Transport,

    /// Batch finished spans before export. Disable for debugging, each span
    /// is then exported synchronously as it ends.
    #[serde(default = "default_true")]
    pub batch: bool,

    /// CA certificate bundle for TLS. Relative paths are resolved against
    /// the configuration file's own directory.
    #[serde(default)]
    pub certificate_file: Option<PathBuf>,

    /// mTLS client private key.
    #[serde(default)]
    pub client_key_file: Option<PathBuf>,

    /// mTLS client certificate chain.
    #[serde(default)]
    pub client_certificate_file: Option<PathBuf>,
}

/// Section for the MLflow platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MlflowConfig {
    #[serde(default)]
    pub tracking_uri: Option<String>,

    #[serde(default)]
    pub experiment_name: Option<String>,
}

/// Capability-name to enabled-flag mapping.
///
/// Keys with no matching registry entry are preserved and warned about at
/// apply time, never rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct InstrumentationConfig {
    pub flags: BTreeMap<String, bool>,
}

impl InstrumentationConfig {
    /// Whether a capability is switched on. Absent names are disabled.
    pub fn enabled(&self, capability: &str) -> bool {
        self.flags.get(capability).copied().unwrap_or(false)
    }
}

/// Governs every downstream error policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,
}

/// Strict fails fast and loud at startup; permissive degrades to "telemetry
/// is absent" while the host application continues normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Strict,
    #[default]
    Permissive,
}

impl ValidationMode {
    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            "strict" => Ok(ValidationMode::Strict),
            "permissive" => Ok(ValidationMode::Permissive),
            _ => Err(ConfigurationError::Parse(format!(
                "invalid validation.mode `{name}`, expected `strict` or `permissive`"
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}
