//! Error types surfaced by the bootstrap entry points.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The only error type returned by [`init`] and [`attach`].
///
/// In strict validation mode every configuration or construction defect is
/// converted into one of these variants at the entry point. In permissive
/// mode only the variants that make further progress impossible are returned
/// ([`NoConfigPath`], [`Parse`], [`UnknownPlatform`], [`ReadFailed`]);
/// everything else degrades to a logged warning and a safe fallback.
///
/// [`init`]: crate::init
/// [`attach`]: crate::attach
/// [`NoConfigPath`]: ConfigurationError::NoConfigPath
/// [`Parse`]: ConfigurationError::Parse
/// [`UnknownPlatform`]: ConfigurationError::UnknownPlatform
/// [`ReadFailed`]: ConfigurationError::ReadFailed
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// No explicit configuration source was given and the fallback
    /// environment variable is not set.
    #[error("no configuration source given and `{0}` is not set")]
    NoConfigPath(&'static str),

    /// The configuration file could not be read.
    #[error("failed to read configuration file `{path}`: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration document could not be parsed into the expected
    /// shape. Raised unconditionally, there is no tree to degrade to.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// The `platform` key names a backend this crate does not know. Raised
    /// unconditionally, an unknown platform cannot be dispatched at all.
    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),

    /// A `${NAME}` placeholder referenced an environment variable that is
    /// not set. Strict mode only.
    #[error("environment variable `{0}` referenced in configuration is not set")]
    MissingEnvVar(String),

    /// One or more semantic validation violations, joined into a single
    /// message. Strict mode only.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The platform exporter could not be constructed. Strict mode only;
    /// permissive mode substitutes a no-export pipeline root instead.
    #[error("failed to build exporter: {0}")]
    ExporterBuild(String),
}
