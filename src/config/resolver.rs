//! Configuration source resolution and semantic validation.

use std::path::{Path, PathBuf};

use opentelemetry::otel_warn;
use serde_yaml::Value;

use crate::config::{env, Platform, TraceConfig, ValidationMode};
use crate::error::ConfigurationError;

/// Environment variable holding a fallback configuration file path, consulted
/// when no explicit source is given.
pub const CONFIG_PATH_ENV: &str = "OTEL_TRACE_BOOTSTRAP_CONFIG";

/// Where the configuration document comes from.
///
/// Precedence is explicit path, then in-memory document, then the path named
/// by [`CONFIG_PATH_ENV`]. There is no default file, a missing source is an
/// error.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Read and parse the file at this path.
    Path(PathBuf),
    /// Use an already-parsed document.
    Yaml(Value),
    /// Read the path from [`CONFIG_PATH_ENV`].
    Env,
}

impl ConfigSource {
    /// Convenience constructor for file sources.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ConfigSource::Path(path.into())
    }
}

/// A validated configuration plus the directory relative certificate paths
/// were resolved against (the config file's own directory, when known).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: TraceConfig,
    pub base_dir: Option<PathBuf>,
}

/// Resolve a source into a validated [`TraceConfig`].
///
/// The validation mode is read from the raw tree before anything else runs,
/// so that environment substitution itself obeys it. Parse failures and an
/// unknown platform are hard errors in both modes; semantic violations are
/// collected in full and either joined into one error (strict) or warned
/// about (permissive).
pub fn resolve(source: ConfigSource) -> Result<ResolvedConfig, ConfigurationError> {
    let (mut raw, base_dir) = match source {
        ConfigSource::Path(path) => {
            let raw = load_file(&path)?;
            let base_dir = path.parent().map(Path::to_path_buf);
            (raw, base_dir)
        }
        ConfigSource::Yaml(value) => (value, None),
        ConfigSource::Env => {
            let path = std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .map_err(|_| ConfigurationError::NoConfigPath(CONFIG_PATH_ENV))?;
            let raw = load_file(&path)?;
            let base_dir = path.parent().map(Path::to_path_buf);
            (raw, base_dir)
        }
    };

    let mode = peek_mode(&raw)?;
    env::substitute(&mut raw, mode)?;

    // Dispatchability check, ahead of full deserialization so the caller
    // gets the dedicated error rather than a generic parse failure.
    if let Some(name) = raw.get("platform").and_then(Value::as_str) {
        Platform::from_name(name)?;
    }

    let mut config: TraceConfig =
        serde_yaml::from_value(raw).map_err(|e| ConfigurationError::Parse(e.to_string()))?;

    normalize_certificate_paths(&mut config, base_dir.as_deref());

    let violations = validate(&config, mode);
    if !violations.is_empty() {
        match mode {
            ValidationMode::Strict => {
                return Err(ConfigurationError::Invalid(violations.join("; ")));
            }
            ValidationMode::Permissive => {
                otel_warn!(
                    name: "TraceBootstrap.Config.Violations",
                    violations = violations.join("; "),
                    message = "continuing with partially-valid configuration"
                );
            }
        }
    }

    Ok(ResolvedConfig { config, base_dir })
}

fn load_file(path: &Path) -> Result<Value, ConfigurationError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|e| ConfigurationError::Parse(e.to_string()))
}

/// Read `validation.mode` from the raw tree. Substitution errors must obey
/// the mode, so this runs before substitution.
fn peek_mode(raw: &Value) -> Result<ValidationMode, ConfigurationError> {
    match raw
        .get("validation")
        .and_then(|v| v.get("mode"))
        .and_then(Value::as_str)
    {
        Some(name) => ValidationMode::from_name(name),
        None => Ok(ValidationMode::default()),
    }
}

/// Certificate paths are interpreted relative to the configuration file's
/// own directory, not the process working directory.
fn normalize_certificate_paths(config: &mut TraceConfig, base_dir: Option<&Path>) {
    let Some(base_dir) = base_dir else {
        return;
    };
    let Some(arize) = config.arize.as_mut() else {
        return;
    };
    for field in [
        &mut arize.certificate_file,
        &mut arize.client_key_file,
        &mut arize.client_certificate_file,
    ] {
        if let Some(path) = field.as_mut() {
            if path.is_relative() {
                let joined = base_dir.join(path.as_path());
                *path = joined;
            }
        }
    }
}

/// Collect every semantic violation before deciding what to do with them.
fn validate(config: &TraceConfig, mode: ValidationMode) -> Vec<String> {
    let mut violations = Vec::new();

    if config.service.name.is_empty() {
        violations.push("service.name: must be non-empty".to_string());
    }

    match config.platform {
        Platform::Arize => match config.arize.as_ref() {
            None => violations.push("arize: section missing for platform \"arize\"".to_string()),
            Some(arize) => {
                for (key, value) in [
                    ("arize.endpoint", &arize.endpoint),
                    ("arize.api_key", &arize.api_key),
                    ("arize.space_id", &arize.space_id),
                ] {
                    if value.as_deref().map_or(true, str::is_empty) {
                        violations.push(format!("{key}: must be non-empty"));
                    }
                }
                if mode == ValidationMode::Strict {
                    for (key, path) in [
                        ("arize.certificate_file", &arize.certificate_file),
                        ("arize.client_key_file", &arize.client_key_file),
                        (
                            "arize.client_certificate_file",
                            &arize.client_certificate_file,
                        ),
                    ] {
                        if let Some(path) = path {
                            if !path.exists() {
                                violations
                                    .push(format!("{key}: file `{}` not found", path.display()));
                            }
                        }
                    }
                }
            }
        },
        Platform::Mlflow => match config.mlflow.as_ref() {
            None => violations.push("mlflow: section missing for platform \"mlflow\"".to_string()),
            Some(mlflow) => {
                if mlflow.tracking_uri.as_deref().map_or(true, str::is_empty) {
                    violations.push("mlflow.tracking_uri: must be non-empty".to_string());
                }
            }
        },
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_resolve_valid_inline_config() {
        let resolved = resolve(ConfigSource::Yaml(yaml(
            r#"
            service:
              name: checkout
            platform: arize
            arize:
              endpoint: https://otlp.arize.com
              api_key: key
              space_id: space
            validation:
              mode: strict
            "#,
        )))
        .unwrap();
        assert_eq!(resolved.config.service.name, "checkout");
        assert!(resolved.base_dir.is_none());
    }

    #[test]
    fn test_no_source_and_no_env_var_errors() {
        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let err = resolve(ConfigSource::Env).unwrap_err();
            assert!(matches!(err, ConfigurationError::NoConfigPath(_)));
        });
    }

    #[test]
    fn test_env_var_fallback_path_is_used() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "service:\n  name: svc\nplatform: mlflow\nmlflow:\n  tracking_uri: http://localhost:5000\n"
        )
        .unwrap();
        temp_env::with_var(CONFIG_PATH_ENV, Some(file.path()), || {
            let resolved = resolve(ConfigSource::Env).unwrap();
            assert_eq!(resolved.config.platform, Platform::Mlflow);
            assert_eq!(resolved.base_dir.as_deref(), file.path().parent());
        });
    }

    #[test]
    fn test_unreadable_file_errors() {
        let err = resolve(ConfigSource::path("/nonexistent/trace.yaml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::ReadFailed { .. }));
    }

    #[test]
    fn test_unparsable_document_errors_in_permissive_mode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "platform: [unclosed").unwrap();
        let err = resolve(ConfigSource::path(file.path())).unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn test_unknown_platform_is_hard_error_in_both_modes() {
        for mode in ["strict", "permissive"] {
            let err = resolve(ConfigSource::Yaml(yaml(&format!(
                "platform: foo\nvalidation:\n  mode: {mode}\n"
            ))))
            .unwrap_err();
            assert!(matches!(
                err,
                ConfigurationError::UnknownPlatform(name) if name == "foo"
            ));
        }
    }

    #[test]
    fn test_strict_mode_joins_all_violations() {
        let err = resolve(ConfigSource::Yaml(yaml(
            r#"
            service:
              name: ""
            platform: arize
            arize:
              endpoint: ""
            validation:
              mode: strict
            "#,
        )))
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("service.name"));
        assert!(message.contains("arize.endpoint"));
        assert!(message.contains("arize.api_key"));
    }

    #[test]
    fn test_permissive_mode_returns_partially_valid_config() {
        let resolved = resolve(ConfigSource::Yaml(yaml(
            r#"
            service:
              name: ""
            platform: arize
            arize:
              endpoint: ""
            validation:
              mode: permissive
            "#,
        )))
        .unwrap();
        assert!(resolved.config.service.name.is_empty());
    }

    #[test]
    fn test_mode_is_determined_before_substitution() {
        temp_env::with_var_unset("TRACE_TEST_ABSENT", || {
            let strict = resolve(ConfigSource::Yaml(yaml(
                r#"
                platform: mlflow
                mlflow:
                  tracking_uri: ${TRACE_TEST_ABSENT}
                validation:
                  mode: strict
                "#,
            )));
            assert!(matches!(
                strict,
                Err(ConfigurationError::MissingEnvVar(name)) if name == "TRACE_TEST_ABSENT"
            ));

            let permissive = resolve(ConfigSource::Yaml(yaml(
                r#"
                service:
                  name: svc
                platform: mlflow
                mlflow:
                  tracking_uri: ${TRACE_TEST_ABSENT}
                validation:
                  mode: permissive
                "#,
            )))
            .unwrap();
            assert_eq!(
                permissive.config.mlflow.unwrap().tracking_uri.as_deref(),
                Some("")
            );
        });
    }

    #[test]
    fn test_invalid_mode_is_parse_error() {
        let err = resolve(ConfigSource::Yaml(yaml(
            "platform: mlflow\nvalidation:\n  mode: lenient\n",
        )))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn test_relative_certificate_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("trace.yaml");
        std::fs::write(
            &config_path,
            r#"
            service:
              name: svc
            platform: arize
            arize:
              endpoint: https://otlp.arize.com
              api_key: key
              space_id: space
              certificate_file: certs/ca.pem
            "#,
        )
        .unwrap();
        let resolved = resolve(ConfigSource::path(&config_path)).unwrap();
        let arize = resolved.config.arize.unwrap();
        assert_eq!(
            arize.certificate_file.unwrap(),
            dir.path().join("certs/ca.pem")
        );
    }

    #[test]
    fn test_strict_mode_requires_certificate_files_to_exist() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("trace.yaml");
        std::fs::write(
            &config_path,
            r#"
            service:
              name: svc
            platform: arize
            arize:
              endpoint: https://otlp.arize.com
              api_key: key
              space_id: space
              certificate_file: certs/ca.pem
            validation:
              mode: strict
            "#,
        )
        .unwrap();
        let err = resolve(ConfigSource::path(&config_path)).unwrap_err();
        assert!(err.to_string().contains("certificate_file"));
    }
}
