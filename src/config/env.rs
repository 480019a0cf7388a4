//! `${NAME}` environment-variable substitution over the raw configuration
//! tree, applied before any section parsing.

use serde_yaml::Value;

use crate::config::ValidationMode;
use crate::error::ConfigurationError;
use opentelemetry::otel_warn;

/// Recursively replace every `${NAME}` occurrence inside string scalars with
/// the value of the corresponding environment variable.
///
/// An unset variable is an error in strict mode; in permissive mode it is
/// substituted with the empty string and warned about. An unterminated `${`
/// is left in place, it is not a placeholder.
pub(crate) fn substitute(value: &mut Value, mode: ValidationMode) -> Result<(), ConfigurationError> {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = expand(s, mode)?;
            }
        }
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                substitute(item, mode)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute(item, mode)?;
            }
        }
        Value::Tagged(tagged) => substitute(&mut tagged.value, mode)?,
        _ => {}
    }
    Ok(())
}

fn expand(input: &str, mode: ValidationMode) -> Result<String, ConfigurationError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) if mode == ValidationMode::Strict => {
                        return Err(ConfigurationError::MissingEnvVar(name.to_string()));
                    }
                    Err(_) => {
                        otel_warn!(
                            name: "TraceBootstrap.Config.MissingEnvVar",
                            variable = name.to_string(),
                            message = "environment variable not set, substituted empty string"
                        );
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}
