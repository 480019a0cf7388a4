//! # Instrumentation registry
//!
//! A declarative list of (capability, activator) pairs applied against a
//! pipeline root. Application never fails: a tracing concern must not abort
//! an otherwise-working application startup, so every outcome short of
//! success is logged and skipped.

use opentelemetry::{global, otel_debug, otel_warn};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use thiserror::Error;

use crate::config::InstrumentationConfig;
use crate::pipeline::PipelineRoot;

/// Why an activator did not run to completion.
#[derive(Error, Debug)]
pub enum ActivationError {
    /// The capability's dependency is not compiled into this build. An
    /// expected, non-exceptional outcome.
    #[error("dependency unavailable: {0}")]
    Unavailable(&'static str),

    /// The dependency is present but activation failed.
    #[error("activation failed: {0}")]
    Failed(String),
}

/// One activatable capability.
#[derive(Clone)]
pub struct InstrumentationEntry {
    pub capability: &'static str,
    pub activate: fn(&PipelineRoot) -> Result<(), ActivationError>,
}

impl std::fmt::Debug for InstrumentationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationEntry")
            .field("capability", &self.capability)
            .finish()
    }
}

/// Ordered set of capabilities an `init`/`attach` call may activate.
#[derive(Clone, Debug, Default)]
pub struct InstrumentationRegistry {
    entries: Vec<InstrumentationEntry>,
}

impl InstrumentationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in capabilities.
    pub fn standard() -> Self {
        Self::new()
            .with_entry(InstrumentationEntry {
                capability: "global-tracer",
                activate: activate_global_tracer,
            })
            .with_entry(InstrumentationEntry {
                capability: "propagation",
                activate: activate_propagation,
            })
    }

    pub fn with_entry(mut self, entry: InstrumentationEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[InstrumentationEntry] {
        &self.entries
    }

    fn contains(&self, capability: &str) -> bool {
        self.entries.iter().any(|e| e.capability == capability)
    }
}

/// Activate every enabled, known capability against the root.
///
/// Postcondition: no error escapes. Unknown capability names are warned
/// about and skipped; an unavailable dependency is a debug-level event; any
/// other activation failure is a warning. Later entries run regardless of
/// earlier outcomes.
pub(crate) fn apply(
    config: &InstrumentationConfig,
    registry: &InstrumentationRegistry,
    root: &PipelineRoot,
) {
    let unknown: Vec<&str> = config
        .flags
        .keys()
        .map(String::as_str)
        .filter(|name| !registry.contains(name))
        .collect();
    if !unknown.is_empty() {
        otel_warn!(
            name: "TraceBootstrap.Instrumentation.UnknownCapabilities",
            capabilities = format!("{unknown:?}"),
            message = "unrecognized instrumentation keys are ignored"
        );
    }

    for entry in registry.entries() {
        if !config.enabled(entry.capability) {
            continue;
        }
        match (entry.activate)(root) {
            Ok(()) => {
                otel_debug!(
                    name: "TraceBootstrap.Instrumentation.Applied",
                    capability = entry.capability
                );
            }
            Err(ActivationError::Unavailable(detail)) => {
                otel_debug!(
                    name: "TraceBootstrap.Instrumentation.Unavailable",
                    capability = entry.capability,
                    detail = detail
                );
            }
            Err(ActivationError::Failed(reason)) => {
                otel_warn!(
                    name: "TraceBootstrap.Instrumentation.Failed",
                    capability = entry.capability,
                    reason = reason
                );
            }
        }
    }
}

/// Install the root's provider as the process-global tracer provider, so
/// libraries emitting through the global tracer reach this pipeline.
fn activate_global_tracer(root: &PipelineRoot) -> Result<(), ActivationError> {
    global::set_tracer_provider(root.provider().clone());
    Ok(())
}

/// Install the W3C trace-context propagator as the global text-map
/// propagator.
fn activate_propagation(_root: &PipelineRoot) -> Result<(), ActivationError> {
    global::set_text_map_propagator(TraceContextPropagator::new());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn root() -> PipelineRoot {
        PipelineRoot::from_builder(SdkTracerProvider::builder())
    }

    fn config(yaml: &str) -> InstrumentationConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn unavailable(_root: &PipelineRoot) -> Result<(), ActivationError> {
        Err(ActivationError::Unavailable("feature `x` disabled"))
    }

    fn failing(_root: &PipelineRoot) -> Result<(), ActivationError> {
        Err(ActivationError::Failed("boom".to_string()))
    }

    #[test]
    fn test_apply_skips_disabled_and_absent_capabilities() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn counting(_root: &PipelineRoot) -> Result<(), ActivationError> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        let registry = InstrumentationRegistry::new().with_entry(InstrumentationEntry {
            capability: "counting",
            activate: counting,
        });

        apply(&config("counting: false"), &registry, &root());
        apply(&config("{}"), &registry, &root());
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);

        apply(&config("counting: true"), &registry, &root());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_survives_failures_and_continues() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn counting(_root: &PipelineRoot) -> Result<(), ActivationError> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        let registry = InstrumentationRegistry::new()
            .with_entry(InstrumentationEntry {
                capability: "unavailable",
                activate: unavailable,
            })
            .with_entry(InstrumentationEntry {
                capability: "failing",
                activate: failing,
            })
            .with_entry(InstrumentationEntry {
                capability: "counting",
                activate: counting,
            });

        apply(
            &config("unavailable: true\nfailing: true\ncounting: true"),
            &registry,
            &root(),
        );
        // Both failures were swallowed and the last entry still ran.
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_capability_does_not_block_known_ones() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn counting(_root: &PipelineRoot) -> Result<(), ActivationError> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        let registry = InstrumentationRegistry::new().with_entry(InstrumentationEntry {
            capability: "counting",
            activate: counting,
        });
        apply(
            &config("future_thing: true\ncounting: true"),
            &registry,
            &root(),
        );
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_standard_registry_activates_cleanly() {
        let registry = InstrumentationRegistry::standard();
        apply(
            &config("global-tracer: true\npropagation: true"),
            &registry,
            &root(),
        );
    }
}
