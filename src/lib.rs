//! # OpenTelemetry trace pipeline bootstrap
//!
//! Composes a trace pipeline at process start from a declarative YAML
//! configuration: resolve and validate the configuration, build the exporter
//! for the selected backend platform, assemble the span-routing processor
//! chain, activate auto-instrumentation capabilities and track the pipeline
//! lifecycle until process exit.
//!
//! Application code never constructs tracing infrastructure directly; one
//! [`init`] call configures everything, and telemetry failures never become
//! application failures: in permissive validation mode every defect past
//! configuration parsing degrades to a logged warning and a pipeline that
//! simply exports nothing.
//!
//! ```no_run
//! use otel_trace_bootstrap::{init, ConfigSource};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = init(ConfigSource::path("trace.yaml"))?;
//!     // ... run the application ...
//!     pipeline.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod instrumentation;
pub mod lifecycle;
pub mod pipeline;
pub mod platform;
pub mod processor;

use opentelemetry::otel_warn;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;

use crate::config::{Platform, TraceConfig, ValidationMode};

pub use crate::config::{ConfigSource, ResolvedConfig, CONFIG_PATH_ENV};
pub use crate::error::ConfigurationError;
pub use crate::instrumentation::{
    ActivationError, InstrumentationEntry, InstrumentationRegistry,
};
pub use crate::lifecycle::{
    default_guard, default_state, AttachGuard, PipelineHandle, PipelineState,
};
pub use crate::pipeline::PipelineRoot;
pub use crate::processor::ROUTE_ATTRIBUTE;

/// Per-call knobs for [`attach`].
#[derive(Debug, Clone, Default)]
pub struct AttachOverrides {
    /// Value for the routing attribute stamped on every span. Falls back to
    /// the platform section's project/experiment name.
    pub route_value: Option<String>,

    /// Attribute key a finished span must carry to be exported through this
    /// chain. No filtering when unset.
    pub marker_attribute: Option<String>,
}

/// Bootstrap an owned trace pipeline against the process-wide state.
///
/// Resolves and validates the configuration, builds the platform exporter,
/// attaches the span-routing chain, applies the standard instrumentation
/// registry and activates the lifecycle state. The returned handle shuts the
/// pipeline down when dropped.
pub fn init(source: ConfigSource) -> Result<PipelineHandle, ConfigurationError> {
    init_with(source, default_state(), &InstrumentationRegistry::standard())
}

/// [`init`] against caller-supplied state and registry.
pub fn init_with(
    source: ConfigSource,
    state: &PipelineState,
    registry: &InstrumentationRegistry,
) -> Result<PipelineHandle, ConfigurationError> {
    let resolved = config::resolve(source)?;
    let config = &resolved.config;
    let resource = build_resource(config);

    let root = match platform::create_export_stage(config) {
        Ok(stage) => {
            let chain = processor::compose(stage, route_value(config), None);
            let root =
                PipelineRoot::from_builder(SdkTracerProvider::builder().with_resource(resource));
            root.attach_stage(Box::new(chain));
            root
        }
        Err(err) if config.validation.mode == ValidationMode::Strict => return Err(err),
        Err(err) => {
            otel_warn!(
                name: "TraceBootstrap.ExportDisabled",
                reason = err.to_string(),
                message = "exporter construction failed, continuing with a no-export pipeline"
            );
            PipelineRoot::no_export(resource)
        }
    };

    instrumentation::apply(&config.instrumentation, registry, &root);
    state.activate(root.clone());
    Ok(PipelineHandle::new(state.clone(), root))
}

/// Add a span-routing processor chain to a caller-owned pipeline root.
///
/// The root's lifecycle stays with the caller: no activation, no exit-time
/// flush. A second attach against the same root identity is skipped with a
/// warning, guarded by the process-wide [`AttachGuard`].
pub fn attach(
    root: &PipelineRoot,
    source: ConfigSource,
    overrides: AttachOverrides,
) -> Result<(), ConfigurationError> {
    attach_with(
        root,
        source,
        overrides,
        default_guard(),
        &InstrumentationRegistry::standard(),
    )
}

/// [`attach`] against a caller-supplied guard and registry.
pub fn attach_with(
    root: &PipelineRoot,
    source: ConfigSource,
    overrides: AttachOverrides,
    guard: &AttachGuard,
    registry: &InstrumentationRegistry,
) -> Result<(), ConfigurationError> {
    if guard.is_applied(root.identity()) {
        otel_warn!(
            name: "TraceBootstrap.AttachSkipped",
            message = "processors already attached to this pipeline root, skipping"
        );
        return Ok(());
    }

    let resolved = config::resolve(source)?;
    let config = &resolved.config;

    let stage = match platform::create_export_stage(config) {
        Ok(stage) => stage,
        Err(err) if config.validation.mode == ValidationMode::Strict => return Err(err),
        Err(err) => {
            // Guard stays unmarked so a corrected retry can succeed.
            otel_warn!(
                name: "TraceBootstrap.AttachExportDisabled",
                reason = err.to_string(),
                message = "exporter construction failed, nothing attached"
            );
            return Ok(());
        }
    };

    let route = overrides.route_value.or_else(|| route_value(config));
    let chain = processor::compose(stage, route, overrides.marker_attribute);
    root.attach_stage(Box::new(chain));
    instrumentation::apply(&config.instrumentation, registry, root);
    guard.mark(root.identity());
    Ok(())
}

/// Idempotent flush-and-release of the pipeline owned by the process-wide
/// state.
pub fn shutdown() {
    default_state().shutdown();
}

/// Whether the process-wide state has an active pipeline.
pub fn is_active() -> bool {
    default_state().is_active()
}

fn build_resource(config: &TraceConfig) -> Resource {
    let mut builder = Resource::builder().with_service_name(config.service.name.clone());
    if let Some(version) = &config.service.version {
        builder = builder.with_attribute(opentelemetry::KeyValue::new(
            "service.version",
            version.clone(),
        ));
    }
    builder.build()
}

/// Routing value implied by the selected platform section.
fn route_value(config: &TraceConfig) -> Option<String> {
    match config.platform {
        Platform::Arize => config
            .arize
            .as_ref()
            .and_then(|arize| arize.project_name.clone()),
        Platform::Mlflow => config
            .mlflow
            .as_ref()
            .and_then(|mlflow| mlflow.experiment_name.clone()),
    }
    .filter(|value| !value.is_empty())
}
