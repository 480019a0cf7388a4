//! # Pipeline root
//!
//! The live object through which an application emits spans: a tracer
//! provider plus the [`StageSlot`] that allows processor chains to be
//! attached after the provider has been built.

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{SdkTracerProvider, SpanProcessor, TracerProviderBuilder};
use opentelemetry_sdk::Resource;

use crate::processor::StageSlot;

/// A tracer provider with a late-attachment seam for processor chains.
///
/// Clones share the same underlying provider and stage list; the stage
/// list's address doubles as the root's identity, which is what the
/// duplicate-attach guard tracks.
#[derive(Clone, Debug)]
pub struct PipelineRoot {
    provider: SdkTracerProvider,
    slot: StageSlot,
}

impl PipelineRoot {
    /// Build a root from a provider builder, installing the stage slot.
    ///
    /// Processor chains must be attached through [`attach_stage`] rather
    /// than `with_span_processor`, otherwise they are invisible to the
    /// stage count and the attach guard.
    ///
    /// [`attach_stage`]: PipelineRoot::attach_stage
    pub fn from_builder(builder: TracerProviderBuilder) -> Self {
        let slot = StageSlot::default();
        let provider = builder.with_span_processor(slot.clone()).build();
        PipelineRoot { provider, slot }
    }

    /// A root with no export stage: spans are created and timed but never
    /// leave the process. Substituted in permissive mode when the exporter
    /// cannot be built.
    pub(crate) fn no_export(resource: Resource) -> Self {
        Self::from_builder(SdkTracerProvider::builder().with_resource(resource))
    }

    /// The underlying tracer provider.
    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// Attach a processor chain to this root.
    pub fn attach_stage(&self, stage: Box<dyn SpanProcessor>) {
        self.slot.push(stage);
    }

    /// Number of attached processor chains.
    pub fn stage_count(&self) -> usize {
        self.slot.len()
    }

    /// Reference identity of this root, stable across clones.
    pub fn identity(&self) -> usize {
        self.slot.id()
    }

    /// Flush all attached stages.
    pub fn force_flush(&self) -> OTelSdkResult {
        self.provider.force_flush()
    }

    /// Shut the provider and every attached stage down.
    pub fn shutdown(&self) -> OTelSdkResult {
        self.provider.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    #[test]
    fn test_clones_share_identity() {
        let root = PipelineRoot::from_builder(SdkTracerProvider::builder());
        let clone = root.clone();
        assert_eq!(root.identity(), clone.identity());

        let other = PipelineRoot::from_builder(SdkTracerProvider::builder());
        assert_ne!(root.identity(), other.identity());
    }

    #[test]
    fn test_attach_stage_is_counted_on_all_clones() {
        let root = PipelineRoot::from_builder(SdkTracerProvider::builder());
        let clone = root.clone();
        assert_eq!(root.stage_count(), 0);

        let exporter = InMemorySpanExporter::default();
        root.attach_stage(Box::new(
            opentelemetry_sdk::trace::SimpleSpanProcessor::new(exporter),
        ));
        assert_eq!(root.stage_count(), 1);
        assert_eq!(clone.stage_count(), 1);
    }

    #[test]
    fn test_no_export_root_swallows_spans() {
        use opentelemetry::trace::{Span as _, Tracer, TracerProvider as _};

        let root = PipelineRoot::no_export(Resource::builder().build());
        let tracer = root.provider().tracer("test");
        let mut span = tracer.start("op");
        span.set_attribute(opentelemetry::KeyValue::new("k", "v"));
        span.end();
        root.shutdown().unwrap();
    }
}
