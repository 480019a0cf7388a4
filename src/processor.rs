//! # Span processor chain
//!
//! Wrapper stages that sit between a pipeline root and the terminal export
//! stage. Two wrappers exist: an attribute injector that stamps a routing
//! attribute on every span as it starts, and a filter that forwards only
//! finished spans carrying a marker attribute.
//!
//! Ordering is an invariant, not an implementation detail: the injector must
//! wrap the filter, never the other way round. The injector acts during
//! `on_start`, the filter inspects the final attribute set during `on_end`,
//! so reversing the nesting would filter on an attribute that does not exist
//! yet. [`compose`] encodes the ordering in its return type.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use opentelemetry::trace::Span as _;
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{Span, SpanData, SpanProcessor};
use opentelemetry_sdk::Resource;

/// Attribute stamped by [`RouteTagProcessor`], identifying the destination
/// project a span is routed to.
pub const ROUTE_ATTRIBUTE: &str = "telemetry.project.name";

/// Builds the canonical chain `RouteTag(MarkerFilter(export stage))`.
///
/// The injector is the outermost wrapper and the filter its immediate
/// delegate; the nesting is fixed by the return type so the ordering can be
/// asserted structurally. A `None` for either option makes the corresponding
/// wrapper transparent.
pub fn compose(
    stage: Box<dyn SpanProcessor>,
    route_value: Option<String>,
    marker_attribute: Option<String>,
) -> RouteTagProcessor<MarkerFilterProcessor<ExportStage>> {
    RouteTagProcessor::new(
        route_value,
        MarkerFilterProcessor::new(marker_attribute, ExportStage::new(stage)),
    )
}

/// Injects the [`ROUTE_ATTRIBUTE`] into every span during `on_start`, before
/// any filtering decision can be made. Never filters on `on_end`.
#[derive(Debug)]
pub struct RouteTagProcessor<P> {
    value: Option<String>,
    inner: P,
}

impl<P: SpanProcessor> RouteTagProcessor<P> {
    pub fn new(value: Option<String>, inner: P) -> Self {
        RouteTagProcessor { value, inner }
    }

    /// The configured routing value, if any.
    pub fn route_value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// The wrapped delegate.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: SpanProcessor> SpanProcessor for RouteTagProcessor<P> {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        if let Some(value) = &self.value {
            span.set_attribute(KeyValue::new(ROUTE_ATTRIBUTE, value.clone()));
        }
        self.inner.on_start(span, cx);
    }

    fn on_end(&self, span: SpanData) {
        self.inner.on_end(span);
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        // Keep the delegate's own default timeout.
        self.inner.shutdown()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Forwards only finished spans that carry the marker attribute.
///
/// `on_start` forwards unconditionally, attributes are not final yet. On
/// `on_end` a span with an empty attribute set is dropped outright, and a
/// non-empty one is forwarded only if the marker key is present. Dropped
/// spans may still reach other chains attached to the same pipeline root.
#[derive(Debug)]
pub struct MarkerFilterProcessor<P> {
    marker: Option<String>,
    inner: P,
}

impl<P: SpanProcessor> MarkerFilterProcessor<P> {
    pub fn new(marker: Option<String>, inner: P) -> Self {
        MarkerFilterProcessor { marker, inner }
    }

    /// The configured marker attribute key, if any.
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// The wrapped delegate.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: SpanProcessor> SpanProcessor for MarkerFilterProcessor<P> {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        self.inner.on_start(span, cx);
    }

    fn on_end(&self, span: SpanData) {
        match &self.marker {
            None => self.inner.on_end(span),
            Some(marker) => {
                if span.attributes.is_empty() {
                    return;
                }
                if span.attributes.iter().any(|kv| kv.key.as_str() == marker) {
                    self.inner.on_end(span);
                }
            }
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Terminal stage of a composed chain, erasing the concrete processor type.
#[derive(Debug)]
pub struct ExportStage(Box<dyn SpanProcessor>);

impl ExportStage {
    pub fn new(stage: Box<dyn SpanProcessor>) -> Self {
        ExportStage(stage)
    }
}

impl SpanProcessor for ExportStage {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        self.0.on_start(span, cx);
    }

    fn on_end(&self, span: SpanData) {
        self.0.on_end(span);
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.0.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.0.shutdown()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.0.shutdown_with_timeout(timeout)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.0.set_resource(resource);
    }
}

/// Late-attachment seam registered on every pipeline root at build time.
///
/// A built tracer provider's processor list is immutable, so the slot is the
/// one processor the provider owns and all chains added afterwards fan out
/// through it. The `Arc` behind the stage list also serves as the pipeline
/// root's identity for the duplicate-attach guard.
#[derive(Clone, Debug, Default)]
pub struct StageSlot {
    stages: Arc<RwLock<Vec<Box<dyn SpanProcessor>>>>,
    resource: Arc<Mutex<Option<Resource>>>,
}

impl StageSlot {
    pub(crate) fn push(&self, mut stage: Box<dyn SpanProcessor>) {
        // Stages attached after the provider was built still need the
        // provider's resource.
        if let Some(resource) = self
            .resource
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            stage.set_resource(resource);
        }
        self.stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stage);
    }

    pub(crate) fn len(&self) -> usize {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.stages) as *const () as usize
    }
}

impl SpanProcessor for StageSlot {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        let Ok(stages) = self.stages.read() else {
            return;
        };
        for stage in stages.iter() {
            stage.on_start(span, cx);
        }
    }

    fn on_end(&self, span: SpanData) {
        let Ok(stages) = self.stages.read() else {
            return;
        };
        for stage in stages.iter() {
            stage.on_end(span.clone());
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        let stages = self
            .stages
            .read()
            .map_err(|_| OTelSdkError::InternalFailure("stage slot lock poisoned".into()))?;
        let mut result = Ok(());
        for stage in stages.iter() {
            if let Err(err) = stage.force_flush() {
                result = Err(err);
            }
        }
        result
    }

    fn shutdown(&self) -> OTelSdkResult {
        let stages = self
            .stages
            .read()
            .map_err(|_| OTelSdkError::InternalFailure("stage slot lock poisoned".into()))?;
        let mut result = Ok(());
        for stage in stages.iter() {
            if let Err(err) = stage.shutdown() {
                result = Err(err);
            }
        }
        result
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        let stages = self
            .stages
            .read()
            .map_err(|_| OTelSdkError::InternalFailure("stage slot lock poisoned".into()))?;
        let mut result = Ok(());
        for stage in stages.iter() {
            if let Err(err) = stage.shutdown_with_timeout(timeout) {
                result = Err(err);
            }
        }
        result
    }

    fn set_resource(&mut self, resource: &Resource) {
        *self
            .resource
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(resource.clone());
        for stage in self
            .stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
        {
            stage.set_resource(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Tracer, TracerProvider as _};
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, Default)]
    struct CollectingStage {
        spans: Arc<Mutex<Vec<SpanData>>>,
        shutdown_called: Arc<AtomicBool>,
        flush_called: Arc<AtomicBool>,
    }

    impl CollectingStage {
        fn finished(&self) -> Vec<SpanData> {
            self.spans.lock().unwrap().clone()
        }
    }

    impl SpanProcessor for CollectingStage {
        fn on_start(&self, _span: &mut Span, _cx: &Context) {}

        fn on_end(&self, span: SpanData) {
            self.spans.lock().unwrap().push(span);
        }

        fn force_flush(&self) -> OTelSdkResult {
            self.flush_called.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
            self.shutdown_called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn provider_with<P: SpanProcessor + 'static>(processor: P) -> SdkTracerProvider {
        SdkTracerProvider::builder()
            .with_span_processor(processor)
            .build()
    }

    #[test]
    fn test_compose_nests_injector_outside_filter() {
        let chain = compose(
            Box::new(CollectingStage::default()),
            Some("my-project".to_string()),
            Some("span.kind".to_string()),
        );
        // The return type already fixes RouteTag ⊃ MarkerFilter ⊃ ExportStage;
        // check the configured values landed on the expected layer.
        assert_eq!(chain.route_value(), Some("my-project"));
        assert_eq!(chain.inner().marker(), Some("span.kind"));
    }

    #[test]
    fn test_injector_stamps_route_attribute() {
        let sink = CollectingStage::default();
        let chain = compose(Box::new(sink.clone()), Some("my-project".to_string()), None);
        let provider = provider_with(chain);

        let tracer = provider.tracer("test");
        tracer.start("op").end();

        let finished = sink.finished();
        assert_eq!(finished.len(), 1);
        assert!(finished[0]
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == ROUTE_ATTRIBUTE
                && kv.value.as_str() == "my-project"));
    }

    #[test]
    fn test_filter_forwards_marked_spans_only() {
        let sink = CollectingStage::default();
        let chain = compose(Box::new(sink.clone()), None, Some("span.kind".to_string()));
        let provider = provider_with(chain);
        let tracer = provider.tracer("test");

        let mut marked = tracer.start("marked");
        marked.set_attribute(KeyValue::new("span.kind", "llm"));
        marked.end();

        let mut unmarked = tracer.start("unmarked");
        unmarked.set_attribute(KeyValue::new("other", "x"));
        unmarked.end();

        // No attributes at all: dropped, not inspected.
        tracer.start("bare").end();

        let finished = sink.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "marked");
    }

    #[test]
    fn test_injected_attribute_satisfies_filter() {
        // The one behavior the ordering invariant exists for: a span with no
        // attributes of its own passes a filter keyed on the routing
        // attribute, because the injector ran first.
        let sink = CollectingStage::default();
        let chain = compose(
            Box::new(sink.clone()),
            Some("my-project".to_string()),
            Some(ROUTE_ATTRIBUTE.to_string()),
        );
        let provider = provider_with(chain);

        provider.tracer("test").start("op").end();
        assert_eq!(sink.finished().len(), 1);
    }

    #[test]
    fn test_transparent_wrappers_forward_everything() {
        let sink = CollectingStage::default();
        let chain = compose(Box::new(sink.clone()), None, None);
        let provider = provider_with(chain);

        provider.tracer("test").start("bare").end();
        assert_eq!(sink.finished().len(), 1);
    }

    #[test]
    fn test_flush_and_shutdown_pass_through() {
        let sink = CollectingStage::default();
        let chain = compose(Box::new(sink.clone()), Some("p".to_string()), None);
        chain.force_flush().unwrap();
        assert!(sink.flush_called.load(Ordering::SeqCst));
        chain.shutdown().unwrap();
        assert!(sink.shutdown_called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stage_slot_fans_out_to_all_stages() {
        let slot = StageSlot::default();
        let first = CollectingStage::default();
        let second = CollectingStage::default();
        slot.push(Box::new(first.clone()));
        slot.push(Box::new(second.clone()));
        assert_eq!(slot.len(), 2);

        let provider = provider_with(slot);
        provider.tracer("test").start("op").end();

        assert_eq!(first.finished().len(), 1);
        assert_eq!(second.finished().len(), 1);
    }

    #[test]
    fn test_stage_slot_identity_is_stable_across_clones() {
        let slot = StageSlot::default();
        let clone = slot.clone();
        assert_eq!(slot.id(), clone.id());
        assert_ne!(slot.id(), StageSlot::default().id());
    }
}
