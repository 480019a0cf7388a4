//! # Lifecycle state and duplicate-attach guard
//!
//! Process-wide bookkeeping for the bootstrap entry points. Both states are
//! explicitly constructed and injectable so tests can run against their own
//! instances; [`default_state`] and [`default_guard`] provide the shared
//! process-wide instances the convenience entry points use.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use opentelemetry::{otel_debug, otel_warn};

use crate::pipeline::PipelineRoot;

/// Tracks whether an owned pipeline is active and which root it is.
///
/// `activate` while already active is allowed but warned about; the
/// previously tracked root is shut down before being replaced, rather than
/// silently dropped with its buffered spans. `shutdown` is idempotent.
#[derive(Clone, Debug, Default)]
pub struct PipelineState {
    inner: Arc<Mutex<Lifecycle>>,
}

#[derive(Debug, Default)]
struct Lifecycle {
    active: bool,
    root: Option<PipelineRoot>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an owned pipeline is currently active.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// The currently tracked root, if any.
    pub fn root(&self) -> Option<PipelineRoot> {
        self.lock().root.clone()
    }

    pub(crate) fn activate(&self, root: PipelineRoot) {
        let mut lifecycle = self.lock();
        if lifecycle.active {
            otel_warn!(
                name: "TraceBootstrap.ReinitWhileActive",
                message = "init called while a pipeline is already active, replacing the tracked root"
            );
            if let Some(previous) = lifecycle.root.take() {
                if let Err(err) = previous.shutdown() {
                    otel_debug!(
                        name: "TraceBootstrap.PreviousRootShutdownFailed",
                        reason = format!("{err:?}")
                    );
                }
            }
        }
        lifecycle.active = true;
        lifecycle.root = Some(root);
    }

    /// Flush and release the tracked root. Safe to call repeatedly and from
    /// the inactive state.
    pub fn shutdown(&self) {
        let mut lifecycle = self.lock();
        if !lifecycle.active {
            return;
        }
        lifecycle.active = false;
        if let Some(root) = lifecycle.root.take() {
            if let Err(err) = root.shutdown() {
                otel_debug!(
                    name: "TraceBootstrap.ShutdownFailed",
                    reason = format!("{err:?}")
                );
            }
        }
    }

    /// [`shutdown`], but only while the given root is still the tracked one.
    /// A stale handle must not tear down a replacement pipeline.
    ///
    /// [`shutdown`]: PipelineState::shutdown
    pub(crate) fn shutdown_if_current(&self, identity: usize) {
        {
            let lifecycle = self.lock();
            if lifecycle.root.as_ref().map(PipelineRoot::identity) != Some(identity) {
                return;
            }
        }
        self.shutdown();
    }
}

/// The process-wide lifecycle state used by [`crate::init`].
pub fn default_state() -> &'static PipelineState {
    static STATE: OnceLock<PipelineState> = OnceLock::new();
    STATE.get_or_init(PipelineState::new)
}

/// Handle to an owned, active pipeline, returned by [`crate::init`].
///
/// Dropping the handle shuts the pipeline down, which flushes buffered spans
/// at process exit when the caller never calls [`shutdown`] explicitly.
///
/// [`shutdown`]: PipelineHandle::shutdown
#[derive(Debug)]
pub struct PipelineHandle {
    state: PipelineState,
    root: PipelineRoot,
}

impl PipelineHandle {
    pub(crate) fn new(state: PipelineState, root: PipelineRoot) -> Self {
        PipelineHandle { state, root }
    }

    /// The pipeline root this handle owns.
    pub fn root(&self) -> &PipelineRoot {
        &self.root
    }

    /// Whether the owning state still reports an active pipeline.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Flush and release the pipeline now instead of at drop time.
    pub fn shutdown(self) {
        self.state.shutdown_if_current(self.root.identity());
        // Drop still runs; shutdown is idempotent.
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.state.shutdown_if_current(self.root.identity());
    }
}

/// Per-root-identity guard for the attach entry point.
///
/// Unlike the lifecycle state's loose re-entry, a second attach against the
/// same root identity is a hard block: no processor is added and no
/// instrumentation re-applied. There is no automatic reset; call [`reset`]
/// explicitly (e.g. between test runs) or use a different root.
///
/// [`reset`]: AttachGuard::reset
#[derive(Clone, Debug, Default)]
pub struct AttachGuard {
    applied: Arc<Mutex<HashSet<usize>>>,
}

impl AttachGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether processors were already attached to this root identity.
    pub fn is_applied(&self, identity: usize) -> bool {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&identity)
    }

    pub(crate) fn mark(&self, identity: usize) {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity);
    }

    /// Forget every recorded attachment.
    pub fn reset(&self) {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// The process-wide attach guard used by [`crate::attach`].
pub fn default_guard() -> &'static AttachGuard {
    static GUARD: OnceLock<AttachGuard> = OnceLock::new();
    GUARD.get_or_init(AttachGuard::new)
}
