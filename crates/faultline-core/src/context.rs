//! Ambient execution context: the causal metadata of the running task.
//!
//! A [`ContextSnapshot`] is an immutable value holding four optional fields.
//! Updating a field yields a new snapshot and leaves the old one intact, so
//! code still holding the old snapshot keeps seeing the old values.
//!
//! One snapshot is active per thread. [`ContextSnapshot::activate`] makes a
//! snapshot active until the returned [`ContextGuard`] drops, at which point
//! the previously active snapshot is restored. Guards drop on every exit
//! path, including unwinding, so activation never leaks out of a scope.
//! Async tasks carry their snapshot with [`FutureExt::with_context`], which
//! re-activates it around each poll regardless of the worker thread.

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::execution_index::ExecutionIndex;
use crate::vector_clock::VectorClock;

/// The four fixed fields of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    RequestId,
    VectorClock,
    OriginVectorClock,
    ExecutionIndex,
}

impl ContextKey {
    pub const ALL: [ContextKey; 4] = [
        ContextKey::RequestId,
        ContextKey::VectorClock,
        ContextKey::OriginVectorClock,
        ContextKey::ExecutionIndex,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ContextKey::RequestId => "request-id",
            ContextKey::VectorClock => "vclock",
            ContextKey::OriginVectorClock => "origin-vclock",
            ContextKey::ExecutionIndex => "execution-index",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Fields {
    request_id: Option<String>,
    vector_clock: Option<String>,
    origin_vector_clock: Option<String>,
    execution_index: Option<String>,
}

impl Fields {
    fn slot(&self, key: ContextKey) -> &Option<String> {
        match key {
            ContextKey::RequestId => &self.request_id,
            ContextKey::VectorClock => &self.vector_clock,
            ContextKey::OriginVectorClock => &self.origin_vector_clock,
            ContextKey::ExecutionIndex => &self.execution_index,
        }
    }

    fn slot_mut(&mut self, key: ContextKey) -> &mut Option<String> {
        match key {
            ContextKey::RequestId => &mut self.request_id,
            ContextKey::VectorClock => &mut self.vector_clock,
            ContextKey::OriginVectorClock => &mut self.origin_vector_clock,
            ContextKey::ExecutionIndex => &mut self.execution_index,
        }
    }
}

thread_local! {
    static CURRENT: RefCell<ContextSnapshot> = RefCell::new(ContextSnapshot::root());
}

/// Immutable snapshot of causal metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    fields: Arc<Fields>,
}

impl ContextSnapshot {
    /// The empty snapshot at the start of a causal chain.
    pub fn root() -> Self {
        Self::default()
    }

    /// The snapshot active on this thread.
    pub fn current() -> Self {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Makes `self` the active snapshot until the guard drops.
    pub fn activate(&self) -> ContextGuard {
        let previous = CURRENT.with(|current| current.replace(self.clone()));
        ContextGuard {
            previous: Some(previous),
            _not_send: PhantomData,
        }
    }

    pub fn get(&self, key: ContextKey) -> Option<&str> {
        self.fields.slot(key).as_deref()
    }

    /// A copy of `self` with `key` set to `value`.
    pub fn with_field(&self, key: ContextKey, value: impl Into<String>) -> Self {
        let mut fields = (*self.fields).clone();
        *fields.slot_mut(key) = Some(value.into());
        Self {
            fields: Arc::new(fields),
        }
    }

    pub fn is_empty(&self) -> bool {
        ContextKey::ALL.iter().all(|key| self.get(*key).is_none())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.get(ContextKey::RequestId)
    }

    pub fn vector_clock(&self) -> VectorClock {
        VectorClock::decode_or_default(self.get(ContextKey::VectorClock))
    }

    pub fn origin_vector_clock(&self) -> VectorClock {
        VectorClock::decode_or_default(self.get(ContextKey::OriginVectorClock))
    }

    pub fn execution_index(&self) -> ExecutionIndex {
        ExecutionIndex::decode_or_default(self.get(ContextKey::ExecutionIndex))
    }
}

/// Restores the previously active snapshot on drop.
///
/// Not `Send`: a guard must drop on the thread that created it.
#[must_use = "dropping the guard immediately restores the previous context"]
pub struct ContextGuard {
    previous: Option<ContextSnapshot>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Ignored during thread teardown, when the slot is already gone.
            let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
        }
    }
}

/// Per-call view of the ambient context handed to a fault decision.
///
/// Reads come from the snapshot captured at creation; writes replace the
/// held snapshot and never touch the thread's active one.
#[derive(Debug, Clone, Default)]
pub struct ContextStorage {
    snapshot: ContextSnapshot,
}

impl ContextStorage {
    /// Captures the currently active snapshot.
    pub fn capture() -> Self {
        Self {
            snapshot: ContextSnapshot::current(),
        }
    }

    pub fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }

    pub fn request_id(&self) -> Option<&str> {
        self.snapshot.request_id()
    }

    pub fn vector_clock(&self) -> VectorClock {
        self.snapshot.vector_clock()
    }

    pub fn origin_vector_clock(&self) -> VectorClock {
        self.snapshot.origin_vector_clock()
    }

    pub fn execution_index(&self) -> ExecutionIndex {
        self.snapshot.execution_index()
    }

    pub fn set_request_id(&mut self, request_id: &str) {
        tracing::debug!(request_id, "context storage: request id");
        self.snapshot = self.snapshot.with_field(ContextKey::RequestId, request_id);
    }

    pub fn set_vector_clock(&mut self, clock: &VectorClock) {
        tracing::debug!(vclock = %clock, "context storage: vector clock");
        self.snapshot = self.snapshot.with_field(ContextKey::VectorClock, clock.encode());
    }

    pub fn set_origin_vector_clock(&mut self, clock: &VectorClock) {
        tracing::debug!(origin_vclock = %clock, "context storage: origin vector clock");
        self.snapshot = self
            .snapshot
            .with_field(ContextKey::OriginVectorClock, clock.encode());
    }

    pub fn set_execution_index(&mut self, index: &ExecutionIndex) {
        tracing::debug!(execution_index = %index, "context storage: execution index");
        self.snapshot = self
            .snapshot
            .with_field(ContextKey::ExecutionIndex, index.encode());
    }
}

/// Attaches a context snapshot to a future.
pub trait FutureExt: Future + Sized {
    fn with_context(self, snapshot: ContextSnapshot) -> WithContext<Self> {
        WithContext {
            inner: Box::pin(self),
            snapshot,
        }
    }

    /// Attaches the snapshot active at the call site.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(ContextSnapshot::current())
    }
}

impl<F: Future> FutureExt for F {}

/// Future that runs every poll of `inner` under `snapshot`.
pub struct WithContext<F> {
    inner: Pin<Box<F>>,
    snapshot: ContextSnapshot,
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = this.snapshot.activate();
        this.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_field_is_copy_on_write() {
        let root = ContextSnapshot::root();
        let a = root.with_field(ContextKey::RequestId, "req-1");
        let b = a.with_field(ContextKey::RequestId, "req-2");

        assert_eq!(root.request_id(), None);
        assert_eq!(a.request_id(), Some("req-1"));
        assert_eq!(b.request_id(), Some("req-2"));
        assert!(root.is_empty());
        assert!(!a.is_empty());
    }

    #[test]
    fn test_unset_fields_have_empty_defaults() {
        let root = ContextSnapshot::root();
        assert_eq!(root.vector_clock(), VectorClock::new());
        assert_eq!(root.origin_vector_clock(), VectorClock::new());
        assert!(root.execution_index().is_root());
    }

    #[test]
    fn test_nested_activation_is_stack_like() {
        let outer = ContextSnapshot::root().with_field(ContextKey::RequestId, "outer");
        let inner = outer.with_field(ContextKey::RequestId, "inner");

        assert!(ContextSnapshot::current().is_empty());
        {
            let _outer = outer.activate();
            assert_eq!(ContextSnapshot::current(), outer);
            {
                let _inner = inner.activate();
                assert_eq!(ContextSnapshot::current(), inner);
            }
            assert_eq!(ContextSnapshot::current(), outer);
        }
        assert!(ContextSnapshot::current().is_empty());
    }

    #[test]
    fn test_activation_restored_on_unwind() {
        let snapshot = ContextSnapshot::root().with_field(ContextKey::RequestId, "panicky");
        let result = std::panic::catch_unwind(|| {
            let _guard = snapshot.activate();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(ContextSnapshot::current().is_empty());
    }

    #[test]
    fn test_threads_do_not_share_activation() {
        let snapshot = ContextSnapshot::root().with_field(ContextKey::RequestId, "main");
        let _guard = snapshot.activate();
        let seen = std::thread::spawn(ContextSnapshot::current).join().unwrap();
        assert!(seen.is_empty());
        assert_eq!(ContextSnapshot::current(), snapshot);
    }

    #[test]
    fn test_storage_writes_do_not_touch_active_context() {
        let mut storage = ContextStorage::capture();
        let mut clock = VectorClock::new();
        clock.increment("api");
        storage.set_vector_clock(&clock);
        storage.set_request_id("req-9");

        assert_eq!(storage.vector_clock(), clock);
        assert_eq!(storage.request_id(), Some("req-9"));
        assert!(ContextSnapshot::current().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_context_follows_spawned_task() {
        let snapshot = ContextSnapshot::root().with_field(ContextKey::RequestId, "task");
        let handle = tokio::spawn(
            async {
                tokio::task::yield_now().await;
                ContextSnapshot::current()
            }
            .with_context(snapshot.clone()),
        );
        assert_eq!(handle.await.unwrap(), snapshot);
        assert!(ContextSnapshot::current().is_empty());
    }
}
