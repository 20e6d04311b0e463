//! # Scoped Execution Context
//!
//! One resource scope per logical call chain. The mediator's public façade
//! creates the scope on entry; nested dispatches made from inside a handler
//! or middleware retain the same scope and release it on the way out. The
//! underlying resolver scope is disposed exactly once, when the reference
//! count reaches zero as the outermost call unwinds.
//!
//! The scope travels inside the dispatch context threaded through every
//! delegate. It is never stored in a global or thread-local, so unrelated
//! concurrent call chains can never observe each other's scope.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::resolver::ServiceResolver;

/// A disposable resource scope produced by the service resolver.
///
/// Both disposal paths must be idempotent-safe at the call site: the
/// execution scope guarantees it calls exactly one of them exactly once.
#[async_trait]
pub trait ServiceScope: Send + Sync + 'static {
    /// Synchronous disposal, used by the blocking dispatch path.
    fn dispose_blocking(&self);

    /// Asynchronous disposal; defaults to the blocking path.
    async fn dispose(&self) {
        self.dispose_blocking();
    }
}

struct ScopeInner {
    scope: Arc<dyn ServiceScope>,
    references: AtomicUsize,
    disposed: AtomicBool,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) {
            warn!("execution scope dropped without release; disposing on the blocking path");
            self.scope.dispose_blocking();
        }
    }
}

/// Reference-counted handle to the call chain's resource scope.
///
/// `Clone` shares the handle without affecting the reference count; the
/// count tracks dispatch entries, not handle copies. [`retain`] and
/// [`release`] (or [`release_blocking`]) must pair up per dispatch entry.
///
/// [`retain`]: ExecutionScope::retain
/// [`release`]: ExecutionScope::release
/// [`release_blocking`]: ExecutionScope::release_blocking
#[derive(Clone)]
pub struct ExecutionScope {
    inner: Arc<ScopeInner>,
}

impl ExecutionScope {
    /// Create the root scope for a new logical call chain.
    pub(crate) fn enter(resolver: &Arc<dyn ServiceResolver>) -> Self {
        debug!("entering new execution scope");
        Self {
            inner: Arc::new(ScopeInner {
                scope: resolver.create_scope(),
                references: AtomicUsize::new(1),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Re-enter the existing scope from a nested dispatch.
    pub(crate) fn retain(&self) -> Self {
        self.inner.references.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Leave the scope; disposes the underlying resource scope when the
    /// last reference releases.
    pub(crate) async fn release(&self) {
        if self.inner.references.fetch_sub(1, Ordering::AcqRel) == 1
            && !self.inner.disposed.swap(true, Ordering::AcqRel)
        {
            debug!("releasing execution scope");
            self.inner.scope.dispose().await;
        }
    }

    /// Blocking-path counterpart of [`release`](Self::release).
    pub(crate) fn release_blocking(&self) {
        if self.inner.references.fetch_sub(1, Ordering::AcqRel) == 1
            && !self.inner.disposed.swap(true, Ordering::AcqRel)
        {
            debug!("releasing execution scope (blocking)");
            self.inner.scope.dispose_blocking();
        }
    }

    /// The underlying resolver scope.
    pub fn service_scope(&self) -> &Arc<dyn ServiceScope> {
        &self.inner.scope
    }

    /// Number of dispatch entries currently holding this scope.
    pub fn active_references(&self) -> usize {
        self.inner.references.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("references", &self.active_references())
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ServiceResolver, SharedService, SimpleServiceScope};

    struct CountingResolver {
        disposals: Arc<AtomicUsize>,
    }

    impl ServiceResolver for CountingResolver {
        fn resolve(&self, _key: &str) -> Option<SharedService> {
            None
        }

        fn resolve_or_create(
            &self,
            _key: &str,
            construct: &(dyn Fn() -> SharedService + Send + Sync),
        ) -> SharedService {
            construct()
        }

        fn create_scope(&self) -> Arc<dyn ServiceScope> {
            let scope = SimpleServiceScope::new();
            let disposals = Arc::clone(&self.disposals);
            scope.on_dispose(move || {
                disposals.fetch_add(1, Ordering::SeqCst);
            });
            Arc::new(scope)
        }
    }

    fn counting_resolver() -> (Arc<dyn ServiceResolver>, Arc<AtomicUsize>) {
        let disposals = Arc::new(AtomicUsize::new(0));
        let resolver = Arc::new(CountingResolver {
            disposals: Arc::clone(&disposals),
        });
        (resolver as Arc<dyn ServiceResolver>, disposals)
    }

    #[tokio::test]
    async fn nested_retain_disposes_once_at_zero() {
        let (resolver, disposals) = counting_resolver();

        let root = ExecutionScope::enter(&resolver);
        let nested = root.retain();
        assert_eq!(root.active_references(), 2);

        nested.release().await;
        assert_eq!(disposals.load(Ordering::SeqCst), 0);

        root.release().await;
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_is_idempotent_after_zero() {
        let (resolver, disposals) = counting_resolver();

        let root = ExecutionScope::enter(&resolver);
        root.release().await;
        root.release().await;
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocking_release_disposes() {
        let (resolver, disposals) = counting_resolver();

        let root = ExecutionScope::enter(&resolver);
        root.release_blocking();
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clone_does_not_retain() {
        let (resolver, disposals) = counting_resolver();

        let root = ExecutionScope::enter(&resolver);
        let copy = root.clone();
        assert_eq!(copy.active_references(), 1);

        root.release_blocking();
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }
}
