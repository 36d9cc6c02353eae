//! Call context passed through every dispatch.
//!
//! A [`Context`] travels from the dispatch caller to every middleware and
//! handler. The dispatcher never reads it: deadlines, cancellation and the
//! typed values it carries are for handler code to observe.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use typeroute_core::Context;
//!
//! #[derive(Debug)]
//! struct RequestId(String);
//!
//! let (ctx, cancel) = Context::background()
//!     .with_value(RequestId("req-42".into()))
//!     .with_timeout(Duration::from_secs(5))
//!     .with_cancel();
//!
//! assert_eq!(ctx.value::<RequestId>().unwrap().0, "req-42");
//! cancel.cancel();
//! assert!(ctx.is_cancelled());
//! ```

use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Immutable, cheaply clonable call context.
///
/// Derivation methods (`with_*`) return a new context and leave the
/// original untouched.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Clone, Default)]
struct Inner {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    deadline: Option<Instant>,
    cancel: Vec<watch::Receiver<bool>>,
}

impl Context {
    /// Empty context: no values, no deadline, never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context carrying `value`, replacing any value of the same type.
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        let mut inner = (*self.inner).clone();
        inner.values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Derive a context with a deadline. An earlier existing deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut inner = (*self.inner).clone();
        inner.deadline = Some(match inner.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Derive a context whose deadline is `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a cancellable context.
    ///
    /// The derived context is cancelled when the returned handle's
    /// [`CancelHandle::cancel`] is called or when any ancestor is cancelled.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut inner = (*self.inner).clone();
        inner.cancel.push(rx);
        (
            Self {
                inner: Arc::new(inner),
            },
            CancelHandle { tx: Arc::new(tx) },
        )
    }

    /// Typed value previously attached with [`Context::with_value`].
    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.inner
            .values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// True once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancel.iter().any(|rx| *rx.borrow()) {
            return true;
        }
        self.inner
            .deadline
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Resolves when the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a context with neither.
    pub async fn cancelled(&self) {
        let mut waits: Vec<BoxFuture<'static, ()>> = Vec::new();
        for rx in &self.inner.cancel {
            let mut rx = rx.clone();
            waits.push(
                async move {
                    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        // Handle dropped without cancelling.
                        futures::future::pending::<()>().await;
                    }
                }
                .boxed(),
            );
        }
        if let Some(deadline) = self.inner.deadline {
            waits.push(tokio::time::sleep_until(deadline).boxed());
        }
        if waits.is_empty() {
            return futures::future::pending().await;
        }
        futures::future::select_all(waits).await;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.inner.values.len())
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels the context returned alongside it by [`Context::with_cancel`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel the associated context and all contexts derived from it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct TenantId(u32);

    #[test]
    fn test_values_are_scoped_to_derived_context() {
        let root = Context::background();
        let child = root.with_value(TenantId(7));

        assert_eq!(child.value::<TenantId>(), Some(&TenantId(7)));
        assert_eq!(root.value::<TenantId>(), None);

        let replaced = child.with_value(TenantId(8));
        assert_eq!(replaced.value::<TenantId>(), Some(&TenantId(8)));
        assert_eq!(child.value::<TenantId>(), Some(&TenantId(7)));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_descendants() {
        let (parent, handle) = Context::background().with_cancel();
        let child = parent.with_value(TenantId(1));
        assert!(!child.is_cancelled());

        handle.cancel();
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
        child.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_resolves_cancelled() {
        let ctx = Context::background().with_timeout(Duration::from_secs(3));
        assert!(!ctx.is_cancelled());

        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::background()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
