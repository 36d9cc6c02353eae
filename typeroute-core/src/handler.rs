//! Handler and middleware contracts

use crate::context::Context;
use crate::error::{Error, HandlerResult};
use crate::event::{EventType, Payload};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Continuation handed to a [`Middleware`].
///
/// Calling it runs the next inner middleware or, for the innermost one, the
/// handler fan-out. Not calling it short-circuits the dispatch.
pub type Next = Box<dyn FnOnce(Context) -> BoxFuture<'static, HandlerResult> + Send>;

/// Stored form of a handler.
pub(crate) type HandlerFn =
    Arc<dyn Fn(Context, Payload) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Stored form of a middleware.
pub(crate) type MiddlewareFn =
    Arc<dyn Fn(Context, Payload, Next) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Event handler trait
///
/// `E` is either an exact event type or a capability set such as
/// `dyn Audited`.
#[async_trait]
pub trait Handler<E: EventType + ?Sized>: Send + Sync + 'static {
    /// Handle the event
    async fn handle(&self, ctx: Context, event: Arc<E>) -> HandlerResult;
}

/// Middleware trait for wrapping the handlers of a dispatch
#[async_trait]
pub trait Middleware<E: EventType + ?Sized>: Send + Sync + 'static {
    /// Run around the rest of the chain. Call `next` to continue.
    async fn handle(&self, ctx: Context, event: Arc<E>, next: Next) -> HandlerResult;
}

/// [`Handler`] backed by an async closure. See [`handler_fn`].
pub struct FnHandler<F, E: ?Sized> {
    f: F,
    _event: PhantomData<fn(Arc<E>)>,
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<E, F, Fut>(f: F) -> FnHandler<F, E>
where
    E: EventType + ?Sized,
    F: Fn(Context, Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler {
        f,
        _event: PhantomData,
    }
}

#[async_trait]
impl<E, F, Fut> Handler<E> for FnHandler<F, E>
where
    E: EventType + ?Sized,
    F: Fn(Context, Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: Context, event: Arc<E>) -> HandlerResult {
        (self.f)(ctx, event).await
    }
}

/// [`Middleware`] backed by an async closure. See [`middleware_fn`].
pub struct FnMiddleware<F, E: ?Sized> {
    f: F,
    _event: PhantomData<fn(Arc<E>)>,
}

/// Wrap an async closure as a [`Middleware`].
pub fn middleware_fn<E, F, Fut>(f: F) -> FnMiddleware<F, E>
where
    E: EventType + ?Sized,
    F: Fn(Context, Arc<E>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnMiddleware {
        f,
        _event: PhantomData,
    }
}

#[async_trait]
impl<E, F, Fut> Middleware<E> for FnMiddleware<F, E>
where
    E: EventType + ?Sized,
    F: Fn(Context, Arc<E>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: Context, event: Arc<E>, next: Next) -> HandlerResult {
        (self.f)(ctx, event, next).await
    }
}

pub(crate) fn erase_handler<E, H>(handler: H) -> HandlerFn
where
    E: EventType + ?Sized,
    H: Handler<E>,
{
    let handler = Arc::new(handler);
    Arc::new(move |ctx: Context, payload: Payload| {
        let handler = Arc::clone(&handler);
        async move {
            let event = downcast::<E>(payload)?;
            handler.handle(ctx, event).await
        }
        .boxed()
    })
}

pub(crate) fn erase_middleware<E, M>(middleware: M) -> MiddlewareFn
where
    E: EventType + ?Sized,
    M: Middleware<E>,
{
    let middleware = Arc::new(middleware);
    Arc::new(move |ctx: Context, payload: Payload, next: Next| {
        let middleware = Arc::clone(&middleware);
        async move {
            let event = downcast::<E>(payload)?;
            middleware.handle(ctx, event, next).await
        }
        .boxed()
    })
}

fn downcast<E: ?Sized + 'static>(payload: Payload) -> Result<Arc<E>, Error> {
    payload
        .downcast::<Arc<E>>()
        .map(|event| *event)
        .map_err(|_| Error::TypeMismatch {
            expected: type_name::<E>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_event;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Ping(u32);
    impl_event!(Ping);

    #[derive(Debug)]
    struct Pong;
    impl_event!(Pong);

    struct Counter {
        total: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<Ping> for Counter {
        async fn handle(&self, _ctx: Context, event: Arc<Ping>) -> HandlerResult {
            self.total.fetch_add(event.0, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_erased_handler_downcasts_payload() {
        let total = Arc::new(AtomicU32::new(0));
        let erased = erase_handler::<Ping, _>(Counter {
            total: total.clone(),
        });

        let payload: Payload = Box::new(Arc::new(Ping(5)));
        erased(Context::background(), payload).await.unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_erased_handler_rejects_wrong_payload() {
        let erased = erase_handler::<Ping, _>(handler_fn(|_ctx, _event: Arc<Ping>| async {
            Ok(())
        }));

        let payload: Payload = Box::new(Arc::new(Pong));
        let err = erased(Context::background(), payload).await.unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_middleware_fn_calls_next() {
        let erased = erase_middleware::<Ping, _>(middleware_fn(
            |ctx, _event: Arc<Ping>, next: Next| async move { next(ctx).await },
        ));

        let next: Next = Box::new(|_ctx: Context| async { Err(Error::msg("inner")) }.boxed());
        let payload: Payload = Box::new(Arc::new(Ping(1)));
        let err = erased(Context::background(), payload, next).await.unwrap_err();
        assert_eq!(err.to_string(), "Handler failed: inner");
    }
}
