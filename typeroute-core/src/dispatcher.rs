//! Dispatcher implementation

use crate::context::Context;
use crate::error::{Error, HandlerResult};
use crate::event::{Capabilities, Event, EventType, Payload};
use crate::group::HandlerGroup;
use crate::handler::{
    Handler, HandlerFn, Middleware, MiddlewareFn, Next, erase_handler, erase_middleware,
    handler_fn, middleware_fn,
};
use crate::registry::{Binding, BindingId, Callable, Registry};
use futures::FutureExt;
use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Routes event values to the handlers and middleware bound to their type.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Locking
///
/// One reader/writer lock guards the registry. [`register`](Self::register)
/// and [`wrap`](Self::wrap) take it exclusively. [`dispatch`](Self::dispatch)
/// takes it shared and holds it until every middleware and handler of that
/// dispatch has returned, so dispatches run in parallel with each other while
/// a slow handler delays pending bind calls. Dropping a dispatch future does
/// not release the lock early: handler tasks already started keep it until
/// they finish.
///
/// Handlers and middleware must not bind on, or await a dispatch of, the
/// dispatcher that is running them: the bind waits for the read lock held by
/// the running dispatch, which in turn waits for the handler.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RwLock<Registry>>,
    config: Arc<DispatcherConfig>,
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Emit `tracing` events for binds and dispatch resolution
    pub enable_logging: bool,

    /// Label attached to log events, useful with several dispatchers
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enable_logging: true,
            name: "default".to_string(),
        }
    }
}

impl Dispatcher {
    /// Create new dispatcher
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Create dispatcher with custom config
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Bind a handler to the event type `E`.
    ///
    /// `E` is an exact event type or a capability set (`dyn Trait`). Every
    /// registration fires; registering twice runs the handler twice.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let dispatcher = Dispatcher::new();
    /// dispatcher.register::<UserCreated, _>(WelcomeEmail::new()).await;
    /// dispatcher.register::<dyn Audited, _>(AuditLog::new()).await;
    /// ```
    pub async fn register<E, H>(&self, handler: H) -> BindingId
    where
        E: EventType + ?Sized,
        H: Handler<E>,
    {
        self.bind::<E>(Callable::Handler(erase_handler::<E, H>(handler)))
            .await
    }

    /// Bind a middleware to the event type `E`.
    ///
    /// Middleware only runs for dispatches that reach at least one handler.
    /// Within a dispatch, the most recently bound middleware is the
    /// outermost: it runs first and its `next` leads to the one bound
    /// before it, down to the handlers.
    pub async fn wrap<E, M>(&self, middleware: M) -> BindingId
    where
        E: EventType + ?Sized,
        M: Middleware<E>,
    {
        self.bind::<E>(Callable::Middleware(erase_middleware::<E, M>(middleware)))
            .await
    }

    /// Typed handle for closure-based binding and dispatch of `E`.
    ///
    /// ```rust,ignore
    /// dispatcher
    ///     .on::<UserCreated>()
    ///     .register(|_ctx, event| async move {
    ///         println!("created {}", event.user_id);
    ///         Ok(())
    ///     })
    ///     .await;
    /// ```
    pub fn on<E: EventType + ?Sized>(&self) -> On<'_, E> {
        On {
            dispatcher: self,
            _event: PhantomData,
        }
    }

    async fn bind<E: EventType + ?Sized>(&self, callable: Callable) -> BindingId {
        let descriptor = E::descriptor();
        let event_type = descriptor.name();

        let bound = self.registry.write().await.bind(descriptor, callable);

        if self.config.enable_logging {
            debug!(
                dispatcher = %self.config.name,
                binding = %bound.id,
                event_type,
                backfilled = bound.backfilled,
                "Bound {}",
                bound.kind.as_str()
            );
        }
        bound.id
    }

    /// Dispatch an event to every matching handler.
    ///
    /// Handlers bound to `E` itself and to every capability set `E` declares
    /// run concurrently as separate tasks, behind the matching middleware.
    /// Returns once all of them have finished.
    ///
    /// Succeeds without running anything, middleware included, when no
    /// handler matches. Otherwise returns what the outermost middleware
    /// returns; without middleware that is the error of the first handler to
    /// fail, or `Ok(())`.
    pub async fn dispatch<E: Event>(&self, ctx: Context, event: E) -> HandlerResult {
        let registry = Arc::new(Arc::clone(&self.registry).read_owned().await);
        if registry.is_empty() {
            return Ok(());
        }

        let caps = Capabilities::<E>::collect();
        let funcs = registry.resolve(&caps.descriptor());

        if self.config.enable_logging {
            trace!(
                dispatcher = %self.config.name,
                event = event.event_name(),
                handlers = funcs.handlers().len(),
                middleware = funcs.middleware().len(),
                fallback = matches!(funcs, Cow::Owned(_)),
                "Resolved dispatch"
            );
        }

        if funcs.handlers().is_empty() {
            return Ok(());
        }

        let event = Arc::new(event);
        let handlers = registry
            .bindings(funcs.handlers())
            .filter_map(|binding| binding.handler().map(|f| (binding, f)))
            .map(|(binding, f)| -> Result<(HandlerFn, Payload), Error> {
                Ok((Arc::clone(f), view(&caps, binding, &event)?))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let middleware = registry
            .bindings(funcs.middleware())
            .filter_map(|binding| binding.middleware().map(|f| (binding, f)))
            .map(|(binding, f)| -> Result<(MiddlewareFn, Payload), Error> {
                Ok((Arc::clone(f), view(&caps, binding, &event)?))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // Every handler task keeps the shared lock until it finishes, even
        // when this dispatch is dropped first.
        let guard = Arc::clone(&registry);
        let fan_out: Next = Box::new(move |ctx: Context| {
            async move {
                let mut group = HandlerGroup::new();
                for (handler, payload) in handlers {
                    let guard = Arc::clone(&guard);
                    let task = handler(ctx.clone(), payload);
                    group.spawn(
                        async move {
                            let result = task.await;
                            drop(guard);
                            result
                        }
                        .boxed(),
                    );
                }
                group.wait().await
            }
            .boxed()
        });

        // Each step wraps the chain built so far, leaving the last bound
        // middleware outermost.
        let chain = middleware
            .into_iter()
            .fold(fan_out, |next, (middleware, payload)| -> Next {
                Box::new(move |ctx: Context| middleware(ctx, payload, next))
            });

        chain(ctx).await
    }

    /// Number of handlers a dispatch of `E` would run.
    pub async fn handler_count<E: Event>(&self) -> usize {
        let registry = self.registry.read().await;
        registry
            .resolve(&Capabilities::<E>::collect().descriptor())
            .handlers()
            .len()
    }

    /// Number of middleware a dispatch of `E` would run, if any handler matches.
    pub async fn middleware_count<E: Event>(&self) -> usize {
        let registry = self.registry.read().await;
        registry
            .resolve(&Capabilities::<E>::collect().descriptor())
            .middleware()
            .len()
    }

    /// Total number of bindings.
    pub async fn binding_count(&self) -> usize {
        self.registry.read().await.len()
    }
}

fn view<E: Event>(
    caps: &Capabilities<E>,
    binding: &Binding,
    event: &Arc<E>,
) -> Result<Payload, Error> {
    caps.view(binding.target, event)
        .ok_or(Error::TypeMismatch {
            expected: type_name::<E>(),
        })
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Short-lived typed view of a [`Dispatcher`] for one event type.
///
/// Returned by [`Dispatcher::on`]. Lets closures be bound without naming
/// the event type again.
pub struct On<'d, E: ?Sized> {
    dispatcher: &'d Dispatcher,
    _event: PhantomData<fn(Arc<E>)>,
}

impl<E: EventType + ?Sized> On<'_, E> {
    /// Equivalent of [`Dispatcher::register`] for an async closure.
    pub async fn register<F, Fut>(&self, handler: F) -> BindingId
    where
        F: Fn(Context, Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.register::<E, _>(handler_fn(handler)).await
    }

    /// Equivalent of [`Dispatcher::wrap`] for an async closure.
    pub async fn wrap<F, Fut>(&self, middleware: F) -> BindingId
    where
        F: Fn(Context, Arc<E>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.wrap::<E, _>(middleware_fn(middleware)).await
    }
}

impl<E: Event> On<'_, E> {
    /// Equivalent of [`Dispatcher::dispatch`].
    pub async fn dispatch(&self, ctx: Context, event: E) -> HandlerResult {
        self.dispatcher.dispatch(ctx, event).await
    }
}

impl<E: ?Sized> fmt::Debug for On<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("On")
            .field("event_type", &type_name::<E>())
            .finish()
    }
}

/// Dispatcher builder
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Create new dispatcher builder
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
        }
    }

    /// Enable/disable logging
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    /// Set the name used in log events
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Build the dispatcher
    pub fn build(self) -> Dispatcher {
        Dispatcher::with_config(self.config)
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
