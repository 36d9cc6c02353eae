//! Process-wide dispatcher
//!
//! Free functions that bind and dispatch against one lazily created
//! [`Dispatcher`]. They behave exactly like the methods of an explicit
//! instance; use an explicit instance wherever isolation matters, such as
//! in tests.

use crate::context::Context;
use crate::dispatcher::{Dispatcher, DispatcherBuilder, On};
use crate::error::HandlerResult;
use crate::event::{Event, EventType};
use crate::handler::{Handler, Middleware};
use crate::registry::BindingId;
use once_cell::sync::Lazy;

static GLOBAL: Lazy<Dispatcher> = Lazy::new(|| DispatcherBuilder::new().name("global").build());

/// The process-wide dispatcher.
pub fn global() -> &'static Dispatcher {
    &GLOBAL
}

/// [`Dispatcher::register`] on the process-wide dispatcher.
pub async fn register<E, H>(handler: H) -> BindingId
where
    E: EventType + ?Sized,
    H: Handler<E>,
{
    GLOBAL.register::<E, H>(handler).await
}

/// [`Dispatcher::wrap`] on the process-wide dispatcher.
pub async fn wrap<E, M>(middleware: M) -> BindingId
where
    E: EventType + ?Sized,
    M: Middleware<E>,
{
    GLOBAL.wrap::<E, M>(middleware).await
}

/// [`Dispatcher::dispatch`] on the process-wide dispatcher.
pub async fn dispatch<E: Event>(ctx: Context, event: E) -> HandlerResult {
    GLOBAL.dispatch(ctx, event).await
}

/// [`Dispatcher::on`] on the process-wide dispatcher.
pub fn on<E: EventType + ?Sized>() -> On<'static, E> {
    GLOBAL.on::<E>()
}
