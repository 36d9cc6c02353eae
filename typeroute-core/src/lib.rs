//! Type-indexed event dispatch
//!
//! This crate routes in-process events to handlers chosen by the event's
//! type, so a business operation can announce what happened without knowing
//! who cares.
//!
//! ## Features
//!
//! - **Exact-type routing** - Handlers bound to `UserCreated` receive every `UserCreated`
//! - **Capability sets** - Handlers bound to `dyn Audited` receive every event declaring `Audited`
//! - **Middleware** - Wrap handler execution for logging, tracing, auth, ...
//! - **Concurrent fan-out** - Handlers of one dispatch run as parallel tasks
//! - **Isolated instances** - Explicit [`Dispatcher`]s plus a process-wide default
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use typeroute_core::*;
//!
//! pub trait Audited: Send + Sync {
//!     fn actor(&self) -> &str;
//! }
//! capability!(dyn Audited);
//!
//! #[derive(Debug)]
//! struct UserCreated {
//!     user_id: String,
//!     actor: String,
//! }
//!
//! impl Audited for UserCreated {
//!     fn actor(&self) -> &str { &self.actor }
//! }
//!
//! impl_event!(UserCreated: dyn Audited);
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let dispatcher = Dispatcher::new();
//!
//!     dispatcher
//!         .on::<UserCreated>()
//!         .register(|_ctx, event| async move {
//!             println!("Sending welcome email to {}", event.user_id);
//!             Ok(())
//!         })
//!         .await;
//!
//!     dispatcher
//!         .on::<dyn Audited>()
//!         .register(|_ctx, event| async move {
//!             println!("audit: {}", event.actor());
//!             Ok(())
//!         })
//!         .await;
//!
//!     let event = UserCreated {
//!         user_id: "123".to_string(),
//!         actor: "admin".to_string(),
//!     };
//!     dispatcher.dispatch(Context::background(), event).await
//! }
//! ```
//!
//! ## Middleware
//!
//! ```rust,ignore
//! dispatcher
//!     .on::<dyn Event>()
//!     .wrap(|ctx, event, next| async move {
//!         tracing::info!(event = event.event_name(), "dispatching");
//!         next(ctx).await
//!     })
//!     .await;
//! ```
//!
//! Middleware runs only when at least one handler matches. The most recently
//! bound middleware is the outermost layer. A middleware that returns without
//! calling `next` stops the dispatch; its result becomes the dispatch result.
//!
//! ## Error Handling
//!
//! ```rust,ignore
//! match dispatcher.dispatch(ctx, event).await {
//!     Ok(()) => println!("All handlers succeeded"),
//!     Err(e) => eprintln!("A handler failed: {}", e),
//! }
//! ```
//!
//! When several handlers fail, the error of the one that finished first is
//! returned. No handler is cancelled because another failed.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod global;
pub mod handler;

mod group;
mod registry;

pub use context::{CancelHandle, Context};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, On};
pub use error::{Error, HandlerResult, Result};
pub use event::{Capabilities, Event, EventType, TypeDescriptor, TypeIdentity};
pub use global::{dispatch, global, on, register, wrap};
pub use handler::{FnHandler, FnMiddleware, Handler, Middleware, Next, handler_fn, middleware_fn};
pub use registry::BindingId;

// Re-exported for `Handler`/`Middleware` implementors.
pub use async_trait::async_trait;
