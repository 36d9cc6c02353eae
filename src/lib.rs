// Typeroute - Type-indexed event dispatch for Rust
//
// This library routes in-process events to handlers chosen by the event's type
// or by the capability sets it declares, with middleware and concurrent fan-out.

// Re-export core functionality
pub use typeroute_core::*;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        BindingId,
        Capabilities,
        Context,
        Dispatcher,
        DispatcherBuilder,
        Error,
        Event,
        EventType,
        Handler,
        HandlerResult,
        Middleware,
        Next,
        async_trait,
        capability,
        impl_event,
    };
}
