//! Binding table and type index
//!
//! Every bound function gets a process-wide [`BindingId`]. The registry keeps
//! the callables keyed by id and two indexes of id lists: one per exact event
//! type and one per capability set.
//!
//! The two indexes are kept consistent at bind time, whatever order the
//! bindings arrive in:
//!
//! - binding to a capability set appends the id to every exact type already
//!   indexed that satisfies it;
//! - the first binding to an exact type copies in the ids of every capability
//!   set it satisfies.
//!
//! Exact types that were never bound themselves have no entry and are
//! resolved by scanning the capability index on each dispatch.

use crate::event::{TypeDescriptor, TypeIdentity};
use crate::handler::{HandlerFn, MiddlewareFn};
use std::any::TypeId;
use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide unique id of a bound handler or middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FnKind {
    Handler,
    Middleware,
}

impl FnKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FnKind::Handler => "handler",
            FnKind::Middleware => "middleware",
        }
    }
}

pub(crate) enum Callable {
    Handler(HandlerFn),
    Middleware(MiddlewareFn),
}

impl Callable {
    fn kind(&self) -> FnKind {
        match self {
            Callable::Handler(_) => FnKind::Handler,
            Callable::Middleware(_) => FnKind::Middleware,
        }
    }
}

/// Entry of the binding table.
pub(crate) struct Binding {
    /// Type the function was bound against; selects the event view it gets.
    pub(crate) target: TypeId,
    callable: Callable,
}

impl Binding {
    pub(crate) fn handler(&self) -> Option<&HandlerFn> {
        match &self.callable {
            Callable::Handler(f) => Some(f),
            Callable::Middleware(_) => None,
        }
    }

    pub(crate) fn middleware(&self) -> Option<&MiddlewareFn> {
        match &self.callable {
            Callable::Middleware(f) => Some(f),
            Callable::Handler(_) => None,
        }
    }
}

/// Ordered ids bound to one type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TypeFuncs {
    handlers: Vec<BindingId>,
    middleware: Vec<BindingId>,
}

impl TypeFuncs {
    pub(crate) fn handlers(&self) -> &[BindingId] {
        &self.handlers
    }

    pub(crate) fn middleware(&self) -> &[BindingId] {
        &self.middleware
    }

    fn push(&mut self, kind: FnKind, ids: impl IntoIterator<Item = BindingId>) {
        match kind {
            FnKind::Handler => self.handlers.extend(ids),
            FnKind::Middleware => self.middleware.extend(ids),
        }
    }

    fn absorb(&mut self, other: &TypeFuncs) {
        self.push(FnKind::Handler, other.handlers.iter().copied());
        self.push(FnKind::Middleware, other.middleware.iter().copied());
    }
}

struct ConcreteEntry {
    descriptor: TypeDescriptor,
    funcs: TypeFuncs,
}

/// Result of a bind call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bound {
    pub(crate) id: BindingId,
    pub(crate) kind: FnKind,
    /// Index entries other than the target's own that received ids.
    pub(crate) backfilled: usize,
}

#[derive(Default)]
pub(crate) struct Registry {
    bindings: HashMap<BindingId, Binding>,
    concrete: HashMap<TypeId, ConcreteEntry>,
    capabilities: HashMap<TypeId, TypeFuncs>,
}

impl Registry {
    /// Store `callable` and index it under `descriptor`'s type.
    pub(crate) fn bind(&mut self, descriptor: TypeDescriptor, callable: Callable) -> Bound {
        let id = BindingId::next();
        let kind = callable.kind();
        let identity = descriptor.identity();
        self.bindings.insert(
            id,
            Binding {
                target: identity.id(),
                callable,
            },
        );

        let mut backfilled = 0;
        match identity {
            TypeIdentity::Capability(capability) => {
                self.capabilities
                    .entry(capability)
                    .or_default()
                    .push(kind, [id]);

                for entry in self.concrete.values_mut() {
                    if entry.descriptor.satisfies(capability) {
                        entry.funcs.push(kind, [id]);
                        backfilled += 1;
                    }
                }
            }
            TypeIdentity::Exact(type_id) => {
                let entry = match self.concrete.entry(type_id) {
                    Entry::Occupied(occupied) => occupied.into_mut(),
                    Entry::Vacant(vacant) => {
                        let mut funcs = TypeFuncs::default();
                        for (capability, capability_funcs) in &self.capabilities {
                            if descriptor.satisfies(*capability) {
                                funcs.absorb(capability_funcs);
                                backfilled += 1;
                            }
                        }
                        vacant.insert(ConcreteEntry { descriptor, funcs })
                    }
                };
                entry.funcs.push(kind, [id]);
            }
        }

        Bound {
            id,
            kind,
            backfilled,
        }
    }

    /// True until the first bind.
    pub(crate) fn is_empty(&self) -> bool {
        self.concrete.is_empty() && self.capabilities.is_empty()
    }

    /// Ids applicable to a value of the exact type described by `descriptor`.
    ///
    /// Borrowed when the type has its own entry, otherwise computed by a
    /// scan over the capability index.
    pub(crate) fn resolve(&self, descriptor: &TypeDescriptor) -> Cow<'_, TypeFuncs> {
        if let Some(entry) = self.concrete.get(&descriptor.identity().id()) {
            return Cow::Borrowed(&entry.funcs);
        }

        let mut funcs = TypeFuncs::default();
        for (capability, capability_funcs) in &self.capabilities {
            if descriptor.satisfies(*capability) {
                funcs.absorb(capability_funcs);
            }
        }
        Cow::Owned(funcs)
    }

    /// Bindings for `ids`, in order. Every indexed id is in the table.
    pub(crate) fn bindings<'a>(
        &'a self,
        ids: &'a [BindingId],
    ) -> impl Iterator<Item = &'a Binding> + 'a {
        ids.iter().filter_map(|id| self.bindings.get(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.bindings.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("bindings", &self.bindings.len())
            .field("concrete", &self.concrete.len())
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::Error;
    use crate::event::{Event, EventType, Payload};
    use crate::handler::Next;
    use crate::{capability, impl_event};
    use futures::FutureExt;
    use std::sync::Arc;

    trait Fooer: Send + Sync {
        fn foo(&self);
    }
    capability!(dyn Fooer);

    trait Barer: Send + Sync {}
    capability!(dyn Barer);

    struct Foo;
    impl Fooer for Foo {
        fn foo(&self) {}
    }
    impl_event!(Foo: dyn Fooer);

    struct Plain;
    impl_event!(Plain);

    fn handler() -> Callable {
        Callable::Handler(Arc::new(|_ctx: Context, _payload: Payload| {
            async { Ok::<(), Error>(()) }.boxed()
        }))
    }

    fn middleware() -> Callable {
        Callable::Middleware(Arc::new(|ctx: Context, _payload: Payload, next: Next| next(ctx)))
    }

    fn bind<T: EventType + ?Sized>(registry: &mut Registry, callable: Callable) -> BindingId {
        registry.bind(T::descriptor(), callable).id
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut registry = Registry::default();
        let a = bind::<Foo>(&mut registry, handler());
        let b = bind::<Foo>(&mut registry, handler());
        assert!(b > a);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.bindings(&[a, b]).count(), 2);
    }

    #[test]
    fn test_capability_bound_before_concrete_is_absorbed() {
        let mut registry = Registry::default();
        let cap_handler = bind::<dyn Fooer>(&mut registry, handler());
        let cap_mw = bind::<dyn Fooer>(&mut registry, middleware());
        let own = bind::<Foo>(&mut registry, handler());

        let funcs = registry.resolve(&Foo::descriptor());
        assert!(matches!(funcs, Cow::Borrowed(_)));
        assert_eq!(funcs.handlers(), &[cap_handler, own]);
        assert_eq!(funcs.middleware(), &[cap_mw]);
    }

    #[test]
    fn test_capability_bound_after_concrete_is_backfilled() {
        let mut registry = Registry::default();
        let own = bind::<Foo>(&mut registry, handler());
        let bound = registry.bind(<dyn Fooer as EventType>::descriptor(), handler());
        assert_eq!(bound.backfilled, 1);

        let funcs = registry.resolve(&Foo::descriptor());
        assert_eq!(funcs.handlers(), &[own, bound.id]);
    }

    #[test]
    fn test_unsatisfied_capability_is_not_backfilled() {
        let mut registry = Registry::default();
        let own = bind::<Foo>(&mut registry, handler());
        bind::<dyn Barer>(&mut registry, handler());
        bind::<Plain>(&mut registry, handler());

        let funcs = registry.resolve(&Foo::descriptor());
        assert_eq!(funcs.handlers(), &[own]);
    }

    #[test]
    fn test_builtin_event_capability_matches_everything() {
        let mut registry = Registry::default();
        let plain = bind::<Plain>(&mut registry, handler());
        let any = bind::<dyn Event>(&mut registry, handler());

        assert_eq!(registry.resolve(&Plain::descriptor()).handlers(), &[plain, any]);
        assert_eq!(registry.resolve(&Foo::descriptor()).handlers(), &[any]);
    }

    #[test]
    fn test_unbound_concrete_falls_back_to_scan() {
        let mut registry = Registry::default();
        let handler_id = bind::<dyn Fooer>(&mut registry, handler());
        let mw_id = bind::<dyn Fooer>(&mut registry, middleware());

        let funcs = registry.resolve(&Foo::descriptor());
        assert!(matches!(funcs, Cow::Owned(_)));
        assert_eq!(funcs.handlers(), &[handler_id]);
        assert_eq!(funcs.middleware(), &[mw_id]);

        assert!(registry.resolve(&Plain::descriptor()).handlers().is_empty());
    }

    #[test]
    fn test_each_matching_capability_contributes_once() {
        let mut registry = Registry::default();
        let fooer = bind::<dyn Fooer>(&mut registry, handler());
        let any = bind::<dyn Event>(&mut registry, handler());
        bind::<Foo>(&mut registry, middleware());

        let funcs = registry.resolve(&Foo::descriptor());
        let mut handlers = funcs.handlers().to_vec();
        handlers.sort();
        assert_eq!(handlers, vec![fooer, any]);
    }

    #[test]
    fn test_is_empty_until_first_bind() {
        let mut registry = Registry::default();
        assert!(registry.is_empty());
        bind::<dyn Barer>(&mut registry, middleware());
        assert!(!registry.is_empty());
    }
}
