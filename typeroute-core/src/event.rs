//! Event definitions and type identity
//!
//! Two kinds of types can be bound to handlers:
//!
//! - **Exact types** implement [`Event`]. A dispatch of a value only reaches
//!   bindings for its own type and for the capability sets it declares.
//! - **Capability sets** are trait objects (`dyn Trait`) registered with
//!   [`capability!`](crate::capability). Any event that declares the trait
//!   through [`Capabilities::provide`] is delivered to their bindings as
//!   `Arc<dyn Trait>`.
//!
//! Structural satisfaction cannot be discovered at runtime, so every event
//! type states what it satisfies once, in [`Event::capabilities`]. The
//! [`impl_event!`](crate::impl_event) macro writes that declaration.
//!
//! `dyn Event` is a built-in capability satisfied by every event type.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Type-erased view of an event handed to a stored callable.
pub(crate) type Payload = Box<dyn Any + Send>;

type Cast<E> = Box<dyn Fn(Arc<E>) -> Payload + Send + Sync>;

/// Event trait
///
/// All concrete events implement this trait.
pub trait Event: Send + Sync + 'static {
    /// Get event name
    fn event_name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Declare the capability sets this type satisfies.
    ///
    /// ```rust,ignore
    /// impl Event for UserCreated {
    ///     fn capabilities(caps: &mut Capabilities<Self>) {
    ///         caps.provide::<dyn Audited>(|e: Arc<Self>| -> Arc<dyn Audited> { e });
    ///     }
    /// }
    /// ```
    fn capabilities(caps: &mut Capabilities<Self>)
    where
        Self: Sized,
    {
        let _ = caps;
    }
}

/// Anything a handler or middleware can be bound against.
///
/// Implemented for every [`Event`] and, through
/// [`capability!`](crate::capability), for capability-set trait objects.
pub trait EventType: Send + Sync + 'static {
    /// Static description of the type used for matching.
    fn descriptor() -> TypeDescriptor;
}

impl<E: Event> EventType for E {
    fn descriptor() -> TypeDescriptor {
        Capabilities::<E>::collect().descriptor()
    }
}

impl EventType for dyn Event {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::capability::<Self>()
    }
}

/// Identity of a bindable type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeIdentity {
    /// A concrete, nominal event type.
    Exact(TypeId),
    /// A capability set, i.e. a `dyn Trait` type.
    Capability(TypeId),
}

impl TypeIdentity {
    /// Underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        match self {
            TypeIdentity::Exact(id) | TypeIdentity::Capability(id) => *id,
        }
    }
}

/// Registration-time descriptor of a bindable type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    identity: TypeIdentity,
    name: &'static str,
    satisfies: HashSet<TypeId>,
}

impl TypeDescriptor {
    /// Descriptor for a capability-set type `C`.
    pub fn capability<C: ?Sized + 'static>() -> Self {
        Self {
            identity: TypeIdentity::Capability(TypeId::of::<C>()),
            name: type_name::<C>(),
            satisfies: HashSet::new(),
        }
    }

    pub fn identity(&self) -> TypeIdentity {
        self.identity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this type satisfies the capability set identified by `capability`.
    ///
    /// Always false for capability-set descriptors.
    pub fn satisfies(&self, capability: TypeId) -> bool {
        self.satisfies.contains(&capability)
    }
}

/// Capability sets satisfied by the event type `E`, with the coercions
/// that produce each view.
pub struct Capabilities<E> {
    casts: HashMap<TypeId, Cast<E>>,
}

impl<E: Event> Capabilities<E> {
    pub(crate) fn collect() -> Self {
        let mut caps = Self {
            casts: HashMap::new(),
        };
        caps.provide::<dyn Event>(|event: Arc<E>| -> Arc<dyn Event> { event });
        E::capabilities(&mut caps);
        caps
    }

    /// Record that `E` satisfies the capability set `C`.
    ///
    /// `cast` is normally the identity closure annotated with the target
    /// type, letting the compiler verify that `E` really implements `C`.
    pub fn provide<C>(&mut self, cast: fn(Arc<E>) -> Arc<C>) -> &mut Self
    where
        C: EventType + ?Sized,
    {
        self.casts.insert(
            TypeId::of::<C>(),
            Box::new(move |event| Box::new(cast(event)) as Payload),
        );
        self
    }

    pub(crate) fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor {
            identity: TypeIdentity::Exact(TypeId::of::<E>()),
            name: type_name::<E>(),
            satisfies: self.casts.keys().copied().collect(),
        }
    }

    /// Whether `C` has been provided.
    pub fn contains<C: ?Sized + 'static>(&self) -> bool {
        self.casts.contains_key(&TypeId::of::<C>())
    }

    /// View of `event` as the bound type `target`: the exact type itself or
    /// one of the provided capability sets.
    pub(crate) fn view(&self, target: TypeId, event: &Arc<E>) -> Option<Payload> {
        if target == TypeId::of::<E>() {
            return Some(Box::new(Arc::clone(event)));
        }
        self.casts.get(&target).map(|cast| cast(Arc::clone(event)))
    }
}

impl<E> fmt::Debug for Capabilities<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("event", &type_name::<E>())
            .field("provided", &self.casts.len())
            .finish()
    }
}

/// Declare capability-set trait objects usable as binding targets.
///
/// The traits must have `Send + Sync` as supertraits.
///
/// ```rust,ignore
/// pub trait Audited: Send + Sync {
///     fn actor(&self) -> &str;
/// }
/// typeroute_core::capability!(dyn Audited);
/// ```
#[macro_export]
macro_rules! capability {
    ($($capability:ty),+ $(,)?) => {
        $(
            impl $crate::EventType for $capability {
                fn descriptor() -> $crate::TypeDescriptor {
                    $crate::TypeDescriptor::capability::<$capability>()
                }
            }
        )+
    };
}

/// Implement [`Event`] for a type, declaring the capability sets it satisfies.
///
/// ```rust,ignore
/// impl_event!(UserCreated: dyn Audited, dyn Tenanted);
/// impl_event!(Heartbeat);
/// ```
#[macro_export]
macro_rules! impl_event {
    ($event:ty $(: $($capability:ty),+)?) => {
        impl $crate::Event for $event {
            fn capabilities(caps: &mut $crate::Capabilities<Self>) {
                let _ = &caps;
                $($(
                    caps.provide::<$capability>(
                        |event: ::std::sync::Arc<Self>| -> ::std::sync::Arc<$capability> { event },
                    );
                )+)?
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> String;
    }
    crate::capability!(dyn Named);

    trait Unused: Send + Sync {}
    crate::capability!(dyn Unused);

    #[derive(Debug)]
    struct Signup {
        user: String,
    }

    impl Named for Signup {
        fn name(&self) -> String {
            self.user.clone()
        }
    }

    crate::impl_event!(Signup: dyn Named);

    #[derive(Debug)]
    struct Tick;
    crate::impl_event!(Tick);

    #[test]
    fn test_exact_descriptor() {
        let descriptor = Signup::descriptor();
        assert_eq!(
            descriptor.identity(),
            TypeIdentity::Exact(TypeId::of::<Signup>())
        );
        assert!(descriptor.satisfies(TypeId::of::<dyn Named>()));
        assert!(descriptor.satisfies(TypeId::of::<dyn Event>()));
        assert!(!descriptor.satisfies(TypeId::of::<dyn Unused>()));
    }

    #[test]
    fn test_capability_descriptor() {
        let descriptor = <dyn Named as EventType>::descriptor();
        assert_eq!(
            descriptor.identity(),
            TypeIdentity::Capability(TypeId::of::<dyn Named>())
        );
        assert!(!descriptor.satisfies(TypeId::of::<dyn Event>()));
    }

    #[test]
    fn test_every_event_satisfies_dyn_event() {
        let caps = Capabilities::<Tick>::collect();
        assert!(caps.contains::<dyn Event>());
        assert!(!caps.contains::<dyn Named>());
    }

    #[test]
    fn test_view_casts_to_capability() {
        let caps = Capabilities::<Signup>::collect();
        let event = Arc::new(Signup {
            user: "ada".to_string(),
        });

        let view = caps.view(TypeId::of::<dyn Named>(), &event).unwrap();
        let named = view.downcast::<Arc<dyn Named>>().unwrap();
        assert_eq!(named.name(), "ada");

        let exact = caps.view(TypeId::of::<Signup>(), &event).unwrap();
        assert!(exact.downcast::<Arc<Signup>>().is_ok());

        assert!(caps.view(TypeId::of::<dyn Unused>(), &event).is_none());
    }
}
