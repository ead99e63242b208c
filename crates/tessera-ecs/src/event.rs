//! Typed events and subscriber registration.
//!
//! Any `'static` type can be an event. Subscribers implement
//! [`Subscriber<E>`] for each event type they care about and are registered
//! with [`World::subscribe`](crate::world::World::subscribe). The world only
//! keeps a [`Weak`] reference: dropping the last `Rc` to a subscriber
//! unregisters it implicitly, and the dead entry is pruned on the next
//! emission of that event type.
//!
//! Delivery is synchronous. A subscriber receives a shared borrow of the
//! world, so it can read components but cannot emit, subscribe, or mutate
//! structure from inside a callback.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::handle::{EntityHandle, Handle};
use crate::registry::TypeIndex;
use crate::world::World;

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Receives events of type `E`.
pub trait Subscriber<E> {
    /// Called once per emitted event.
    fn receive(&mut self, world: &World, event: &E);
}

// ---------------------------------------------------------------------------
// Built-in events
// ---------------------------------------------------------------------------

/// Emitted after an entity has been created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityCreated {
    pub entity: EntityHandle,
}

/// Emitted before an entity is destroyed. The entity and its components are
/// still valid while subscribers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDestroyed {
    pub entity: EntityHandle,
}

/// Emitted after a component of type `T` has been added to an entity.
pub struct ComponentCreated<T> {
    pub entity: EntityHandle,
    pub component: Handle<T>,
}

/// Emitted before a component of type `T` is removed from an entity and
/// destroyed. The component is still valid while subscribers run.
pub struct ComponentDestroyed<T> {
    pub entity: EntityHandle,
    pub component: Handle<T>,
}

macro_rules! impl_component_event {
    ($name:ident) => {
        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.entity == other.entity && self.component == other.component
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("entity", &self.entity)
                    .field("component", &self.component)
                    .finish()
            }
        }
    };
}

impl_component_event!(ComponentCreated);
impl_component_event!(ComponentDestroyed);

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub(crate) type SubscriberRef<E> = Weak<RefCell<dyn Subscriber<E>>>;

/// Per-event-type subscriber lists, keyed by the event's [`TypeIndex`].
///
/// Each value is a `Vec<SubscriberRef<E>>` for the matching `E`, stored
/// behind `dyn Any` so lists of unrelated event types share one map.
#[derive(Default)]
pub(crate) struct EventBus {
    lists: HashMap<TypeIndex, Box<dyn Any>>,
}

/// Address of the subscriber inside its `Rc` allocation, used as identity.
fn address<S: ?Sized>(ptr: *const RefCell<S>) -> *const u8 {
    ptr.cast::<u8>()
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for `E`. Returns `false` if it already is.
    pub fn subscribe<E: 'static>(
        &mut self,
        index: TypeIndex,
        subscriber: Rc<RefCell<dyn Subscriber<E>>>,
    ) -> bool {
        let target = address(Rc::as_ptr(&subscriber));
        let list = self.list_mut::<E>(index);
        if list.iter().any(|w| address(w.as_ptr()) == target) {
            return false;
        }
        list.push(Rc::downgrade(&subscriber));
        true
    }

    /// Remove the subscriber at `target`. Returns `false` if it was not
    /// registered for `E`.
    pub fn unsubscribe<E: 'static>(&mut self, index: TypeIndex, target: *const u8) -> bool {
        let Some(list) = self.list_mut_existing::<E>(index) else {
            return false;
        };
        let before = list.len();
        list.retain(|w| address(w.as_ptr()) != target);
        list.len() != before
    }

    /// The registered subscribers of `E`, dead ones included.
    pub fn list<E: 'static>(&self, index: TypeIndex) -> Option<&[SubscriberRef<E>]> {
        self.lists
            .get(&index)
            .and_then(|any| any.downcast_ref::<Vec<SubscriberRef<E>>>())
            .map(Vec::as_slice)
    }

    /// Drop entries whose subscriber no longer exists. Returns how many
    /// were removed.
    pub fn prune<E: 'static>(&mut self, index: TypeIndex) -> usize {
        let Some(list) = self.list_mut_existing::<E>(index) else {
            return 0;
        };
        let before = list.len();
        list.retain(|w| w.strong_count() > 0);
        before - list.len()
    }

    /// Number of live subscribers of `E`.
    pub fn count<E: 'static>(&self, index: TypeIndex) -> usize {
        self.list::<E>(index)
            .map_or(0, |list| list.iter().filter(|w| w.strong_count() > 0).count())
    }

    fn list_mut<E: 'static>(&mut self, index: TypeIndex) -> &mut Vec<SubscriberRef<E>> {
        self.lists
            .entry(index)
            .or_insert_with(|| Box::new(Vec::<SubscriberRef<E>>::new()))
            .downcast_mut::<Vec<SubscriberRef<E>>>()
            .unwrap_or_else(|| unreachable!("subscriber list stored under a foreign type index"))
    }

    fn list_mut_existing<E: 'static>(&mut self, index: TypeIndex) -> Option<&mut Vec<SubscriberRef<E>>> {
        self.lists
            .get_mut(&index)
            .and_then(|any| any.downcast_mut::<Vec<SubscriberRef<E>>>())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.lists.len())
            .finish()
    }
}

/// Identity of a subscriber for [`EventBus::unsubscribe`].
pub(crate) fn subscriber_address<S>(subscriber: &Rc<RefCell<S>>) -> *const u8 {
    address(Rc::as_ptr(subscriber))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
