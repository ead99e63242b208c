//! Lazy views over entities and components.
//!
//! Views never copy the world's contents. An [`EntityView`] walks the entity
//! slot array and tests each occupant as it advances; a [`ComponentView`]
//! walks one table's live list. Each call to a view accessor on
//! [`World`] starts a fresh, independently positioned view.
//!
//! ## Soundness
//!
//! Read-only views borrow the world shared; [`ComponentViewMut`] borrows it
//! exclusively. Structural changes (creating or destroying entities or
//! components) need `&mut World`, so they cannot happen while a view is
//! alive.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;

use crate::entity::{Entity, EntityId};
use crate::handle::{EntityHandle, Handle};
use crate::registry::{TypeIndex, TypeRegistry};
use crate::slot::Slot;
use crate::world::World;

// ---------------------------------------------------------------------------
// ComponentSet -- a combination of component types to filter by
// ---------------------------------------------------------------------------

/// A set of component types, written as a tuple: `(Position, Velocity)`.
///
/// `()` is the empty set and matches every entity.
pub trait ComponentSet {
    /// Indices of the member types, or `None` if some member has never been
    /// seen by `registry` (so no entity can have it).
    fn type_indices(registry: &TypeRegistry) -> Option<Vec<TypeIndex>>;
}

impl ComponentSet for () {
    fn type_indices(_registry: &TypeRegistry) -> Option<Vec<TypeIndex>> {
        Some(Vec::new())
    }
}

macro_rules! impl_component_set {
    ($($ty:ident),+) => {
        impl<$($ty: 'static),+> ComponentSet for ($($ty,)+) {
            fn type_indices(registry: &TypeRegistry) -> Option<Vec<TypeIndex>> {
                Some(vec![$(registry.lookup::<$ty>()?),+])
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);

// ---------------------------------------------------------------------------
// EntityView
// ---------------------------------------------------------------------------

/// Live entities having every type in `Q`, in slot order.
pub struct EntityView<'w, Q> {
    world: &'w World,
    /// `None` when some type in `Q` was never registered.
    types: Option<Vec<TypeIndex>>,
    cursor: usize,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: ComponentSet> EntityView<'w, Q> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            types: Q::type_indices(world.type_registry()),
            cursor: 0,
            _marker: PhantomData,
        }
    }
}

impl<'w, Q> Iterator for EntityView<'w, Q> {
    type Item = EntityRef<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        let types = self.types.as_deref()?;
        let slots = self.world.entity_slot_array();
        while self.cursor < slots.len() {
            let index = self.cursor;
            self.cursor += 1;
            let Some(slot) = slots.occupant(index) else {
                continue;
            };
            // SAFETY: occupied slots hold live entities, and the shared
            // borrow of the world keeps them so for `'w`.
            let entity: &'w Entity = unsafe { Slot::value_ptr(slot).as_ref() };
            if entity.has_all(types) {
                return Some(EntityRef {
                    world: self.world,
                    entity,
                    handle: EntityHandle::new(self.world.tag(), entity.id(), slot),
                });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.types {
            None => (0, Some(0)),
            Some(_) => {
                let remaining = self.world.entity_slot_array().len().saturating_sub(self.cursor);
                (0, Some(remaining))
            }
        }
    }
}

impl<Q> FusedIterator for EntityView<'_, Q> {}

/// An entity yielded by an [`EntityView`].
#[derive(Clone, Copy)]
pub struct EntityRef<'w> {
    world: &'w World,
    entity: &'w Entity,
    handle: EntityHandle,
}

impl<'w> EntityRef<'w> {
    /// Handle to this entity.
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    pub fn entity(&self) -> &'w Entity {
        self.entity
    }

    /// Whether a `T` is attached.
    pub fn has<T: 'static>(&self) -> bool {
        self.world
            .type_registry()
            .lookup::<T>()
            .is_some_and(|ty| self.entity.has_type(ty))
    }

    /// Handle to the attached `T`, or an invalid handle.
    pub fn component<T: 'static>(&self) -> Handle<T> {
        self.world.component::<T>(self.handle)
    }

    /// The attached `T`, if present and still valid.
    pub fn get<T: 'static>(&self) -> Option<&'w T> {
        self.component::<T>().get(self.world)
    }
}

impl std::fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityRef").field(&self.entity.id()).finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentView
// ---------------------------------------------------------------------------

/// Every live `T` with its handle, in table order.
///
/// Table order is not insertion order once components have been destroyed.
pub struct ComponentView<'w, T> {
    world: &'w World,
    live: slice::Iter<'w, NonNull<u8>>,
    _marker: PhantomData<&'w T>,
}

impl<'w, T: 'static> ComponentView<'w, T> {
    pub(crate) fn new(world: &'w World) -> Self {
        let live = world
            .component_table::<T>()
            .map_or(&[][..], |table| table.live());
        Self {
            world,
            live: live.iter(),
            _marker: PhantomData,
        }
    }
}

impl<'w, T: 'static> Iterator for ComponentView<'w, T> {
    type Item = (Handle<T>, &'w T);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.live.next()?.cast::<Slot<T>>();
        // SAFETY: live-list entries are live slots of `T`'s table, kept so
        // by the shared borrow of the world.
        let (id, value) = unsafe { (Slot::id_of(slot), Slot::value_ptr(slot).as_ref()) };
        Some((Handle::new(self.world.tag(), id, slot), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.live.size_hint()
    }
}

impl<T: 'static> ExactSizeIterator for ComponentView<'_, T> {}
impl<T: 'static> FusedIterator for ComponentView<'_, T> {}

// ---------------------------------------------------------------------------
// ComponentViewMut
// ---------------------------------------------------------------------------

/// Every live `T`, mutably, in table order.
pub struct ComponentViewMut<'w, T> {
    live: slice::Iter<'w, NonNull<u8>>,
    _marker: PhantomData<&'w mut T>,
}

impl<'w, T: 'static> ComponentViewMut<'w, T> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        let world: &'w World = world;
        let live = world
            .component_table::<T>()
            .map_or(&[][..], |table| table.live());
        Self {
            live: live.iter(),
            _marker: PhantomData,
        }
    }
}

impl<'w, T: 'static> Iterator for ComponentViewMut<'w, T> {
    type Item = &'w mut T;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.live.next()?.cast::<Slot<T>>();
        // SAFETY: the world is exclusively borrowed for `'w` and every
        // live-list entry is a distinct live slot, so each value is handed
        // out once.
        Some(unsafe { Slot::value_ptr(slot).as_mut() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.live.size_hint()
    }
}

impl<T: 'static> ExactSizeIterator for ComponentViewMut<'_, T> {}
impl<T: 'static> FusedIterator for ComponentViewMut<'_, T> {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
