//! Generational handles.
//!
//! A [`Handle<T>`] names one construction of one slot: it carries the slot's
//! location and the identifier the slot held when the handle was issued.
//! Validity is never tracked centrally; it is re-derived on every access by
//! comparing the carried identifier with the one currently stored at the
//! location. Destroying the value resets the stored identifier, and reusing
//! the address stores a fresh, larger one, so a handle that has gone invalid
//! never becomes valid again.
//!
//! ## Soundness
//!
//! Reading the identifier dereferences the slot location, which is only
//! sound while the owning pool is alive. Every accessor therefore takes the
//! owning [`World`]: a world releases pool memory only when it is dropped, so
//! a live borrow proves the location is still mapped. Each handle also
//! records the tag of the world that issued it; a handle presented to a
//! different world is reported invalid without touching memory.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::entity::{Entity, EntityId};
use crate::slot::{Slot, INVALID_ID};
use crate::world::{World, WorldTag};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A test-and-fetch reference to a pooled value of type `T`.
pub struct Handle<T> {
    id: u64,
    slot: Option<NonNull<Slot<T>>>,
    world: WorldTag,
    _marker: PhantomData<*const T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(world: WorldTag, id: u64, slot: NonNull<Slot<T>>) -> Self {
        Self {
            id,
            slot: Some(slot),
            world,
            _marker: PhantomData,
        }
    }

    /// A handle that refers to nothing and is never valid.
    pub fn invalid() -> Self {
        Self {
            id: INVALID_ID,
            slot: None,
            world: WorldTag::NONE,
            _marker: PhantomData,
        }
    }

    /// The identifier captured when the handle was issued.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this handle was never issued for a value (for example the
    /// result of a rejected `add_component`). A non-null handle may still
    /// be invalid.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.slot.is_none()
    }

    /// Whether the referenced value is still the one this handle was issued
    /// for.
    pub fn is_valid(&self, world: &World) -> bool {
        self.live_slot(world).is_some()
    }

    /// Borrow the referenced value if the handle is still valid.
    pub fn get<'w>(&self, world: &'w World) -> Option<&'w T> {
        let slot = self.live_slot(world)?;
        // SAFETY: the slot is live and the shared borrow of `world` keeps
        // every mutable path to it closed for `'w`.
        Some(unsafe { Slot::value_ptr(slot).as_ref() })
    }

    /// Mutably borrow the referenced value if the handle is still valid.
    pub fn get_mut<'w>(&self, world: &'w mut World) -> Option<&'w mut T> {
        let slot = self.live_slot(world)?;
        // SAFETY: the slot is live and `world` is exclusively borrowed for
        // `'w`, so this is the only reference into it.
        Some(unsafe { Slot::value_ptr(slot).as_mut() })
    }

    /// Like [`get`](Self::get), but reports which type could not be reached.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidHandle`] naming `T` if the handle is not
    /// valid for `world`.
    pub fn try_get<'w>(&self, world: &'w World) -> Result<&'w T, EcsError> {
        self.get(world).ok_or_else(Self::invalid_error)
    }

    /// Like [`get_mut`](Self::get_mut), but reports which type could not be
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidHandle`] naming `T` if the handle is not
    /// valid for `world`.
    pub fn try_get_mut<'w>(&self, world: &'w mut World) -> Result<&'w mut T, EcsError> {
        self.get_mut(world).ok_or_else(Self::invalid_error)
    }

    /// The slot location, if it still holds the value this handle names.
    pub(crate) fn live_slot(&self, world: &World) -> Option<NonNull<Slot<T>>> {
        if self.id == INVALID_ID || self.world != world.tag() {
            return None;
        }
        let slot = self.slot?;
        // SAFETY: the handle was issued by `world` (matching tag) and points
        // into one of its pools, which stay allocated until `world` drops.
        (unsafe { Slot::id_of(slot) } == self.id).then_some(slot)
    }

    #[cfg(test)]
    pub(crate) fn raw_slot(&self) -> Option<NonNull<Slot<T>>> {
        self.slot
    }

    fn invalid_error() -> EcsError {
        EcsError::InvalidHandle {
            type_name: std::any::type_name::<T>(),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityHandle
// ---------------------------------------------------------------------------

/// Handle to an entity.
///
/// Entities are read-only from outside the world: their component links
/// point into the world's own tables, so there is no way to borrow one
/// mutably.
///
/// ```compile_fail
/// use tessera_ecs::prelude::*;
///
/// let mut world = World::new();
/// let entity = world.create_entity();
/// let _ = entity.get_mut(&mut world);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EntityHandle(Handle<Entity>);

impl EntityHandle {
    pub(crate) fn new(world: WorldTag, id: EntityId, slot: NonNull<Slot<Entity>>) -> Self {
        Self(Handle::new(world, id.to_raw(), slot))
    }

    /// A handle that refers to no entity and is never valid.
    pub fn invalid() -> Self {
        Self(Handle::invalid())
    }

    /// The entity id this handle was issued for.
    #[inline]
    pub fn entity_id(&self) -> EntityId {
        EntityId::from_raw(self.0.id)
    }

    /// Whether this handle was never issued for an entity.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Whether the entity is still alive in `world`.
    pub fn is_valid(&self, world: &World) -> bool {
        self.0.is_valid(world)
    }

    /// Borrow the entity if it is still alive.
    pub fn get<'w>(&self, world: &'w World) -> Option<&'w Entity> {
        self.0.get(world)
    }

    /// Like [`get`](Self::get), but reports the failure as an error.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidHandle`] if the entity is not alive in
    /// `world`.
    pub fn try_get<'w>(&self, world: &'w World) -> Result<&'w Entity, EcsError> {
        self.0.try_get(world)
    }

    pub(crate) fn live_slot(&self, world: &World) -> Option<NonNull<Slot<Entity>>> {
        self.0.live_slot(world)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.slot {
            None => f.write_str("EntityHandle(null)"),
            Some(_) => write!(f, "EntityHandle({:?})", self.entity_id()),
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.slot == other.slot && self.world == other.world
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.slot.hash(state);
        self.world.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = crate::registry::short_type_name::<T>();
        match self.slot {
            None => write!(f, "Handle<{name}>(null)"),
            Some(slot) => write!(f, "Handle<{name}>(#{} @ {:p})", self.id, slot.as_ptr()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Health(u32);

    #[test]
    fn default_handle_is_invalid() {
        let world = World::new();
        let h: Handle<Health> = Handle::default();
        assert!(h.is_null());
        assert!(!h.is_valid(&world));
        assert!(h.get(&world).is_none());
    }

    #[test]
    fn try_get_names_the_type() {
        let world = World::new();
        let h: Handle<Health> = Handle::invalid();
        let err = h.try_get(&world).unwrap_err();
        match err {
            EcsError::InvalidHandle { type_name } => assert!(type_name.ends_with("Health")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn get_mut_round_trip() {
        let mut world = World::new();
        let h = world.create_component(Health(10));
        h.get_mut(&mut world).unwrap().0 = 42;
        assert_eq!(h.get(&world), Some(&Health(42)));
        *h.try_get_mut(&mut world).unwrap() = Health(7);
        assert_eq!(h.try_get(&world).unwrap(), &Health(7));
    }

    #[test]
    fn handle_from_other_world_is_invalid() {
        let mut a = World::new();
        let b = World::new();
        let h = a.create_component(Health(1));
        assert!(h.is_valid(&a));
        assert!(!h.is_valid(&b));
        assert!(h.get(&b).is_none());
    }

    #[test]
    fn invalid_after_destroy_and_reuse() {
        let mut world = World::new();
        let first = world.create_component(Health(1));
        assert!(world.destroy_component(first));
        assert!(!first.is_valid(&world));

        let second = world.create_component(Health(2));
        assert_eq!(second.raw_slot(), first.raw_slot(), "same address reused");
        assert!(second.id() > first.id());
        assert!(!first.is_valid(&world), "reused address must not revive old handle");
        assert_eq!(second.get(&world), Some(&Health(2)));
    }

    #[test]
    fn entity_handle_reads_but_goes_stale() {
        let mut world = World::new();
        let e = world.create_entity();
        assert_eq!(e.get(&world).map(Entity::id), Some(e.entity_id()));
        assert!(e.try_get(&world).is_ok());

        world.destroy_entity(e);
        assert!(!e.is_null());
        assert!(e.get(&world).is_none());
        let err = e.try_get(&world).unwrap_err();
        assert!(err.to_string().contains("Entity"), "got: {err}");
        assert_eq!(format!("{:?}", EntityHandle::invalid()), "EntityHandle(null)");
    }

    #[test]
    fn copies_compare_equal() {
        let mut world = World::new();
        let h = world.create_component(Health(3));
        let copy = h;
        assert_eq!(h, copy);
        assert_ne!(h, Handle::invalid());
    }
}
