//! Entity identifiers, entities, and the entity slot array.
//!
//! An [`EntityId`] is a 64-bit value that packs a *generation* counter in the
//! high 32 bits and a slot *index* in the low 32 bits. The generation of a
//! slot is bumped every time its entity is destroyed, so ids of destroyed
//! entities never match the slot again.
//!
//! An [`Entity`] records which components it currently references, keyed by
//! [`TypeIndex`]. It does not own component memory; the component tables do.
//! A shared component may be destroyed through another holder, so every
//! lookup checks that the linked slot still holds the same construction and
//! treats a stale link as absent.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::ptr::NonNull;

use crate::registry::TypeIndex;
use crate::slot::Slot;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity identifier.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// ComponentLink
// ---------------------------------------------------------------------------

/// Where an entity's component lives, plus the slot identifier it had when
/// it was attached. A link whose identifier no longer matches the slot
/// refers to a component that has since been destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ComponentLink {
    pub slot: NonNull<u8>,
    pub id: u64,
}

impl ComponentLink {
    /// Whether the slot still holds the component this link was made for.
    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        // SAFETY: links point into component pools of the world that owns
        // the entity, and those pools outlive every entity in it.
        unsafe { Slot::<()>::id_at(self.slot) == self.id }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An entity: its id plus a type-indexed map of the components it
/// references.
///
/// The map is a vector sorted by [`TypeIndex`]; entities typically hold a
/// handful of components, where a binary search beats hashing.
pub struct Entity {
    id: EntityId,
    /// Invariant: sorted by `TypeIndex`, no duplicate keys.
    components: Vec<(TypeIndex, ComponentLink)>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, capacity: usize) -> Self {
        Self {
            id,
            components: Vec::with_capacity(capacity),
        }
    }

    /// This entity's id.
    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Number of components currently attached.
    pub fn component_count(&self) -> usize {
        self.components.iter().filter(|(_, link)| link.is_live()).count()
    }

    /// Whether a component of the given type is attached.
    #[inline]
    pub fn has_type(&self, ty: TypeIndex) -> bool {
        self.link(ty).is_some()
    }

    /// Whether components of every given type are attached.
    pub fn has_all(&self, types: &[TypeIndex]) -> bool {
        types.iter().all(|&ty| self.has_type(ty))
    }

    /// The attached component types, in ascending index order.
    pub fn component_types(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.components
            .iter()
            .filter(|(_, link)| link.is_live())
            .map(|(ty, _)| *ty)
    }

    #[inline]
    fn position(&self, ty: TypeIndex) -> Result<usize, usize> {
        self.components.binary_search_by_key(&ty, |(t, _)| *t)
    }

    /// The live link for `ty`, if any.
    pub(crate) fn link(&self, ty: TypeIndex) -> Option<ComponentLink> {
        let idx = self.position(ty).ok()?;
        let link = self.components[idx].1;
        link.is_live().then_some(link)
    }

    /// Record `link` under `ty`, replacing a stale link. Returns `false` if
    /// a live component of `ty` is already attached.
    pub(crate) fn attach(&mut self, ty: TypeIndex, link: ComponentLink) -> bool {
        match self.position(ty) {
            Ok(idx) if self.components[idx].1.is_live() => false,
            Ok(idx) => {
                self.components[idx].1 = link;
                true
            }
            Err(idx) => {
                self.components.insert(idx, (ty, link));
                true
            }
        }
    }

    /// Forget the component of type `ty`, returning its link if it was
    /// still live.
    pub(crate) fn detach(&mut self, ty: TypeIndex) -> Option<ComponentLink> {
        let idx = self.position(ty).ok()?;
        let (_, link) = self.components.remove(idx);
        link.is_live().then_some(link)
    }

    /// Forget every component, returning the links.
    pub(crate) fn take_links(&mut self) -> Vec<(TypeIndex, ComponentLink)> {
        std::mem::take(&mut self.components)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("component_count", &self.components.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EntitySlots
// ---------------------------------------------------------------------------

/// The world's entity slot array: index -> (generation, occupant).
///
/// New entities take the lowest free index, so the array stays dense at the
/// front. The generation of a slot is bumped when its entity is released,
/// not when one is created.
#[derive(Debug, Default)]
pub(crate) struct EntitySlots {
    /// Current generation for each index.
    generations: Vec<u32>,
    /// The entity occupying each index, if any.
    occupants: Vec<Option<NonNull<Slot<Entity>>>>,
    /// Vacant indices, smallest first.
    free: BinaryHeap<Reverse<u32>>,
    /// Number of occupied indices.
    alive: usize,
}

impl EntitySlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the lowest vacant index, growing the array if none is free.
    /// The returned id carries the slot's current generation.
    pub fn claim(&mut self) -> EntityId {
        let index = match self.free.pop() {
            Some(Reverse(index)) => index,
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(0);
                self.occupants.push(None);
                index
            }
        };
        EntityId::new(index, self.generations[index as usize])
    }

    /// Store the entity created for a previously claimed id.
    pub fn occupy(&mut self, id: EntityId, slot: NonNull<Slot<Entity>>) {
        let idx = id.index() as usize;
        debug_assert!(self.occupants[idx].is_none(), "slot already occupied");
        debug_assert_eq!(self.generations[idx], id.generation());
        self.occupants[idx] = Some(slot);
        self.alive += 1;
    }

    /// Vacate the slot named by `id`, bumping its generation.
    ///
    /// Returns the entity that occupied it, or `None` if `id` is stale.
    pub fn release(&mut self, id: EntityId) -> Option<NonNull<Slot<Entity>>> {
        let idx = id.index() as usize;
        if self.generations.get(idx) != Some(&id.generation()) {
            return None;
        }
        let slot = self.occupants[idx].take()?;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free.push(Reverse(id.index()));
        self.alive -= 1;
        Some(slot)
    }

    /// The entity currently occupying the slot named by `id`.
    pub fn get(&self, id: EntityId) -> Option<NonNull<Slot<Entity>>> {
        let idx = id.index() as usize;
        if self.generations.get(idx) != Some(&id.generation()) {
            return None;
        }
        self.occupants[idx]
    }

    /// Occupant of `index`, regardless of generation.
    #[inline]
    pub fn occupant(&self, index: usize) -> Option<NonNull<Slot<Entity>>> {
        self.occupants.get(index).copied().flatten()
    }

    /// Length of the slot array, vacant slots included.
    #[inline]
    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    /// Number of live entities.
    #[inline]
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Every occupied slot, in index order.
    pub fn occupied(&self) -> impl Iterator<Item = NonNull<Slot<Entity>>> + '_ {
        self.occupants.iter().filter_map(|o| *o)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PiecePool;
    use std::alloc::Layout;

    fn fake_slot(n: usize) -> NonNull<Slot<Entity>> {
        // Never dereferenced by EntitySlots.
        NonNull::new((n * 64 + 64) as *mut Slot<Entity>).unwrap()
    }

    /// Slots for links to point at; entities read their identifiers.
    fn slots(n: usize) -> (PiecePool, Vec<NonNull<Slot<u32>>>) {
        let mut pool = PiecePool::for_layout(Layout::new::<Slot<u32>>(), 256).unwrap();
        let slots = (0..n)
            .map(|i| unsafe { pool.create(Slot::new(i as u64, i as u32)) })
            .collect();
        (pool, slots)
    }

    fn link(slots: &[NonNull<Slot<u32>>], n: usize) -> ComponentLink {
        ComponentLink {
            slot: slots[n].cast(),
            id: n as u64,
        }
    }

    #[test]
    fn entity_id_roundtrip() {
        let id = EntityId::new(42, 7);
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 7);
        assert_eq!(id.to_raw(), (7u64 << 32) | 42);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
        assert_eq!(id.to_string(), "42v7");
    }

    #[test]
    fn claims_are_unique_and_dense() {
        let mut slots = EntitySlots::new();
        for i in 0..100u32 {
            let id = slots.claim();
            assert_eq!(id.index(), i);
            assert_eq!(id.generation(), 0);
            slots.occupy(id, fake_slot(i as usize));
        }
        assert_eq!(slots.len(), 100);
        assert_eq!(slots.alive_count(), 100);
    }

    #[test]
    fn lowest_free_index_is_reused_with_next_generation() {
        let mut slots = EntitySlots::new();
        let ids: Vec<EntityId> = (0..5)
            .map(|i| {
                let id = slots.claim();
                slots.occupy(id, fake_slot(i));
                id
            })
            .collect();

        assert!(slots.release(ids[3]).is_some());
        assert!(slots.release(ids[1]).is_some());

        let reused = slots.claim();
        assert_eq!(reused.index(), 1);
        assert_eq!(reused.generation(), 1);
        slots.occupy(reused, fake_slot(9));

        let next = slots.claim();
        assert_eq!(next.index(), 3);
        assert_eq!(slots.len(), 5);
    }

    #[test]
    fn stale_release_and_lookup_fail() {
        let mut slots = EntitySlots::new();
        let id = slots.claim();
        slots.occupy(id, fake_slot(0));
        assert_eq!(slots.get(id), Some(fake_slot(0)));
        assert!(slots.release(id).is_some());
        assert!(slots.release(id).is_none(), "double release must fail");
        assert!(slots.get(id).is_none());

        let again = slots.claim();
        slots.occupy(again, fake_slot(1));
        assert!(slots.get(id).is_none(), "old id must not see the new occupant");
        assert_eq!(slots.get(again), Some(fake_slot(1)));
        assert_eq!(slots.occupied().count(), 1);
    }

    #[test]
    fn entity_map_stays_sorted() {
        let (_pool, backing) = slots(4);
        let mut e = Entity::new(EntityId::new(0, 0), 4);
        assert!(e.attach(TypeIndex(5), link(&backing, 0)));
        assert!(e.attach(TypeIndex(1), link(&backing, 1)));
        assert!(e.attach(TypeIndex(3), link(&backing, 2)));
        assert!(!e.attach(TypeIndex(3), link(&backing, 3)), "duplicate type rejected");

        let order: Vec<u32> = e.component_types().map(|t| t.to_raw()).collect();
        assert_eq!(order, vec![1, 3, 5]);
        assert_eq!(e.link(TypeIndex(3)), Some(link(&backing, 2)));
        assert!(e.has_all(&[TypeIndex(1), TypeIndex(5)]));
        assert!(!e.has_all(&[TypeIndex(1), TypeIndex(2)]));

        assert_eq!(e.detach(TypeIndex(1)), Some(link(&backing, 1)));
        assert_eq!(e.detach(TypeIndex(1)), None);
        assert_eq!(e.component_count(), 2);

        let links = e.take_links();
        assert_eq!(links.len(), 2);
        assert_eq!(e.component_count(), 0);
    }

    #[test]
    fn stale_links_read_as_absent_and_are_replaced() {
        let (_pool, backing) = slots(2);
        let mut e = Entity::new(EntityId::new(0, 0), 2);
        let shared = link(&backing, 0);
        assert!(e.attach(TypeIndex(2), shared));

        // Destroyed through another holder.
        unsafe { Slot::vacate(backing[0]) };
        assert!(!e.has_type(TypeIndex(2)));
        assert_eq!(e.link(TypeIndex(2)), None);
        assert_eq!(e.component_count(), 0);
        assert_eq!(e.component_types().count(), 0);

        let fresh = link(&backing, 1);
        assert!(e.attach(TypeIndex(2), fresh), "stale link is replaced");
        assert_eq!(e.link(TypeIndex(2)), Some(fresh));
        assert_eq!(e.component_count(), 1);

        unsafe { Slot::vacate(backing[1]) };
        assert_eq!(e.detach(TypeIndex(2)), None, "stale link detaches as absent");
        assert_eq!(e.take_links().len(), 0);
    }
}
