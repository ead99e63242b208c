//! Per-type component tables.
//!
//! A [`ComponentTable`] owns every instance of one component type: a
//! [`PiecePool`] sized for `Slot<T>`, the list of currently live slot
//! locations, and the creation counter that stamps each new slot. The table
//! itself is not generic; the only type-specific behaviour it needs (drop a
//! value, read an identifier) is captured in a [`SlotVtable`] when the table
//! is created, so the world can keep tables of unrelated types in one map.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::ptr::NonNull;

use tracing::debug;

use crate::pool::PiecePool;
use crate::registry::TypeIndex;
use crate::slot::Slot;
use crate::EcsError;

// ---------------------------------------------------------------------------
// SlotVtable -- type-erased operations on Slot<T>
// ---------------------------------------------------------------------------

/// Function pointers for the operations a table performs on its slots
/// without knowing their concrete type.
#[derive(Clone, Copy)]
pub(crate) struct SlotVtable {
    /// Drop the value in a live slot and mark the slot vacant.
    pub(crate) vacate: unsafe fn(NonNull<u8>),
    /// Read the identifier stored at a slot.
    pub(crate) slot_id: unsafe fn(NonNull<u8>) -> u64,
    /// Layout of `Slot<T>`.
    pub(crate) layout: Layout,
}

impl SlotVtable {
    /// Create a vtable for slots holding `T`.
    pub(crate) fn of<T: 'static>() -> Self {
        unsafe fn vacate_impl<T>(ptr: NonNull<u8>) {
            Slot::<T>::vacate(ptr.cast());
        }

        unsafe fn slot_id_impl<T>(ptr: NonNull<u8>) -> u64 {
            Slot::<T>::id_of(ptr.cast())
        }

        Self {
            vacate: vacate_impl::<T>,
            slot_id: slot_id_impl::<T>,
            layout: Layout::new::<Slot<T>>(),
        }
    }
}

impl fmt::Debug for SlotVtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotVtable")
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentTable
// ---------------------------------------------------------------------------

/// Storage for every instance of one component type.
pub struct ComponentTable {
    type_index: TypeIndex,
    type_name: &'static str,
    type_id: TypeId,
    pool: PiecePool,
    /// Locations of live slots. Order is not stable across removals.
    live: Vec<NonNull<u8>>,
    /// Identifier for the next slot. Only ever increases.
    next_id: u64,
    vtable: SlotVtable,
}

impl ComponentTable {
    /// Create a table for `T` whose pool blocks hold about `block_bytes`
    /// bytes of slots.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidPoolLayout`] if `block_bytes` cannot be
    /// laid out as a single block.
    pub(crate) fn new<T: 'static>(type_index: TypeIndex, block_bytes: usize) -> Result<Self, EcsError> {
        let vtable = SlotVtable::of::<T>();
        let pool = PiecePool::for_layout(vtable.layout, block_bytes)?;
        let type_name = std::any::type_name::<T>();
        debug!(
            component = type_name,
            piece_size = pool.piece_size(),
            pieces_per_block = pool.pieces_per_block(),
            "component table created"
        );
        Ok(Self {
            type_index,
            type_name,
            type_id: TypeId::of::<T>(),
            pool,
            live: Vec::new(),
            next_id: 0,
            vtable,
        })
    }

    /// Move `value` into a fresh slot, returning its location and identifier.
    pub(crate) fn create<T: 'static>(&mut self, value: T) -> (NonNull<Slot<T>>, u64) {
        debug_assert!(
            self.stores::<T>(),
            "table for {} asked to store {}",
            self.type_name,
            std::any::type_name::<T>()
        );
        let id = self.next_id;
        self.next_id += 1;
        // SAFETY: the pool was laid out for `Slot<T>` in `new`.
        let slot = unsafe { self.pool.create(Slot::new(id, value)) };
        self.live.push(slot.cast());
        (slot, id)
    }

    /// Destroy the slot at `location` if it is live and still holds `id`.
    ///
    /// Returns `false` for locations this table does not hold live and for
    /// slots that have since been reused, so each construction is destroyed
    /// at most once.
    pub(crate) fn destroy(&mut self, location: NonNull<u8>, id: u64) -> bool {
        let Some(pos) = self.live.iter().position(|&p| p == location) else {
            return false;
        };
        // SAFETY: every location in `live` is a live slot of this table.
        if unsafe { (self.vtable.slot_id)(location) } != id {
            return false;
        }
        self.live.swap_remove(pos);
        // SAFETY: the slot is live, came from `self.pool`, and has just been
        // removed from `live`, so nothing else will vacate or free it.
        unsafe {
            (self.vtable.vacate)(location);
            self.pool.free(location);
        }
        true
    }

    /// Index of the stored type.
    #[inline]
    pub fn type_index(&self) -> TypeIndex {
        self.type_index
    }

    /// Full name of the stored type.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Number of live components.
    #[inline]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no component of this type is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// The backing pool, for capacity diagnostics.
    #[inline]
    pub fn pool(&self) -> &PiecePool {
        &self.pool
    }

    /// Identifier the next created component will receive.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Live slot locations, in table order.
    #[inline]
    pub(crate) fn live(&self) -> &[NonNull<u8>] {
        &self.live
    }

    /// Whether this table stores `T`.
    #[inline]
    pub(crate) fn stores<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl Drop for ComponentTable {
    fn drop(&mut self) {
        for location in self.live.drain(..) {
            // SAFETY: every location in `live` is a live slot of this table;
            // the pool releases the memory itself when it drops next.
            unsafe { (self.vtable.vacate)(location) };
        }
    }
}

impl fmt::Debug for ComponentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentTable")
            .field("type_index", &self.type_index)
            .field("type_name", &self.type_name)
            .field("len", &self.live.len())
            .field("next_id", &self.next_id)
            .field("pool", &self.pool)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::INVALID_ID;
    use std::rc::Rc;

    fn table<T: 'static>() -> ComponentTable {
        ComponentTable::new::<T>(TypeIndex(0), 256).unwrap()
    }

    #[test]
    fn create_stamps_increasing_ids() {
        let mut t = table::<u32>();
        let ids: Vec<u64> = (0..10).map(|i| t.create(i as u32).1).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(t.len(), 10);
        assert_eq!(t.next_id(), 10);
    }

    #[test]
    fn destroy_swap_removes_and_invalidates() {
        let mut t = table::<String>();
        let (a, a_id) = t.create(String::from("a"));
        let (_b, _) = t.create(String::from("b"));
        let (c, _) = t.create(String::from("c"));

        assert!(t.destroy(a.cast(), a_id));
        assert_eq!(t.len(), 2);
        assert_eq!(t.live()[0], c.cast::<u8>(), "last element moved into the gap");
        assert_eq!(unsafe { Slot::id_of(a) }, INVALID_ID);
    }

    #[test]
    fn destroy_is_idempotent_and_checks_id() {
        let mut t = table::<u64>();
        let (a, a_id) = t.create(1u64);
        assert!(t.destroy(a.cast(), a_id));
        assert!(!t.destroy(a.cast(), a_id), "second destroy is a no-op");

        let (b, b_id) = t.create(2u64);
        assert_eq!(b.cast::<u8>(), a.cast::<u8>(), "freed piece is reused");
        assert!(!t.destroy(b.cast(), a_id), "stale id must not destroy the new occupant");
        assert_eq!(t.len(), 1);
        assert!(t.destroy(b.cast(), b_id));
    }

    #[test]
    fn drop_runs_remaining_destructors() {
        let marker = Rc::new(());
        {
            let mut t = table::<Rc<()>>();
            for _ in 0..50 {
                t.create(Rc::clone(&marker));
            }
            assert_eq!(Rc::strong_count(&marker), 51);
            assert!(t.pool().block_count() > 1);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn oversized_block_is_rejected() {
        let err = ComponentTable::new::<u8>(TypeIndex(0), usize::MAX).unwrap_err();
        assert!(matches!(err, EcsError::InvalidPoolLayout { .. }));
    }

    #[test]
    fn vtable_matches_slot_layout() {
        let vt = SlotVtable::of::<[u8; 40]>();
        assert_eq!(vt.layout, Layout::new::<Slot<[u8; 40]>>());
        let t = table::<[u8; 40]>();
        assert!(t.stores::<[u8; 40]>());
        assert!(!t.stores::<u8>());
    }
}
