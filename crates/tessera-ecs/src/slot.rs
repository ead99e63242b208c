//! Generational slot wrapper.
//!
//! Every value stored in a pool lives inside a [`Slot`], which pairs the
//! value with a `u64` identifier. The identifier is assigned from a counter
//! that only ever increases, and is reset to [`INVALID_ID`] when the value is
//! dropped. Handles remember the identifier they were issued with and compare
//! it with the one currently stored at the slot's address, so a recycled
//! address never satisfies an old handle.
//!
//! The first machine word of a slot is reserved for the pool's free-list
//! link. Keeping the identifier out of that word means it stays readable
//! while the piece sits on the free list.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

/// Identifier stored in a slot whose value has been dropped.
pub const INVALID_ID: u64 = u64::MAX;

/// A pooled value plus its generational identifier.
#[repr(C)]
pub struct Slot<T> {
    /// Overwritten by the pool's free list while the slot is vacant.
    link: MaybeUninit<*mut u8>,
    id: u64,
    value: MaybeUninit<T>,
}

impl<T> Slot<T> {
    /// Wrap `value` under identifier `id`.
    pub(crate) fn new(id: u64, value: T) -> Self {
        debug_assert_ne!(id, INVALID_ID, "the sentinel cannot name a live slot");
        Self {
            link: MaybeUninit::uninit(),
            id,
            value: MaybeUninit::new(value),
        }
    }

    /// Read the identifier currently stored at `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must point into a piece of a pool that has not been dropped.
    /// The piece may be live or vacant.
    #[inline]
    pub(crate) unsafe fn id_of(slot: NonNull<Self>) -> u64 {
        ptr::addr_of!((*slot.as_ptr()).id).read()
    }

    /// Read the identifier stored at a slot of any value type.
    ///
    /// The identifier's offset does not depend on `T`, which comes last.
    ///
    /// # Safety
    ///
    /// Same as [`id_of`](Self::id_of).
    #[inline]
    pub(crate) unsafe fn id_at(location: NonNull<u8>) -> u64 {
        Slot::<()>::id_of(location.cast())
    }

    /// Pointer to the wrapped value.
    ///
    /// # Safety
    ///
    /// `slot` must point to a live slot.
    #[inline]
    pub(crate) unsafe fn value_ptr(slot: NonNull<Self>) -> NonNull<T> {
        NonNull::new_unchecked(ptr::addr_of_mut!((*slot.as_ptr()).value).cast::<T>())
    }

    /// Drop the wrapped value and reset the identifier to [`INVALID_ID`].
    ///
    /// The piece itself is not returned to its pool.
    ///
    /// # Safety
    ///
    /// `slot` must point to a live slot; afterwards it is vacant.
    pub(crate) unsafe fn vacate(slot: NonNull<Self>) {
        ptr::drop_in_place(Self::value_ptr(slot).as_ptr());
        ptr::addr_of_mut!((*slot.as_ptr()).id).write(INVALID_ID);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
