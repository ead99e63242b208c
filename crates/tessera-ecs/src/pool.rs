//! Fixed-piece pool allocator.
//!
//! A [`PiecePool`] hands out memory pieces of one fixed size and alignment.
//! It grows by whole blocks and never returns memory to the system until it
//! is dropped. Freed pieces are threaded onto an intrusive singly linked free
//! list through their first machine word, so reuse is O(1) and costs no
//! bookkeeping allocations.
//!
//! Block layout:
//!
//! ```text
//! [prev block ptr | pad][piece 0][piece 1] ... [piece N-1]
//!  <--- header ------->
//! ```
//!
//! The header is `max(align, word)` bytes so the first piece keeps the
//! requested alignment. Blocks form a chain through the header word, which is
//! walked on drop.
//!
//! # Safety
//!
//! The pool knows nothing about what it stores. Callers must run destructors
//! before calling [`PiecePool::free`], must only free pieces that came from
//! the same pool, and must never touch a piece after the pool is dropped.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::EcsError;

/// Size of the free-list link threaded through vacant pieces.
pub const WORD: usize = mem::size_of::<*mut u8>();

// ---------------------------------------------------------------------------
// PiecePool
// ---------------------------------------------------------------------------

/// A growable pool of fixed-size, fixed-alignment memory pieces.
pub struct PiecePool {
    /// Bytes per piece, a multiple of `piece_align` and at least [`WORD`].
    piece_size: usize,
    /// Alignment of every piece, at least pointer alignment.
    piece_align: usize,
    /// Number of pieces carved from each block.
    pieces_per_block: usize,
    /// Bytes reserved at the start of each block for the chain pointer.
    header: usize,
    /// Layout of one whole block (header included).
    block_layout: Layout,
    /// Newest block, or null before the first allocation.
    newest: *mut u8,
    /// Byte offset of the next uncarved piece within `newest`.
    cursor: usize,
    /// Head of the intrusive free list, or null.
    free_head: *mut u8,
    /// Number of blocks in the chain.
    blocks: usize,
}

impl PiecePool {
    /// Create a pool whose blocks hold roughly `block_bytes` bytes of pieces.
    ///
    /// `piece_size` is raised to at least one machine word and rounded up to
    /// a multiple of the alignment; `piece_align` is raised to at least
    /// pointer alignment. Every block holds at least one piece. No memory is
    /// reserved until the first [`allocate`](Self::allocate).
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidPoolLayout`] if `piece_size` is zero,
    /// `piece_align` is not a power of two, or a block would overflow the
    /// address space.
    pub fn new(block_bytes: usize, piece_size: usize, piece_align: usize) -> Result<Self, EcsError> {
        let invalid = || EcsError::InvalidPoolLayout {
            piece_size,
            piece_align,
            capacity: block_bytes,
        };
        if piece_size == 0 || !piece_align.is_power_of_two() {
            return Err(invalid());
        }

        let align = piece_align.max(mem::align_of::<*mut u8>());
        let size = piece_size
            .max(WORD)
            .checked_next_multiple_of(align)
            .ok_or_else(invalid)?;
        let header = align.max(WORD);
        let pieces_per_block = (block_bytes / size).max(1);
        let total = pieces_per_block
            .checked_mul(size)
            .and_then(|bytes| bytes.checked_add(header))
            .ok_or_else(invalid)?;
        let block_layout = Layout::from_size_align(total, align).map_err(|_| invalid())?;

        Ok(Self {
            piece_size: size,
            piece_align: align,
            pieces_per_block,
            header,
            block_layout,
            newest: ptr::null_mut(),
            cursor: 0,
            free_head: ptr::null_mut(),
            blocks: 0,
        })
    }

    /// Create a pool for pieces described by `layout`.
    pub fn for_layout(layout: Layout, block_bytes: usize) -> Result<Self, EcsError> {
        Self::new(block_bytes, layout.size().max(1), layout.align())
    }

    /// Hand out one piece.
    ///
    /// Reuses the most recently freed piece if there is one, otherwise
    /// carves the next piece from the newest block, growing by a block when
    /// the newest one is exhausted. The returned memory is uninitialised.
    pub fn allocate(&mut self) -> NonNull<u8> {
        if let Some(head) = NonNull::new(self.free_head) {
            // SAFETY: every free-list entry is an aligned piece of this pool
            // whose first word was written by `free`.
            self.free_head = unsafe { head.as_ptr().cast::<*mut u8>().read() };
            return head;
        }

        if self.newest.is_null() || self.cursor + self.piece_size > self.block_layout.size() {
            self.grow();
        }

        // SAFETY: `cursor + piece_size <= block size`, so the piece lies in
        // the newest block.
        let piece = unsafe { self.newest.add(self.cursor) };
        self.cursor += self.piece_size;
        // SAFETY: offset into a non-null allocation.
        unsafe { NonNull::new_unchecked(piece) }
    }

    /// Return a piece to the free list.
    ///
    /// # Safety
    ///
    /// `piece` must have come from [`allocate`](Self::allocate) on this pool,
    /// must not already be free, and whatever lived in it must already have
    /// been dropped. Its first word is overwritten.
    pub unsafe fn free(&mut self, piece: NonNull<u8>) {
        piece.as_ptr().cast::<*mut u8>().write(self.free_head);
        self.free_head = piece.as_ptr();
    }

    /// Allocate a piece and move `value` into it.
    ///
    /// # Safety
    ///
    /// `T` must fit the pool's piece size and alignment. This is debug
    /// asserted; release builds do not check it.
    pub unsafe fn create<T>(&mut self, value: T) -> NonNull<T> {
        debug_assert!(
            mem::size_of::<T>() <= self.piece_size,
            "type size exceeds the pool piece size"
        );
        debug_assert!(
            mem::align_of::<T>() <= self.piece_align,
            "type alignment exceeds the pool piece alignment"
        );
        let piece = self.allocate().cast::<T>();
        piece.as_ptr().write(value);
        piece
    }

    /// Drop the value at `value` in place and return its piece to the pool.
    ///
    /// # Safety
    ///
    /// `value` must have come from [`create`](Self::create) on this pool with
    /// the same `T` and must not have been destroyed already.
    pub unsafe fn destroy<T>(&mut self, value: NonNull<T>) {
        debug_assert!(
            mem::size_of::<T>() <= self.piece_size,
            "type size exceeds the pool piece size"
        );
        debug_assert!(
            mem::align_of::<T>() <= self.piece_align,
            "type alignment exceeds the pool piece alignment"
        );
        ptr::drop_in_place(value.as_ptr());
        self.free(value.cast());
    }

    /// Bytes per piece after rounding.
    #[inline]
    pub fn piece_size(&self) -> usize {
        self.piece_size
    }

    /// Alignment of every piece.
    #[inline]
    pub fn piece_align(&self) -> usize {
        self.piece_align
    }

    /// Pieces carved from each block.
    #[inline]
    pub fn pieces_per_block(&self) -> usize {
        self.pieces_per_block
    }

    /// Bytes per block, header included.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_layout.size()
    }

    /// Number of blocks allocated so far.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Total bytes reserved across all blocks.
    pub fn reserved_bytes(&self) -> usize {
        self.blocks * self.block_layout.size()
    }

    fn grow(&mut self) {
        // SAFETY: `block_layout` has a non-zero size (header >= WORD).
        let block = unsafe { alloc::alloc(self.block_layout) };
        if block.is_null() {
            alloc::handle_alloc_error(self.block_layout);
        }
        // SAFETY: the header word is in bounds and pointer-aligned.
        unsafe { block.cast::<*mut u8>().write(self.newest) };
        self.newest = block;
        self.cursor = self.header;
        self.blocks += 1;
        debug!(
            piece_size = self.piece_size,
            pieces_per_block = self.pieces_per_block,
            blocks = self.blocks,
            "pool grew by one block"
        );
    }
}

impl Drop for PiecePool {
    fn drop(&mut self) {
        let mut block = self.newest;
        while !block.is_null() {
            // SAFETY: every block in the chain was allocated with
            // `block_layout` and stores its predecessor in the header word.
            unsafe {
                let prev = block.cast::<*mut u8>().read();
                alloc::dealloc(block, self.block_layout);
                block = prev;
            }
        }
        self.newest = ptr::null_mut();
        self.free_head = ptr::null_mut();
    }
}

impl std::fmt::Debug for PiecePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiecePool")
            .field("piece_size", &self.piece_size)
            .field("piece_align", &self.piece_align)
            .field("pieces_per_block", &self.pieces_per_block)
            .field("blocks", &self.blocks)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn piece_size_rounded_to_word_and_alignment() {
        let pool = PiecePool::new(64, 1, 1).unwrap();
        assert_eq!(pool.piece_size(), WORD);
        assert!(pool.piece_align() >= mem::align_of::<*mut u8>());

        let pool = PiecePool::new(1024, 20, 16).unwrap();
        assert_eq!(pool.piece_size(), 32);
        assert_eq!(pool.piece_align(), 16);
        assert_eq!(pool.pieces_per_block(), 32);
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(matches!(
            PiecePool::new(64, 0, 8),
            Err(EcsError::InvalidPoolLayout { .. })
        ));
        assert!(matches!(
            PiecePool::new(64, 8, 3),
            Err(EcsError::InvalidPoolLayout { .. })
        ));
        assert!(PiecePool::new(usize::MAX, 8, 8).is_err());
    }

    #[test]
    fn pieces_are_distinct_and_aligned() {
        let mut pool = PiecePool::new(4 * 64, 48, 64).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..20 {
            let p = pool.allocate();
            assert_eq!(p.as_ptr() as usize % 64, 0, "piece must honour alignment");
            assert!(seen.insert(p.as_ptr() as usize), "piece handed out twice");
        }
        // 4 pieces per block -> 5 blocks for 20 pieces.
        assert_eq!(pool.block_count(), 5);
        assert_eq!(pool.reserved_bytes(), 5 * pool.block_size());
    }

    #[test]
    fn free_list_is_lifo() {
        let mut pool = PiecePool::new(256, 16, 8).unwrap();
        let a = pool.allocate();
        let b = pool.allocate();
        unsafe {
            pool.free(a);
            pool.free(b);
        }
        assert_eq!(pool.allocate(), b);
        assert_eq!(pool.allocate(), a);
        assert_eq!(pool.block_count(), 1);
    }

    #[test]
    fn no_growth_while_free_list_has_pieces() {
        let mut pool = PiecePool::new(16, 16, 8).unwrap();
        assert_eq!(pool.pieces_per_block(), 1);
        let p = pool.allocate();
        for _ in 0..10 {
            unsafe { pool.free(p) };
            assert_eq!(pool.allocate(), p);
        }
        assert_eq!(pool.block_count(), 1);
    }

    #[test]
    fn create_and_destroy_run_drop() {
        use std::rc::Rc;

        let marker = Rc::new(());
        let mut pool = PiecePool::for_layout(Layout::new::<Rc<()>>(), 128).unwrap();
        unsafe {
            let p = pool.create(Rc::clone(&marker));
            assert_eq!(Rc::strong_count(&marker), 2);
            assert!(Rc::ptr_eq(p.as_ref(), &marker));
            pool.destroy(p);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn values_survive_neighbouring_churn() {
        let mut pool = PiecePool::for_layout(Layout::new::<[u64; 3]>(), 96).unwrap();
        let keep = unsafe { pool.create([7u64, 8, 9]) };
        for i in 0..50u64 {
            unsafe {
                let tmp = pool.create([i, i, i]);
                pool.destroy(tmp);
            }
        }
        assert_eq!(unsafe { *keep.as_ref() }, [7, 8, 9]);
    }
}
