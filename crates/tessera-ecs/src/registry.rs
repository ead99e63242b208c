//! Type registration and naming.
//!
//! Every component and event type that passes through a [`World`] is
//! assigned a [`TypeIndex`] the first time it is seen. The index is handed
//! out by a monotonic counter, so it is collision-free and stable for the
//! lifetime of the registry, but not across runs. Component tables and
//! subscriber lists are keyed by it.
//!
//! [`World`]: crate::world::World

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// TypeIndex
// ---------------------------------------------------------------------------

/// Lightweight identifier for a registered type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIndex(pub(crate) u32);

impl TypeIndex {
    /// The raw counter value.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIndex({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// TypeInfo
// ---------------------------------------------------------------------------

/// Metadata recorded for a registered type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    /// Index assigned at registration time.
    pub index: TypeIndex,
    /// `std::any::type_name::<T>()`
    pub name: &'static str,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    /// Rust `TypeId` used for deduplication.
    pub type_id: TypeId,
    /// [`string_hash`] of `name`. Stable across runs of the same build, so it
    /// can correlate diagnostics between processes. Not used for identity.
    pub fingerprint: u64,
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Maps Rust types to [`TypeIndex`]es on first use.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_type: HashMap<TypeId, TypeIndex>,
    /// Indexed by `TypeIndex.0`.
    infos: Vec<TypeInfo>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index of `T`, assigning the next one if `T` is new.
    pub fn register<T: 'static>(&mut self) -> TypeIndex {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }

        let index = TypeIndex(self.infos.len() as u32);
        let name = std::any::type_name::<T>();
        self.infos.push(TypeInfo {
            index,
            name,
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id,
            fingerprint: string_hash(name),
        });
        self.by_type.insert(type_id, index);
        index
    }

    /// Look up the index of `T` without registering it.
    pub fn lookup<T: 'static>(&self) -> Option<TypeIndex> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for a registered index.
    pub fn info(&self, index: TypeIndex) -> Option<&TypeInfo> {
        self.infos.get(index.0 as usize)
    }

    /// Full type name for a registered index.
    pub fn name_of(&self, index: TypeIndex) -> Option<&'static str> {
        self.info(index).map(|info| info.name)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether no type has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// All registered types in index order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.infos.iter()
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Display name of `T` with module paths stripped.
///
/// `alloc::vec::Vec<my_game::Position>` becomes `Vec<Position>`. Meant for
/// diagnostics only.
pub fn short_type_name<T: ?Sized>() -> String {
    shorten(std::any::type_name::<T>())
}

fn shorten(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment_start = 0;
    for (i, c) in full.char_indices() {
        match c {
            ':' => segment_start = i + 1,
            '<' | '>' | ',' | '(' | ')' | '[' | ']' | ';' | '&' | '*' | ' ' => {
                out.push_str(&full[segment_start..i]);
                out.push(c);
                segment_start = i + 1;
            }
            _ => {}
        }
    }
    out.push_str(&full[segment_start..]);
    out
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Seed used by [`string_hash`].
pub const DEFAULT_HASH_SEED: u64 = 14_695_981_039_346_656_037;

/// MurmurHash64A over `data`.
pub fn murmur_hash64a(data: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(word);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, &byte) in tail.iter().enumerate() {
            h ^= u64::from(byte) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// [`murmur_hash64a`] of a string with [`DEFAULT_HASH_SEED`].
pub fn string_hash(s: &str) -> u64 {
    murmur_hash64a(s.as_bytes(), DEFAULT_HASH_SEED)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
