//! Tessera ECS -- pooled entity/component storage with generational handles.
//!
//! Components are plain values of any `'static` type. Each component type is
//! stored in its own pool-backed table; entities record which components
//! they hold. Every stored value is addressed through a [`Handle`] that
//! carries the identifier the value was created with, so a handle to a
//! destroyed value is detected on access instead of aliasing whatever
//! reuses its memory.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! let entity = world.create_entity();
//! let pos = world.add_component(entity, Position { x: 0.0, y: 0.0 });
//! world.add_component(entity, Velocity { dx: 1.0, dy: 0.0 });
//!
//! assert_eq!(world.count_entities::<(Position, Velocity)>(), 1);
//!
//! pos.get_mut(&mut world).unwrap().x = 5.0;
//! assert_eq!(pos.get(&world), Some(&Position { x: 5.0, y: 0.0 }));
//!
//! world.destroy_entity(entity);
//! assert!(!pos.is_valid(&world));
//! ```
//!
//! [`Handle`]: handle::Handle

#![deny(unsafe_code)]

pub mod config;
#[allow(unsafe_code)]
pub mod entity;
pub mod event;
#[allow(unsafe_code)]
pub mod handle;
#[allow(unsafe_code)]
pub mod pool;
pub mod registry;
#[allow(unsafe_code)]
pub mod slot;
pub mod system;
#[allow(unsafe_code)]
pub mod table;
#[allow(unsafe_code)]
pub mod view;
#[allow(unsafe_code)]
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// Most operations on stale handles are silent no-ops and do not produce an
/// error; see the individual methods on [`World`](world::World).
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A handle was dereferenced after the value it names was destroyed, or
    /// it was never issued, or it belongs to another world.
    #[error("invalid handle to {type_name}")]
    InvalidHandle { type_name: &'static str },

    /// A pool was requested with a layout that cannot be satisfied.
    #[error(
        "invalid pool layout: piece size {piece_size}, alignment {piece_align}, \
         block capacity {capacity} bytes"
    )]
    InvalidPoolLayout {
        piece_size: usize,
        piece_align: usize,
        capacity: usize,
    },

    /// A configuration document could not be parsed.
    #[error("invalid world configuration: {0}")]
    Config(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::WorldConfig;
    pub use crate::entity::{Entity, EntityId};
    pub use crate::event::{
        ComponentCreated, ComponentDestroyed, EntityCreated, EntityDestroyed, Subscriber,
    };
    pub use crate::handle::{EntityHandle, Handle};
    pub use crate::registry::{short_type_name, TypeIndex, TypeRegistry};
    pub use crate::system::{System, SystemId};
    pub use crate::view::{ComponentSet, ComponentView, ComponentViewMut, EntityRef, EntityView};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
