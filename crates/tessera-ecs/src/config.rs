//! Construction-time capacities for a [`World`](crate::world::World).

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Entities per block of the entity pool.
pub const DEFAULT_ENTITY_CAPACITY: usize = 100;
/// Components per block of a lazily created component table.
pub const DEFAULT_COMPONENT_CAPACITY: usize = 100;
/// Initial capacity of each entity's component map.
pub const DEFAULT_COMPONENTS_PER_ENTITY: usize = 8;

/// Pool sizing for a world. Fixed once the world is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Entities per entity-pool block.
    pub entity_capacity: usize,
    /// Components per block for tables created on first use. Tables created
    /// through `create_allocator` use the byte capacity given there.
    pub component_capacity: usize,
    /// Component types each entity can hold before its map reallocates.
    pub components_per_entity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entity_capacity: DEFAULT_ENTITY_CAPACITY,
            component_capacity: DEFAULT_COMPONENT_CAPACITY,
            components_per_entity: DEFAULT_COMPONENTS_PER_ENTITY,
        }
    }
}

impl WorldConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::Config`] if the document is not valid JSON or a
    /// field has the wrong type.
    pub fn from_json_str(json: &str) -> Result<Self, EcsError> {
        Ok(serde_json::from_str(json)?)
    }
}
