//! The [`World`] is the top-level container. It owns the entity pool, the
//! entity slot array, one component table per component type, the event
//! subscriber lists, and the system list.
//!
//! Entities and components are addressed through generational
//! [`Handle`]s. Operations on stale handles are silent no-ops that return
//! `false` or an invalid handle; they never panic.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::alloc::Layout;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, trace, warn};

use crate::config::WorldConfig;
use crate::entity::{ComponentLink, Entity, EntityId, EntitySlots};
use crate::event::{
    subscriber_address, ComponentCreated, ComponentDestroyed, EntityCreated, EntityDestroyed,
    EventBus, Subscriber,
};
use crate::handle::{EntityHandle, Handle};
use crate::pool::PiecePool;
use crate::registry::{TypeIndex, TypeRegistry};
use crate::slot::Slot;
use crate::system::{System, SystemId, SystemList};
use crate::table::ComponentTable;
use crate::view::{ComponentSet, ComponentView, ComponentViewMut, EntityView};
use crate::EcsError;

// ---------------------------------------------------------------------------
// WorldTag
// ---------------------------------------------------------------------------

static NEXT_TAG: AtomicU32 = AtomicU32::new(1);

/// Distinguishes worlds so a handle is only ever checked against memory of
/// the world that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorldTag(u32);

impl WorldTag {
    /// Carried by handles that were never issued.
    pub(crate) const NONE: WorldTag = WorldTag(0);

    fn fresh() -> Self {
        Self(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }
}

/// Bytes needed for a block of `count` slots of `T`.
fn block_bytes<T>(count: usize) -> usize {
    count.saturating_mul(mem::size_of::<Slot<T>>())
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The aggregate root: entities, component tables, events, and systems.
pub struct World {
    tag: WorldTag,
    config: WorldConfig,
    registry: TypeRegistry,
    entities: EntitySlots,
    tables: HashMap<TypeIndex, ComponentTable>,
    events: EventBus,
    systems: SystemList,
    /// Declared last: entity slots point into it until `drop` has run.
    entity_pool: PiecePool,
}

impl World {
    /// Create a world with the default [`WorldConfig`].
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world with explicit pool capacities.
    ///
    /// # Panics
    ///
    /// Panics if `config.entity_capacity` entities cannot be laid out as one
    /// block. Exhausting the address space is not recoverable.
    pub fn with_config(config: WorldConfig) -> Self {
        let entity_pool = PiecePool::for_layout(
            Layout::new::<Slot<Entity>>(),
            block_bytes::<Entity>(config.entity_capacity),
        )
        .unwrap_or_else(|e| panic!("cannot size the entity pool: {e}"));

        Self {
            tag: WorldTag::fresh(),
            config,
            registry: TypeRegistry::new(),
            entities: EntitySlots::new(),
            tables: HashMap::new(),
            events: EventBus::new(),
            systems: SystemList::default(),
            entity_pool,
        }
    }

    #[inline]
    pub(crate) fn tag(&self) -> WorldTag {
        self.tag
    }

    /// The capacities this world was built with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Types seen so far, with their indices.
    pub fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }

    // -- entities -----------------------------------------------------------

    /// Create an empty entity in the lowest free slot and emit
    /// [`EntityCreated`].
    pub fn create_entity(&mut self) -> EntityHandle {
        let id = self.entities.claim();
        let entity = Entity::new(id, self.config.components_per_entity);
        // SAFETY: the entity pool is laid out for `Slot<Entity>`.
        let slot = unsafe { self.entity_pool.create(Slot::new(id.to_raw(), entity)) };
        self.entities.occupy(id, slot);

        let handle = EntityHandle::new(self.tag, id, slot);
        trace!(entity = %id, "entity created");
        self.emit(&EntityCreated { entity: handle });
        handle
    }

    /// Emit [`EntityDestroyed`], then destroy the entity and every component
    /// it holds. The slot's generation is bumped, so every outstanding
    /// handle to this entity goes invalid.
    ///
    /// Returns `false` if the handle is already invalid.
    pub fn destroy_entity(&mut self, entity: EntityHandle) -> bool {
        if !entity.is_valid(self) {
            return false;
        }
        self.emit(&EntityDestroyed { entity });

        let id = entity.entity_id();
        let Some(slot) = self.entities.release(id) else {
            return false;
        };
        self.teardown_entity(slot);
        trace!(entity = %id, "entity destroyed");
        true
    }

    /// Destroy the components an entity still links to, then the entity.
    fn teardown_entity(&mut self, slot: NonNull<Slot<Entity>>) {
        // SAFETY: `slot` is a live entity slot of `entity_pool`.
        let links = unsafe { Slot::value_ptr(slot).as_mut() }.take_links();
        for (ty, link) in links {
            if let Some(table) = self.tables.get_mut(&ty) {
                table.destroy(link.slot, link.id);
            }
        }
        // SAFETY: the slot is live and no longer reachable from `entities`.
        unsafe {
            Slot::vacate(slot);
            self.entity_pool.free(slot.cast());
        }
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Length of the entity slot array, vacant slots included.
    pub fn entity_slots(&self) -> usize {
        self.entities.len()
    }

    /// Handle for a live entity id, or an invalid handle.
    pub fn entity_handle(&self, id: EntityId) -> EntityHandle {
        self.entities
            .get(id)
            .map(|slot| EntityHandle::new(self.tag, id, slot))
            .unwrap_or_default()
    }

    /// Read access to a live entity.
    pub fn entity(&self, entity: &EntityHandle) -> Option<&Entity> {
        entity.get(self)
    }

    fn entity_ptr(&self, entity: &EntityHandle) -> Option<NonNull<Entity>> {
        let slot = entity.live_slot(self)?;
        // SAFETY: `live_slot` only returns live slots.
        Some(unsafe { Slot::value_ptr(slot) })
    }

    // -- entity components --------------------------------------------------

    /// Construct `value` in `T`'s table, attach it to `entity`, and emit
    /// [`ComponentCreated<T>`].
    ///
    /// Returns an invalid handle, dropping `value`, if the entity is invalid
    /// or already has a `T`.
    pub fn add_component<T: 'static>(&mut self, entity: EntityHandle, value: T) -> Handle<T> {
        let Some(mut target) = self.entity_ptr(&entity) else {
            return Handle::invalid();
        };
        let ty = self.registry.register::<T>();
        // SAFETY: the entity is live and nothing else borrows it here.
        if unsafe { target.as_ref() }.has_type(ty) {
            return Handle::invalid();
        }

        let (slot, id) = self.table_for::<T>(ty).create(value);
        // SAFETY: as above; tables and the entity pool are disjoint.
        unsafe { target.as_mut() }.attach(ty, ComponentLink { slot: slot.cast(), id });

        let component = Handle::new(self.tag, id, slot);
        self.emit(&ComponentCreated { entity, component });
        component
    }

    /// Emit [`ComponentDestroyed<T>`], then detach and destroy the entity's
    /// `T`.
    ///
    /// Returns `false` if the entity is invalid or has no `T`.
    pub fn remove_component<T: 'static>(&mut self, entity: EntityHandle) -> bool {
        let Some(ty) = self.registry.lookup::<T>() else {
            return false;
        };
        let Some(link) = self.link(&entity, ty) else {
            return false;
        };

        let component = Handle::<T>::new(self.tag, link.id, link.slot.cast());
        self.emit(&ComponentDestroyed { entity, component });

        let Some(mut target) = self.entity_ptr(&entity) else {
            return false;
        };
        // SAFETY: the entity is live and subscribers only held shared
        // borrows, which ended with `emit`.
        unsafe { target.as_mut() }.detach(ty);
        if let Some(table) = self.tables.get_mut(&ty) {
            table.destroy(link.slot, link.id);
        }
        true
    }

    /// Attach an existing component to `entity` without taking ownership of
    /// it. The same component may be set on many entities.
    ///
    /// Returns `false` if either handle is invalid or the entity already has
    /// a `T`.
    ///
    /// A shared component is still destroyed when any holder removes it or
    /// is destroyed while holding it; [`unset_component`] it first to keep
    /// it alive. Other holders then no longer have a `T`.
    ///
    /// [`unset_component`]: Self::unset_component
    pub fn set_component<T: 'static>(&mut self, entity: EntityHandle, component: Handle<T>) -> bool {
        let Some(slot) = component.live_slot(self) else {
            return false;
        };
        let Some(mut target) = self.entity_ptr(&entity) else {
            return false;
        };
        let ty = self.registry.register::<T>();
        let link = ComponentLink {
            slot: slot.cast(),
            id: component.id(),
        };
        // SAFETY: the entity is live and nothing else borrows it here.
        unsafe { target.as_mut() }.attach(ty, link)
    }

    /// Detach `entity`'s `T` without destroying it.
    ///
    /// Returns `false` if the entity is invalid or has no `T`.
    pub fn unset_component<T: 'static>(&mut self, entity: EntityHandle) -> bool {
        let Some(ty) = self.registry.lookup::<T>() else {
            return false;
        };
        let Some(mut target) = self.entity_ptr(&entity) else {
            return false;
        };
        // SAFETY: the entity is live and nothing else borrows it here.
        unsafe { target.as_mut() }.detach(ty).is_some()
    }

    /// Handle to `entity`'s `T`, or an invalid handle if it has none.
    pub fn component<T: 'static>(&self, entity: EntityHandle) -> Handle<T> {
        self.registry
            .lookup::<T>()
            .and_then(|ty| self.link(&entity, ty))
            .map(|link| Handle::new(self.tag, link.id, link.slot.cast()))
            .unwrap_or_default()
    }

    /// Whether `entity` is live and has a `T` attached.
    pub fn has_component<T: 'static>(&self, entity: EntityHandle) -> bool {
        self.has_components::<(T,)>(entity)
    }

    /// Whether `entity` is live and has every type in `Q` attached.
    pub fn has_components<Q: ComponentSet>(&self, entity: EntityHandle) -> bool {
        let (Some(target), Some(types)) = (self.entity(&entity), Q::type_indices(&self.registry)) else {
            return false;
        };
        target.has_all(&types)
    }

    fn link(&self, entity: &EntityHandle, ty: TypeIndex) -> Option<ComponentLink> {
        self.entity(entity)?.link(ty)
    }

    // -- component tables ---------------------------------------------------

    /// Create `T`'s table with pool blocks of about `capacity` bytes.
    /// Does nothing if the table already exists.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidPoolLayout`] if `capacity` bytes cannot be
    /// laid out as one block.
    pub fn create_allocator<T: 'static>(&mut self, capacity: usize) -> Result<(), EcsError> {
        let ty = self.registry.register::<T>();
        if !self.tables.contains_key(&ty) {
            let table = ComponentTable::new::<T>(ty, capacity)?;
            self.tables.insert(ty, table);
        }
        Ok(())
    }

    /// `T`'s table, created with the configured capacity if missing.
    fn table_for<T: 'static>(&mut self, ty: TypeIndex) -> &mut ComponentTable {
        let bytes = block_bytes::<T>(self.config.component_capacity);
        self.tables.entry(ty).or_insert_with(|| {
            ComponentTable::new::<T>(ty, bytes).unwrap_or_else(|e| {
                panic!(
                    "cannot size the component table for {}: {e}",
                    std::any::type_name::<T>()
                )
            })
        })
    }

    /// The table storing `T`, if one exists.
    pub fn component_table<T: 'static>(&self) -> Option<&ComponentTable> {
        self.table(self.registry.lookup::<T>()?)
    }

    pub(crate) fn table(&self, ty: TypeIndex) -> Option<&ComponentTable> {
        self.tables.get(&ty)
    }

    /// Construct a component that is not attached to any entity.
    pub fn create_component<T: 'static>(&mut self, value: T) -> Handle<T> {
        let ty = self.registry.register::<T>();
        let (slot, id) = self.table_for::<T>(ty).create(value);
        Handle::new(self.tag, id, slot)
    }

    /// Destroy a component directly. Entities linking to it no longer have
    /// a component of its type.
    ///
    /// Returns `false` if the handle is already invalid.
    pub fn destroy_component<T: 'static>(&mut self, component: Handle<T>) -> bool {
        let Some(slot) = component.live_slot(self) else {
            return false;
        };
        let Some(ty) = self.registry.lookup::<T>() else {
            return false;
        };
        self.tables
            .get_mut(&ty)
            .is_some_and(|table| table.destroy(slot.cast(), component.id()))
    }

    // -- events -------------------------------------------------------------

    /// Register `subscriber` for events of type `E`.
    ///
    /// Only a weak reference is kept. Returns `false` if the subscriber is
    /// already registered for `E`.
    pub fn subscribe<E, S>(&mut self, subscriber: &Rc<RefCell<S>>) -> bool
    where
        E: 'static,
        S: Subscriber<E> + 'static,
    {
        let ty = self.registry.register::<E>();
        let erased: Rc<RefCell<dyn Subscriber<E>>> = subscriber.clone();
        self.events.subscribe::<E>(ty, erased)
    }

    /// Stop delivering `E` to `subscriber`. Returns `false` if it was not
    /// registered.
    pub fn unsubscribe<E, S>(&mut self, subscriber: &Rc<RefCell<S>>) -> bool
    where
        E: 'static,
        S: Subscriber<E> + 'static,
    {
        let Some(ty) = self.registry.lookup::<E>() else {
            return false;
        };
        self.events.unsubscribe::<E>(ty, subscriber_address(subscriber))
    }

    /// Number of live subscribers for `E`.
    pub fn subscriber_count<E: 'static>(&self) -> usize {
        self.registry
            .lookup::<E>()
            .map_or(0, |ty| self.events.count::<E>(ty))
    }

    /// Deliver `event` to every subscriber of `E`, in registration order.
    /// Returns how many subscribers received it.
    ///
    /// Subscribers get a shared borrow of the world, so they cannot emit or
    /// change subscriptions while being called. A subscriber that is
    /// already mutably borrowed elsewhere is skipped.
    pub fn emit<E: 'static>(&mut self, event: &E) -> usize {
        let Some(ty) = self.registry.lookup::<E>() else {
            return 0;
        };

        let mut delivered = 0;
        let mut found_dead = false;
        if let Some(list) = self.events.list::<E>(ty) {
            for weak in list {
                let Some(subscriber) = weak.upgrade() else {
                    found_dead = true;
                    continue;
                };
                let borrowed = subscriber.try_borrow_mut();
                match borrowed {
                    Ok(mut subscriber) => {
                        subscriber.receive(self, event);
                        delivered += 1;
                    }
                    Err(_) => warn!(
                        event = std::any::type_name::<E>(),
                        "subscriber already borrowed, event not delivered"
                    ),
                };
            }
        }

        if found_dead {
            let pruned = self.events.prune::<E>(ty);
            debug!(event = std::any::type_name::<E>(), pruned, "pruned dropped subscribers");
        }
        delivered
    }

    // -- systems ------------------------------------------------------------

    /// Append a system to the update list.
    pub fn register_system<S: System + 'static>(&mut self, system: S) -> SystemId {
        self.systems.push(Box::new(system))
    }

    /// Remove a system. Returns `false` if it is not registered, including
    /// when called from a running system.
    pub fn remove_system(&mut self, id: SystemId) -> bool {
        self.systems.remove(id)
    }

    /// Number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Run every system once, in registration order. Systems registered
    /// during the update first run on the next one.
    pub fn update(&mut self, time: f32) {
        let mut running = self.systems.take();
        for (_, system) in running.iter_mut() {
            system.update(self, time);
        }
        self.systems.restore(running);
    }

    // -- queries ------------------------------------------------------------

    /// Lazily visit every live entity that has all types in `Q`.
    pub fn entity_view<Q: ComponentSet>(&self) -> EntityView<'_, Q> {
        EntityView::new(self)
    }

    /// Lazily visit every live `T`, attached or not.
    pub fn component_view<T: 'static>(&self) -> ComponentView<'_, T> {
        ComponentView::new(self)
    }

    /// Like [`component_view`](Self::component_view), with mutable access.
    pub fn component_view_mut<T: 'static>(&mut self) -> ComponentViewMut<'_, T> {
        ComponentViewMut::new(self)
    }

    /// Number of live entities with all types in `Q`.
    pub fn count_entities<Q: ComponentSet>(&self) -> usize {
        self.entity_view::<Q>().count()
    }

    /// Number of live `T` components, attached or not.
    pub fn count_components<T: 'static>(&self) -> usize {
        self.component_table::<T>().map_or(0, ComponentTable::len)
    }

    pub(crate) fn entity_slot_array(&self) -> &EntitySlots {
        &self.entities
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        let live: Vec<NonNull<Slot<Entity>>> = self.entities.occupied().collect();
        for slot in live {
            self.teardown_entity(slot);
        }
        // Components that no entity held, or that were unset.
        self.tables.clear();
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.alive_count())
            .field("entity_slots", &self.entities.len())
            .field("component_types", &self.tables.len())
            .field("systems", &self.systems.len())
            .field("events", &self.events)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
