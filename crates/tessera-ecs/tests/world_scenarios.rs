//! Scenario tests for entity and component lifecycles, queries, and events.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct A(u32);

#[derive(Debug, Clone, PartialEq)]
struct B(String);

#[derive(Debug, Clone, PartialEq)]
struct C {
    values: Vec<u64>,
}

/// Route library logs to the test harness. Set `RUST_LOG=tessera_ecs=debug`
/// to see table creation and pool growth.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn entity_with_abc(world: &mut World, n: u32) -> EntityHandle {
    let e = world.create_entity();
    world.add_component(e, A(n));
    world.add_component(e, B(format!("b{n}")));
    world.add_component(e, C { values: vec![n as u64; 3] });
    e
}

// ---------------------------------------------------------------------------
// Add / remove
// ---------------------------------------------------------------------------

#[test]
fn add_yields_valid_handle_and_second_add_fails() {
    let mut world = World::new();
    let e = world.create_entity();

    let first = world.add_component(e, B("first".into()));
    assert!(world.component::<B>(e).is_valid(&world));
    assert_eq!(first.get(&world), Some(&B("first".into())));

    let second = world.add_component(e, B("second".into()));
    assert!(!second.is_valid(&world));
    assert_eq!(world.component::<B>(e), first);
    assert_eq!(first.get(&world), Some(&B("first".into())));
}

#[test]
fn remove_invalidates_entity_lookup_and_issued_handle() {
    let mut world = World::new();
    let e = world.create_entity();
    let issued = world.add_component(e, C { values: vec![1, 2, 3] });

    assert!(world.remove_component::<C>(e));
    assert!(!world.component::<C>(e).is_valid(&world));
    assert!(!issued.is_valid(&world));
    assert!(matches!(
        issued.try_get(&world),
        Err(EcsError::InvalidHandle { .. })
    ));
}

#[test]
fn destroying_an_entity_invalidates_all_its_handles() {
    let mut world = World::new();
    let e = world.create_entity();
    let a = world.add_component(e, A(1));
    let b = world.add_component(e, B("x".into()));
    let c = world.add_component(e, C { values: vec![] });

    world.destroy_entity(e);

    assert!(!e.is_valid(&world));
    assert!(!a.is_valid(&world));
    assert!(!b.is_valid(&world));
    assert!(!c.is_valid(&world));

    // The slot is reused; old handles stay invalid.
    let f = world.create_entity();
    let a2 = world.add_component(f, A(2));
    assert_eq!(f.entity_id().index(), e.entity_id().index());
    assert!(!e.is_valid(&world));
    assert!(!a.is_valid(&world));
    assert!(a2.is_valid(&world));
}

#[test]
fn handle_write_round_trip() {
    let mut world = World::new();
    let e = world.create_entity();
    let a = world.add_component(e, A(0));
    let c = world.add_component(e, C { values: vec![] });

    a.get_mut(&mut world).unwrap().0 = 77;
    c.get_mut(&mut world).unwrap().values.push(5);

    assert_eq!(a.get(&world).unwrap().0, 77);
    assert_eq!(c.get(&world).unwrap().values, vec![5]);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[test]
fn count_entities_tracks_removal() {
    let mut world = World::new();
    let e1 = entity_with_abc(&mut world, 1);
    let _e2 = entity_with_abc(&mut world, 2);

    assert_eq!(world.count_entities::<(B, C)>(), 2);
    assert!(world.remove_component::<C>(e1));
    assert_eq!(world.count_entities::<(B, C)>(), 1);
    assert_eq!(world.count_entities::<(A, B)>(), 2);
    assert_eq!(world.count_components::<C>(), 1);
}

#[test]
fn entity_view_yields_matching_entities_in_slot_order() {
    let mut world = World::new();
    let handles: Vec<EntityHandle> = (0..6).map(|n| entity_with_abc(&mut world, n)).collect();
    for e in handles.iter().step_by(2) {
        world.remove_component::<A>(*e);
    }

    let seen: Vec<u32> = world
        .entity_view::<(A, C)>()
        .filter_map(|e| e.get::<A>().map(|a| a.0))
        .collect();
    assert_eq!(seen, vec![1, 3, 5]);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CreatedA {
    calls: Vec<(EntityHandle, Handle<A>)>,
}

impl Subscriber<ComponentCreated<A>> for CreatedA {
    fn receive(&mut self, world: &World, event: &ComponentCreated<A>) {
        assert_eq!(world.component::<A>(event.entity), event.component);
        self.calls.push((event.entity, event.component));
    }
}

#[test]
fn subscriber_sees_each_add_until_unsubscribed() {
    init_tracing();
    let mut world = World::new();
    let s = Rc::new(RefCell::new(CreatedA::default()));
    assert!(world.subscribe::<ComponentCreated<A>, _>(&s));

    let e = world.create_entity();
    let h = world.add_component(e, A(1));
    assert_eq!(s.borrow().calls, vec![(e, h)]);

    // Other component types do not reach it.
    world.add_component(e, B("b".into()));
    assert_eq!(s.borrow().calls.len(), 1);

    assert!(world.unsubscribe::<ComponentCreated<A>, _>(&s));
    assert!(!world.unsubscribe::<ComponentCreated<A>, _>(&s));
    let f = world.create_entity();
    world.add_component(f, A(2));
    assert_eq!(s.borrow().calls.len(), 1);
}

struct LastSeen {
    value: Option<A>,
}

impl Subscriber<ComponentDestroyed<A>> for LastSeen {
    fn receive(&mut self, world: &World, event: &ComponentDestroyed<A>) {
        self.value = event.component.get(world).cloned();
    }
}

#[test]
fn component_destroyed_fires_before_removal() {
    let mut world = World::new();
    let s = Rc::new(RefCell::new(LastSeen { value: None }));
    world.subscribe::<ComponentDestroyed<A>, _>(&s);

    let e = world.create_entity();
    let a = world.add_component(e, A(0));
    a.get_mut(&mut world).unwrap().0 = 41;
    world.remove_component::<A>(e);

    assert_eq!(s.borrow().value, Some(A(41)));
}

#[test]
fn user_events_reach_only_their_subscribers() {
    struct Damage(u32);
    struct Heal;

    struct Meter {
        total: u32,
    }

    impl Subscriber<Damage> for Meter {
        fn receive(&mut self, _world: &World, event: &Damage) {
            self.total += event.0;
        }
    }

    let mut world = World::new();
    let meter = Rc::new(RefCell::new(Meter { total: 0 }));
    world.subscribe::<Damage, _>(&meter);

    assert_eq!(world.emit(&Damage(3)), 1);
    assert_eq!(world.emit(&Damage(4)), 1);
    assert_eq!(world.emit(&Heal), 0);
    assert_eq!(meter.borrow().total, 7);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// Heap-owning component that counts its live instances.
struct Tracked {
    _payload: Vec<u8>,
    live: Rc<Cell<usize>>,
}

impl Tracked {
    fn new(live: &Rc<Cell<usize>>, n: usize) -> Self {
        live.set(live.get() + 1);
        Self {
            _payload: vec![0u8; 16 + n % 64],
            live: Rc::clone(live),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[test]
fn world_teardown_leaks_nothing() {
    init_tracing();
    let live = Rc::new(Cell::new(0usize));
    let mut rng = Pcg64::seed_from_u64(0x7e55_e4a);
    {
        let mut world = World::new();
        let entities: Vec<EntityHandle> = (0..1000)
            .map(|n| {
                let e = world.create_entity();
                world.add_component(e, Tracked::new(&live, n));
                e
            })
            .collect();
        assert_eq!(live.get(), 1000);

        let victim = entities[rng.gen_range(100..900)];
        assert!(world.remove_component::<Tracked>(victim));
        assert_eq!(live.get(), 999);
        assert_eq!(world.count_components::<Tracked>(), 999);
    }
    assert_eq!(live.get(), 0);
}

#[test]
fn teardown_destroys_unattached_and_unset_components() {
    let live = Rc::new(Cell::new(0usize));
    {
        let mut world = World::new();
        world.create_component(Tracked::new(&live, 0));

        let shared = world.create_component(Tracked::new(&live, 1));
        let e = world.create_entity();
        world.set_component(e, shared);
        world.unset_component::<Tracked>(e);
        world.destroy_entity(e);

        assert_eq!(live.get(), 2);
    }
    assert_eq!(live.get(), 0);
}

#[test]
fn shared_component_is_destroyed_once() {
    let live = Rc::new(Cell::new(0usize));
    {
        let mut world = World::new();
        let shared = world.create_component(Tracked::new(&live, 0));
        let holders: Vec<EntityHandle> = (0..3)
            .map(|_| {
                let e = world.create_entity();
                assert!(world.set_component(e, shared));
                e
            })
            .collect();

        world.destroy_entity(holders[0]);
        assert_eq!(live.get(), 0);
        assert!(!world.component::<Tracked>(holders[1]).is_valid(&world));
        assert!(!world.has_component::<Tracked>(holders[1]));
        assert_eq!(world.count_entities::<(Tracked,)>(), 0);

        let replacement = world.add_component(holders[1], Tracked::new(&live, 1));
        assert!(replacement.is_valid(&world));
        assert_eq!(world.count_entities::<(Tracked,)>(), 1);
        assert!(!world.remove_component::<Tracked>(holders[2]));
        assert_eq!(live.get(), 1);
    }
    assert_eq!(live.get(), 0);
}
