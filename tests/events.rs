// Run:
//   cargo test --test events -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ecs_runtime::prelude::*;
use ecs_runtime::WILDCARD;

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Velocity {
    x: f32,
    y: f32,
}

#[test]
fn structural_events_fire_per_operation() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;

    static ADDS: AtomicUsize = AtomicUsize::new(0);
    static SETS: AtomicUsize = AtomicUsize::new(0);
    static REMOVES: AtomicUsize = AtomicUsize::new(0);

    world.observe(EventKind::OnAdd, position, |_, _| {
        ADDS.fetch_add(1, Ordering::SeqCst);
    });
    world.observe(EventKind::OnSet, position, |_, _| {
        SETS.fetch_add(1, Ordering::SeqCst);
    });
    world.observe(EventKind::OnRemove, position, |_, _| {
        REMOVES.fetch_add(1, Ordering::SeqCst);
    });

    let entity = world.new_entity()?;
    world.set(entity, position, Position { x: 1.0, y: 1.0 })?;
    assert_eq!(ADDS.load(Ordering::SeqCst), 1, "set on an absent component implies add");
    assert_eq!(SETS.load(Ordering::SeqCst), 1);

    world.set(entity, position, Position { x: 2.0, y: 2.0 })?;
    assert_eq!(ADDS.load(Ordering::SeqCst), 1, "add of a present component is a no-op");
    assert_eq!(SETS.load(Ordering::SeqCst), 2);

    world.add(entity, position)?;
    assert_eq!(ADDS.load(Ordering::SeqCst), 1);

    world.remove(entity, position)?;
    world.remove(entity, position)?;
    assert_eq!(REMOVES.load(Ordering::SeqCst), 1, "remove of an absent component is a no-op");
    Ok(())
}

#[test]
fn observers_fire_in_registration_order() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;

    let order: &'static Mutex<Vec<u32>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    for tag in 0..4u32 {
        world.observe(EventKind::OnAdd, position, move |_, _| {
            order.lock().unwrap().push(tag);
        });
    }

    let entity = world.new_entity()?;
    world.add(entity, position)?;
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    Ok(())
}

#[test]
fn wildcard_observers_see_every_component() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let velocity = world.register_component::<Velocity>("Velocity")?;

    let seen: &'static Mutex<Vec<EntityId>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    world.observe(EventKind::OnAdd, WILDCARD, move |_, record| {
        seen.lock().unwrap().push(record.component);
    });

    let entity = world.new_entity()?;
    world.add(entity, position)?;
    world.add(entity, velocity)?;
    assert_eq!(*seen.lock().unwrap(), vec![position, velocity]);
    Ok(())
}

#[test]
fn delete_publishes_a_remove_per_component() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let velocity = world.register_component::<Velocity>("Velocity")?;

    let removed: &'static Mutex<Vec<EntityId>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    world.observe(EventKind::OnRemove, WILDCARD, move |_, record| {
        removed.lock().unwrap().push(record.component);
    });

    let entity = world.new_with(&[position, velocity])?;
    world.delete(entity)?;

    let mut components = removed.lock().unwrap().clone();
    components.sort_unstable();
    let mut expected = vec![position, velocity];
    expected.sort_unstable();
    assert_eq!(components, expected);
    Ok(())
}

#[test]
fn observers_may_mutate_through_the_deferred_scope() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let velocity = world.register_component::<Velocity>("Velocity")?;

    // Every entity that gains Position also gets Velocity, via the observer.
    world.observe(EventKind::OnAdd, position, move |world, record| {
        for &entity in &record.entities {
            world.add(entity, velocity).expect("deferred add from observer");
        }
    });

    let entity = world.new_entity()?;
    world.add(entity, position)?;

    assert!(world.has(entity, velocity), "observer mutation must apply after dispatch");
    Ok(())
}

#[test]
fn unobserved_callbacks_stop_firing() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let observer = world.observe(EventKind::OnAdd, position, |_, _| {
        CALLS.fetch_add(1, Ordering::SeqCst);
    });

    let first = world.new_entity()?;
    world.add(first, position)?;
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);

    assert!(world.unobserve(observer));
    assert!(!world.unobserve(observer));

    let second = world.new_entity()?;
    world.add(second, position)?;
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn events_carry_entity_snapshots() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;

    let seen: &'static Mutex<Vec<(EventKind, Vec<EntityId>)>> =
        Box::leak(Box::new(Mutex::new(Vec::new())));
    world.observe(EventKind::OnRemove, position, move |_, record| {
        seen.lock().unwrap().push((record.kind, record.entities.clone()));
    });

    let entity = world.new_entity()?;
    world.add(entity, position)?;
    world.delete(entity)?;

    let log = seen.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, EventKind::OnRemove);
    assert_eq!(log[0].1, vec![entity]);
    Ok(())
}
