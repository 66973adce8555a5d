// Run:
//   cargo test --test world_basic -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering};

use ecs_runtime::prelude::*;
use ecs_runtime::ArchetypeId;

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

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Finds the archetype currently holding `entity` through the read-only
/// serialization surface.
fn archetype_of(world: &World, entity: EntityId) -> Option<ArchetypeId> {
    world
        .iter_archetypes()
        .find(|&archetype| world.archetype_entities(archetype).contains(&entity))
}

#[test]
fn set_components_builds_sorted_archetype() -> EcsResult<()> {
    init_logging();
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let velocity = world.register_component::<Velocity>("Velocity")?;

    let entity = world.new_entity()?;
    world.set(entity, position, Position { x: 1.0, y: 2.0 })?;
    world.set(entity, velocity, Velocity { x: 3.0, y: 4.0 })?;

    assert_eq!(world.get::<Position>(entity, position), Some(&Position { x: 1.0, y: 2.0 }));
    assert_eq!(world.get::<Velocity>(entity, velocity), Some(&Velocity { x: 3.0, y: 4.0 }));

    let mut expected = vec![position, velocity];
    expected.sort_unstable();
    assert_eq!(world.type_of(entity)?, expected.as_slice());
    Ok(())
}

#[test]
fn alive_entities_round_trip_through_their_archetype() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;

    let mut entities = Vec::new();
    for i in 0..32 {
        let entity = world.new_entity()?;
        world.set(entity, position, Position { x: i as f32, y: 0.0 })?;
        entities.push(entity);
    }

    for &entity in &entities {
        assert!(world.alive(entity));
        let archetype = archetype_of(&world, entity).expect("alive entity must occupy a row");
        assert!(world.archetype_entities(archetype).contains(&entity));
    }
    Ok(())
}

#[test]
fn stale_handles_never_reach_the_new_occupant() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;

    let stale = world.new_entity()?;
    world.set(stale, position, Position { x: 9.0, y: 9.0 })?;
    world.delete(stale)?;

    // The freed slot is reused with a bumped generation.
    let fresh = world.new_entity()?;
    assert_eq!(ecs_runtime::entity_index(stale), ecs_runtime::entity_index(fresh));
    assert_ne!(stale, fresh);

    world.set(fresh, position, Position { x: 1.0, y: 1.0 })?;
    assert!(!world.alive(stale));
    assert_eq!(world.get::<Position>(stale, position), None);
    assert!(world.set(stale, position, Position::default()).is_err());
    assert!(world.alive(fresh));
    Ok(())
}

#[test]
fn archetype_identity_is_insertion_order_independent() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let velocity = world.register_component::<Velocity>("Velocity")?;
    let frozen = world.register_tag("Frozen")?;

    let forward = world.new_entity()?;
    world.add(forward, position)?;
    world.add(forward, velocity)?;
    world.add(forward, frozen)?;

    let backward = world.new_entity()?;
    world.add(backward, frozen)?;
    world.add(backward, velocity)?;
    world.add(backward, position)?;

    let spawned = world.new_with(&[velocity, frozen, position])?;

    let home = archetype_of(&world, forward);
    assert_eq!(home, archetype_of(&world, backward));
    assert_eq!(home, archetype_of(&world, spawned));
    Ok(())
}

#[test]
fn add_remove_returns_to_the_original_archetype() -> EcsResult<()> {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Payload(#[allow(dead_code)] Vec<u8>);

    impl Drop for Payload {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let payload = world.register_component::<Payload>("Payload")?;

    let entity = world.new_entity()?;
    world.add(entity, position)?;
    let origin = archetype_of(&world, entity);

    world.add(entity, payload)?;
    assert_ne!(origin, archetype_of(&world, entity));

    world.remove(entity, payload)?;
    assert_eq!(origin, archetype_of(&world, entity));
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn column_lengths_match_entity_counts() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let velocity = world.register_component::<Velocity>("Velocity")?;

    for i in 0..50 {
        let entity = world.new_entity()?;
        world.set(entity, position, Position { x: i as f32, y: 0.0 })?;
        if i % 3 == 0 {
            world.add(entity, velocity)?;
        }
    }

    for archetype in world.iter_archetypes().collect::<Vec<_>>() {
        let rows = world.archetype_entities(archetype).len();
        if let Some(bytes) = world.archetype_column(archetype, position) {
            assert_eq!(bytes.len(), rows * std::mem::size_of::<Position>());
        }
        if let Some(bytes) = world.archetype_column(archetype, velocity) {
            assert_eq!(bytes.len(), rows * std::mem::size_of::<Velocity>());
        }
    }
    Ok(())
}

#[test]
fn swap_and_pop_preserves_the_survivors() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;

    let mut entities = Vec::new();
    for i in 0..10 {
        let entity = world.new_entity()?;
        world.set(entity, position, Position { x: i as f32, y: i as f32 })?;
        entities.push(entity);
    }

    // Delete a middle row so the last row is swapped down into it.
    let removed = entities.remove(3);
    world.delete(removed)?;

    for (i, &entity) in entities.iter().enumerate() {
        let expected = if i < 3 { i as f32 } else { (i + 1) as f32 };
        assert_eq!(
            world.get::<Position>(entity, position),
            Some(&Position { x: expected, y: expected }),
            "survivor {i} lost its value after swap-and-pop"
        );
    }
    assert!(!world.alive(removed));
    Ok(())
}

#[test]
fn destructors_run_exactly_once_per_deleted_entity() -> EcsResult<()> {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Name(#[allow(dead_code)] String);

    impl Drop for Name {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut world = World::new();
    let name = world.register_component::<Name>("Name")?;

    let mut entities = Vec::new();
    for _ in 0..100 {
        let entity = world.new_entity()?;
        world.add(entity, name)?;
        entities.push(entity);
    }
    assert_eq!(DROPS.load(Ordering::SeqCst), 0);

    for entity in entities {
        world.delete(entity)?;
    }
    assert_eq!(DROPS.load(Ordering::SeqCst), 100);
    Ok(())
}

#[test]
fn delete_tolerates_dead_targets() -> EcsResult<()> {
    let mut world = World::new();
    let entity = world.new_entity()?;
    world.delete(entity)?;
    world.delete(entity)?;
    assert!(!world.alive(entity));
    Ok(())
}

#[test]
fn unregistered_components_are_rejected() -> EcsResult<()> {
    let mut world = World::new();
    let entity = world.new_entity()?;
    let bogus = entity; // a live entity id that was never registered as a component
    let victim = world.new_entity()?;
    assert!(matches!(world.add(victim, bogus), Err(EcsError::ComponentNotRegistered(_))));
    Ok(())
}

#[test]
fn typed_set_rejects_mismatched_types() -> EcsResult<()> {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position")?;
    let entity = world.new_entity()?;
    let result = world.set(entity, position, Velocity { x: 0.0, y: 0.0 });
    assert!(matches!(result, Err(EcsError::Column(_))));
    Ok(())
}
