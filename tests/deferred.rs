// Run:
//   cargo test --test deferred -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ecs_runtime::prelude::*;

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Health(u32);

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Armor(u32);

#[test]
fn commands_after_a_delete_are_silently_dropped() -> EcsResult<()> {
    let mut world = World::new();
    let health = world.register_component::<Health>("Health")?;
    let armor = world.register_component::<Armor>("Armor")?;

    let added: &'static Mutex<Vec<EntityId>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    world.observe(EventKind::OnAdd, armor, move |_, record| {
        added.lock().unwrap().extend_from_slice(&record.entities);
    });

    let entity = world.new_entity()?;

    world.defer_begin()?;
    world.add(entity, health)?;
    world.delete(entity)?;
    world.add(entity, armor)?;
    // Reads still see the pre-deferred state.
    assert!(world.alive(entity));
    assert!(!world.has(entity, health));
    let errors = world.defer_end()?;

    assert!(errors.is_empty(), "dropped commands must not surface as errors");
    assert!(!world.alive(entity));
    assert!(added.lock().unwrap().is_empty(), "no OnAdd may fire for the dropped add");
    Ok(())
}

#[test]
fn replay_applies_commands_in_insertion_order() -> EcsResult<()> {
    let mut world = World::new();
    let health = world.register_component::<Health>("Health")?;

    let entity = world.new_entity()?;

    world.defer_begin()?;
    world.set(entity, health, Health(1))?;
    world.remove(entity, health)?;
    world.set(entity, health, Health(2))?;
    world.defer_end()?;
    assert_eq!(world.get::<Health>(entity, health), Some(&Health(2)));

    world.defer_begin()?;
    world.set(entity, health, Health(3))?;
    world.remove(entity, health)?;
    world.defer_end()?;
    assert_eq!(world.get::<Health>(entity, health), None);
    Ok(())
}

#[test]
fn failing_commands_are_reported_without_aborting_replay() -> EcsResult<()> {
    let mut world = World::new();
    let health = world.register_component::<Health>("Health")?;

    let dead = world.new_entity()?;
    world.delete(dead)?;
    let live = world.new_entity()?;

    world.defer_begin()?;
    world.add(dead, health)?; // fails at replay: target was already dead
    world.add(live, health)?; // must still apply
    let errors = world.defer_end()?;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].index, 0);
    assert_eq!(errors[0].target, dead);
    assert!(matches!(errors[0].source, EcsError::EntityNotAlive(_)));
    assert!(world.has(live, health));
    Ok(())
}

#[test]
fn set_values_are_captured_in_the_arena() -> EcsResult<()> {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default, Clone, PartialEq, Debug)]
    struct Label(String);

    impl Drop for Label {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut world = World::new();
    let label = world.register_component::<Label>("Label")?;
    let entity = world.new_entity()?;

    world.defer_begin()?;
    {
        // The value is copied into the buffer's arena at enqueue time.
        let value = Label("queued".to_string());
        world.set(entity, label, value)?;
    }
    assert_eq!(world.get::<Label>(entity, label), None);
    world.defer_end()?;

    assert_eq!(world.get::<Label>(entity, label).map(|l| l.0.as_str()), Some("queued"));

    // One drop so far: the default value that `set` overwrote at replay.
    let after_replay = DROPS.load(Ordering::SeqCst);
    assert_eq!(after_replay, 1);

    // A set whose target dies in the same buffer destroys its payload when
    // the arena is freed, not never and not twice.
    world.defer_begin()?;
    world.delete(entity)?;
    world.set(entity, label, Label("orphaned".to_string()))?;
    world.defer_end()?;
    // "queued" dropped with the entity, "orphaned" dropped with the arena.
    assert_eq!(DROPS.load(Ordering::SeqCst), after_replay + 2);
    Ok(())
}

#[test]
fn nested_scopes_replay_at_the_outermost_end() -> EcsResult<()> {
    let mut world = World::new();
    let health = world.register_component::<Health>("Health")?;
    let entity = world.new_entity()?;

    world.defer_begin()?;
    world.defer_begin()?;
    world.set(entity, health, Health(5))?;
    let inner = world.defer_end()?;
    assert!(inner.is_empty());
    assert_eq!(world.get::<Health>(entity, health), None, "inner end must not replay");
    world.defer_end()?;
    assert_eq!(world.get::<Health>(entity, health), Some(&Health(5)));
    Ok(())
}

#[test]
fn defer_end_without_begin_is_invalid() -> EcsResult<()> {
    let mut world = World::new();
    assert!(matches!(world.defer_end(), Err(EcsError::InvalidOperation(_))));
    Ok(())
}

#[test]
fn entities_created_while_deferred_are_usable_by_queued_commands() -> EcsResult<()> {
    let mut world = World::new();
    let health = world.register_component::<Health>("Health")?;

    world.defer_begin()?;
    let entity = world.new_with(&[health])?;
    assert!(world.alive(entity));
    assert!(!world.has(entity, health));
    world.defer_end()?;
    assert!(world.has(entity, health));
    Ok(())
}
