//! Shared setup for the runtime benchmarks.

use ecs_runtime::prelude::*;

#[derive(Default, Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Default, Clone, Copy)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

pub const ENTITIES_SMALL: usize = 10_000;
pub const ENTITIES_MED: usize = 100_000;

pub struct Fixture {
    pub world: World,
    pub position: EntityId,
    pub velocity: EntityId,
}

pub fn make_world() -> Fixture {
    let mut world = World::new();
    let position = world.register_component::<Position>("Position").unwrap();
    let velocity = world.register_component::<Velocity>("Velocity").unwrap();
    Fixture { world, position, velocity }
}

pub fn populate(fixture: &mut Fixture, count: usize) {
    for i in 0..count {
        let entity = fixture.world.new_entity().unwrap();
        fixture
            .world
            .set(entity, fixture.position, Position { x: i as f32, y: 0.0 })
            .unwrap();
        fixture
            .world
            .set(entity, fixture.velocity, Velocity { x: 1.0, y: 1.0 })
            .unwrap();
    }
}
