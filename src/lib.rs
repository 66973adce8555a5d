//! # ECS Runtime
//!
//! Archetype-based Entity-Component-System runtime core: an in-memory data
//! engine that stores heterogeneous component data keyed by entity
//! identifiers, groups entities by exact component composition, and executes
//! structural mutations and typed queries at high throughput.
//!
//! ## Design Goals
//! - Archetype (structure-of-arrays) storage for cache efficiency
//! - O(1)-amortized structural mutations through a cached transition graph
//! - Deferred command replay for mutation during iteration and observers
//! - Safe, explicit data access declared per query term
//!
//! ## Quick start
//! ```
//! use ecs_runtime::prelude::*;
//!
//! #[derive(Default, Clone, Copy, PartialEq, Debug)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut world = World::new();
//! let position = world.register_component::<Position>("Position").unwrap();
//!
//! let entity = world.new_entity().unwrap();
//! world.set(entity, position, Position { x: 1.0, y: 2.0 }).unwrap();
//! assert_eq!(world.get::<Position>(entity, position), Some(&Position { x: 1.0, y: 2.0 }));
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::World;

pub use engine::types::{
    entity_generation,
    entity_index,
    is_pair,
    pair,
    pair_object,
    pair_relation,
    strip_flags,
    ArchetypeId,
    ComponentId,
    EntityId,
    EntityStr,
    RowId,
    CHILDOF,
    INSTANCEOF,
    PAIR,
    WILDCARD,
};

pub use engine::registry::ComponentDescriptor;

pub use engine::filter::{Filter, FilterBuilder, InOut, Term, TermOper, TermSource};

pub use engine::query::{QueryId, QueryIter, TableBatch};

pub use engine::events::{EventKind, EventRecord, ObserverId};

pub use engine::error::{
    ColumnError,
    CommandError,
    EcsError,
    EcsResult,
    FilterError,
    InvalidOperationKind,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used runtime types.
///
/// Import with:
/// ```rust
/// use ecs_runtime::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        pair,
        EcsError,
        EcsResult,
        EntityId,
        EventKind,
        Filter,
        FilterBuilder,
        InOut,
        QueryId,
        TableBatch,
        Term,
        TermSource,
        World,
        CHILDOF,
        INSTANCEOF,
        WILDCARD,
    };
}
