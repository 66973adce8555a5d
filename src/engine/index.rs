//! # Entity Index
//!
//! This module owns entity identity and lifecycle: allocating identifiers,
//! detecting stale handles via generations, and mapping every alive entity to
//! its current `(archetype, row)` location.
//!
//! ## Design
//! - Entries live in fixed-size pages that are allocated on demand and never
//!   freed or shrunk, so entry addresses stay stable across growth.
//! - Freed slot indices go on a free list and are reused first.
//! - Freeing a slot bumps its generation (wrapping at the 24-bit encodable
//!   range), which invalidates every previously issued handle for the slot.
//!
//! ## Invariants
//! - An entity is alive iff its encoded generation matches the slot's and the
//!   slot holds a location (`archetype` is `Some`).
//! - A slot with `archetype == None` is a grave: the id was allocated and
//!   later deleted, or allocated and not yet placed.
//! - Lookups of stale ids fail with `EntityNotAlive` and never read the
//!   location belonging to the slot's new occupant.

use log::trace;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::types::{
    entity_generation, entity_index, make_entity, ArchetypeId, EntityId, RowId, GENERATION_MASK,
    WILDCARD,
};

/// Number of entries per index page.
pub const PAGE_SIZE: usize = 4096;

/// One slot of the entity index.
#[derive(Clone, Copy, Debug)]
pub struct EntityEntry {
    /// Archetype currently holding the entity; `None` marks a grave.
    pub archetype: Option<ArchetypeId>,
    /// Row within the archetype.
    pub row: RowId,
    /// Current generation of this slot.
    pub generation: u32,
}

impl EntityEntry {
    const EMPTY: Self = Self { archetype: None, row: 0, generation: 0 };
}

/// Sparse map from entity id to archetype location, plus the id allocator.
///
/// ## Purpose
/// `EntityIndex` is the single source of truth for entity liveness. Every
/// structural mutation routes through it: spawning consults the free list,
/// moves rewrite locations, deletion bumps generations.
///
/// ## Concurrency
/// Not thread-safe. The world serializes access through its owning-thread
/// discipline.
#[derive(Default)]
pub struct EntityIndex {
    pages: Vec<Box<[EntityEntry]>>,
    free: Vec<u32>,
    next_index: u32,
    alive_count: u32,
}

impl EntityIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities currently alive.
    #[inline]
    pub fn alive_count(&self) -> u32 {
        self.alive_count
    }

    #[inline]
    fn entry(&self, index: u32) -> Option<&EntityEntry> {
        self.pages
            .get(index as usize / PAGE_SIZE)
            .map(|page| &page[index as usize % PAGE_SIZE])
    }

    #[inline]
    fn entry_mut(&mut self, index: u32) -> Option<&mut EntityEntry> {
        self.pages
            .get_mut(index as usize / PAGE_SIZE)
            .map(|page| &mut page[index as usize % PAGE_SIZE])
    }

    fn ensure_page(&mut self, index: u32) {
        let page = index as usize / PAGE_SIZE;
        while self.pages.len() <= page {
            self.pages.push(vec![EntityEntry::EMPTY; PAGE_SIZE].into_boxed_slice());
        }
    }

    /// Allocates a fresh entity id.
    ///
    /// ## Behavior
    /// - Reuses a freed slot first; the slot keeps the generation that was
    ///   bumped when it was freed, so the new id never collides with stale
    ///   handles.
    /// - The returned id is a grave until [`set`](Self::set) places it.
    pub fn alloc(&mut self) -> EntityId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.next_index;
                debug_assert!(
                    (index as u64) < WILDCARD,
                    "entity index space exhausted (wildcard slot reached)"
                );
                self.next_index += 1;
                self.ensure_page(index);
                index
            }
        };

        let generation = self.entry(index).map(|e| e.generation).unwrap_or(0);
        let id = make_entity(index, generation);
        trace!("alloc entity index={index} generation={generation}");
        id
    }

    /// Returns `true` if `id` refers to an alive entity.
    #[inline]
    pub fn alive(&self, id: EntityId) -> bool {
        match self.entry(entity_index(id)) {
            Some(entry) => {
                entry.generation == entity_generation(id) && entry.archetype.is_some()
            }
            None => false,
        }
    }

    /// Returns the `(archetype, row)` of an alive entity.
    ///
    /// ## Errors
    /// `EntityNotAlive` when the generation mismatches or the slot is a
    /// grave.
    #[inline]
    pub fn get(&self, id: EntityId) -> EcsResult<(ArchetypeId, RowId)> {
        let entry = self
            .entry(entity_index(id))
            .ok_or(EcsError::EntityNotAlive(id))?;
        if entry.generation != entity_generation(id) {
            return Err(EcsError::EntityNotAlive(id));
        }
        match entry.archetype {
            Some(archetype) => Ok((archetype, entry.row)),
            None => Err(EcsError::EntityNotAlive(id)),
        }
    }

    /// Records the location of `id`.
    ///
    /// Placing a grave slot makes the entity alive. The caller must hold an
    /// id whose generation matches the slot; locations are only rewritten by
    /// structural code that just verified liveness.
    #[inline]
    pub fn set(&mut self, id: EntityId, archetype: ArchetypeId, row: RowId) {
        let was_grave;
        {
            let entry = self
                .entry_mut(entity_index(id))
                .expect("set called with an unallocated entity index");
            debug_assert_eq!(
                entry.generation,
                entity_generation(id),
                "set called with a stale entity handle"
            );
            was_grave = entry.archetype.is_none();
            entry.archetype = Some(archetype);
            entry.row = row;
        }
        if was_grave {
            self.alive_count += 1;
        }
    }

    /// Frees `id`: bumps the slot generation and returns the index to the
    /// free list.
    ///
    /// Freeing an id that is not alive is a no-op.
    pub fn free(&mut self, id: EntityId) {
        let index = entity_index(id);
        let next_generation;
        {
            let Some(entry) = self.entry_mut(index) else { return };
            if entry.generation != entity_generation(id) || entry.archetype.is_none() {
                return;
            }
            entry.archetype = None;
            entry.row = 0;
            entry.generation = entry.generation.wrapping_add(1) & GENERATION_MASK as u32;
            next_generation = entry.generation;
        }
        self.free.push(index);
        self.alive_count -= 1;
        trace!("free entity index={index} next_generation={next_generation}");
    }
}
