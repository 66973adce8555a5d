//! # Archetype Tables and the Archetype Store
//!
//! An archetype stores every entity that shares an identical component set.
//! Component data lives in parallel contiguous columns (structure-of-arrays)
//! alongside an entity-id column, so batched iteration touches memory
//! linearly.
//!
//! ## Identity
//! An archetype's identity is its canonical type: the strictly ascending list
//! of component ids. The store interns archetypes by hashing the sorted list,
//! falling back to a lexicographic compare of the id lists on hash collision.
//! Two archetypes with the same type set are the same object.
//!
//! ## Invariants
//! - Within one archetype, every data column has the same length, and that
//!   length equals the entity column's length.
//! - Every row of `entities` names an alive entity whose index entry points
//!   back at this archetype and row.
//! - `type_ids` is strictly ascending.
//! - Archetypes are never destroyed mid-run, so `ArchetypeId` values stay
//!   valid for the world's lifetime; the transition graph and query
//!   matched-sets rely on this.
//! - An archetype's edges are a cache, reconstructible from the type alone;
//!   a missing edge means "not yet computed", never "no such transition".
//!
//! ## Row movement
//! [`ArchetypeStore::move_row`] is the only path that transfers component
//! memory between archetypes. Its ordering is deterministic: source-only
//! cells are destroyed first, destination-only cells are default-initialized
//! next, and shared cells are copied last.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use log::debug;

use crate::engine::column::Column;
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::query::QueryId;
use crate::engine::registry::ComponentRegistry;
use crate::engine::types::{is_flagged, ArchetypeId, EntityId, EntityStr, RowId};

/// Cached add/remove transitions for one component id.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArchetypeEdge {
    /// Destination after adding the component, if computed.
    pub add: Option<ArchetypeId>,
    /// Destination after removing the component, if computed.
    pub remove: Option<ArchetypeId>,
}

/// A table of entities sharing an identical component set.
pub struct Archetype {
    id: ArchetypeId,
    type_ids: Vec<EntityId>,
    column_ids: Vec<EntityId>,
    columns: Vec<Column>,
    entities: Vec<EntityId>,
    pub(crate) edges: HashMap<EntityId, ArchetypeEdge>,
    pub(crate) matched: Vec<QueryId>,
}

impl Archetype {
    /// Stable identifier of this archetype within the store.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The canonical sorted type list.
    #[inline]
    pub fn type_ids(&self) -> &[EntityId] {
        &self.type_ids
    }

    /// Entity ids stored in this archetype, one per row.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Number of entities in this archetype.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the archetype holds no entities.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns `true` if the type contains `id` (full 64-bit equality).
    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.type_ids.binary_search(&id).is_ok()
    }

    /// Index of the data column for `id`, if the id carries data here.
    #[inline]
    pub fn column_index_of(&self, id: EntityId) -> Option<usize> {
        self.column_ids.binary_search(&id).ok()
    }

    /// The data column at `index`.
    #[inline]
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    #[inline]
    pub(crate) fn column_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    /// Ids of the data-bearing subset of the type, ascending.
    #[inline]
    pub fn column_ids(&self) -> &[EntityId] {
        &self.column_ids
    }

    /// Cached transition edge for `id`, if previously computed.
    #[inline]
    pub fn edge(&self, id: EntityId) -> Option<&ArchetypeEdge> {
        self.edges.get(&id)
    }

    /// Raw byte view of a data column, for the serialization hook surface.
    pub fn column_bytes(&self, id: EntityId) -> Option<&[u8]> {
        let index = self.column_index_of(id)?;
        let column = &self.columns[index];
        let bytes = column.len() * column.descriptor().size as usize;
        // SAFETY: the column owns `bytes` initialized bytes at its base
        // pointer; the returned borrow ties them to &self.
        Some(unsafe { std::slice::from_raw_parts(column.as_ptr(), bytes) })
    }

    #[cfg(debug_assertions)]
    fn assert_column_parity(&self) {
        for column in &self.columns {
            debug_assert_eq!(
                column.len(),
                self.entities.len(),
                "column length diverged from entity count"
            );
        }
    }

    #[cfg(not(debug_assertions))]
    fn assert_column_parity(&self) {}
}

/// Owns every archetype and interns them by canonical type.
///
/// The empty archetype (id 0) always exists and is the initial location of
/// every new entity.
pub struct ArchetypeStore {
    archetypes: Vec<Archetype>,
    by_hash: HashMap<u64, Vec<ArchetypeId>>,
}

/// Identifier of the always-present empty archetype.
pub const EMPTY_ARCHETYPE: ArchetypeId = 0;

fn hash_type(type_ids: &[EntityId]) -> u64 {
    let mut hasher = DefaultHasher::new();
    type_ids.hash(&mut hasher);
    hasher.finish()
}

impl ArchetypeStore {
    /// Creates a store containing only the empty archetype.
    pub fn new() -> Self {
        let mut store = Self { archetypes: Vec::new(), by_hash: HashMap::new() };
        let registry = ComponentRegistry::new();
        let (id, _) = store
            .get_or_create(&[], &registry)
            .expect("creating the empty archetype cannot fail");
        debug_assert_eq!(id, EMPTY_ARCHETYPE);
        store
    }

    /// Number of archetypes, including the empty one.
    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Returns `true` if the store holds no archetypes. Never true after
    /// construction.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// The archetype with the given id.
    #[inline]
    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id as usize]
    }

    /// Mutable access to the archetype with the given id.
    #[inline]
    pub fn archetype_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id as usize]
    }

    /// Iterates all archetypes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Interns the archetype for a canonical type, creating it on first use.
    ///
    /// ## Behavior
    /// - Idempotent: the same type always yields the same id, regardless of
    ///   the insertion order that produced the type elsewhere.
    /// - Data columns are created for every type member the registry resolves
    ///   to a data descriptor; tags and relationship ids are presence-only.
    ///
    /// ## Errors
    /// `ComponentNotRegistered` if a plain (unflagged) member was never
    /// registered. Flagged ids and pairs are valid type members without
    /// registration.
    ///
    /// ## Returns
    /// `(id, created)` where `created` reports whether a new archetype was
    /// built; the caller is responsible for re-evaluating live queries when
    /// it was.
    pub fn get_or_create(
        &mut self,
        type_ids: &[EntityId],
        registry: &ComponentRegistry,
    ) -> EcsResult<(ArchetypeId, bool)> {
        debug_assert!(type_ids.windows(2).all(|w| w[0] < w[1]), "type must be strictly ascending");

        let hash = hash_type(type_ids);
        if let Some(candidates) = self.by_hash.get(&hash) {
            for &candidate in candidates {
                if self.archetypes[candidate as usize].type_ids == type_ids {
                    return Ok((candidate, false));
                }
            }
        }

        for &id in type_ids {
            if !is_flagged(id) && !registry.is_registered(id) {
                return Err(EcsError::ComponentNotRegistered(id));
            }
        }

        let mut column_ids = Vec::new();
        let mut columns = Vec::new();
        for &id in type_ids {
            if let Some(descriptor) = registry.data_descriptor(id) {
                column_ids.push(id);
                columns.push(Column::new(*descriptor));
            }
        }

        let id = self.archetypes.len() as ArchetypeId;
        self.archetypes.push(Archetype {
            id,
            type_ids: type_ids.to_vec(),
            column_ids,
            columns,
            entities: Vec::new(),
            edges: HashMap::new(),
            matched: Vec::new(),
        });
        self.by_hash.entry(hash).or_default().push(id);
        debug!(
            "created archetype {id} [{}]",
            type_ids.iter().map(|&t| EntityStr(t).to_string()).collect::<Vec<_>>().join(", ")
        );
        Ok((id, true))
    }

    /// Appends `entity` to an archetype, default-initializing every data
    /// column, and returns the new row.
    pub fn insert(&mut self, archetype: ArchetypeId, entity: EntityId) -> RowId {
        let table = &mut self.archetypes[archetype as usize];
        let row = table.entities.len() as RowId;
        table.entities.push(entity);
        for column in &mut table.columns {
            column.push_default();
        }
        table.assert_column_parity();
        row
    }

    /// Removes a row with swap-and-pop, destroying its component values.
    ///
    /// Returns the id of the entity that was relocated into `row`, if the
    /// removed row was not the last one. The caller must rewrite that
    /// entity's index entry (and may use the id for event emission).
    pub fn remove_row(&mut self, archetype: ArchetypeId, row: RowId) -> Option<EntityId> {
        let table = &mut self.archetypes[archetype as usize];
        let row = row as usize;
        debug_assert!(row < table.entities.len(), "remove_row out of range");

        for column in &mut table.columns {
            column.swap_remove(row);
        }
        table.entities.swap_remove(row);
        table.assert_column_parity();
        table.entities.get(row).copied()
    }

    /// Moves a row from `src` to `dst`, the only path that transfers
    /// component memory between archetypes.
    ///
    /// ## Behavior
    /// Deterministic ordering: cells present only in `src` are destroyed,
    /// cells introduced by `dst` are default-initialized, and cells present
    /// in both are copied last. The source row is then swap-popped without
    /// destroying the moved-out values.
    ///
    /// ## Returns
    /// `(dst_row, moved)` where `moved` is the source entity relocated into
    /// the vacated row, if any.
    ///
    /// ## Panics
    /// `src` and `dst` must differ; same-archetype moves are a caller bug.
    pub fn move_row(
        &mut self,
        src: ArchetypeId,
        src_row: RowId,
        dst: ArchetypeId,
    ) -> (RowId, Option<EntityId>) {
        assert!(src != dst, "move_row requires distinct archetypes");
        let (source, destination) = self.pair_mut(src, dst);
        let row = src_row as usize;
        debug_assert!(row < source.entities.len(), "move_row source row out of range");

        let entity = source.entities[row];
        let dst_row = destination.entities.len() as RowId;

        // Drops: source-only cells.
        for i in 0..source.column_ids.len() {
            let id = source.column_ids[i];
            if destination.column_index_of(id).is_none() {
                source.columns[i].drop_cell(row);
            }
        }

        // Inits: destination-only cells.
        for j in 0..destination.column_ids.len() {
            let id = destination.column_ids[j];
            if source.column_index_of(id).is_none() {
                destination.columns[j].push_default();
            }
        }

        // Copies: cells present on both sides.
        for i in 0..source.column_ids.len() {
            let id = source.column_ids[i];
            if let Some(j) = destination.column_index_of(id) {
                // SAFETY: the source cell is initialized; ownership moves to
                // the destination and the source row is popped below without
                // running destructors.
                unsafe {
                    let cell = source.columns[i].cell(row);
                    destination.columns[j].push_moved(cell);
                }
            }
        }
        destination.entities.push(entity);

        // Pop the vacated source row; values were dropped or moved above.
        for column in &mut source.columns {
            column.swap_remove_raw(row);
        }
        source.entities.swap_remove(row);

        let moved = source.entities.get(row).copied();
        source.assert_column_parity();
        destination.assert_column_parity();
        (dst_row, moved)
    }

    /// Borrows two distinct archetypes mutably.
    fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        assert!(a != b, "source and destination archetype must differ");
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.archetypes.split_at_mut(high as usize);
        let low_ref = &mut head[low as usize];
        let high_ref = &mut tail[0];
        if a < b { (low_ref, high_ref) } else { (high_ref, low_ref) }
    }
}

impl Default for ArchetypeStore {
    fn default() -> Self {
        Self::new()
    }
}
