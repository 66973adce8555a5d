//! # Query Engine
//!
//! Matches filters against archetypes, maintains a cached matched-set per
//! query, and produces batched iterators over column data.
//!
//! ## Matched-set maintenance
//! A query's matched-set is computed once at creation and extended whenever a
//! new archetype is interned: every live query re-evaluates against the new
//! archetype, and matching queries record it in insertion order. Archetypes
//! never mutate their type (new archetypes are created instead) and are never
//! destroyed mid-run, so cached sets stay valid; iteration order is stable
//! across calls that did not change the matched-set.
//!
//! ## Shared (inherited) components
//! An archetype whose type carries an `INSTANCEOF` base matches a term it
//! does not own when the base entity (transitively) owns the component. The
//! batch then reports a *shared* column: one value, broadcast over every row.
//!
//! ## Access discipline
//! Terms declare `in`/`out`/`inout` access. A read-only iteration handle
//! rejects any column access on a term that is not `in` with
//! `ColumnAccessViolation`; mutable access additionally requires the term to
//! declare write intent.
//!
//! ## Safety model
//! Batches expose component slices reconstructed from raw column pointers.
//! Mutable slices are handed out from a shared world borrow; correctness
//! relies on execution discipline (single-threaded mutation, the sealed
//! read-only window for parallel reads) rather than the borrow checker.
//! Structural mutation while a batch is alive is rejected by the world's
//! borrow on the iterator.

use std::any::TypeId;
use std::marker::PhantomData;

use crate::engine::archetype::{Archetype, ArchetypeStore};
use crate::engine::column::Column;
use crate::engine::error::{ColumnError, EcsResult};
use crate::engine::filter::{Filter, InOut, Term, TermOper, TermSource};
use crate::engine::index::EntityIndex;
use crate::engine::registry::ComponentDescriptor;
use crate::engine::types::{
    id_matches, is_flagged, strip_flags, ArchetypeId, EntityId, CHILDOF, INSTANCEOF,
};
use crate::engine::world::World;

/// Maximum depth of the `INSTANCEOF` chain walked during shared resolution.
pub(crate) const MAX_INHERITANCE_DEPTH: u32 = 16;

/// Handle to a registered query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryId(pub(crate) u32);

/// Cached state of one query.
pub struct QueryState {
    pub(crate) filter: Filter,
    pub(crate) matched: Vec<ArchetypeId>,
    pub(crate) generation: u32,
}

/// Owns every query registered with a world.
#[derive(Default)]
pub struct QueryEngine {
    queries: Vec<QueryState>,
}

impl QueryEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered queries.
    #[inline]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Returns `true` if no queries are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub(crate) fn register(&mut self, filter: Filter) -> QueryId {
        let id = QueryId(self.queries.len() as u32);
        self.queries.push(QueryState { filter, matched: Vec::new(), generation: 0 });
        id
    }

    pub(crate) fn state(&self, id: QueryId) -> &QueryState {
        &self.queries[id.0 as usize]
    }

    pub(crate) fn push_match(&mut self, id: QueryId, archetype: ArchetypeId) {
        let state = &mut self.queries[id.0 as usize];
        state.matched.push(archetype);
        state.generation = state.generation.wrapping_add(1);
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = QueryId> {
        (0..self.queries.len() as u32).map(QueryId)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Matching
// ─────────────────────────────────────────────────────────────────────────────

/// Finds the first (lowest) type member matching `pattern`.
pub(crate) fn find_owned(type_ids: &[EntityId], pattern: EntityId) -> Option<EntityId> {
    type_ids.iter().copied().find(|&id| id_matches(pattern, id))
}

fn is_inheritable(pattern: EntityId) -> bool {
    !is_flagged(pattern)
}

fn type_owns_or_inherits(
    store: &ArchetypeStore,
    index: &EntityIndex,
    archetype: &Archetype,
    pattern: EntityId,
    depth: u32,
) -> bool {
    if find_owned(archetype.type_ids(), pattern).is_some() {
        return true;
    }
    if !is_inheritable(pattern) || depth == 0 {
        return false;
    }
    for &id in archetype.type_ids() {
        if id & INSTANCEOF == 0 {
            continue;
        }
        let base = strip_flags(id);
        if let Ok((base_archetype, _)) = index.get(base) {
            let base_archetype = store.archetype(base_archetype);
            if type_owns_or_inherits(store, index, base_archetype, pattern, depth - 1) {
                return true;
            }
        }
    }
    false
}

fn entity_owns_or_inherits(
    store: &ArchetypeStore,
    index: &EntityIndex,
    entity: EntityId,
    pattern: EntityId,
) -> bool {
    match index.get(entity) {
        Ok((archetype, _)) => type_owns_or_inherits(
            store,
            index,
            store.archetype(archetype),
            pattern,
            MAX_INHERITANCE_DEPTH,
        ),
        Err(_) => false,
    }
}

/// The `CHILDOF` target of an archetype's type, if any.
pub(crate) fn archetype_parent(archetype: &Archetype) -> Option<EntityId> {
    archetype
        .type_ids()
        .iter()
        .copied()
        .find(|&id| id & CHILDOF != 0 && id & INSTANCEOF == 0)
        .map(strip_flags)
}

fn term_present(
    store: &ArchetypeStore,
    index: &EntityIndex,
    archetype: &Archetype,
    term: &Term,
) -> bool {
    match term.source {
        TermSource::This => {
            type_owns_or_inherits(store, index, archetype, term.id, MAX_INHERITANCE_DEPTH)
        }
        TermSource::Parent => match archetype_parent(archetype) {
            Some(parent) => entity_owns_or_inherits(store, index, parent, term.id),
            None => false,
        },
        TermSource::Entity(entity) => entity_owns_or_inherits(store, index, entity, term.id),
    }
}

/// Evaluates a filter against one archetype.
///
/// `And` terms must be present (owned or inherited), `Not` terms must be
/// absent from the archetype's own type, contiguous `Or` runs need at least
/// one present member, and `Optional` terms never constrain.
pub(crate) fn archetype_matches(
    store: &ArchetypeStore,
    index: &EntityIndex,
    archetype: &Archetype,
    filter: &Filter,
) -> bool {
    let terms = filter.terms();
    let mut i = 0;
    while i < terms.len() {
        let term = &terms[i];
        match term.oper {
            TermOper::Optional => i += 1,
            TermOper::Not => {
                if find_owned(archetype.type_ids(), term.id).is_some() {
                    return false;
                }
                i += 1;
            }
            TermOper::And => {
                if !term_present(store, index, archetype, term) {
                    return false;
                }
                i += 1;
            }
            TermOper::Or => {
                let mut any = false;
                while i < terms.len() && terms[i].oper == TermOper::Or {
                    if !any && term_present(store, index, archetype, &terms[i]) {
                        any = true;
                    }
                    i += 1;
                }
                if !any {
                    return false;
                }
            }
        }
    }
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Iteration
// ─────────────────────────────────────────────────────────────────────────────

enum BatchColumn<'w> {
    /// The archetype owns a data column for the matched id.
    Owned { column: &'w Column, id: EntityId },
    /// The value is resolved on another entity and broadcast over the batch.
    Shared { ptr: *const u8, descriptor: ComponentDescriptor, id: EntityId },
    /// The id matched but carries no data (tag or relationship id).
    Presence { id: EntityId },
    /// The term matched nothing in this batch (absent optional or `Not`).
    Absent,
}

/// One archetype's worth of query results.
///
/// Column accessors are per-term: term indices follow the filter's
/// normalized term order.
pub struct TableBatch<'w> {
    archetype: &'w Archetype,
    terms: &'w [Term],
    columns: Vec<BatchColumn<'w>>,
    readonly: bool,
    _world: PhantomData<&'w World>,
}

impl<'w> TableBatch<'w> {
    /// Number of rows in this batch.
    #[inline]
    pub fn count(&self) -> usize {
        self.archetype.len()
    }

    /// Entity ids of the rows, in row order.
    #[inline]
    pub fn entities(&self) -> &'w [EntityId] {
        self.archetype.entities()
    }

    /// The archetype backing this batch.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeId {
        self.archetype.id()
    }

    fn column_at(&self, term: usize) -> EcsResult<&BatchColumn<'w>> {
        self.columns
            .get(term)
            .ok_or_else(|| ColumnError::IndexOutOfRange { index: term, count: self.columns.len() }.into())
    }

    fn check_read(&self, term: usize) -> EcsResult<()> {
        if self.readonly && self.terms[term].inout != InOut::In {
            return Err(ColumnError::AccessViolation {
                index: term,
                reason: "read-only handles may only access `in` terms",
            }
            .into());
        }
        Ok(())
    }

    fn check_write(&self, term: usize) -> EcsResult<()> {
        if self.readonly {
            return Err(ColumnError::AccessViolation {
                index: term,
                reason: "mutable access through a read-only handle",
            }
            .into());
        }
        match self.terms[term].inout {
            InOut::Out | InOut::InOut => Ok(()),
            _ => Err(ColumnError::AccessViolation {
                index: term,
                reason: "term does not declare write access",
            }
            .into()),
        }
    }

    fn check_type<T: 'static>(descriptor: &ComponentDescriptor) -> EcsResult<()> {
        if descriptor.type_id == Some(TypeId::of::<T>()) {
            Ok(())
        } else {
            Err(ColumnError::TypeMismatch {
                stored: descriptor.type_name,
                requested: std::any::type_name::<T>(),
            }
            .into())
        }
    }

    /// The concrete id the term matched in this archetype.
    ///
    /// For wildcard terms this reports the resolved (lowest) id: a
    /// `ChildOf(*)` term yields the `CHILDOF|parent` entry of this
    /// archetype.
    pub fn term_id(&self, term: usize) -> EcsResult<EntityId> {
        Ok(match self.column_at(term)? {
            BatchColumn::Owned { id, .. }
            | BatchColumn::Shared { id, .. }
            | BatchColumn::Presence { id } => *id,
            BatchColumn::Absent => self.terms[term].id,
        })
    }

    /// Returns `true` if the term resolved to a shared (broadcast) column.
    pub fn is_shared(&self, term: usize) -> EcsResult<bool> {
        Ok(matches!(self.column_at(term)?, BatchColumn::Shared { .. }))
    }

    /// Returns `true` if the term matched anything in this batch.
    pub fn is_set(&self, term: usize) -> EcsResult<bool> {
        Ok(!matches!(self.column_at(term)?, BatchColumn::Absent))
    }

    /// Immutable view of an owned column.
    ///
    /// ## Errors
    /// - `ColumnAccessViolation` through a read-only handle on a non-`in`
    ///   term.
    /// - `ColumnIsShared` when the term resolved to a broadcast value.
    /// - `ColumnTypeMismatch` when `T` is not the registered type.
    pub fn column<T: 'static>(&self, term: usize) -> EcsResult<&'w [T]> {
        let column = self.column_at(term)?;
        self.check_read(term)?;
        match column {
            BatchColumn::Owned { column, .. } => {
                Self::check_type::<T>(column.descriptor())?;
                // SAFETY: the column stores `len` initialized elements of T
                // (type checked above); the borrow is tied to the world
                // borrow held by the iterator.
                Ok(unsafe {
                    std::slice::from_raw_parts(column.as_ptr().cast::<T>(), column.len())
                })
            }
            BatchColumn::Shared { .. } => Err(ColumnError::IsShared { index: term }.into()),
            BatchColumn::Presence { .. } | BatchColumn::Absent => {
                Err(ColumnError::NoData { index: term }.into())
            }
        }
    }

    /// Immutable view of an optional column; `None` when the term is absent
    /// from this batch.
    pub fn column_opt<T: 'static>(&self, term: usize) -> EcsResult<Option<&'w [T]>> {
        match self.column_at(term)? {
            BatchColumn::Absent => Ok(None),
            _ => self.column::<T>(term).map(Some),
        }
    }

    /// Mutable view of an owned column.
    ///
    /// ## Errors
    /// As [`column`](Self::column), plus `ColumnAccessViolation` when the
    /// term does not declare `out`/`inout` access.
    ///
    /// ## Safety model
    /// The slice aliases the world borrow held by the iterator; callers must
    /// not obtain two views of the same column from one batch. This is the
    /// discipline-enforced contract of the batch layer.
    pub fn column_mut<T: 'static>(&self, term: usize) -> EcsResult<&'w mut [T]> {
        let column = self.column_at(term)?;
        self.check_write(term)?;
        match column {
            BatchColumn::Owned { column, .. } => {
                Self::check_type::<T>(column.descriptor())?;
                // SAFETY: as `column`; write intent was declared by the term
                // and verified above, and mutation is confined to the
                // world's owning thread.
                Ok(unsafe {
                    std::slice::from_raw_parts_mut(column.as_ptr().cast::<T>(), column.len())
                })
            }
            BatchColumn::Shared { .. } => Err(ColumnError::IsShared { index: term }.into()),
            BatchColumn::Presence { .. } | BatchColumn::Absent => {
                Err(ColumnError::NoData { index: term }.into())
            }
        }
    }

    /// The broadcast value of a shared column.
    ///
    /// ## Errors
    /// `ColumnIsNotShared` when the archetype owns the column.
    pub fn shared<T: 'static>(&self, term: usize) -> EcsResult<&'w T> {
        let column = self.column_at(term)?;
        self.check_read(term)?;
        match column {
            BatchColumn::Shared { ptr, descriptor, .. } => {
                Self::check_type::<T>(descriptor)?;
                // SAFETY: the pointer targets one initialized element of T
                // on the resolved source entity; lifetime is tied to the
                // world borrow.
                Ok(unsafe { &*ptr.cast::<T>() })
            }
            BatchColumn::Owned { .. } => Err(ColumnError::IsNotShared { index: term }.into()),
            BatchColumn::Presence { .. } | BatchColumn::Absent => {
                Err(ColumnError::NoData { index: term }.into())
            }
        }
    }
}

pub(crate) enum ResolvedCell {
    /// The component resolved to a data cell on the source entity.
    Data {
        /// Pointer to the cell.
        ptr: *const u8,
        /// Descriptor of the stored type.
        descriptor: ComponentDescriptor,
        /// Concrete matched id.
        id: EntityId,
    },
    /// The component is present but carries no data.
    Presence {
        /// Concrete matched id.
        id: EntityId,
    },
}

pub(crate) fn resolve_entity_cell(
    store: &ArchetypeStore,
    index: &EntityIndex,
    entity: EntityId,
    pattern: EntityId,
    depth: u32,
) -> Option<ResolvedCell> {
    let (archetype_id, row) = index.get(entity).ok()?;
    let archetype = store.archetype(archetype_id);

    if let Some(concrete) = find_owned(archetype.type_ids(), pattern) {
        return Some(match archetype.column_index_of(concrete) {
            Some(column) => {
                let column = archetype.column(column);
                ResolvedCell::Data {
                    ptr: column.cell(row as usize),
                    descriptor: *column.descriptor(),
                    id: concrete,
                }
            }
            None => ResolvedCell::Presence { id: concrete },
        });
    }

    if !is_inheritable(pattern) || depth == 0 {
        return None;
    }
    for &id in archetype.type_ids() {
        if id & INSTANCEOF == 0 {
            continue;
        }
        let base = strip_flags(id);
        if let Some(cell) = resolve_entity_cell(store, index, base, pattern, depth - 1) {
            return Some(cell);
        }
    }
    None
}

pub(crate) fn build_batch<'w>(
    store: &'w ArchetypeStore,
    index: &'w EntityIndex,
    archetype: &'w Archetype,
    terms: &'w [Term],
    readonly: bool,
) -> TableBatch<'w> {
    let mut columns = Vec::with_capacity(terms.len());
    for term in terms {
        let column = match term.oper {
            TermOper::Not => BatchColumn::Absent,
            _ => match term.source {
                TermSource::This => match find_owned(archetype.type_ids(), term.id) {
                    Some(concrete) => match archetype.column_index_of(concrete) {
                        Some(at) => {
                            BatchColumn::Owned { column: archetype.column(at), id: concrete }
                        }
                        None => BatchColumn::Presence { id: concrete },
                    },
                    None => match resolve_shared_for_this(store, index, archetype, term.id) {
                        Some(cell) => cell,
                        None => BatchColumn::Absent,
                    },
                },
                TermSource::Parent => match archetype_parent(archetype) {
                    Some(parent) => resolve_remote(store, index, parent, term.id),
                    None => BatchColumn::Absent,
                },
                TermSource::Entity(entity) => resolve_remote(store, index, entity, term.id),
            },
        };
        columns.push(column);
    }
    TableBatch { archetype, terms, columns, readonly, _world: PhantomData }
}

fn resolve_shared_for_this<'w>(
    store: &'w ArchetypeStore,
    index: &'w EntityIndex,
    archetype: &Archetype,
    pattern: EntityId,
) -> Option<BatchColumn<'w>> {
    if !is_inheritable(pattern) {
        return None;
    }
    for &id in archetype.type_ids() {
        if id & INSTANCEOF == 0 {
            continue;
        }
        let base = strip_flags(id);
        if let Some(cell) =
            resolve_entity_cell(store, index, base, pattern, MAX_INHERITANCE_DEPTH)
        {
            return Some(match cell {
                ResolvedCell::Data { ptr, descriptor, id } => {
                    BatchColumn::Shared { ptr, descriptor, id }
                }
                ResolvedCell::Presence { id } => BatchColumn::Presence { id },
            });
        }
    }
    None
}

fn resolve_remote<'w>(
    store: &'w ArchetypeStore,
    index: &'w EntityIndex,
    entity: EntityId,
    pattern: EntityId,
) -> BatchColumn<'w> {
    match resolve_entity_cell(store, index, entity, pattern, MAX_INHERITANCE_DEPTH) {
        Some(ResolvedCell::Data { ptr, descriptor, id }) => {
            BatchColumn::Shared { ptr, descriptor, id }
        }
        Some(ResolvedCell::Presence { id }) => BatchColumn::Presence { id },
        None => BatchColumn::Absent,
    }
}

/// Iterator over a query's matched archetypes.
///
/// Yields one [`TableBatch`] per non-empty matched archetype, in matched-set
/// insertion order.
pub struct QueryIter<'w> {
    pub(crate) store: &'w ArchetypeStore,
    pub(crate) index: &'w EntityIndex,
    pub(crate) terms: &'w [Term],
    pub(crate) matched: &'w [ArchetypeId],
    pub(crate) next: usize,
    pub(crate) readonly: bool,
}

impl<'w> Iterator for QueryIter<'w> {
    type Item = TableBatch<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.matched.len() {
            let archetype = self.store.archetype(self.matched[self.next]);
            self.next += 1;
            if archetype.is_empty() {
                continue;
            }
            return Some(build_batch(self.store, self.index, archetype, self.terms, self.readonly));
        }
        None
    }
}
