//! # World: the mutation dispatcher
//!
//! The world owns every core subsystem (entity index, archetype store,
//! component registry, query engine, event bus, and the deferred command
//! buffer) and routes all structural mutations through one dispatcher.
//!
//! ## Data flow
//! A mutation call either queues on the command buffer (when a deferred
//! scope is open) or: looks up the entity in the index, consults the
//! transition graph for the destination archetype, moves the row, rewrites
//! index entries, and publishes events.
//!
//! ## Execution discipline
//! A world has a designated owning thread recorded at construction; all
//! mutation APIs require that thread. Read-only query iteration may be
//! dispatched to worker threads only inside a sealed read-only window
//! (`begin_readonly`/`end_readonly`), during which mutation APIs fail with
//! `InvalidOperation`. Both guards are active under the `checked` feature
//! and compile out without it, where violating them is a contract
//! violation. Stale-id rejection is not a checked-mode guard: the index
//! must compare generations to resolve a row at all, so stale lookups
//! always fail with `EntityNotAlive`.
//!
//! ## Ordering guarantees
//! - Within a non-deferred call sequence, observers see effects in call
//!   order.
//! - Within a deferred scope, observers see effects in replay (insertion)
//!   order.
//! - Row order inside an archetype is not stable across mutations that touch
//!   it (swap-and-pop).

use std::any::TypeId;
use std::collections::HashSet;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::{trace, warn};

use crate::engine::archetype::{ArchetypeStore, EMPTY_ARCHETYPE};
use crate::engine::commands::{CommandBuffer, CommandKind};
use crate::engine::error::{
    CommandError, ColumnError, EcsError, EcsResult, InvalidOperationKind,
};
use crate::engine::events::{EventBus, EventKind, EventRecord, ObserverFn, ObserverId};
use crate::engine::filter::{Filter, InOut, TermOper};
use crate::engine::graph::{archetype_after_add, archetype_after_remove};
use crate::engine::index::EntityIndex;
use crate::engine::query::{
    self, archetype_matches, build_batch, QueryEngine, QueryId, QueryIter, ResolvedCell,
    TableBatch,
};
use crate::engine::registry::{ComponentDescriptor, ComponentRegistry};
use crate::engine::types::{
    is_wildcard, pair, ArchetypeId, ComponentId, EntityId, EntityStr, RowId, CHILDOF, INSTANCEOF,
};

use rayon::prelude::*;

/// The ECS world: all state, one owner thread, one dispatcher.
pub struct World {
    index: EntityIndex,
    store: ArchetypeStore,
    registry: ComponentRegistry,
    queries: QueryEngine,
    events: EventBus,
    commands: CommandBuffer,
    defer_depth: u32,
    readonly: bool,
    dispatching: bool,
    owner: ThreadId,
}

impl World {
    /// Creates an empty world owned by the calling thread.
    pub fn new() -> Self {
        Self {
            index: EntityIndex::new(),
            store: ArchetypeStore::new(),
            registry: ComponentRegistry::new(),
            queries: QueryEngine::new(),
            events: EventBus::new(),
            commands: CommandBuffer::new(),
            defer_depth: 0,
            readonly: false,
            dispatching: false,
            owner: thread::current().id(),
        }
    }

    // ─── Guards ──────────────────────────────────────────────────────────────

    /// Precondition checks shared by every mutation entry point. Both
    /// checks compile out without the `checked` feature, where violating
    /// them is a contract violation instead.
    fn guard_mutation(&self) -> EcsResult<()> {
        if cfg!(feature = "checked") {
            if thread::current().id() != self.owner {
                return Err(EcsError::InvalidOperation(InvalidOperationKind::WrongThread));
            }
            if self.readonly {
                return Err(EcsError::InvalidOperation(InvalidOperationKind::ReadOnlyWindow));
            }
        }
        Ok(())
    }

    // ─── Component registration ──────────────────────────────────────────────

    /// Registers Rust type `T` as a component and returns its id.
    ///
    /// Components are entities: the returned id is a live entity allocated
    /// from the same index as everything else. Registration is idempotent
    /// per type.
    ///
    /// New cells are initialized with `T::default()` and destroyed with
    /// `drop_in_place`.
    pub fn register_component<T: Default + Send + Sync + 'static>(
        &mut self,
        name: &'static str,
    ) -> EcsResult<ComponentId> {
        self.guard_mutation()?;
        if let Some(existing) = self.registry.id_of::<T>() {
            return Ok(existing);
        }
        let id = self.spawn_empty();
        self.registry.insert(ComponentDescriptor::of::<T>(name).with_id(id));
        trace!("registered component {name} as {}", EntityStr(id));
        Ok(id)
    }

    /// Registers a zero-size, presence-only tag component.
    pub fn register_tag(&mut self, name: &'static str) -> EcsResult<ComponentId> {
        self.guard_mutation()?;
        if let Some(existing) = self.registry.lookup(name) {
            return Ok(existing);
        }
        let id = self.spawn_empty();
        self.registry.insert(ComponentDescriptor::tag(name).with_id(id));
        Ok(id)
    }

    /// Registers a component from a caller-built descriptor (serialization
    /// and FFI callers). The world assigns the id; the descriptor's
    /// `component_id` field is overwritten.
    pub fn register_component_raw(
        &mut self,
        descriptor: ComponentDescriptor,
    ) -> EcsResult<ComponentId> {
        self.guard_mutation()?;
        let id = self.spawn_empty();
        self.registry.insert(descriptor.with_id(id));
        Ok(id)
    }

    /// Resolves a registration name to its component id.
    pub fn lookup(&self, name: &str) -> Option<ComponentId> {
        self.registry.lookup(name)
    }

    /// Returns the component id registered for `T`, if any.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentId> {
        self.registry.id_of::<T>()
    }

    // ─── Entity lifecycle ────────────────────────────────────────────────────

    fn spawn_empty(&mut self) -> EntityId {
        let entity = self.index.alloc();
        let row = self.store.insert(EMPTY_ARCHETYPE, entity);
        self.index.set(entity, EMPTY_ARCHETYPE, row);
        entity
    }

    /// Allocates a new entity in the empty archetype.
    ///
    /// Id allocation is not structural, so this is applied immediately even
    /// inside a deferred scope; the returned id is usable by queued
    /// commands.
    pub fn new_entity(&mut self) -> EcsResult<EntityId> {
        self.guard_mutation()?;
        Ok(self.spawn_empty())
    }

    /// Spawns an entity directly into the archetype composed of `ids`.
    ///
    /// Every data component is default-initialized; one `OnAdd` is published
    /// per id. Inside a deferred scope the entity is created empty and the
    /// adds are queued.
    pub fn new_with(&mut self, ids: &[EntityId]) -> EcsResult<EntityId> {
        self.guard_mutation()?;
        if self.defer_depth > 0 {
            let entity = self.spawn_empty();
            for &id in ids {
                self.commands.push_add(entity, id);
            }
            return Ok(entity);
        }

        let mut type_ids = ids.to_vec();
        type_ids.sort_unstable();
        type_ids.dedup();

        let archetype = self.ensure_archetype(&type_ids)?;
        let entity = self.index.alloc();
        let row = self.store.insert(archetype, entity);
        self.index.set(entity, archetype, row);
        for &id in &type_ids {
            self.publish(EventKind::OnAdd, id, archetype, row, vec![entity]);
        }
        self.dispatch_events();
        Ok(entity)
    }

    /// Returns `true` if `entity` is alive.
    pub fn alive(&self, entity: EntityId) -> bool {
        self.index.alive(entity)
    }

    /// Deletes an entity: its row is removed (running destructors), an
    /// `OnRemove` is published for every component, and the id is freed.
    ///
    /// Deleting a dead or stale id is a no-op.
    pub fn delete(&mut self, entity: EntityId) -> EcsResult<()> {
        self.guard_mutation()?;
        if self.defer_depth > 0 {
            self.commands.push_delete(entity);
            return Ok(());
        }
        self.delete_now(entity)?;
        self.dispatch_events();
        Ok(())
    }

    fn delete_now(&mut self, entity: EntityId) -> EcsResult<()> {
        let Ok((archetype, row)) = self.index.get(entity) else {
            return Ok(());
        };
        let type_snapshot = self.store.archetype(archetype).type_ids().to_vec();
        let moved = self.store.remove_row(archetype, row);
        if let Some(moved) = moved {
            self.index.set(moved, archetype, row);
        }
        self.index.free(entity);
        for id in type_snapshot {
            self.publish(EventKind::OnRemove, id, archetype, row, vec![entity]);
        }
        Ok(())
    }

    // ─── Structural mutations ────────────────────────────────────────────────

    fn validate_component(&self, component: EntityId) -> EcsResult<()> {
        debug_assert!(!is_wildcard(component), "wildcards are query patterns, not components");
        if !crate::engine::types::is_flagged(component) && !self.registry.is_registered(component)
        {
            return Err(EcsError::ComponentNotRegistered(component));
        }
        Ok(())
    }

    fn ensure_archetype(&mut self, type_ids: &[EntityId]) -> EcsResult<ArchetypeId> {
        for &id in type_ids {
            self.validate_component(id)?;
        }
        let (archetype, created) = self.store.get_or_create(type_ids, &self.registry)?;
        if created {
            self.rematch_archetype(archetype);
        }
        Ok(archetype)
    }

    /// Adds a component to an entity, moving it to the destination
    /// archetype; the new component is default-initialized.
    ///
    /// Adding a component the entity already has is a no-op and publishes
    /// nothing.
    pub fn add(&mut self, entity: EntityId, component: EntityId) -> EcsResult<()> {
        self.guard_mutation()?;
        if self.defer_depth > 0 {
            self.commands.push_add(entity, component);
            return Ok(());
        }
        self.add_now(entity, component)?;
        self.dispatch_events();
        Ok(())
    }

    fn add_now(&mut self, entity: EntityId, component: EntityId) -> EcsResult<bool> {
        self.validate_component(component)?;
        let (src, row) = self.index.get(entity)?;
        let (dst, created) =
            archetype_after_add(&mut self.store, &self.registry, src, component)?;
        if created {
            self.rematch_archetype(dst);
        }
        if dst == src {
            return Ok(false);
        }
        let (dst_row, moved) = self.store.move_row(src, row, dst);
        self.index.set(entity, dst, dst_row);
        if let Some(moved) = moved {
            self.index.set(moved, src, row);
        }
        self.publish(EventKind::OnAdd, component, dst, dst_row, vec![entity]);
        Ok(true)
    }

    /// Removes a component from an entity; the dropped component's
    /// destructor runs during the move.
    ///
    /// Removing an absent component is a no-op.
    pub fn remove(&mut self, entity: EntityId, component: EntityId) -> EcsResult<()> {
        self.guard_mutation()?;
        if self.defer_depth > 0 {
            self.commands.push_remove(entity, component);
            return Ok(());
        }
        self.remove_now(entity, component)?;
        self.dispatch_events();
        Ok(())
    }

    fn remove_now(&mut self, entity: EntityId, component: EntityId) -> EcsResult<bool> {
        let (src, row) = self.index.get(entity)?;
        let (dst, created) =
            archetype_after_remove(&mut self.store, &self.registry, src, component)?;
        if created {
            self.rematch_archetype(dst);
        }
        if dst == src {
            return Ok(false);
        }
        let (dst_row, moved) = self.store.move_row(src, row, dst);
        self.index.set(entity, dst, dst_row);
        if let Some(moved) = moved {
            self.index.set(moved, src, row);
        }
        self.publish(EventKind::OnRemove, component, dst, dst_row, vec![entity]);
        Ok(true)
    }

    /// Writes a component value, adding the component first if absent.
    ///
    /// Publishes `OnAdd` when the component was newly added, then `OnSet`.
    /// Inside a deferred scope the value is copied into the command buffer's
    /// arena and applied at replay.
    ///
    /// ## Errors
    /// - `ComponentNotRegistered` when `component` has no data descriptor.
    /// - `ColumnTypeMismatch` when `T` is not the registered type.
    /// - `EntityNotAlive` when the target is dead (immediate mode).
    pub fn set<T: Send + Sync + 'static>(
        &mut self,
        entity: EntityId,
        component: EntityId,
        value: T,
    ) -> EcsResult<()> {
        self.guard_mutation()?;
        let descriptor = *self
            .registry
            .data_descriptor(component)
            .ok_or(EcsError::ComponentNotRegistered(component))?;
        if descriptor.type_id != Some(TypeId::of::<T>()) {
            return Err(ColumnError::TypeMismatch {
                stored: descriptor.type_name,
                requested: std::any::type_name::<T>(),
            }
            .into());
        }

        let mut value = ManuallyDrop::new(value);
        let source = (&*value as *const T).cast::<u8>();

        if self.defer_depth > 0 {
            // SAFETY: `source` is a valid T matching the descriptor; the
            // ManuallyDrop transfers ownership into the arena.
            unsafe { self.commands.push_set(entity, component, source, &descriptor) };
            return Ok(());
        }

        match self.set_now(entity, component, source) {
            Ok(()) => {
                self.dispatch_events();
                Ok(())
            }
            Err(error) => {
                // The value never left the caller's frame; drop it here.
                unsafe { ManuallyDrop::drop(&mut value) };
                Err(error)
            }
        }
    }

    /// Applies a set from a raw pointer. On success the pointee's ownership
    /// has moved into the column.
    fn set_now(&mut self, entity: EntityId, component: EntityId, source: *const u8) -> EcsResult<()> {
        self.add_now(entity, component)?;
        let (archetype, row) = self.index.get(entity)?;
        let at = self
            .store
            .archetype(archetype)
            .column_index_of(component)
            .ok_or(EcsError::Internal("set target has no data column after add"))?;
        let column = self.store.archetype_mut(archetype).column_mut(at);
        column.drop_cell(row as usize);
        // SAFETY: source points to one initialized element of the column's
        // type; the old value was destroyed on the line above.
        unsafe { column.write_cell(row as usize, source) };
        self.publish(EventKind::OnSet, component, archetype, row, vec![entity]);
        Ok(())
    }

    /// Reads a component value.
    ///
    /// Returns `None` if the entity is dead, the component is absent (after
    /// walking `INSTANCEOF` bases), or `T` does not match the registered
    /// type.
    pub fn get<T: 'static>(&self, entity: EntityId, component: EntityId) -> Option<&T> {
        match query::resolve_entity_cell(
            &self.store,
            &self.index,
            entity,
            component,
            query::MAX_INHERITANCE_DEPTH,
        )? {
            ResolvedCell::Data { ptr, descriptor, .. } => {
                if descriptor.type_id == Some(TypeId::of::<T>()) {
                    // SAFETY: type checked against the descriptor; the cell
                    // stays valid for the &self borrow.
                    Some(unsafe { &*ptr.cast::<T>() })
                } else {
                    None
                }
            }
            ResolvedCell::Presence { .. } => None,
        }
    }

    /// Raw read-only pointer to a component cell, for serialization callers.
    ///
    /// Unlike [`get`](Self::get) this does not walk the inheritance chain.
    pub fn get_ptr(&self, entity: EntityId, component: EntityId) -> Option<*const u8> {
        let (archetype, row) = self.index.get(entity).ok()?;
        let archetype = self.store.archetype(archetype);
        let at = archetype.column_index_of(component)?;
        Some(archetype.column(at).cell(row as usize).cast_const())
    }

    /// Returns `true` if the entity's own type contains a match for
    /// `pattern` (wildcards allowed; inherited components do not count).
    pub fn has(&self, entity: EntityId, pattern: EntityId) -> bool {
        match self.index.get(entity) {
            Ok((archetype, _)) => {
                query::find_owned(self.store.archetype(archetype).type_ids(), pattern).is_some()
            }
            Err(_) => false,
        }
    }

    /// The entity's archetype type (sorted id list).
    pub fn type_of(&self, entity: EntityId) -> EcsResult<&[EntityId]> {
        let (archetype, _) = self.index.get(entity)?;
        Ok(self.store.archetype(archetype).type_ids())
    }

    // ─── Relationships ───────────────────────────────────────────────────────

    /// Adds the `(relation, object)` pair to an entity.
    pub fn add_pair(
        &mut self,
        entity: EntityId,
        relation: EntityId,
        object: EntityId,
    ) -> EcsResult<()> {
        self.add(entity, pair(relation, object))
    }

    /// Removes the `(relation, object)` pair from an entity.
    pub fn remove_pair(
        &mut self,
        entity: EntityId,
        relation: EntityId,
        object: EntityId,
    ) -> EcsResult<()> {
        self.remove(entity, pair(relation, object))
    }

    /// Marks `entity` as a child of `parent`.
    pub fn child_of(&mut self, entity: EntityId, parent: EntityId) -> EcsResult<()> {
        self.add(entity, CHILDOF | parent)
    }

    /// Marks `entity` as an instance of `base`; the entity inherits `base`'s
    /// components as shared columns.
    pub fn instance_of(&mut self, entity: EntityId, base: EntityId) -> EcsResult<()> {
        self.add(entity, INSTANCEOF | base)
    }

    /// The entity's `CHILDOF` target, if any.
    pub fn parent_of(&self, entity: EntityId) -> Option<EntityId> {
        let (archetype, _) = self.index.get(entity).ok()?;
        query::archetype_parent(self.store.archetype(archetype))
    }

    /// Deletes every entity whose type contains `CHILDOF|parent`.
    pub fn delete_children(&mut self, parent: EntityId) -> EcsResult<()> {
        self.guard_mutation()?;
        let pattern = CHILDOF | parent;
        let mut children = Vec::new();
        for archetype in self.store.iter() {
            if archetype.contains(pattern) {
                children.extend_from_slice(archetype.entities());
            }
        }
        if self.defer_depth > 0 {
            for child in children {
                self.commands.push_delete(child);
            }
            return Ok(());
        }
        for child in children {
            self.delete_now(child)?;
        }
        self.dispatch_events();
        Ok(())
    }

    // ─── Deferred scopes ─────────────────────────────────────────────────────

    /// Opens a deferred scope. Scopes nest; only the outermost `defer_end`
    /// replays.
    pub fn defer_begin(&mut self) -> EcsResult<()> {
        self.guard_mutation()?;
        self.defer_depth += 1;
        Ok(())
    }

    /// Returns `true` while a deferred scope is open.
    pub fn is_deferred(&self) -> bool {
        self.defer_depth > 0
    }

    /// Closes a deferred scope. The outermost close replays queued commands
    /// in insertion order and returns the errors of individual commands;
    /// a failed command does not abort the replay of subsequent ones.
    pub fn defer_end(&mut self) -> EcsResult<Vec<CommandError>> {
        if self.defer_depth == 0 {
            return Err(EcsError::InvalidOperation(InvalidOperationKind::NotDeferred));
        }
        self.defer_depth -= 1;
        if self.defer_depth > 0 {
            return Ok(Vec::new());
        }
        let errors = self.replay_commands();
        self.dispatch_events();
        Ok(errors)
    }

    fn replay_commands(&mut self) -> Vec<CommandError> {
        let mut buffer = std::mem::take(&mut self.commands);
        if buffer.is_empty() {
            return Vec::new();
        }
        trace!("replaying {} deferred commands", buffer.len());

        let mut errors = Vec::new();
        let mut deleted: HashSet<EntityId> = HashSet::new();
        let ops = buffer.ops().to_vec();
        for (index, op) in ops.into_iter().enumerate() {
            if deleted.contains(&op.target) {
                // Payloads of skipped sets stay unconsumed; the arena drop
                // destroys them.
                warn!("dropping deferred command {index}: target deleted earlier in the buffer");
                continue;
            }
            let result = match op.kind {
                CommandKind::Add { component } => {
                    self.add_now(op.target, component).map(|_| ())
                }
                CommandKind::Remove { component } => {
                    self.remove_now(op.target, component).map(|_| ())
                }
                CommandKind::Set { component, payload } => {
                    match self.set_now(op.target, component, buffer.payload_ptr(payload)) {
                        Ok(()) => {
                            buffer.mark_consumed(payload);
                            Ok(())
                        }
                        Err(error) => Err(error),
                    }
                }
                CommandKind::Delete => {
                    deleted.insert(op.target);
                    self.delete_now(op.target)
                }
            };
            match result {
                Ok(()) => self.dispatch_events(),
                Err(source) => {
                    warn!("deferred command {index} failed: {source}");
                    errors.push(CommandError { index, target: op.target, source });
                }
            }
        }
        // Dropping the buffer frees the arena and destroys unconsumed
        // payloads.
        errors
    }

    // ─── Read-only window ────────────────────────────────────────────────────

    /// Seals the world for read-only access. While sealed, parallel
    /// iteration is allowed and every mutation API fails with
    /// `InvalidOperation` (under the `checked` feature; without it,
    /// mutating a sealed world is a contract violation).
    pub fn begin_readonly(&mut self) -> EcsResult<()> {
        if self.defer_depth > 0 {
            return Err(EcsError::InvalidOperation(InvalidOperationKind::DeferredReadOnly));
        }
        self.readonly = true;
        Ok(())
    }

    /// Ends the read-only window.
    pub fn end_readonly(&mut self) -> EcsResult<()> {
        if !self.readonly {
            return Err(EcsError::InvalidOperation(InvalidOperationKind::NotReadOnly));
        }
        self.readonly = false;
        Ok(())
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Registers an observer for `(kind, pattern)`. Observers fire
    /// synchronously, in registration order, after the triggering operation
    /// completes; the world handle they receive is inside a deferred scope.
    pub fn observe<F>(&mut self, kind: EventKind, pattern: EntityId, callback: F) -> ObserverId
    where
        F: Fn(&mut World, &EventRecord) + Send + Sync + 'static,
    {
        self.events.observe(kind, pattern, Arc::new(callback))
    }

    /// Deregisters an observer.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.events.unobserve(id)
    }

    fn publish(
        &mut self,
        kind: EventKind,
        component: EntityId,
        archetype: ArchetypeId,
        row: RowId,
        entities: Vec<EntityId>,
    ) {
        if self.events.is_idle() {
            return;
        }
        self.events.enqueue(EventRecord {
            kind,
            component,
            archetype,
            rows: row..row + entities.len() as RowId,
            entities,
        });
    }

    fn dispatch_events(&mut self) {
        if self.dispatching {
            return;
        }
        if self.events.is_idle() {
            while self.events.pop_pending().is_some() {}
            return;
        }
        self.dispatching = true;
        while let Some(record) = self.events.pop_pending() {
            let callbacks: Vec<Arc<ObserverFn>> = self.events.matching(&record);
            if callbacks.is_empty() {
                continue;
            }
            // Observer bodies run inside an implicit deferred scope.
            self.defer_depth += 1;
            for callback in &callbacks {
                (**callback)(self, &record);
            }
            self.defer_depth -= 1;
            if self.defer_depth == 0 {
                for error in self.replay_commands() {
                    warn!("observer-deferred command failed: {error}");
                }
            }
        }
        self.dispatching = false;
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Registers a query and computes its initial matched-set.
    pub fn query(&mut self, filter: Filter) -> QueryId {
        let id = self.queries.register(filter);
        let mut hits = Vec::new();
        {
            let state = self.queries.state(id);
            for archetype in self.store.iter() {
                if archetype_matches(&self.store, &self.index, archetype, &state.filter) {
                    hits.push(archetype.id());
                }
            }
        }
        for archetype in hits {
            self.queries.push_match(id, archetype);
            self.store.archetype_mut(archetype).matched.push(id);
        }
        id
    }

    /// Compiles a textual signature and registers the query.
    pub fn query_expr(&mut self, signature: &str) -> EcsResult<QueryId> {
        let filter = crate::engine::filter::parse_signature(signature, &self.registry)?;
        Ok(self.query(filter))
    }

    /// Compiles a textual signature into a [`Filter`] without registering a
    /// query.
    pub fn compile_filter(&self, signature: &str) -> EcsResult<Filter> {
        Ok(crate::engine::filter::parse_signature(signature, &self.registry)?)
    }

    fn rematch_archetype(&mut self, archetype_id: ArchetypeId) {
        if self.queries.is_empty() {
            return;
        }
        let ids: Vec<QueryId> = self.queries.ids().collect();
        let mut hits = Vec::new();
        {
            let archetype = self.store.archetype(archetype_id);
            for id in ids {
                let state = self.queries.state(id);
                if archetype_matches(&self.store, &self.index, archetype, &state.filter) {
                    hits.push(id);
                }
            }
        }
        for id in hits {
            self.queries.push_match(id, archetype_id);
            self.store.archetype_mut(archetype_id).matched.push(id);
        }
    }

    /// Iterates a query's matched archetypes, yielding one batch per
    /// non-empty archetype in matched-set insertion order.
    pub fn iter(&self, query: QueryId) -> QueryIter<'_> {
        let state = self.queries.state(query);
        QueryIter {
            store: &self.store,
            index: &self.index,
            terms: state.filter.terms(),
            matched: &state.matched,
            next: 0,
            readonly: false,
        }
    }

    /// Read-only iteration handle: column access on any term not declared
    /// `in` fails with `ColumnAccessViolation`.
    pub fn iter_readonly(&self, query: QueryId) -> QueryIter<'_> {
        let state = self.queries.state(query);
        QueryIter {
            store: &self.store,
            index: &self.index,
            terms: state.filter.terms(),
            matched: &state.matched,
            next: 0,
            readonly: true,
        }
    }

    /// Dispatches read-only batches to rayon workers.
    ///
    /// Only legal inside a sealed read-only window, and only for queries
    /// whose terms all declare `in` (or presence-only) access; anything else
    /// fails with `InvalidOperation`.
    pub fn par_batches<F>(&self, query: QueryId, f: F) -> EcsResult<()>
    where
        F: Fn(&TableBatch<'_>) + Send + Sync,
    {
        if !self.readonly {
            return Err(EcsError::InvalidOperation(InvalidOperationKind::ParallelAccess));
        }
        let state = self.queries.state(query);
        let writes = state.filter.terms().iter().any(|term| {
            term.oper != TermOper::Not && !matches!(term.inout, InOut::In | InOut::None)
        });
        if writes {
            return Err(EcsError::InvalidOperation(InvalidOperationKind::ParallelAccess));
        }

        state.matched.par_iter().for_each(|&archetype_id| {
            let archetype = self.store.archetype(archetype_id);
            if archetype.is_empty() {
                return;
            }
            let batch =
                build_batch(&self.store, &self.index, archetype, state.filter.terms(), true);
            f(&batch);
        });
        Ok(())
    }

    /// Generation counter of a query's matched-set; unchanged by mutations
    /// that do not alter archetype membership.
    pub fn query_generation(&self, query: QueryId) -> u32 {
        self.queries.state(query).generation
    }

    // ─── Serialization hook surface ──────────────────────────────────────────

    /// Iterates every archetype id, in creation order.
    pub fn iter_archetypes(&self) -> impl Iterator<Item = ArchetypeId> + '_ {
        self.store.iter().map(|archetype| archetype.id())
    }

    /// The sorted type of an archetype.
    pub fn archetype_type(&self, archetype: ArchetypeId) -> &[EntityId] {
        self.store.archetype(archetype).type_ids()
    }

    /// The entity-id column of an archetype.
    pub fn archetype_entities(&self, archetype: ArchetypeId) -> &[EntityId] {
        self.store.archetype(archetype).entities()
    }

    /// Raw byte view of one data column, or `None` if the archetype does not
    /// store data for `component`.
    pub fn archetype_column(&self, archetype: ArchetypeId, component: EntityId) -> Option<&[u8]> {
        self.store.archetype(archetype).column_bytes(component)
    }

    /// Display wrapper decoding an id's flags and index/generation split.
    pub fn entity_str(&self, entity: EntityId) -> EntityStr {
        EntityStr(entity)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
