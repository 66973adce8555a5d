//! # Event Bus
//!
//! The minimal hook surface the observer layer binds against. Structural
//! mutations publish `OnAdd`/`OnRemove`/`OnSet` records for the affected
//! entities; registered observer callbacks are invoked synchronously, in
//! registration order, once the triggering operation has completed.
//!
//! Observer bodies may call world mutation APIs: dispatch runs each callback
//! inside an implicit deferred scope, so structural calls are queued and
//! replayed when the callback returns. Callbacks must not panic across the
//! dispatch boundary.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use log::trace;

use crate::engine::types::{id_matches, ArchetypeId, EntityId, RowId};
use crate::engine::world::World;

/// Kind of structural event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A component was added to the affected entities.
    OnAdd,
    /// A component was removed from the affected entities.
    OnRemove,
    /// A component value was overwritten.
    OnSet,
}

/// Payload delivered to observer callbacks.
#[derive(Clone, Debug)]
pub struct EventRecord {
    /// What happened.
    pub kind: EventKind,
    /// The component involved.
    pub component: EntityId,
    /// Archetype holding the affected rows at publish time.
    pub archetype: ArchetypeId,
    /// Affected row range at publish time. Rows are unstable across further
    /// mutations; `entities` is the durable handle.
    pub rows: Range<RowId>,
    /// Snapshot of the affected entity ids.
    pub entities: Vec<EntityId>,
}

/// Handle for deregistering an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u32);

/// Observer callback signature. The world handle is already inside a
/// deferred scope when the callback runs.
pub type ObserverFn = dyn Fn(&mut World, &EventRecord) + Send + Sync;

struct ObserverEntry {
    id: ObserverId,
    kind: EventKind,
    pattern: EntityId,
    callback: Arc<ObserverFn>,
}

/// Registry of observers plus the queue of not-yet-dispatched events.
#[derive(Default)]
pub struct EventBus {
    observers: Vec<ObserverEntry>,
    next_id: u32,
    pending: VecDeque<EventRecord>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no observers are registered. Publishing is skipped
    /// entirely in that case.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.observers.is_empty()
    }

    /// Registers an observer for `(kind, pattern)`.
    ///
    /// The pattern may be a concrete id, a pair, or a wildcard pattern;
    /// matching follows the same rules as query terms. Observers fire in
    /// registration order.
    pub fn observe(
        &mut self,
        kind: EventKind,
        pattern: EntityId,
        callback: Arc<ObserverFn>,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push(ObserverEntry { id, kind, pattern, callback });
        trace!("observer {:?} registered for {:?}", id, kind);
        id
    }

    /// Deregisters an observer. Returns `false` if the id was unknown.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|entry| entry.id != id);
        self.observers.len() != before
    }

    /// Queues an event for dispatch.
    #[inline]
    pub fn enqueue(&mut self, record: EventRecord) {
        self.pending.push_back(record);
    }

    /// Takes the next queued event, if any.
    #[inline]
    pub fn pop_pending(&mut self) -> Option<EventRecord> {
        self.pending.pop_front()
    }

    /// Collects the callbacks matching a record, in registration order.
    ///
    /// Callbacks are cloned out so dispatch can hand the world to them
    /// mutably without borrowing the bus.
    pub fn matching(&self, record: &EventRecord) -> Vec<Arc<ObserverFn>> {
        self.observers
            .iter()
            .filter(|entry| entry.kind == record.kind && id_matches(entry.pattern, record.component))
            .map(|entry| Arc::clone(&entry.callback))
            .collect()
    }
}
