//! Archetype transition graph.
//!
//! Structural add/remove operations resolve their destination archetype
//! through cached per-archetype edges: `archetype × component_id →
//! archetype`. A hit is a single map lookup; a miss computes the destination
//! type, interns it, and caches both the forward edge and its reverse so the
//! opposite mutation is a hit as well. This amortizes archetype resolution to
//! O(1) for hot mutation patterns.
//!
//! Pair ids and flagged ids are opaque keys here; edges compare the full
//! 64-bit value.

use crate::engine::archetype::ArchetypeStore;
use crate::engine::error::EcsResult;
use crate::engine::registry::ComponentRegistry;
use crate::engine::types::{ArchetypeId, EntityId};

/// Resolves the archetype an entity lands in after adding `component`.
///
/// Returns `(destination, created)`; `destination == src` when the archetype
/// already contains the component (the mutation is a no-op). `created`
/// reports that a new archetype was interned and live queries must be
/// re-evaluated against it.
pub fn archetype_after_add(
    store: &mut ArchetypeStore,
    registry: &ComponentRegistry,
    src: ArchetypeId,
    component: EntityId,
) -> EcsResult<(ArchetypeId, bool)> {
    let source = store.archetype(src);
    if source.contains(component) {
        return Ok((src, false));
    }
    if let Some(edge) = source.edge(component) {
        if let Some(dst) = edge.add {
            return Ok((dst, false));
        }
    }

    let mut type_ids = source.type_ids().to_vec();
    let at = type_ids.binary_search(&component).unwrap_err();
    type_ids.insert(at, component);

    let (dst, created) = store.get_or_create(&type_ids, registry)?;
    store.archetype_mut(src).edges.entry(component).or_default().add = Some(dst);
    store.archetype_mut(dst).edges.entry(component).or_default().remove = Some(src);
    Ok((dst, created))
}

/// Resolves the archetype an entity lands in after removing `component`.
///
/// Symmetric to [`archetype_after_add`]; `destination == src` when the
/// component is absent.
pub fn archetype_after_remove(
    store: &mut ArchetypeStore,
    registry: &ComponentRegistry,
    src: ArchetypeId,
    component: EntityId,
) -> EcsResult<(ArchetypeId, bool)> {
    let source = store.archetype(src);
    if !source.contains(component) {
        return Ok((src, false));
    }
    if let Some(edge) = source.edge(component) {
        if let Some(dst) = edge.remove {
            return Ok((dst, false));
        }
    }

    let mut type_ids = source.type_ids().to_vec();
    let at = type_ids.binary_search(&component).expect("contains() verified membership");
    type_ids.remove(at);

    let (dst, created) = store.get_or_create(&type_ids, registry)?;
    store.archetype_mut(src).edges.entry(component).or_default().remove = Some(dst);
    store.archetype_mut(dst).edges.entry(component).or_default().add = Some(src);
    Ok((dst, created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::archetype::EMPTY_ARCHETYPE;
    use crate::engine::registry::ComponentDescriptor;
    use crate::engine::types::make_entity;

    #[test]
    fn add_then_remove_round_trips_through_cached_edges() {
        let mut registry = ComponentRegistry::new();
        let pos = make_entity(1, 0);
        registry.insert(ComponentDescriptor::of::<u64>("Pos").with_id(pos));
        let mut store = ArchetypeStore::new();

        let (with_pos, created) =
            archetype_after_add(&mut store, &registry, EMPTY_ARCHETYPE, pos).unwrap();
        assert!(created);
        assert_ne!(with_pos, EMPTY_ARCHETYPE);

        // The reverse edge was cached when the forward edge was computed.
        let edge = store.archetype(with_pos).edge(pos).copied().unwrap();
        assert_eq!(edge.remove, Some(EMPTY_ARCHETYPE));

        let (back, created) =
            archetype_after_remove(&mut store, &registry, with_pos, pos).unwrap();
        assert!(!created);
        assert_eq!(back, EMPTY_ARCHETYPE);

        // Adding again is now a pure cache hit.
        let (again, created) =
            archetype_after_add(&mut store, &registry, EMPTY_ARCHETYPE, pos).unwrap();
        assert!(!created);
        assert_eq!(again, with_pos);
    }

    #[test]
    fn redundant_transitions_stay_in_place() {
        let mut registry = ComponentRegistry::new();
        let pos = make_entity(1, 0);
        registry.insert(ComponentDescriptor::of::<u64>("Pos").with_id(pos));
        let mut store = ArchetypeStore::new();

        let (with_pos, _) =
            archetype_after_add(&mut store, &registry, EMPTY_ARCHETYPE, pos).unwrap();
        let (same, _) = archetype_after_add(&mut store, &registry, with_pos, pos).unwrap();
        assert_eq!(same, with_pos);

        let (still_empty, _) =
            archetype_after_remove(&mut store, &registry, EMPTY_ARCHETYPE, pos).unwrap();
        assert_eq!(still_empty, EMPTY_ARCHETYPE);
    }
}
