//! # Component Registry
//!
//! World-local registry mapping component ids to [`ComponentDescriptor`]
//! values: element size and alignment, optional construct/destroy hooks, and
//! (for components registered from Rust types) the `TypeId` used by checked
//! typed access.
//!
//! ## Design
//! - Components are entities: the world allocates a regular entity id for
//!   every registration and stores the descriptor here.
//! - Generic storage code dispatches through the descriptor table, never
//!   through subtype polymorphism: columns only know size, alignment, and
//!   the two hooks.
//! - Registration is explicit at world initialization. There is no
//!   process-wide state; ids are returned to the caller, who stores them.
//!
//! ## Descriptor hooks
//! Hooks receive `(ptr, count)` over a contiguous run of elements. A missing
//! constructor means zero-fill; a missing destructor means no-op destroy.
//! Hooks deliberately receive no world handle, so a destructor cannot
//! re-enter structural code while an archetype move is in flight.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::mem::{align_of, size_of};

use crate::engine::types::{entity_index, is_flagged, is_pair, pair_relation, EntityId};

/// Constructor hook: initialize `count` contiguous elements starting at
/// `ptr`.
pub type CtorFn = unsafe fn(*mut u8, usize);
/// Destructor hook: destroy `count` contiguous elements starting at `ptr`.
pub type DtorFn = unsafe fn(*mut u8, usize);

/// Describes one registered component type.
///
/// ## Invariants
/// - `size == 0` marks a tag (presence-only component, no column).
/// - `align` is a power of two and non-zero for data components.
/// - `type_id` is `Some` only for components registered from a Rust type;
///   raw registrations leave it `None` and opt out of checked typed access.
#[derive(Clone, Copy, Debug)]
pub struct ComponentDescriptor {
    /// Entity id assigned to this component.
    pub component_id: EntityId,
    /// Registration name, used for diagnostics and filter signatures.
    pub name: &'static str,
    /// Element size in bytes. Zero marks a tag.
    pub size: u32,
    /// Element alignment in bytes.
    pub align: u32,
    /// Rust type identity for checked typed access, if known.
    pub type_id: Option<TypeId>,
    /// Rust type name for diagnostics, if known.
    pub type_name: &'static str,
    /// Element constructor; `None` means zero-fill.
    pub ctor: Option<CtorFn>,
    /// Element destructor; `None` means no-op.
    pub dtor: Option<DtorFn>,
}

unsafe fn default_ctor<T: Default>(ptr: *mut u8, count: usize) {
    let base = ptr.cast::<T>();
    for i in 0..count {
        unsafe { base.add(i).write(T::default()) };
    }
}

unsafe fn drop_dtor<T>(ptr: *mut u8, count: usize) {
    let base = ptr.cast::<T>();
    for i in 0..count {
        unsafe { std::ptr::drop_in_place(base.add(i)) };
    }
}

impl ComponentDescriptor {
    /// Builds a descriptor for Rust type `T`.
    ///
    /// The constructor writes `T::default()` into every new cell and the
    /// destructor runs `drop_in_place`, so column storage observes normal
    /// Rust value semantics. `component_id` is filled in by the world at
    /// registration.
    pub fn of<T: Default + Send + Sync + 'static>(name: &'static str) -> Self {
        Self {
            component_id: 0,
            name,
            size: size_of::<T>() as u32,
            align: align_of::<T>().max(1) as u32,
            type_id: Some(TypeId::of::<T>()),
            type_name: type_name::<T>(),
            ctor: if size_of::<T>() == 0 { None } else { Some(default_ctor::<T>) },
            dtor: if std::mem::needs_drop::<T>() { Some(drop_dtor::<T>) } else { None },
        }
    }

    /// Builds a descriptor for a zero-size tag.
    pub fn tag(name: &'static str) -> Self {
        Self {
            component_id: 0,
            name,
            size: 0,
            align: 1,
            type_id: None,
            type_name: "",
            ctor: None,
            dtor: None,
        }
    }

    /// Returns a copy with `component_id` set.
    #[inline]
    pub fn with_id(mut self, component_id: EntityId) -> Self {
        self.component_id = component_id;
        self
    }

    /// Returns `true` if this descriptor stores data (not a tag).
    #[inline]
    pub fn is_data(&self) -> bool {
        self.size > 0
    }
}

/// World-local table of component descriptors.
#[derive(Default)]
pub struct ComponentRegistry {
    by_id: HashMap<EntityId, ComponentDescriptor>,
    by_index: HashMap<u32, EntityId>,
    by_type: HashMap<TypeId, EntityId>,
    by_name: HashMap<&'static str, EntityId>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a descriptor under its `component_id`.
    pub fn insert(&mut self, descriptor: ComponentDescriptor) {
        let id = descriptor.component_id;
        self.by_index.insert(entity_index(id), id);
        if let Some(type_id) = descriptor.type_id {
            self.by_type.insert(type_id, id);
        }
        self.by_name.insert(descriptor.name, id);
        self.by_id.insert(id, descriptor);
    }

    /// Returns the descriptor registered for `id`, if any.
    #[inline]
    pub fn descriptor(&self, id: EntityId) -> Option<&ComponentDescriptor> {
        self.by_id.get(&id)
    }

    /// Returns `true` if the plain id was registered (tag or data).
    #[inline]
    pub fn is_registered(&self, id: EntityId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Resolves the descriptor that provides data storage for a type member.
    ///
    /// ## Behavior
    /// - Plain ids resolve to their own descriptor when it stores data.
    /// - Pair ids resolve through the relation's index (pairs drop the
    ///   relation generation, so the lookup is by slot index).
    /// - `CHILDOF`/`INSTANCEOF`-flagged ids are presence-only and resolve to
    ///   `None`.
    pub fn data_descriptor(&self, id: EntityId) -> Option<&ComponentDescriptor> {
        let descriptor = if is_pair(id) {
            let relation = self.by_index.get(&(pair_relation(id) as u32))?;
            self.by_id.get(relation)?
        } else if is_flagged(id) {
            return None;
        } else {
            self.by_id.get(&id)?
        };
        descriptor.is_data().then_some(descriptor)
    }

    /// Returns the component id registered for Rust type `T`, if any.
    #[inline]
    pub fn id_of<T: 'static>(&self) -> Option<EntityId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Resolves a registration name to its component id.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.by_name.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{make_entity, pair, CHILDOF};

    #[test]
    fn pair_data_resolves_through_relation_index() {
        let mut registry = ComponentRegistry::new();
        let relation = make_entity(4, 7);
        registry.insert(ComponentDescriptor::of::<u32>("Amount").with_id(relation));

        let object = make_entity(9, 0);
        let descriptor = registry.data_descriptor(pair(relation, object)).unwrap();
        assert_eq!(descriptor.component_id, relation);
        assert_eq!(descriptor.size, 4);
    }

    #[test]
    fn flagged_ids_are_presence_only() {
        let mut registry = ComponentRegistry::new();
        let parent = make_entity(2, 0);
        registry.insert(ComponentDescriptor::of::<u32>("X").with_id(parent));
        assert!(registry.data_descriptor(CHILDOF | parent).is_none());
    }

    #[test]
    fn tags_never_provide_data() {
        let mut registry = ComponentRegistry::new();
        let id = make_entity(1, 0);
        registry.insert(ComponentDescriptor::tag("Frozen").with_id(id));
        assert!(registry.is_registered(id));
        assert!(registry.data_descriptor(id).is_none());
    }
}
