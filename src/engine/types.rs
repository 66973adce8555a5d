//! Core ECS Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental identifiers and bit layouts** shared
//! by every subsystem of the runtime: the entity index, the archetype store,
//! the transition graph, and the query engine.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | flags (8) | generation (24) | index (32) |
//! ```
//!
//! - **Index** identifies the dense slot in the entity index.
//! - **Generation** is bumped every time a slot is freed, so stale handles
//!   never resolve to the slot's new occupant.
//! - **Flags** mark relationship ids (`INSTANCEOF`, `CHILDOF`, `PAIR`).
//!
//! Equality is always on the whole 64-bit value.
//!
//! ## Pair Encoding
//!
//! A pair packs a `(relation, object)` couple into one id:
//!
//! ```text
//! | PAIR flag | relation index (24) | object index (32) |
//! ```
//!
//! The relation's generation is not representable inside a pair; the
//! component registry keeps an index-keyed side table so pair columns can
//! still resolve their descriptor.
//!
//! ## Wildcards
//!
//! [`WILDCARD`] is a reserved id (index `u32::MAX`) that the allocator never
//! hands out. In filter terms it matches any id; inside a pair it matches any
//! relation or any object. Matching against a sorted type list always takes
//! the first hit, which makes wildcard resolution deterministic (lowest id).

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u32;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityId = u64;
/// Identifier of a component type. Components are entities.
pub type ComponentId = EntityId;
/// Stable index of an archetype within the archetype store.
pub type ArchetypeId = u32;
/// Row index within an archetype.
pub type RowId = u32;

/// Total number of bits in an [`EntityId`].
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for the dense slot index.
pub const INDEX_BITS: Bits = 32;
/// Number of bits reserved for the generation counter.
pub const GENERATION_BITS: Bits = 24;
/// Number of bits reserved for relationship flags.
pub const FLAG_BITS: Bits = ENTITY_BITS - INDEX_BITS - GENERATION_BITS;

const _: [(); 1] = [(); (INDEX_BITS + GENERATION_BITS + FLAG_BITS == ENTITY_BITS) as usize];
const _: [(); 1] = [(); (FLAG_BITS >= 3) as usize];

/// Marks an id as a base-of (inheritance) relation.
pub const INSTANCEOF: EntityId = 0x8000_0000_0000_0000;
/// Marks an id as a parent-of relation.
pub const CHILDOF: EntityId = 0x4000_0000_0000_0000;
/// Marks an id as a (relation, object) pair.
pub const PAIR: EntityId = 0x2000_0000_0000_0000;
/// Union of every relationship flag bit.
pub const FLAG_MASK: EntityId = INSTANCEOF | CHILDOF | PAIR;

const fn mask(bits: Bits) -> EntityId {
    if bits == 0 { 0 } else { ((1 as EntityId) << bits) - 1 }
}

/// Mask selecting the index portion of an [`EntityId`].
pub const INDEX_MASK: EntityId = mask(INDEX_BITS);
/// Mask selecting the generation portion (after shifting out the index).
pub const GENERATION_MASK: EntityId = mask(GENERATION_BITS);
/// Mask selecting the relation portion of a pair (after shifting).
pub const PAIR_RELATION_MASK: EntityId = mask(GENERATION_BITS);

/// Reserved wildcard id. The allocator never produces this index.
pub const WILDCARD: EntityId = INDEX_MASK;

/// Wildcard value for the relation slot of a pair.
pub const PAIR_RELATION_WILDCARD: EntityId = PAIR_RELATION_MASK;
/// Wildcard value for the object slot of a pair.
pub const PAIR_OBJECT_WILDCARD: EntityId = INDEX_MASK;

/// Packs an index and generation into an [`EntityId`].
#[inline]
pub const fn make_entity(index: u32, generation: u32) -> EntityId {
    ((generation as EntityId & GENERATION_MASK) << INDEX_BITS) | (index as EntityId)
}

/// Returns the dense slot index encoded in `id`.
#[inline]
pub const fn entity_index(id: EntityId) -> u32 {
    (id & INDEX_MASK) as u32
}

/// Returns the generation counter encoded in `id`.
#[inline]
pub const fn entity_generation(id: EntityId) -> u32 {
    ((id >> INDEX_BITS) & GENERATION_MASK) as u32
}

/// Removes every relationship flag from `id`, leaving the plain entity id.
#[inline]
pub const fn strip_flags(id: EntityId) -> EntityId {
    id & !FLAG_MASK
}

/// Returns `true` if `id` carries the [`PAIR`] flag.
#[inline]
pub const fn is_pair(id: EntityId) -> bool {
    id & PAIR != 0
}

/// Returns `true` if `id` carries any relationship flag.
#[inline]
pub const fn is_flagged(id: EntityId) -> bool {
    id & FLAG_MASK != 0
}

/// Encodes a `(relation, object)` couple as a pair id.
///
/// Only the relation's low 24 index bits and the object's 32 index bits are
/// representable; generations are dropped. Passing [`WILDCARD`] for either
/// side produces the corresponding pair wildcard.
#[inline]
pub const fn pair(relation: EntityId, object: EntityId) -> EntityId {
    PAIR
        | ((entity_index(relation) as EntityId & PAIR_RELATION_MASK) << INDEX_BITS)
        | entity_index(object) as EntityId
}

/// Returns the relation index encoded in a pair id.
#[inline]
pub const fn pair_relation(id: EntityId) -> EntityId {
    (id >> INDEX_BITS) & PAIR_RELATION_MASK
}

/// Returns the object index encoded in a pair id.
#[inline]
pub const fn pair_object(id: EntityId) -> EntityId {
    id & INDEX_MASK
}

/// Tests whether an id pattern matches a concrete type member.
///
/// ## Behavior
/// - [`WILDCARD`] matches everything.
/// - Pair patterns match pairs with equal relation and object, where either
///   slot may be the pair wildcard.
/// - Flagged patterns (`CHILDOF|x`, `INSTANCEOF|x`) match ids with the same
///   flag whose payload is equal, or any payload when the pattern payload is
///   [`WILDCARD`].
/// - Plain ids match on full 64-bit equality.
#[inline]
pub fn id_matches(pattern: EntityId, id: EntityId) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    let pattern_flags = pattern & FLAG_MASK;
    if pattern_flags != id & FLAG_MASK {
        return false;
    }
    if pattern_flags & PAIR != 0 {
        let relation = pair_relation(pattern);
        let object = pair_object(pattern);
        (relation == PAIR_RELATION_WILDCARD || relation == pair_relation(id))
            && (object == PAIR_OBJECT_WILDCARD || object == pair_object(id))
    } else if pattern_flags != 0 {
        let payload = strip_flags(pattern);
        payload == WILDCARD || payload == strip_flags(id)
    } else {
        pattern == id
    }
}

/// Returns `true` if `pattern` contains a wildcard in any position.
#[inline]
pub fn is_wildcard(pattern: EntityId) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    if is_pair(pattern) {
        return pair_relation(pattern) == PAIR_RELATION_WILDCARD
            || pair_object(pattern) == PAIR_OBJECT_WILDCARD;
    }
    is_flagged(pattern) && strip_flags(pattern) == WILDCARD
}

/// Debug-formatting wrapper for entity ids.
///
/// Renders flags, pair structure, and the index/generation split instead of
/// one opaque integer.
pub struct EntityStr(pub EntityId);

impl std::fmt::Display for EntityStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.0;
        if is_pair(id) {
            return write!(f, "({}, {})", pair_relation(id), pair_object(id));
        }
        if id & INSTANCEOF != 0 {
            return write!(f, "INSTANCEOF|{}", EntityStr(strip_flags(id)));
        }
        if id & CHILDOF != 0 {
            return write!(f, "CHILDOF|{}", EntityStr(strip_flags(id)));
        }
        if id == WILDCARD {
            return f.write_str("*");
        }
        write!(f, "{}v{}", entity_index(id), entity_generation(id))
    }
}
