//! Error types for the ECS runtime core.
//!
//! Each failure domain gets a focused, structured error type; the aggregate
//! [`EcsError`] is what the world-level API surfaces. Errors carry enough
//! context (offending ids, expected vs. actual types, parse positions) to
//! make failures actionable from a log line without reproducing the issue.
//!
//! ## Typical flow
//! Low-level operations return their domain error (e.g. [`ColumnError`]);
//! world-level orchestration bubbles them with `?` into [`EcsError`], which
//! callers can match on for control flow.
//!
//! Invariant violations are reported as [`EcsError::Internal`]. They indicate
//! a bug in the runtime, not a runtime condition, and are never returned on a
//! well-formed call sequence.

use thiserror::Error;

use crate::engine::types::EntityId;

/// Convenience alias used across the crate.
pub type EcsResult<T> = Result<T, EcsError>;

/// Reason attached to an [`EcsError::InvalidOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidOperationKind {
    /// A mutation API was called from a thread other than the world's owner.
    WrongThread,
    /// A mutation API was called inside a sealed read-only window.
    ReadOnlyWindow,
    /// `defer_end` was called without a matching `defer_begin`.
    NotDeferred,
    /// `begin_readonly` was called while a deferred scope was open.
    DeferredReadOnly,
    /// `end_readonly` was called outside a read-only window.
    NotReadOnly,
    /// Parallel iteration was requested outside a read-only window or with
    /// a query that declares write access.
    ParallelAccess,
}

impl std::fmt::Display for InvalidOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::WrongThread => "mutation outside the world's owning thread",
            Self::ReadOnlyWindow => "mutation during a sealed read-only window",
            Self::NotDeferred => "defer_end without an open deferred scope",
            Self::DeferredReadOnly => "read-only window inside a deferred scope",
            Self::NotReadOnly => "end_readonly outside a read-only window",
            Self::ParallelAccess => {
                "parallel iteration requires a sealed, read-only world and an all-read query"
            }
        };
        f.write_str(message)
    }
}

/// Errors raised by per-term column access on a query batch.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ColumnError {
    /// A term index exceeded the query's term count.
    #[error("column index {index} out of range (query has {count} terms)")]
    IndexOutOfRange {
        /// Offending term index.
        index: usize,
        /// Number of terms in the query.
        count: usize,
    },

    /// The requested Rust type does not match the column's registered type.
    #[error("column type mismatch: column stores {stored}, requested {requested}")]
    TypeMismatch {
        /// Type name recorded at component registration.
        stored: &'static str,
        /// Type name requested by the caller.
        requested: &'static str,
    },

    /// Access was requested that the term's declared in/out does not permit.
    #[error("column access violation on term {index}: {reason}")]
    AccessViolation {
        /// Offending term index.
        index: usize,
        /// What the caller attempted.
        reason: &'static str,
    },

    /// An owned-column accessor was used on a shared (broadcast) column.
    #[error("column for term {index} is shared; use the broadcast accessor")]
    IsShared {
        /// Offending term index.
        index: usize,
    },

    /// A broadcast accessor was used on an owned column.
    #[error("column for term {index} is not shared")]
    IsNotShared {
        /// Offending term index.
        index: usize,
    },

    /// The term matched no column in this batch (absent optional, tag, or
    /// negated term).
    #[error("term {index} has no data column in this batch")]
    NoData {
        /// Offending term index.
        index: usize,
    },
}

/// Errors produced while compiling a filter signature.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The signature contained no terms.
    #[error("filter has no terms")]
    Empty,

    /// A name in the signature did not resolve to a registered id.
    #[error("unknown identifier `{name}` at byte {at}")]
    UnknownIdentifier {
        /// The unresolved name.
        name: String,
        /// Byte offset in the signature string.
        at: usize,
    },

    /// The parser hit a token it could not accept.
    #[error("unexpected `{found}` at byte {at}, expected {expected}")]
    Unexpected {
        /// Offending text.
        found: String,
        /// Byte offset in the signature string.
        at: usize,
        /// What the grammar allowed at this point.
        expected: &'static str,
    },

    /// An `||` had no term on one side.
    #[error("dangling `||` at byte {at}")]
    DanglingOr {
        /// Byte offset in the signature string.
        at: usize,
    },
}

/// Aggregate error surfaced by world-level operations.
#[derive(Debug, Error)]
pub enum EcsError {
    /// The target id's generation did not match its slot, or the slot is a
    /// grave.
    #[error("entity {0:#x} is not alive")]
    EntityNotAlive(EntityId),

    /// A structural operation named a plain component id that was never
    /// registered with the world.
    #[error("component {0:#x} is not registered")]
    ComponentNotRegistered(EntityId),

    /// Column-level access failure.
    #[error(transparent)]
    Column(#[from] ColumnError),

    /// Filter compilation failure.
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    /// The operation is not legal in the world's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(InvalidOperationKind),

    /// A runtime invariant was violated. Always a bug.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Error recorded for a single deferred command during replay.
///
/// Individual command failures do not abort replay of subsequent commands;
/// the full list is returned from `World::defer_end`.
#[derive(Debug, Error)]
#[error("deferred command {index} targeting {target:#x} failed: {source}")]
pub struct CommandError {
    /// Position of the command in the buffer (insertion order).
    pub index: usize,
    /// Entity the command targeted.
    pub target: EntityId,
    /// The underlying failure.
    pub source: EcsError,
}
