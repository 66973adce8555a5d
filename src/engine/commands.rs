//! Deferred command buffer.
//!
//! While the world is deferred, every structural mutation is appended to a
//! [`CommandBuffer`] instead of being applied. `defer_end` replays the log in
//! insertion order. Values passed to `set` are copied into the buffer's own
//! arena at enqueue time, so the caller's value can go out of scope before
//! replay; the arena is freed after replay.
//!
//! Replay semantics (enforced by the world's replay loop):
//! - Commands targeting an id deleted earlier in the same buffer are
//!   silently dropped.
//! - A command that errors is recorded and replay continues with subsequent
//!   commands.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use crate::engine::registry::{ComponentDescriptor, DtorFn};
use crate::engine::types::EntityId;

/// One queued structural mutation.
#[derive(Clone, Copy, Debug)]
pub enum CommandKind {
    /// Add a component (default-initialized).
    Add {
        /// Component to add.
        component: EntityId,
    },
    /// Remove a component.
    Remove {
        /// Component to remove.
        component: EntityId,
    },
    /// Overwrite a component value with a payload captured in the arena.
    Set {
        /// Component to write.
        component: EntityId,
        /// Arena slot holding the captured value.
        payload: usize,
    },
    /// Delete the entity.
    Delete,
}

/// A command plus its target entity.
#[derive(Clone, Copy, Debug)]
pub struct Command {
    /// Entity the command applies to.
    pub target: EntityId,
    /// The operation.
    pub kind: CommandKind,
}

struct Payload {
    data: NonNull<u8>,
    layout: Layout,
    dtor: Option<DtorFn>,
    consumed: bool,
}

/// Append-only log of deferred mutations with a value arena.
#[derive(Default)]
pub struct CommandBuffer {
    ops: Vec<Command>,
    payloads: Vec<Payload>,
}

// SAFETY: payloads are owned allocations only touched from the world's
// owning thread; the buffer rides inside World solely so the sealed
// read-only window can share &World across rayon workers, which never
// reach the buffer.
unsafe impl Send for CommandBuffer {}
unsafe impl Sync for CommandBuffer {}

impl CommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if no commands are queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued commands in insertion order.
    #[inline]
    pub fn ops(&self) -> &[Command] {
        &self.ops
    }

    /// Queues an add.
    pub fn push_add(&mut self, target: EntityId, component: EntityId) {
        self.ops.push(Command { target, kind: CommandKind::Add { component } });
    }

    /// Queues a remove.
    pub fn push_remove(&mut self, target: EntityId, component: EntityId) {
        self.ops.push(Command { target, kind: CommandKind::Remove { component } });
    }

    /// Queues a delete.
    pub fn push_delete(&mut self, target: EntityId) {
        self.ops.push(Command { target, kind: CommandKind::Delete });
    }

    /// Queues a set, capturing the value into the arena.
    ///
    /// ## Safety
    /// `source` must point to a valid, initialized value of the descriptor's
    /// type; ownership of that value transfers to the buffer (the caller
    /// must forget it).
    pub unsafe fn push_set(
        &mut self,
        target: EntityId,
        component: EntityId,
        source: *const u8,
        descriptor: &ComponentDescriptor,
    ) {
        let layout = Layout::from_size_align(descriptor.size as usize, descriptor.align as usize)
            .expect("component layout overflows isize");
        let data = unsafe { alloc(layout) };
        let data = match NonNull::new(data) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        };
        unsafe { std::ptr::copy_nonoverlapping(source, data.as_ptr(), layout.size()) };

        let payload = self.payloads.len();
        self.payloads.push(Payload { data, layout, dtor: descriptor.dtor, consumed: false });
        self.ops.push(Command { target, kind: CommandKind::Set { component, payload } });
    }

    /// Pointer to a captured payload value.
    #[inline]
    pub fn payload_ptr(&self, payload: usize) -> *const u8 {
        self.payloads[payload].data.as_ptr()
    }

    /// Marks a payload as moved into the world; its destructor will not run
    /// when the arena is freed.
    #[inline]
    pub fn mark_consumed(&mut self, payload: usize) {
        self.payloads[payload].consumed = true;
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        for payload in &self.payloads {
            if !payload.consumed {
                if let Some(dtor) = payload.dtor {
                    unsafe { dtor(payload.data.as_ptr(), 1) };
                }
            }
            unsafe { dealloc(payload.data.as_ptr(), payload.layout) };
        }
    }
}
