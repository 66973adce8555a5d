//! Type-erased component column storage.
//!
//! A [`Column`] is one contiguous buffer of a single component type inside an
//! archetype. Columns know nothing about Rust types at runtime: element size,
//! alignment, and the construct/destroy hooks all come from the component's
//! [`ComponentDescriptor`], and generic code dispatches through that
//! descriptor.
//!
//! ## Layout
//! - Allocation is `Layout`-based with the descriptor's size and alignment.
//! - Growth doubles the capacity, with a minimum capacity of 2.
//! - Rows are kept dense with swap-remove; row order is not stable across
//!   removals.
//!
//! ## Unsafe code
//! This module is one of the two places in the crate that manipulate raw
//! component memory (the other is the query batch view). Callers must keep
//! the archetype-level invariant that every column of a table has the same
//! length as the entity column.

use std::alloc::{alloc, dealloc, handle_alloc_error, realloc, Layout};
use std::ptr::NonNull;

use crate::engine::registry::ComponentDescriptor;

/// A contiguous, type-erased buffer of component values.
pub struct Column {
    data: NonNull<u8>,
    len: usize,
    cap: usize,
    descriptor: ComponentDescriptor,
}

// SAFETY: a Column is a plain owned allocation. Access is serialized by the
// world's owning-thread discipline; the read-only window is the only state in
// which columns are touched from worker threads, and then only immutably.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Creates an empty column for a data-bearing descriptor.
    ///
    /// ## Panics
    /// Panics if the descriptor is a tag (`size == 0`); tags never get
    /// columns.
    pub fn new(descriptor: ComponentDescriptor) -> Self {
        assert!(descriptor.size > 0, "tag components do not get columns");
        Self {
            // Aligned dangling pointer; never dereferenced while cap == 0.
            data: NonNull::new(descriptor.align as usize as *mut u8)
                .expect("component alignment must be non-zero"),
            len: 0,
            cap: 0,
            descriptor,
        }
    }

    /// Number of initialized rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the column holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The descriptor this column was created from.
    #[inline]
    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    #[inline]
    fn element_size(&self) -> usize {
        self.descriptor.size as usize
    }

    fn layout(&self, capacity: usize) -> Layout {
        Layout::from_size_align(capacity * self.element_size(), self.descriptor.align as usize)
            .expect("component layout overflows isize")
    }

    fn grow(&mut self) {
        let new_cap = if self.cap == 0 { 2 } else { self.cap * 2 };
        let new_layout = self.layout(new_cap);
        let new_data = if self.cap == 0 {
            unsafe { alloc(new_layout) }
        } else {
            let old_layout = self.layout(self.cap);
            unsafe { realloc(self.data.as_ptr(), old_layout, new_layout.size()) }
        };
        self.data = match NonNull::new(new_data) {
            Some(ptr) => ptr,
            None => handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    /// Raw pointer to the start of the buffer.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Raw pointer to the cell at `row`.
    #[inline]
    pub fn cell(&self, row: usize) -> *mut u8 {
        debug_assert!(row < self.len, "cell index out of range");
        unsafe { self.data.as_ptr().add(row * self.element_size()) }
    }

    /// Appends one default-initialized row and returns its index.
    ///
    /// Runs the descriptor constructor, or zero-fills when no constructor is
    /// registered.
    pub fn push_default(&mut self) -> usize {
        if self.len == self.cap {
            self.grow();
        }
        let row = self.len;
        let ptr = unsafe { self.data.as_ptr().add(row * self.element_size()) };
        match self.descriptor.ctor {
            Some(ctor) => unsafe { ctor(ptr, 1) },
            None => unsafe { std::ptr::write_bytes(ptr, 0, self.element_size()) },
        }
        self.len = row + 1;
        row
    }

    /// Appends one row by bitwise copy from `source` and returns its index.
    ///
    /// ## Safety
    /// `source` must point to a valid, initialized element of this column's
    /// type, and ownership of that element transfers to the column (the
    /// caller must not destroy it afterwards).
    pub unsafe fn push_moved(&mut self, source: *const u8) -> usize {
        if self.len == self.cap {
            self.grow();
        }
        let row = self.len;
        let ptr = unsafe { self.data.as_ptr().add(row * self.element_size()) };
        unsafe { std::ptr::copy_nonoverlapping(source, ptr, self.element_size()) };
        self.len = row + 1;
        row
    }

    /// Overwrites the cell at `row` by bitwise copy from `source`.
    ///
    /// ## Safety
    /// As [`push_moved`](Self::push_moved); the previous value must already
    /// have been destroyed by the caller.
    pub unsafe fn write_cell(&mut self, row: usize, source: *const u8) {
        debug_assert!(row < self.len);
        let ptr = unsafe { self.data.as_ptr().add(row * self.element_size()) };
        unsafe { std::ptr::copy_nonoverlapping(source, ptr, self.element_size()) };
    }

    /// Runs the destructor for the cell at `row` without removing it.
    ///
    /// The cell's bytes are considered uninitialized afterwards; the caller
    /// must overwrite or swap-remove the row before any other access.
    pub fn drop_cell(&mut self, row: usize) {
        debug_assert!(row < self.len);
        if let Some(dtor) = self.descriptor.dtor {
            let ptr = unsafe { self.data.as_ptr().add(row * self.element_size()) };
            unsafe { dtor(ptr, 1) };
        }
    }

    /// Removes the row by moving the last row into its place, without
    /// destroying the removed cell's value (the caller took ownership).
    ///
    /// Returns `true` if another row was relocated into `row`.
    pub fn swap_remove_raw(&mut self, row: usize) -> bool {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        let moved = row != last;
        if moved {
            let size = self.element_size();
            unsafe {
                let base = self.data.as_ptr();
                std::ptr::copy_nonoverlapping(base.add(last * size), base.add(row * size), size);
            }
        }
        self.len = last;
        moved
    }

    /// Destroys the value at `row` and removes the row with swap-remove.
    ///
    /// Returns `true` if another row was relocated into `row`.
    pub fn swap_remove(&mut self, row: usize) -> bool {
        self.drop_cell(row);
        self.swap_remove_raw(row)
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if let Some(dtor) = self.descriptor.dtor {
            if self.len > 0 {
                unsafe { dtor(self.data.as_ptr(), self.len) };
            }
        }
        if self.cap > 0 {
            let layout = self.layout(self.cap);
            unsafe { dealloc(self.data.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::ComponentDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Tracked(#[allow(dead_code)] u64);

    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn push_and_swap_remove_keep_rows_dense() {
        let mut column = Column::new(ComponentDescriptor::of::<u64>("V").with_id(1));
        for value in 0u64..5 {
            let row = column.push_default();
            unsafe { column.write_cell(row, (&value as *const u64).cast()) };
        }
        assert_eq!(column.len(), 5);

        // Remove row 1; row 4's value (4) must move down.
        let moved = column.swap_remove(1);
        assert!(moved);
        assert_eq!(column.len(), 4);
        let value = unsafe { *column.cell(1).cast::<u64>() };
        assert_eq!(value, 4);

        // Removing the last row relocates nothing.
        assert!(!column.swap_remove(3));
    }

    #[test]
    fn destructors_run_once_per_value() {
        DROPS.store(0, Ordering::SeqCst);
        {
            let mut column = Column::new(ComponentDescriptor::of::<Tracked>("T").with_id(1));
            for _ in 0..4 {
                column.push_default();
            }
            column.swap_remove(0);
            assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        }
        // Remaining three dropped with the column.
        assert_eq!(DROPS.load(Ordering::SeqCst), 4);
    }
}
