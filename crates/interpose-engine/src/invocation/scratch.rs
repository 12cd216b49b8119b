//! Aligned scratch buffers for aggregate slots
//!
//! An aggregate argument or return value is copied into a buffer allocated
//! with the aggregate's declared size and alignment, and the value handed on
//! is copied back out of it. Buffers are owned by a single `invoke` call and
//! freed when it returns.

use crate::signature::AggregateLayout;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

pub(crate) struct ScratchBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl ScratchBuffer {
    /// Allocate a zeroed buffer for an aggregate.
    ///
    /// # Panics
    ///
    /// Panics if the layout's alignment is not a power of two, which a
    /// decoded encoding never produces.
    pub(crate) fn new(aggregate: &AggregateLayout) -> Self {
        let layout = Layout::from_size_align(aggregate.size, aggregate.align.max(1))
            .unwrap_or_else(|_| panic!("invalid aggregate layout for `{}`", aggregate.name));

        if layout.size() == 0 {
            return Self {
                ptr: NonNull::dangling(),
                layout,
            };
        }

        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }

    /// Copy bytes into the buffer. The length must equal the buffer size.
    pub(crate) fn fill(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.layout.size(), "aggregate size mismatch");
        self.as_mut_slice().copy_from_slice(bytes);
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() bytes (or dangling with size 0)
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and we hold the only reference
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    #[cfg(test)]
    pub(crate) fn is_aligned(&self) -> bool {
        self.ptr.as_ptr() as usize % self.layout.align() == 0
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            // SAFETY: allocated in `new` with this layout
            unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}
