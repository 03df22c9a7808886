use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::traits::Heap;

/// The process allocator, as a [`Heap`] marker.
///
/// This is what [`LocalPolicy`](crate::LocalPolicy) and
/// [`SharedPolicy`](crate::SharedPolicy) allocate holders with.
pub struct GlobalHeap;

unsafe impl Heap for GlobalHeap {
    fn allocate(layout: Layout) -> Result<NonNull<u8>, AllocError> {
        // Box layouts embed a counter and are never zero-sized, which is
        // what `alloc::alloc` requires.
        debug_assert!(layout.size() != 0);
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError {
            size: layout.size(),
        })
    }

    unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

thread_local! {
    static ALLOCATIONS: Cell<usize> = Cell::new(0);
    static DEALLOCATIONS: Cell<usize> = Cell::new(0);
    static LIMIT: Cell<Option<usize>> = Cell::new(None);
}

/// [`GlobalHeap`] wrapped in per-thread bookkeeping.
///
/// Counts every allocation and deallocation made on the current thread and
/// can be capped to a maximum number of live blocks, after which
/// [`allocate`](Heap::allocate) fails. Meant for leak checks and for
/// exercising allocation-failure paths:
///
/// ```
/// use cowbox::{CowBox, LocalCount, MemoryPolicy, MeteredHeap};
///
/// struct MeteredPolicy;
/// impl MemoryPolicy for MeteredPolicy {
///     type Heap = MeteredHeap;
///     type Refcount = LocalCount;
/// }
///
/// MeteredHeap::set_limit(Some(0));
/// assert!(CowBox::<i32, MeteredPolicy>::try_new(1).is_err());
/// MeteredHeap::set_limit(None);
/// ```
///
/// The counters are thread local, so concurrent tests do not observe each
/// other.
pub struct MeteredHeap;

impl MeteredHeap {
    /// Clears the counters and removes any live-allocation limit.
    pub fn reset() {
        ALLOCATIONS.with(|c| c.set(0));
        DEALLOCATIONS.with(|c| c.set(0));
        LIMIT.with(|c| c.set(None));
    }

    /// Caps the number of live blocks; `None` removes the cap.
    pub fn set_limit(limit: Option<usize>) {
        LIMIT.with(|c| c.set(limit));
    }

    /// Allocations made on this thread since the last [`reset`](Self::reset).
    pub fn allocations() -> usize {
        ALLOCATIONS.with(|c| c.get())
    }

    /// Deallocations made on this thread since the last [`reset`](Self::reset).
    pub fn deallocations() -> usize {
        DEALLOCATIONS.with(|c| c.get())
    }

    /// Blocks currently live on this thread.
    pub fn in_use() -> usize {
        Self::allocations() - Self::deallocations()
    }
}

unsafe impl Heap for MeteredHeap {
    fn allocate(layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if let Some(limit) = LIMIT.with(|c| c.get()) {
            if Self::in_use() >= limit {
                return Err(AllocError {
                    size: layout.size(),
                });
            }
        }
        let ptr = GlobalHeap::allocate(layout)?;
        ALLOCATIONS.with(|c| c.set(c.get() + 1));
        Ok(ptr)
    }

    unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout) {
        DEALLOCATIONS.with(|c| c.set(c.get() + 1));
        GlobalHeap::deallocate(ptr, layout);
    }
}
