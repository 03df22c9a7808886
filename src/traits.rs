use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::AllocError;

/// Raw memory supplier for holders.
///
/// A heap is a marker type selected at compile time through a
/// [`MemoryPolicy`]; the box handle itself stores no heap state. In this
/// crate, [`GlobalHeap`](crate::GlobalHeap) forwards to the process
/// allocator and [`MeteredHeap`](crate::MeteredHeap) instruments it.
///
/// Layouts requested by the box always embed a counter, so they are never
/// zero-sized.
///
/// # Safety
///
/// `allocate` must return memory valid for `layout` until it is passed back
/// to `deallocate` with the same layout, and must report failure through
/// the `Err` variant rather than returning a dangling pointer.
pub unsafe trait Heap {
    /// Obtains a block of memory for one holder.
    fn allocate(layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns a block previously obtained from [`allocate`](Heap::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this same heap with this same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout);
}

/// Ownership counter embedded in every holder.
///
/// The box calls exactly four operations on it: construction at one,
/// increment on clone, decrement-and-test-zero on drop, and the uniqueness
/// test gating the in-place update. [`get`](Refcount::get) exists for
/// instrumentation and tests only; the box never bases a decision on it.
///
/// # Safety
///
/// `is_unique` must return true only when exactly one handle references the
/// holder, with any cross-thread synchronization the strategy permits
/// already accounted for. A false positive lets the box mutate a shared
/// value in place, which is undefined behavior.
pub unsafe trait Refcount {
    /// A fresh counter for a holder with a single owner.
    fn one() -> Self;

    /// Records one more owning handle.
    fn increment(&self);

    /// Records one handle going away; true iff the count reached zero.
    #[must_use]
    fn decrement(&self) -> bool;

    /// True iff exactly one handle owns the holder right now.
    fn is_unique(&self) -> bool;

    /// Current count, for observation only.
    fn get(&self) -> usize;
}

/// Bundles the two strategies a [`CowBox`](crate::CowBox) is built on.
///
/// Implemented by marker types; [`LocalPolicy`](crate::LocalPolicy) is the
/// default, [`SharedPolicy`](crate::SharedPolicy) allows cross-thread
/// sharing. Tests and downstream crates can mix their own, for example an
/// instrumented heap with a non-atomic counter:
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
/// let boxed = CowBox::<i32, MeteredPolicy>::new(1);
/// assert_eq!(MeteredHeap::in_use(), 1);
/// drop(boxed);
/// assert_eq!(MeteredHeap::in_use(), 0);
/// ```
pub trait MemoryPolicy {
    type Heap: Heap;
    type Refcount: Refcount;
}
