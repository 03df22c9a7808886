use std::process::abort;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

use crate::concrete::heap::GlobalHeap;
use crate::traits::{MemoryPolicy, Refcount};

// Same headroom as std's Arc: going past this means the count was leaked in
// a loop, and wrapping it would cause a use-after-free.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Atomic counter for cross-thread sharing.
///
/// Orderings follow `Arc`: relaxed increments, a release decrement paired
/// with an acquire fence once the count hits zero so the value's
/// destruction happens after every other handle's last use, and an acquire
/// uniqueness load so an in-place update observes writes made through
/// handles that were dropped on other threads. There are no weak handles,
/// which is what makes the single load a sound uniqueness test.
pub struct SharedCount(AtomicUsize);

unsafe impl Refcount for SharedCount {
    fn one() -> Self {
        SharedCount(AtomicUsize::new(1))
    }

    fn increment(&self) {
        if self.0.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
            abort();
        }
    }

    fn decrement(&self) -> bool {
        if self.0.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    fn is_unique(&self) -> bool {
        self.0.load(Ordering::Acquire) == 1
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// This marker type selects [`GlobalHeap`] plus [`SharedCount`].
///
/// Boxes built on it are `Send` and `Sync` whenever the value is, and may
/// be cloned, dropped, and updated concurrently:
///
/// ```
/// use cowbox::{CowBox, SharedPolicy};
///
/// let base = CowBox::<u64, SharedPolicy>::new(0);
/// let handles: Vec<_> = (0..4)
///     .map(|i| {
///         let shared = base.clone();
///         std::thread::spawn(move || *shared.update(|v| v + i))
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(*base, 0);
/// ```
pub struct SharedPolicy;

impl MemoryPolicy for SharedPolicy {
    type Heap = GlobalHeap;
    type Refcount = SharedCount;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_protocol() {
        let count = SharedCount::one();
        assert!(count.is_unique());

        count.increment();
        count.increment();
        assert_eq!(count.get(), 3);
        assert!(!count.is_unique());

        assert!(!count.decrement());
        assert!(!count.decrement());
        assert!(count.is_unique());
        assert!(count.decrement());
    }
}
