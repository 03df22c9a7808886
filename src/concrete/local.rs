use std::cell::Cell;

use crate::concrete::heap::GlobalHeap;
use crate::traits::{MemoryPolicy, Refcount};

/// Non-atomic counter for single-threaded sharing.
///
/// A plain [`Cell`], so boxes counted by it are `!Sync` and stay on the
/// thread that created them. This is the cheap default; use
/// [`SharedCount`](crate::SharedCount) to share holders across threads.
pub struct LocalCount(Cell<usize>);

unsafe impl Refcount for LocalCount {
    fn one() -> Self {
        LocalCount(Cell::new(1))
    }

    fn increment(&self) {
        let count = self.0.get();
        assert!(count != usize::MAX, "refcount overflow");
        self.0.set(count + 1);
    }

    fn decrement(&self) -> bool {
        let count = self.0.get() - 1;
        self.0.set(count);
        count == 0
    }

    fn is_unique(&self) -> bool {
        self.0.get() == 1
    }

    fn get(&self) -> usize {
        self.0.get()
    }
}

/// This marker type selects [`GlobalHeap`] plus [`LocalCount`].
///
/// It is the default policy of [`CowBox`](crate::CowBox): no atomics, no
/// cross-thread sharing.
///
/// ```
/// use cowbox::{CowBox, LocalPolicy};
///
/// let a: CowBox<i32> = CowBox::new(1); // same as CowBox<i32, LocalPolicy>
/// let b: CowBox<i32, LocalPolicy> = a.clone();
/// assert!(CowBox::ptr_eq(&a, &b));
/// ```
pub struct LocalPolicy;

impl MemoryPolicy for LocalPolicy {
    type Heap = GlobalHeap;
    type Refcount = LocalCount;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_protocol() {
        let count = LocalCount::one();
        assert!(count.is_unique());
        assert_eq!(count.get(), 1);

        count.increment();
        assert!(!count.is_unique());
        assert_eq!(count.get(), 2);

        assert!(!count.decrement());
        assert!(count.is_unique());
        assert!(count.decrement());
        assert_eq!(count.get(), 0);
    }
}
