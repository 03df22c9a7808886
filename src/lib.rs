/*!
A single-value copy-on-write box for building persistent data structures.

## What is it for

Your library hands out logically immutable values, but "updating" one by
copying the whole thing every time is too expensive. [`CowBox`] stores one
value behind a reference-counted holder: clones share the holder for free,
and an update only copies the value when somebody else is still looking at
it. When the box is the sole owner, the update mutates the holder in place
with zero allocations.

The two things a box needs from its environment, raw memory and an
ownership counter, are strategy traits ([`Heap`] and [`Refcount`]) bundled
by a [`MemoryPolicy`] marker. [`LocalPolicy`] is the single-threaded
default; [`SharedPolicy`] counts atomically so holders can be shared across
threads; [`MeteredHeap`] instruments allocation for leak checks and
failure injection.

## Show me the code

```
use cowbox::CowBox;

let a = CowBox::<_>::new(1);
let b = a.clone();              // shares the holder, nothing is copied
assert!(CowBox::ptr_eq(&a, &b));

let c = a.update(|v| v + 1);    // fresh holder, co-owners untouched
assert_eq!(*a, 1);
assert_eq!(*b, 1);
assert_eq!(*c, 2);

drop(b);
drop(c);
let a = a.update_owned(|v| v + 1); // sole owner: mutated in place
assert_eq!(*a, 2);
```

## Choosing a policy

The policy is a type parameter, so the choice is made at compile time and
costs nothing per box:

```
use cowbox::{CowBox, SharedPolicy};

let counter = CowBox::<u64, SharedPolicy>::new(0);
let seen = counter.clone();
std::thread::spawn(move || assert_eq!(*seen, 0)).join().unwrap();
```

Custom policies just pair a [`Heap`] with a [`Refcount`]; see
[`MemoryPolicy`] for an instrumented example.
*/

pub mod boxed;
pub mod concrete;
pub mod error;
pub mod traits;

pub use boxed::CowBox;
pub use concrete::heap::{GlobalHeap, MeteredHeap};
pub use concrete::local::{LocalCount, LocalPolicy};
pub use concrete::shared::{SharedCount, SharedPolicy};
pub use error::{AllocError, UpdateError};
pub use traits::*;

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::thread;

    struct MeteredPolicy;

    impl MemoryPolicy for MeteredPolicy {
        type Heap = MeteredHeap;
        type Refcount = LocalCount;
    }

    thread_local! {
        static DROPS: Cell<usize> = Cell::new(0);
    }

    struct Tally;

    impl Clone for Tally {
        fn clone(&self) -> Self {
            Tally
        }
    }

    impl Drop for Tally {
        fn drop(&mut self) {
            DROPS.with(|d| d.set(d.get() + 1));
        }
    }

    #[test]
    fn clones_share_the_holder() {
        let a = CowBox::<_>::new(5);
        let b = a.clone();
        assert!(CowBox::ptr_eq(&a, &b));
        assert_eq!(CowBox::as_ptr(&a), CowBox::as_ptr(&b));
    }

    #[test]
    fn update_leaves_co_owners_untouched() {
        let a = CowBox::<_>::new(1);
        let b = a.clone();
        let c = a.update(|v| v + 1);

        assert_eq!(*a, 1);
        assert_eq!(*b, 1);
        assert_eq!(*c, 2);
        assert!(CowBox::ptr_eq(&a, &b));
        assert!(!CowBox::ptr_eq(&a, &c));
    }

    #[test]
    fn sole_owner_update_reuses_the_holder() {
        MeteredHeap::reset();
        let a = CowBox::<i32, MeteredPolicy>::new(1);
        let addr = CowBox::as_ptr(&a);
        let before = MeteredHeap::allocations();

        let a = a.update_owned(|v| v + 1);

        assert_eq!(*a, 2);
        assert_eq!(MeteredHeap::allocations(), before);
        assert_eq!(CowBox::as_ptr(&a), addr);
        drop(a);
        assert_eq!(MeteredHeap::in_use(), 0);
    }

    #[test]
    fn shared_owned_update_falls_back_to_a_fresh_holder() {
        let a = CowBox::<_>::new(10);
        let b = a.clone();

        let c = b.update_owned(|v| v * 2);

        assert_eq!(*a, 10);
        assert_eq!(*c, 20);
        assert!(!CowBox::ptr_eq(&a, &c));
        assert_eq!(CowBox::ref_count(&a), 1);
    }

    #[test]
    fn refcount_follows_handles() {
        let a = CowBox::<_>::new("x".to_owned());
        assert_eq!(CowBox::ref_count(&a), 1);

        let b = a.clone();
        let c = b.clone();
        assert_eq!(CowBox::ref_count(&a), 3);

        let moved = c;
        assert_eq!(CowBox::ref_count(&moved), 3);

        drop(moved);
        drop(b);
        assert_eq!(CowBox::ref_count(&a), 1);
    }

    #[test]
    fn value_dropped_exactly_once() {
        DROPS.with(|d| d.set(0));
        let a = CowBox::<_>::new(Tally);
        let b = a.clone();
        let c = a.clone();
        drop(a);
        drop(c);
        DROPS.with(|d| assert_eq!(d.get(), 0));
        drop(b);
        DROPS.with(|d| assert_eq!(d.get(), 1));
    }

    #[test]
    fn value_equality_across_distinct_holders() {
        assert!(CowBox::<i32>::new(5) == CowBox::<_>::new(5));
        assert!(CowBox::<i32>::new(5) != CowBox::<_>::new(6));
    }

    #[test]
    fn identity_equality_skips_value_comparison() {
        struct LoudEq;
        impl PartialEq for LoudEq {
            fn eq(&self, _: &Self) -> bool {
                panic!("value equality invoked");
            }
        }

        let a = CowBox::<_>::new(LoudEq);
        let b = a.clone();
        assert!(a == b);
    }

    #[test]
    fn raw_value_comparison_does_not_allocate() {
        MeteredHeap::reset();
        let a = CowBox::<i32, MeteredPolicy>::new(5);
        let before = MeteredHeap::allocations();

        assert!(a == 5);
        assert!(a != 6);
        assert_eq!(MeteredHeap::allocations(), before);
    }

    #[test]
    fn transform_failure_leaves_the_box_unchanged() {
        let a = CowBox::<_>::new(3);
        let res: Result<_, UpdateError<&str>> = a.try_update(|_| Err("nope"));
        assert_eq!(res.unwrap_err(), UpdateError::Transform("nope"));
        assert_eq!(*a, 3);
    }

    #[test]
    fn allocation_failure_leaves_the_box_unchanged() {
        MeteredHeap::reset();
        let a = CowBox::<i32, MeteredPolicy>::new(3);

        MeteredHeap::set_limit(Some(1));
        let res: Result<_, UpdateError<()>> = a.try_update(|v| Ok(v + 1));
        assert!(matches!(res.unwrap_err(), UpdateError::Alloc(_)));
        assert_eq!(*a, 3);

        MeteredHeap::set_limit(None);
        let b = a.try_update::<(), _>(|v| Ok(v + 1)).unwrap();
        assert_eq!(*b, 4);
    }

    #[test]
    fn construction_propagates_allocation_failure() {
        MeteredHeap::reset();
        MeteredHeap::set_limit(Some(0));
        let err = CowBox::<i32, MeteredPolicy>::try_new(1).unwrap_err();
        assert!(err.size > 0);
        MeteredHeap::set_limit(None);
    }

    #[test]
    fn mixed_operations_release_every_holder() {
        MeteredHeap::reset();
        {
            let a = CowBox::<String, MeteredPolicy>::new("seed".to_owned());
            let b = a.clone();
            let c = a.update(|v| format!("{v}!"));
            let d = c.clone().update_owned(|mut v| {
                v.push('?');
                v
            });
            assert_eq!(*b, "seed");
            assert_eq!(*d, "seed!?");
        }
        assert_eq!(MeteredHeap::in_use(), 0);
    }

    #[test]
    fn panicking_transform_neither_leaks_nor_double_frees() {
        MeteredHeap::reset();
        DROPS.with(|d| d.set(0));

        let a = CowBox::<Tally, MeteredPolicy>::new(Tally);
        let result = catch_unwind(AssertUnwindSafe(move || {
            a.update_owned(|_value| panic!("boom"))
        }));

        assert!(result.is_err());
        DROPS.with(|d| assert_eq!(d.get(), 1));
        assert_eq!(MeteredHeap::in_use(), 0);
    }

    #[test]
    fn shared_policy_works_across_threads() {
        let base = CowBox::<u64, SharedPolicy>::new(7);
        let threads: Vec<_> = (0..8u64)
            .map(|i| {
                let shared = base.clone();
                thread::spawn(move || {
                    let copy = shared.clone();
                    assert_eq!(*copy, 7);
                    let updated = copy.update_owned(|v| v + i);
                    assert_eq!(*updated, 7 + i);
                    assert_eq!(*shared, 7);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(CowBox::ref_count(&base), 1);
        assert_eq!(*base, 7);
    }

    #[test]
    fn conversions_and_formatting() {
        let a: CowBox<i32> = 5.into();
        assert_eq!(*a, 5);

        let d = CowBox::<i32>::default();
        assert_eq!(*d, 0);

        assert_eq!(format!("{a:?}"), "5");
        assert_eq!(format!("{a}"), "5");
    }

    #[test]
    fn clone_from_handles_self_assignment() {
        let mut a = CowBox::<_>::new(1);
        let b = a.clone();
        a.clone_from(&b);
        assert_eq!(CowBox::ref_count(&a), 2);

        let other = CowBox::<_>::new(2);
        a.clone_from(&other);
        assert!(CowBox::ptr_eq(&a, &other));
        assert_eq!(CowBox::ref_count(&b), 1);
    }

    #[quickcheck]
    fn refcount_matches_live_handles(ops: Vec<bool>) -> bool {
        let mut handles = vec![CowBox::<_>::new(7)];
        for clone_next in ops {
            if clone_next {
                let copy = handles.last().unwrap().clone();
                handles.push(copy);
            } else if handles.len() > 1 {
                handles.pop();
            }
        }
        CowBox::ref_count(&handles[0]) == handles.len() && handles.iter().all(|h| **h == 7)
    }

    #[quickcheck]
    fn update_chain_matches_plain_fold(start: i32, deltas: Vec<i8>) -> bool {
        let mut boxed = CowBox::<_>::new(start);
        let mut plain = start;
        for delta in deltas {
            boxed = boxed.update_owned(|v| v.wrapping_add(delta as i32));
            plain = plain.wrapping_add(delta as i32);
        }
        *boxed == plain
    }
}
