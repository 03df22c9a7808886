use std::alloc::{handle_alloc_error, Layout};
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::concrete::local::LocalPolicy;
use crate::error::{AllocError, UpdateError};
use crate::traits::{Heap, MemoryPolicy, Refcount};

/// The allocated unit: one counter and one value.
///
/// Created by exactly one `Heap::allocate` call, destroyed exactly when the
/// counter's decrement reports zero. The value is written in place once and
/// only ever moved again by the unique-owner update path.
struct Holder<T, C> {
    count: C,
    value: T,
}

/// Immutable box for a single value of type `T`.
///
/// Cloning shares the underlying holder and never touches `T`; the
/// value is only copied when an [`update`](CowBox::update) actually has to
/// preserve it for co-owners. The heap and the counter are supplied by the
/// `P` policy, [`LocalPolicy`] by default.
///
/// ```
/// use cowbox::CowBox;
///
/// let a = CowBox::<_>::new(1);
/// let b = a.clone();
/// let c = a.update(|v| v + 1);
/// assert_eq!(*a, 1);
/// assert_eq!(*b, 1);
/// assert_eq!(*c, 2);
/// ```
pub struct CowBox<T, P: MemoryPolicy = LocalPolicy> {
    holder: NonNull<Holder<T, P::Refcount>>,
    marker: PhantomData<Holder<T, P::Refcount>>,
}

// A handle hands out &T and may drop T on any thread, so T must be both
// Send and Sync; the counter gates whether concurrent handles are allowed
// at all (LocalCount's Cell is !Sync).
unsafe impl<T, P> Send for CowBox<T, P>
where
    T: Send + Sync,
    P: MemoryPolicy,
    P::Refcount: Send + Sync,
{
}

unsafe impl<T, P> Sync for CowBox<T, P>
where
    T: Send + Sync,
    P: MemoryPolicy,
    P::Refcount: Send + Sync,
{
}

// Releases the holder's memory without dropping its value slot. Armed
// while the unique-owner update runs the transform: at that point the
// value has been moved out, so an unwind must free the block and nothing
// else.
struct ReleaseGuard<H: Heap> {
    raw: NonNull<u8>,
    layout: Layout,
    heap: PhantomData<H>,
}

impl<H: Heap> Drop for ReleaseGuard<H> {
    fn drop(&mut self) {
        unsafe { H::deallocate(self.raw, self.layout) };
    }
}

impl<T, P: MemoryPolicy> CowBox<T, P> {
    /// Constructs a box holding `value`.
    ///
    /// Performs one allocation; on allocation failure this diverts to
    /// [`handle_alloc_error`] like the std containers. Use
    /// [`try_new`](CowBox::try_new) to handle the failure instead.
    pub fn new(value: T) -> Self {
        match Self::try_new(value) {
            Ok(boxed) => boxed,
            Err(_) => handle_alloc_error(Self::layout()),
        }
    }

    /// Constructs a box holding `value`, propagating allocation failure.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        let raw = P::Heap::allocate(Self::layout())?;
        let holder = raw.cast::<Holder<T, P::Refcount>>();
        unsafe {
            holder.as_ptr().write(Holder {
                count: P::Refcount::one(),
                value,
            });
        }
        Ok(CowBox {
            holder,
            marker: PhantomData,
        })
    }

    /// Returns a read-only reference to the held value.
    pub fn get(&self) -> &T {
        &self.holder().value
    }

    /// Returns the address of the held value.
    ///
    /// Two boxes sharing a holder report the same address, which makes
    /// this the identity probe for sharing:
    ///
    /// ```
    /// use cowbox::CowBox;
    ///
    /// let a = CowBox::<_>::new(5);
    /// let b = a.clone();
    /// assert_eq!(CowBox::as_ptr(&a), CowBox::as_ptr(&b));
    /// ```
    pub fn as_ptr(this: &Self) -> *const T {
        unsafe { ptr::addr_of!((*this.holder.as_ptr()).value) }
    }

    /// True iff both boxes reference the identical holder.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.holder == other.holder
    }

    /// Number of boxes currently sharing this box's holder.
    pub fn ref_count(this: &Self) -> usize {
        this.holder().count.get()
    }

    /// Returns a new box holding `transform(current value)`.
    ///
    /// Never mutates the receiver: co-owners of the holder keep observing
    /// the original value. Performs exactly one allocation. If the box is
    /// about to be discarded anyway, [`update_owned`](CowBox::update_owned)
    /// can skip that allocation.
    pub fn update<F>(&self, transform: F) -> Self
    where
        F: FnOnce(&T) -> T,
    {
        Self::new(transform(self.get()))
    }

    /// Fallible form of [`update`](CowBox::update).
    ///
    /// The transform's error and allocation failure both propagate, and
    /// the receiver is untouched either way:
    ///
    /// ```
    /// use cowbox::{CowBox, UpdateError};
    ///
    /// let a = CowBox::<_>::new(3);
    /// let res: Result<_, UpdateError<&str>> = a.try_update(|_| Err("nope"));
    /// assert_eq!(res.unwrap_err(), UpdateError::Transform("nope"));
    /// assert_eq!(*a, 3);
    /// ```
    pub fn try_update<E, F>(&self, transform: F) -> Result<Self, UpdateError<E>>
    where
        F: FnOnce(&T) -> Result<T, E>,
    {
        let value = transform(self.get()).map_err(UpdateError::Transform)?;
        Ok(Self::try_new(value)?)
    }

    /// Consumes the box and returns one holding `transform(value)`.
    ///
    /// When this box is the holder's sole owner, the value is moved out,
    /// transformed, and written back into the same holder: no allocation
    /// and no count traffic. When shared, the value is cloned into the
    /// transform and the result goes into a fresh holder, leaving
    /// co-owners untouched. Sole ownership is exactly what makes the
    /// in-place path unobservable, so the two shapes cannot be told apart.
    ///
    /// ```
    /// use cowbox::CowBox;
    ///
    /// let mut a = CowBox::<_>::new(1);
    /// a = a.update_owned(|v| v + 1);
    /// assert_eq!(*a, 2);
    /// ```
    pub fn update_owned<F>(self, transform: F) -> Self
    where
        T: Clone,
        F: FnOnce(T) -> T,
    {
        if self.holder().count.is_unique() {
            let this = ManuallyDrop::new(self);
            let holder = this.holder;
            unsafe {
                let slot = ptr::addr_of_mut!((*holder.as_ptr()).value);
                let value = ptr::read(slot);
                let guard = ReleaseGuard::<P::Heap> {
                    raw: holder.cast(),
                    layout: Self::layout(),
                    heap: PhantomData,
                };
                let replacement = transform(value);
                mem::forget(guard);
                ptr::write(slot, replacement);
            }
            CowBox {
                holder,
                marker: PhantomData,
            }
        } else {
            self.update(|value| transform(value.clone()))
        }
    }

    fn holder(&self) -> &Holder<T, P::Refcount> {
        unsafe { self.holder.as_ref() }
    }

    fn layout() -> Layout {
        Layout::new::<Holder<T, P::Refcount>>()
    }
}

impl<T, P: MemoryPolicy> Clone for CowBox<T, P> {
    /// Shares the holder. No allocation; `T` is not cloned.
    fn clone(&self) -> Self {
        self.holder().count.increment();
        CowBox {
            holder: self.holder,
            marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        // Self-assignment keeps the count untouched.
        if !Self::ptr_eq(self, source) {
            *self = source.clone();
        }
    }
}

impl<T, P: MemoryPolicy> Drop for CowBox<T, P> {
    fn drop(&mut self) {
        if self.holder().count.decrement() {
            unsafe {
                ptr::drop_in_place(self.holder.as_ptr());
                P::Heap::deallocate(self.holder.cast(), Self::layout());
            }
        }
    }
}

impl<T, P: MemoryPolicy> Deref for CowBox<T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T, P: MemoryPolicy> AsRef<T> for CowBox<T, P> {
    fn as_ref(&self) -> &T {
        self.get()
    }
}

impl<T, P: MemoryPolicy> Borrow<T> for CowBox<T, P> {
    fn borrow(&self) -> &T {
        self.get()
    }
}

impl<T: Default, P: MemoryPolicy> Default for CowBox<T, P> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, P: MemoryPolicy> From<T> for CowBox<T, P> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: PartialEq, P: MemoryPolicy> PartialEq for CowBox<T, P> {
    /// Identity first, then value equality.
    ///
    /// Boxes sharing a holder compare equal without invoking `T`'s
    /// equality at all.
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other) || self.get() == other.get()
    }
}

impl<T: Eq, P: MemoryPolicy> Eq for CowBox<T, P> {}

impl<T: PartialEq, P: MemoryPolicy> PartialEq<T> for CowBox<T, P> {
    /// Compares the stored value against a raw `T` directly, without
    /// boxing it first.
    fn eq(&self, other: &T) -> bool {
        self.get() == other
    }
}

impl<T: fmt::Debug, P: MemoryPolicy> fmt::Debug for CowBox<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}

impl<T: fmt::Display, P: MemoryPolicy> fmt::Display for CowBox<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}
