use thiserror::Error;

/// The heap could not supply memory for a holder.
///
/// This is the only failure the box itself produces. It surfaces from
/// [`CowBox::try_new`](crate::CowBox::try_new) and the shared path of
/// [`CowBox::try_update`](crate::CowBox::try_update); the infallible entry
/// points divert to [`std::alloc::handle_alloc_error`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("heap could not supply {size} bytes for a holder")]
pub struct AllocError {
    /// Size in bytes of the holder that could not be allocated.
    pub size: usize,
}

/// Failure of a [`CowBox::try_update`](crate::CowBox::try_update) call.
///
/// The transform's own error passes through unchanged as [`Transform`];
/// the box is left untouched in either case.
///
/// [`Transform`]: UpdateError::Transform
#[derive(Debug, PartialEq, Eq, Error)]
pub enum UpdateError<E> {
    /// Allocating the replacement holder failed.
    #[error("holder allocation failed: {0}")]
    Alloc(#[from] AllocError),
    /// The user-supplied transform failed.
    #[error("transform failed: {0}")]
    Transform(E),
}
