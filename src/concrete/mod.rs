pub mod heap;
pub mod local;
pub mod shared;
