//! Sub-allocators.
//!
//! All allocators here only manage offsets. Memory is provided by the caller:
//! the linear and multi-buddy allocators call back into the caller whenever
//! they need a new page, and the caller maps page indices to GPU heaps or
//! resources.
//!
//! - [`LinearAllocator`] - bump pointer over fixed-size pages, reset per frame
//! - [`BuddyAllocator`] - power-of-two blocks with coalescing over one range
//! - [`MultiBuddyAllocator`] - a growable list of buddy pages

pub mod buddy;
pub mod linear;
pub mod multi_buddy;

pub use buddy::{BuddyAllocation, BuddyAllocator, BuddyBlock};
pub use linear::{LinearAllocation, LinearAllocator};
pub use multi_buddy::{MultiBuddyAllocation, MultiBuddyAllocator};

/// Round `value` up to a multiple of `alignment`.
///
/// `alignment` must be a power of two; zero and one leave the value as is.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// `u32` variant of [`align_up`].
#[inline]
pub const fn align_up_u32(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}
