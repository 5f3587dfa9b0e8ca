//! Buffer sub-allocation.
//!
//! Small buffers (per-draw constants, staging data, render-graph temporaries)
//! are carved out of large page buffers instead of being created one by one.
//!
//! | Allocator | Lifetime | Backing |
//! |-----------|----------|---------|
//! | [`LinearBufferAllocator`] | one frame | pages recycled by frame fence |
//! | [`BuddyBufferAllocator`] | until released | buddy blocks over pages |

mod buddy;
mod linear;
mod page_pool;
mod slice;

pub use buddy::{BuddyBufferAllocator, CONSTANT_BLOCK_SIZE, PersistentSlice};
pub use linear::LinearBufferAllocator;
pub use page_pool::PagePool;
pub use slice::BufferSlice;
