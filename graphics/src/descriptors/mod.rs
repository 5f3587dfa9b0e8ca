//! Descriptor management.
//!
//! Two tiers:
//!
//! - **Offline** ([`OfflineDescriptorAllocator`]): CPU-only heaps where views
//!   and samplers are written once and kept for as long as their resource.
//! - **Online**: shader-visible heaps the GPU reads while executing.
//!   View descriptors stream through an [`OnlineViewRing`]; samplers go
//!   through a content-addressed [`SamplerCache`]. Both sit behind a
//!   [`Rollover`] that swaps in a fresh heap when the current one is full.
//!
//! [`DescriptorTableCache`] ties them together per command context: staged
//! offline handles are copied into the online heaps at commit time.

mod heap;
mod offline;
mod ring;
mod rollover;
mod sampler_cache;
mod table;

pub use heap::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle};
pub use offline::{DEFAULT_OFFLINE_PAGE_SIZE, OfflineDescriptorAllocator};
pub use ring::OnlineViewRing;
pub use rollover::{OnlineDescriptorAllocator, Rollover};
pub use sampler_cache::{SamplerCache, SamplerCacheStats, block_key};
pub use table::{DescriptorTableCache, OnlineHeaps};
