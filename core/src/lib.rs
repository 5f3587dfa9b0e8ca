//! # Kiln Core
//!
//! API-agnostic building blocks shared by the Kiln GPU layer:
//!
//! - [`release`] - fence values and fence-ordered release queues
//! - [`alloc`] - linear, buddy and multi-buddy sub-allocators
//! - [`intern`] - string interning for graph resource names
//!
//! Nothing in this crate talks to a GPU. Allocators only do bookkeeping;
//! backing memory is supplied by the caller through page callbacks.

pub mod alloc;
pub mod contract;
pub mod intern;
pub mod release;

pub use release::{FenceValue, ReleaseQueue};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
