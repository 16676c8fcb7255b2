//! Managed-runtime core for a freestanding kernel.
//!
//! This crate provides the three subsystems a kernel needs to host
//! ahead-of-time compiled managed code without any host runtime underneath
//! it:
//!
//! - a page-backed heap with a [`page`] allocator and [`heap`] size-class
//!   routing (small/medium/large),
//! - a precise mark-and-sweep [`gc`] driven by per-type [`object`]
//!   descriptors, a [`handles`] table and a [`frozen`] segment registry,
//! - a two-pass DWARF-based [`unwind`] dispatcher.
//!
//! Everything here runs with no host operating system underneath: no heap
//! allocator, no threads, no filesystem. The crate never reaches for
//! `alloc` — every byte it hands out comes from [`page::PageAllocator`].
//!
//! ```ignore
//! let mut core = mrt_core::CoreConfig::default();
//! let mut heap = mrt_core::heap::Heap::new(region_base, region_len, core)?;
//! let ptr = heap.alloc(method_table, 0);
//! ```
#![no_std]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod error;
pub mod frozen;
pub mod gc;
pub mod handles;
pub mod heap;
pub mod intrinsics;
pub mod object;
pub mod page;
pub mod sync;
pub mod unwind;

pub use config::CoreConfig;
pub use error::CoreError;
