//! Paging subsystem
//!
//! This module provides the memory management primitives used at boot:
//! - Physical frame allocation from a fixed pool
//! - Two-level 32-bit page directory / page table construction
//! - Paging activation and page fault reporting
//!
//! Boot order: allocate the directory, map the kernel image and devices,
//! register [`page_fault_handler`] at vector 14, then [`AddressSpace::activate`].

mod address_space;
mod entry;
mod error;
mod fault;
mod frame_allocator;
mod memory;


// Public exports
pub use address_space::{deactivate, is_enabled, AddressSpace};
pub use entry::{EntryFlags, PageTable, PageTableEntry};
pub use error::{PagingError, PagingResult};
pub use fault::{page_fault_handler, PageFault};
pub use frame_allocator::{FrameAllocator, PhysAllocator};
pub use memory::{IdentityMemory, PhysicalMemory};
