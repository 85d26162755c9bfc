//! Protection-domain bootstrap for a 32-bit x86 protected-mode kernel.
//!
//! Three subsystems, installed in this order at boot:
//!
//! - [`gdt`]: the Global Descriptor Table with flat kernel/user segments and
//!   a Task State Segment for ring 3 -> ring 0 stack switches
//! - [`idt`]: the Interrupt Descriptor Table, the 8259 remapping ([`pic`])
//!   and the fault / IRQ / software interrupt registries and dispatcher
//! - [`paging`]: the physical frame allocator, the two-level page tables and
//!   paging activation
//!
//! Every structure here is an owned value. Nothing touches hardware directly:
//! privileged instructions and port I/O go through [`hal::Cpu`], so the kernel
//! plugs in the real CPU and the tests plug in a recording double.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod config;
pub mod gdt;
pub mod hal;
pub mod idt;
pub mod paging;
pub mod pic;

pub use addr::{Page, PhysAddr, PhysFrame, VirtAddr};
pub use hal::{Cpu, DescriptorTablePointer, PortIo};
