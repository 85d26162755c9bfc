//! Global Descriptor Table (GDT) subsystem
//!
//! The GDT uses flat segmentation: every code and data segment spans the
//! full 4 GiB, and protection is left to paging. It contains:
//!
//! | Index | Entry              | DPL |
//! |-------|--------------------|-----|
//! | 0     | null               | -   |
//! | 1     | kernel code        | 0   |
//! | 2     | kernel data        | 0   |
//! | 3     | user code          | 3   |
//! | 4     | user data          | 3   |
//! | 5     | Task State Segment | 0   |
//!
//! The TSS provides the ring 0 stack (`ss0:esp0`) used on every
//! transition from ring 3.
//!
//! # Activation order
//!
//! 1. `lgdt`
//! 2. reload DS/ES/FS/GS/SS
//! 3. far transfer to reload CS
//! 4. `ltr`
//!
//! Reloading a segment register before GDTR points at the new table, or
//! loading TR before the TSS descriptor is in the loaded table, faults
//! with no handler in place, which resets the machine.

pub mod descriptor;
pub mod tss;


use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

use crate::config::{
    GDT_ENTRIES, GDT_KERNEL_CODE_INDEX, GDT_KERNEL_DATA_INDEX, GDT_TSS_INDEX,
    GDT_USER_CODE_INDEX, GDT_USER_DATA_INDEX, TSS_SIZE,
};
use crate::hal::{linear_address, Cpu, DescriptorTablePointer};

pub use descriptor::{build_descriptor, Descriptor, DescriptorClass, Granularity, SegmentType};
pub use tss::TaskStateSegment;

/// Selector for `index` in the GDT with requested privilege `ring`.
pub const fn selector(index: u16, ring: PrivilegeLevel) -> SegmentSelector {
    SegmentSelector(index << 3 | ring as u16)
}

pub const KERNEL_CODE_SELECTOR: SegmentSelector =
    selector(GDT_KERNEL_CODE_INDEX, PrivilegeLevel::Ring0);
pub const KERNEL_DATA_SELECTOR: SegmentSelector =
    selector(GDT_KERNEL_DATA_INDEX, PrivilegeLevel::Ring0);
pub const USER_CODE_SELECTOR: SegmentSelector =
    selector(GDT_USER_CODE_INDEX, PrivilegeLevel::Ring3);
pub const USER_DATA_SELECTOR: SegmentSelector =
    selector(GDT_USER_DATA_INDEX, PrivilegeLevel::Ring3);
pub const TSS_SELECTOR: SegmentSelector = selector(GDT_TSS_INDEX, PrivilegeLevel::Ring0);

#[derive(Clone)]
#[repr(C, align(8))]
struct Table([Descriptor; GDT_ENTRIES]);

/// The GDT together with the TSS it describes.
///
/// Both live in the same value so the TSS descriptor can point at the
/// TSS; once installed the value must not move.
#[derive(Clone)]
pub struct DescriptorTables {
    table: Table,
    tss: TaskStateSegment,
}

impl DescriptorTables {
    /// Empty tables: every entry null, TSS zeroed.
    pub const fn new() -> Self {
        DescriptorTables {
            table: Table([Descriptor::NULL; GDT_ENTRIES]),
            tss: TaskStateSegment::new(),
        }
    }

    /// Fill in all six descriptors and the TSS.
    ///
    /// The TSS descriptor records the current address of `self.tss`, so
    /// call this on the final location.
    pub fn build(&mut self, kernel_stack_top: u32) {
        self.tss
            .init(kernel_stack_top, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR);

        let entries = &mut self.table.0;
        entries[0] = Descriptor::NULL;
        entries[usize::from(GDT_KERNEL_CODE_INDEX)] =
            descriptor::flat_code_segment(PrivilegeLevel::Ring0);
        entries[usize::from(GDT_KERNEL_DATA_INDEX)] =
            descriptor::flat_data_segment(PrivilegeLevel::Ring0);
        entries[usize::from(GDT_USER_CODE_INDEX)] =
            descriptor::flat_code_segment(PrivilegeLevel::Ring3);
        entries[usize::from(GDT_USER_DATA_INDEX)] =
            descriptor::flat_data_segment(PrivilegeLevel::Ring3);
        entries[usize::from(GDT_TSS_INDEX)] =
            descriptor::tss_segment(linear_address(&self.tss), TSS_SIZE as u32);
    }

    /// Build the tables and make them live.
    ///
    /// # Safety
    /// `self` must not move or be dropped afterwards, and `kernel_stack_top`
    /// must be the top of a mapped, writable kernel stack. Must only run
    /// once: `ltr` marks the TSS descriptor busy.
    pub unsafe fn install<C: Cpu + ?Sized>(&mut self, cpu: &mut C, kernel_stack_top: u32) {
        log::info!("gdt: building {} descriptors", GDT_ENTRIES);
        self.build(kernel_stack_top);

        let pointer = self.pointer();
        // SAFETY: the table was just built and outlives the registers per
        // the caller's contract. The order below is mandatory.
        unsafe {
            cpu.load_gdt(&pointer);
            cpu.reload_data_segments(KERNEL_DATA_SELECTOR);
            cpu.reload_code_segment(KERNEL_CODE_SELECTOR);
            cpu.load_task_register(TSS_SELECTOR);
        }

        log::info!(
            "gdt: base=0x{:x} limit={} tss=0x{:x} esp0=0x{:x}",
            pointer.base,
            pointer.limit,
            self.entries()[usize::from(GDT_TSS_INDEX)].base(),
            self.tss.esp0()
        );
    }

    /// GDTR value for the table at its current address.
    pub fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer::new(self.table_address(), GDT_ENTRIES)
    }

    pub fn table_address(&self) -> u32 {
        linear_address(&self.table)
    }

    pub fn entries(&self) -> &[Descriptor; GDT_ENTRIES] {
        &self.table.0
    }

    pub fn tss(&self) -> &TaskStateSegment {
        &self.tss
    }

    /// Change the stack used for the next ring 3 -> ring 0 transition.
    pub fn set_kernel_stack(&mut self, stack_top: u32) {
        self.tss.set_kernel_stack(stack_top, KERNEL_DATA_SELECTOR);
    }
}

impl Default for DescriptorTables {
    fn default() -> Self {
        Self::new()
    }
}
