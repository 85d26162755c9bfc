//! Fixed layout constants and boot-time configuration.

use crate::addr::{PhysAddr, VirtAddr};

// === Descriptor tables ===

/// Number of GDT entries: null, kernel code/data, user code/data, TSS.
pub const GDT_ENTRIES: usize = 6;

pub const GDT_KERNEL_CODE_INDEX: u16 = 1;
pub const GDT_KERNEL_DATA_INDEX: u16 = 2;
pub const GDT_USER_CODE_INDEX: u16 = 3;
pub const GDT_USER_DATA_INDEX: u16 = 4;
pub const GDT_TSS_INDEX: u16 = 5;

/// Size of a 32-bit Task State Segment in bytes.
pub const TSS_SIZE: usize = 104;

/// Number of IDT gates.
pub const IDT_ENTRIES: usize = 256;

/// Size of one GDT or IDT entry in bytes.
pub const DESCRIPTOR_SIZE: usize = 8;

// === Interrupt vectors ===

/// First vector past the CPU exception range.
pub const FIRST_EXTERNAL_VECTOR: u8 = 32;

/// Number of registrable fault vectors (0..=21 and 28..=30).
pub const FAULT_HANDLERS: usize = 25;

/// Number of hardware IRQ lines served by the two cascaded 8259s.
pub const IRQ_LINES: usize = 16;

/// Number of software interrupt vectors.
pub const SOFTWARE_HANDLERS: usize = IDT_ENTRIES - FIRST_EXTERNAL_VECTOR as usize - IRQ_LINES;

pub const PAGE_FAULT_VECTOR: u8 = 14;

/// Conventional system call vector.
pub const SYSCALL_VECTOR: u8 = 0x80;

// === 8259 PIC ===

pub const PIC_PRIMARY_COMMAND: u16 = 0x20;
pub const PIC_PRIMARY_DATA: u16 = 0x21;
pub const PIC_SECONDARY_COMMAND: u16 = 0xA0;
pub const PIC_SECONDARY_DATA: u16 = 0xA1;

pub const PIC_ICW1_INIT: u8 = 0x11;
pub const PIC_ICW4_8086: u8 = 0x01;
pub const PIC_PRIMARY_CASCADE: u8 = 0x04; // secondary wired to IR2
pub const PIC_SECONDARY_CASCADE: u8 = 0x02;
pub const PIC_EOI: u8 = 0x20;

pub const DEFAULT_PRIMARY_BASE: u8 = 0x20;
pub const DEFAULT_SECONDARY_BASE: u8 = 0x28;

// === Paging ===

pub const PAGE_SIZE: u32 = 4096;

/// Entries per page directory and per page table.
pub const TABLE_ENTRIES: usize = 1024;

/// VGA text buffer, 80x25 cells of two bytes.
pub const VGA_BUFFER: u32 = 0xB8000;
pub const VGA_BUFFER_SIZE: u32 = 80 * 25 * 2;

/// Interrupt controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicConfig {
    /// Vector of IRQ 0.
    pub primary_base: u8,
    /// Vector of IRQ 8.
    pub secondary_base: u8,
    /// Bit `n` set masks IRQ line `n` after initialization.
    pub initial_mask: u16,
}

impl PicConfig {
    pub const DEFAULT: Self = PicConfig {
        primary_base: DEFAULT_PRIMARY_BASE,
        secondary_base: DEFAULT_SECONDARY_BASE,
        initial_mask: 0,
    };
}

impl Default for PicConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One kernel image section: where it is linked and where it was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub load: PhysAddr,
}

impl Section {
    /// A section linked at its load address.
    pub const fn identity(start: u32, end: u32) -> Self {
        Section {
            start: VirtAddr::new(start),
            end: VirtAddr::new(end),
            load: PhysAddr::new(start),
        }
    }

    pub const fn size(&self) -> u32 {
        self.end.as_u32() - self.start.as_u32()
    }
}

/// Kernel image layout, normally taken from linker symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLayout {
    /// Early boot code and data; always identity mapped.
    pub boot: Section,
    pub read_only: Section,
    pub read_write: Section,
    pub stack: Section,
}
