//! 32-bit Task State Segment.
//!
//! Only the ring 0 stack fields matter here: the CPU loads `ss0:esp0`
//! when an interrupt or call gate raises the privilege level from ring 3.
//! No hardware task switching is done. The other selector fields are
//! filled with the kernel segments anyway so the image is never garbage.
//!
//! The TSS is kept as its raw byte image and every field is read and
//! written at its architectural offset.

use core::fmt;

use x86_64::structures::gdt::SegmentSelector;

use crate::config::TSS_SIZE;

const ESP0: usize = 4;
const SS0: usize = 8;
const ES: usize = 72;
const CS: usize = 76;
const SS: usize = 80;
const DS: usize = 84;
const FS: usize = 88;
const GS: usize = 92;
const IO_MAP_BASE: usize = 102;

#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(4))]
pub struct TaskStateSegment {
    bytes: [u8; TSS_SIZE],
}

impl TaskStateSegment {
    /// An all-zero TSS.
    pub const fn new() -> Self {
        TaskStateSegment {
            bytes: [0; TSS_SIZE],
        }
    }

    /// Zero the image and fill in the kernel stack, the segment selectors
    /// and an I/O map base past the end, so no ports are granted to ring 3.
    pub fn init(
        &mut self,
        kernel_stack_top: u32,
        code: SegmentSelector,
        data: SegmentSelector,
    ) {
        self.bytes = [0; TSS_SIZE];
        self.set_kernel_stack(kernel_stack_top, data);

        self.write_u16(CS, code.0);
        for offset in [SS, DS, ES, FS, GS] {
            self.write_u16(offset, data.0);
        }
        self.write_u16(IO_MAP_BASE, TSS_SIZE as u16);
    }

    /// Set the stack used on entry to ring 0.
    pub fn set_kernel_stack(&mut self, esp0: u32, ss0: SegmentSelector) {
        self.write_u32(ESP0, esp0);
        self.write_u16(SS0, ss0.0);
    }

    pub fn esp0(&self) -> u32 {
        self.read_u32(ESP0)
    }

    pub fn ss0(&self) -> SegmentSelector {
        SegmentSelector(self.read_u16(SS0))
    }

    pub fn cs(&self) -> SegmentSelector {
        SegmentSelector(self.read_u16(CS))
    }

    /// SS, DS, ES, FS and GS in that order.
    pub fn data_selectors(&self) -> [SegmentSelector; 5] {
        [SS, DS, ES, FS, GS].map(|offset| SegmentSelector(self.read_u16(offset)))
    }

    pub fn io_map_base(&self) -> u16 {
        self.read_u16(IO_MAP_BASE)
    }

    pub fn as_bytes(&self) -> &[u8; TSS_SIZE] {
        &self.bytes
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for TaskStateSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskStateSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStateSegment")
            .field("esp0", &format_args!("{:#x}", self.esp0()))
            .field("ss0", &self.ss0())
            .field("io_map_base", &self.io_map_base())
            .finish_non_exhaustive()
    }
}
