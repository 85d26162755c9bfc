//! 32-bit page directory and page table entries.
//!
//! Both levels share one format: flag bits in 0..12 and a 20-bit frame
//! number in 12..32.

use core::fmt;
use core::ops::{Index, IndexMut};

use crate::addr::PhysFrame;
use crate::config::TABLE_ENTRIES;

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// 4 MiB page in a directory entry; PAT in a table entry.
        const HUGE = 1 << 7;
        const GLOBAL = 1 << 8;
    }
}

const FRAME_MASK: u32 = 0xFFFF_F000;
const FLAGS_MASK: u32 = 0x0000_0FFF;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    pub const UNUSED: Self = PageTableEntry(0);

    pub fn new(frame: PhysFrame, flags: EntryFlags) -> Self {
        PageTableEntry(frame.start_address().as_u32() | flags.bits())
    }

    pub const fn from_bits(bits: u32) -> Self {
        PageTableEntry(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_unused(&self) -> bool {
        self.0 == 0
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_retain(self.0 & FLAGS_MASK)
    }

    pub fn frame(&self) -> PhysFrame {
        PhysFrame::from_number((self.0 & FRAME_MASK) >> 12)
    }

    pub fn set(&mut self, frame: PhysFrame, flags: EntryFlags) {
        *self = Self::new(frame, flags);
    }

    /// Add `flags` without touching the frame.
    pub fn insert_flags(&mut self, flags: EntryFlags) {
        self.0 |= flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("frame", &self.frame())
            .field("flags", &self.flags())
            .finish()
    }
}

/// A page directory or page table: one 4 KiB frame of entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; TABLE_ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        PageTable {
            entries: [PageTableEntry::UNUSED; TABLE_ENTRIES],
        }
    }

    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::UNUSED);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_present())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;

    fn index(&self, index: usize) -> &PageTableEntry {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }
}
