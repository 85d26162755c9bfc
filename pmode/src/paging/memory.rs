//! Access to page tables living in physical frames.

use crate::addr::PhysFrame;

use super::entry::PageTable;

/// Turns a physical frame into the page table stored in it.
///
/// # Safety
/// Implementors must return a reference to the memory of `frame` itself,
/// and distinct frames must never alias.
pub unsafe trait PhysicalMemory {
    fn table(&self, frame: PhysFrame) -> &PageTable;
    fn table_mut(&mut self, frame: PhysFrame) -> &mut PageTable;
}

/// Physical memory visible at a fixed virtual offset (0 for identity).
#[derive(Debug)]
pub struct IdentityMemory {
    phys_offset: u32,
}

impl IdentityMemory {
    /// # Safety
    /// Every frame handed to [`PhysicalMemory::table`] must be mapped at
    /// `phys_offset + frame address` and not be referenced elsewhere.
    pub const unsafe fn new(phys_offset: u32) -> Self {
        IdentityMemory { phys_offset }
    }

    pub fn phys_offset(&self) -> u32 {
        self.phys_offset
    }

    fn table_ptr(&self, frame: PhysFrame) -> *mut PageTable {
        let virt = self.phys_offset.wrapping_add(frame.start_address().as_u32());
        virt as usize as *mut PageTable
    }
}

// SAFETY: guaranteed by the contract of `IdentityMemory::new`.
unsafe impl PhysicalMemory for IdentityMemory {
    fn table(&self, frame: PhysFrame) -> &PageTable {
        // SAFETY: the frame is mapped at this address and 4 KiB aligned.
        unsafe { &*self.table_ptr(frame) }
    }

    fn table_mut(&mut self, frame: PhysFrame) -> &mut PageTable {
        // SAFETY: as above, and `&mut self` keeps the borrow unique.
        unsafe { &mut *self.table_ptr(frame) }
    }
}
