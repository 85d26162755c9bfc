//! Address space: a page directory and the tables under it.
//!
//! All mappings are built before paging is switched on, so every table
//! is reached through [`PhysicalMemory`] rather than through the mapping
//! being built.

use x86_64::registers::control::Cr0Flags;
use x86_64::PrivilegeLevel;

use super::entry::{EntryFlags, PageTableEntry};
use super::memory::PhysicalMemory;
use super::{PagingError, PagingResult, PhysAllocator};
use crate::addr::{Page, PhysAddr, PhysFrame, VirtAddr};
use crate::config::{
    KernelLayout, Section, PAGE_SIZE, TABLE_ENTRIES, VGA_BUFFER, VGA_BUFFER_SIZE,
};
use crate::hal::Cpu;

/// Number of 4 KiB frames in the 32-bit physical address space.
const FRAME_COUNT: u32 = 1 << 20;

const CR0_PAGING: u32 = Cr0Flags::PAGING.bits() as u32;

/// Flags of every directory entry; `USER` is added on demand.
const DIRECTORY_FLAGS: EntryFlags = EntryFlags::PRESENT
    .union(EntryFlags::WRITABLE)
    .union(EntryFlags::CACHE_DISABLE);

/// One page directory and the page tables it owns.
pub struct AddressSpace<M: PhysicalMemory> {
    directory: PhysFrame,
    memory: M,
}

impl<M: PhysicalMemory> AddressSpace<M> {
    /// Allocates and zeroes an empty page directory.
    pub fn new<A>(memory: M, frames: &mut A) -> PagingResult<Self>
    where
        A: PhysAllocator + ?Sized,
    {
        let directory = frames.allocate()?;
        let mut space = AddressSpace { directory, memory };
        space.memory.table_mut(directory).zero();
        log::debug!("paging: page directory at 0x{:x}", directory.start_address().as_u32());
        Ok(space)
    }

    pub fn directory_frame(&self) -> PhysFrame {
        self.directory
    }

    /// Value to load into CR3.
    pub fn cr3(&self) -> u32 {
        self.directory.start_address().as_u32()
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Map `[begin, end)` onto the same physical addresses.
    pub fn map_identity<A>(
        &mut self,
        frames: &mut A,
        begin: VirtAddr,
        end: VirtAddr,
        ring: PrivilegeLevel,
        writable: bool,
    ) -> PagingResult<()>
    where
        A: PhysAllocator + ?Sized,
    {
        let phys = PhysAddr::new(Page::containing_address(begin).start_address().as_u32());
        self.map_range(frames, begin, end, phys, ring, writable)
    }

    /// Map `[begin, end)` onto consecutive frames starting at `phys_base`.
    ///
    /// `begin` is rounded down and `end` up to page boundaries. Every check
    /// runs before anything is written, so on error the address space and
    /// the allocator are left as they were:
    /// - no page of the range may already be mapped
    /// - no frame of the range may already back a valid entry
    /// - the page tables the range needs must all be available
    pub fn map_range<A>(
        &mut self,
        frames: &mut A,
        begin: VirtAddr,
        end: VirtAddr,
        phys_base: PhysAddr,
        ring: PrivilegeLevel,
        writable: bool,
    ) -> PagingResult<()>
    where
        A: PhysAllocator + ?Sized,
    {
        let region = Region::new(begin, end, phys_base)?;
        self.map_region(frames, region, entry_flags(ring, writable), Aliasing::Reject)
    }

    /// [`map_range`](Self::map_range) for frames that are meant to be
    /// reachable through more than one entry, such as a section holding
    /// the page tables themselves.
    pub fn map_range_aliased<A>(
        &mut self,
        frames: &mut A,
        begin: VirtAddr,
        end: VirtAddr,
        phys_base: PhysAddr,
        ring: PrivilegeLevel,
        writable: bool,
    ) -> PagingResult<()>
    where
        A: PhysAllocator + ?Sized,
    {
        let region = Region::new(begin, end, phys_base)?;
        self.map_region(frames, region, entry_flags(ring, writable), Aliasing::Allow)
    }

    /// Map the kernel image and the VGA text buffer.
    ///
    /// The boot section and the VGA buffer are identity mapped; the other
    /// sections go to their load addresses. Only the read-only section is
    /// mapped without write access. The read-write section may hold the
    /// frame pool, so its frames can also back page tables.
    pub fn map_layout<A>(&mut self, frames: &mut A, layout: &KernelLayout) -> PagingResult<()>
    where
        A: PhysAllocator + ?Sized,
    {
        let boot = &layout.boot;
        self.map_identity(frames, boot.start, boot.end, PrivilegeLevel::Ring0, true)?;

        self.map_section(frames, &layout.read_only, false, Aliasing::Reject)?;
        self.map_section(frames, &layout.read_write, true, Aliasing::Allow)?;
        self.map_section(frames, &layout.stack, true, Aliasing::Reject)?;

        self.map_identity(
            frames,
            VirtAddr::new(VGA_BUFFER),
            VirtAddr::new(VGA_BUFFER + VGA_BUFFER_SIZE),
            PrivilegeLevel::Ring0,
            true,
        )?;

        log::info!("paging: kernel layout mapped");
        Ok(())
    }

    /// The present entry mapping `page`, if any.
    pub fn entry(&self, page: Page) -> Option<PageTableEntry> {
        let directory_entry = self.memory.table(self.directory)[page.directory_index()];
        if !directory_entry.is_present() {
            return None;
        }
        let entry = self.memory.table(directory_entry.frame())[page.table_index()];
        entry.is_present().then_some(entry)
    }

    /// Physical address `virt` maps to.
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let entry = self.entry(Page::containing_address(virt))?;
        Some(entry.frame().start_address() + virt.page_offset())
    }

    /// Whether any directory entry is present.
    pub fn is_empty(&self) -> bool {
        self.memory.table(self.directory).is_empty()
    }

    /// Load CR3 with this directory, then set CR0.PG.
    ///
    /// # Safety
    /// The code, data and stack in use, and everything the kernel touches
    /// afterwards, must be mapped.
    pub unsafe fn activate<C: Cpu + ?Sized>(&self, cpu: &mut C) -> PagingResult<()> {
        if self.is_empty() {
            return Err(PagingError::NothingMapped);
        }
        let cr3 = self.cr3();
        // SAFETY: the directory is populated; the caller vouches for the
        // mappings. CR3 must hold the directory before PG is set.
        unsafe {
            cpu.write_cr3(cr3);
            let cr0 = cpu.read_cr0();
            cpu.write_cr0(cr0 | CR0_PAGING);
        }
        log::info!("paging: enabled, cr3=0x{:x}", cr3);
        Ok(())
    }

    fn map_section<A>(
        &mut self,
        frames: &mut A,
        section: &Section,
        writable: bool,
        aliasing: Aliasing,
    ) -> PagingResult<()>
    where
        A: PhysAllocator + ?Sized,
    {
        let region = Region::new(section.start, section.end, section.load)?;
        self.map_region(frames, region, entry_flags(PrivilegeLevel::Ring0, writable), aliasing)
    }

    fn map_region<A>(
        &mut self,
        frames: &mut A,
        region: Region,
        flags: EntryFlags,
        aliasing: Aliasing,
    ) -> PagingResult<()>
    where
        A: PhysAllocator + ?Sized,
    {
        if let Some(page) = region.pages().find(|&page| self.entry(page).is_some()) {
            return Err(PagingError::AlreadyMapped { page });
        }
        if aliasing == Aliasing::Reject {
            if let Some(frame) = self.claimed_frame(&region) {
                return Err(PagingError::FrameAliased { frame });
            }
        }

        let fresh = self.reserve_tables(frames, &region, flags)?;
        if aliasing == Aliasing::Reject {
            let table = fresh
                .iter()
                .map(|index| self.memory.table(self.directory)[index].frame())
                .find(|&table| region.contains_frame(table));
            if let Some(frame) = table {
                self.release_tables(frames, &fresh);
                return Err(PagingError::FrameAliased { frame });
            }
        }

        for (n, page) in region.pages().enumerate() {
            let directory = self.memory.table_mut(self.directory);
            let directory_entry = &mut directory[page.directory_index()];
            if flags.contains(EntryFlags::USER) {
                directory_entry.insert_flags(EntryFlags::USER);
            }
            let table = directory_entry.frame();
            let frame = region.first_frame + n as u32;
            self.memory.table_mut(table)[page.table_index()].set(frame, flags);
        }

        log::debug!(
            "paging: mapped {:?}..+{} -> {:?} ({:?})",
            region.first,
            region.count,
            region.first_frame,
            flags
        );
        Ok(())
    }

    /// Give every directory slot `region` touches a zeroed page table.
    ///
    /// Returns the slots that got a new table. If the allocator runs dry,
    /// the tables taken so far are handed back.
    fn reserve_tables<A>(
        &mut self,
        frames: &mut A,
        region: &Region,
        flags: EntryFlags,
    ) -> PagingResult<TableSet>
    where
        A: PhysAllocator + ?Sized,
    {
        let mut directory_flags = DIRECTORY_FLAGS;
        if flags.contains(EntryFlags::USER) {
            directory_flags |= EntryFlags::USER;
        }

        let mut fresh = TableSet::new();
        for index in region.directory_indices() {
            if self.memory.table(self.directory)[index].is_present() {
                continue;
            }
            let table = match frames.allocate() {
                Ok(table) => table,
                Err(err) => {
                    self.release_tables(frames, &fresh);
                    return Err(err);
                }
            };
            self.memory.table_mut(table).zero();
            self.memory.table_mut(self.directory)[index].set(table, directory_flags);
            fresh.insert(index);
        }
        Ok(fresh)
    }

    fn release_tables<A>(&mut self, frames: &mut A, fresh: &TableSet)
    where
        A: PhysAllocator + ?Sized,
    {
        for index in fresh.iter() {
            let entry = &mut self.memory.table_mut(self.directory)[index];
            let table = entry.frame();
            entry.clear();
            // The frame came from this allocator a moment ago.
            let _ = frames.free(table);
        }
    }

    /// A frame of `region` already referenced by a present directory or
    /// table entry.
    fn claimed_frame(&self, region: &Region) -> Option<PhysFrame> {
        let directory = self.memory.table(self.directory);
        for directory_entry in directory.iter().filter(|entry| entry.is_present()) {
            let table = directory_entry.frame();
            if region.contains_frame(table) {
                return Some(table);
            }
            let claimed = self
                .memory
                .table(table)
                .iter()
                .filter(|entry| entry.is_present())
                .map(|entry| entry.frame())
                .find(|&frame| region.contains_frame(frame));
            if claimed.is_some() {
                return claimed;
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aliasing {
    Reject,
    Allow,
}

fn entry_flags(ring: PrivilegeLevel, writable: bool) -> EntryFlags {
    let mut flags = EntryFlags::PRESENT | EntryFlags::CACHE_DISABLE;
    if writable {
        flags |= EntryFlags::WRITABLE;
    }
    if ring == PrivilegeLevel::Ring3 {
        flags |= EntryFlags::USER;
    }
    flags
}

/// A validated run of pages and the frames behind them.
#[derive(Debug, Clone, Copy)]
struct Region {
    first: Page,
    count: u32,
    first_frame: PhysFrame,
}

impl Region {
    fn new(begin: VirtAddr, end: VirtAddr, phys_base: PhysAddr) -> PagingResult<Self> {
        if begin > end {
            return Err(PagingError::InvalidRange { start: begin, end });
        }
        if !phys_base.is_aligned(PAGE_SIZE) {
            return Err(PagingError::Misaligned { addr: phys_base });
        }

        let first = Page::containing_address(begin);
        let count = Page::containing_end(end) - first;
        let first_frame = PhysFrame::containing_address(phys_base);
        if first_frame.number() + count > FRAME_COUNT {
            return Err(PagingError::InvalidRange { start: begin, end });
        }
        Ok(Region { first, count, first_frame })
    }

    fn pages(&self) -> impl Iterator<Item = Page> {
        let first = self.first;
        (0..self.count).map(move |n| first + n)
    }

    fn directory_indices(&self) -> core::ops::Range<usize> {
        if self.count == 0 {
            return 0..0;
        }
        let last = self.first + (self.count - 1);
        self.first.directory_index()..last.directory_index() + 1
    }

    fn contains_frame(&self, frame: PhysFrame) -> bool {
        frame.number()
            .checked_sub(self.first_frame.number())
            .is_some_and(|offset| offset < self.count)
    }
}

/// Set of directory slots, one bit each.
struct TableSet([u32; TABLE_ENTRIES / 32]);

impl TableSet {
    fn new() -> Self {
        TableSet([0; TABLE_ENTRIES / 32])
    }

    fn insert(&mut self, index: usize) {
        self.0[index / 32] |= 1 << (index % 32);
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..TABLE_ENTRIES).filter(|&index| self.0[index / 32] & (1 << (index % 32)) != 0)
    }
}

/// Clear CR0.PG.
///
/// # Safety
/// The running code must be identity mapped.
pub unsafe fn deactivate<C: Cpu + ?Sized>(cpu: &mut C) {
    // SAFETY: forwarded to the caller.
    unsafe {
        let cr0 = cpu.read_cr0();
        cpu.write_cr0(cr0 & !CR0_PAGING);
    }
    log::info!("paging: disabled");
}

pub fn is_enabled<C: Cpu + ?Sized>(cpu: &C) -> bool {
    cpu.read_cr0() & CR0_PAGING != 0
}
