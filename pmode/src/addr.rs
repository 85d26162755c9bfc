//! 32-bit address, page and frame types.

use core::fmt;
use core::ops::{Add, Sub};

use crate::config::PAGE_SIZE;

/// A 32-bit linear (virtual) address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u32);

/// A 32-bit physical address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u32);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: u32) -> Self {
        VirtAddr(addr)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self, align: u32) -> bool {
        self.0 % align == 0
    }

    /// Index into the page directory (bits 22..32).
    #[inline]
    pub const fn directory_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Index into the page table (bits 12..22).
    #[inline]
    pub const fn table_index(self) -> usize {
        ((self.0 >> 12) & 0x3FF) as usize
    }

    #[inline]
    pub const fn page_offset(self) -> u32 {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u32) -> Self {
        PhysAddr(addr)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self, align: u32) -> bool {
        self.0 % align == 0
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl Add<u32> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: u32) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}

/// A 4 KiB virtual page, identified by its page number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page(u32);

impl Page {
    /// Page containing `addr`.
    #[inline]
    pub const fn containing_address(addr: VirtAddr) -> Self {
        Page(addr.0 / PAGE_SIZE)
    }

    /// First page at or above `addr`.
    #[inline]
    pub const fn containing_end(addr: VirtAddr) -> Self {
        Page(addr.0.div_ceil(PAGE_SIZE))
    }

    #[inline]
    pub const fn from_number(number: u32) -> Self {
        Page(number)
    }

    #[inline]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn start_address(self) -> VirtAddr {
        VirtAddr(self.0 * PAGE_SIZE)
    }

    #[inline]
    pub const fn directory_index(self) -> usize {
        (self.0 >> 10) as usize
    }

    #[inline]
    pub const fn table_index(self) -> usize {
        (self.0 & 0x3FF) as usize
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({:#x})", self.0 * PAGE_SIZE)
    }
}

impl Add<u32> for Page {
    type Output = Page;

    fn add(self, rhs: u32) -> Page {
        Page(self.0 + rhs)
    }
}

impl Sub<Page> for Page {
    type Output = u32;

    fn sub(self, rhs: Page) -> u32 {
        self.0 - rhs.0
    }
}

/// A 4 KiB physical frame, identified by its frame number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame(u32);

impl PhysFrame {
    #[inline]
    pub const fn containing_address(addr: PhysAddr) -> Self {
        PhysFrame(addr.0 / PAGE_SIZE)
    }

    #[inline]
    pub const fn from_number(number: u32) -> Self {
        PhysFrame(number)
    }

    #[inline]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn start_address(self) -> PhysAddr {
        PhysAddr(self.0 * PAGE_SIZE)
    }
}

impl fmt::Debug for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysFrame({:#x})", self.0 * PAGE_SIZE)
    }
}

impl fmt::Display for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame 0x{:x}", self.0 * PAGE_SIZE)
    }
}

impl Add<u32> for PhysFrame {
    type Output = PhysFrame;

    fn add(self, rhs: u32) -> PhysFrame {
        PhysFrame(self.0 + rhs)
    }
}
