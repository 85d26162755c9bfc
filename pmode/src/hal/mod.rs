//! Hardware access interface.
//!
//! The privileged instructions this crate needs, and nothing else. The
//! kernel implements these traits with inline assembly; tests use
//! [`mock::MockCpu`].

#[cfg(test)]
pub mod mock;

use x86_64::structures::gdt::SegmentSelector;

/// Byte-wide port I/O.
pub trait PortIo {
    /// # Safety
    /// Writing to an I/O port can reconfigure arbitrary hardware.
    unsafe fn write_u8(&mut self, port: u16, value: u8);

    /// # Safety
    /// Reading some ports has side effects.
    unsafe fn read_u8(&mut self, port: u16) -> u8;
}

/// Processor state the bootstrap code reads and writes.
///
/// Object safe: handlers receive it as `&mut dyn Cpu`.
pub trait Cpu: PortIo {
    /// Load GDTR.
    ///
    /// # Safety
    /// The table must stay valid and in place for as long as it is loaded.
    unsafe fn load_gdt(&mut self, pointer: &DescriptorTablePointer);

    /// Load IDTR.
    ///
    /// # Safety
    /// The table must stay valid and in place for as long as it is loaded.
    unsafe fn load_idt(&mut self, pointer: &DescriptorTablePointer);

    /// Reload DS, ES, FS, GS and SS.
    ///
    /// # Safety
    /// `selector` must name a data segment of the loaded GDT.
    unsafe fn reload_data_segments(&mut self, selector: SegmentSelector);

    /// Reload CS with a far control transfer.
    ///
    /// # Safety
    /// `selector` must name a code segment of the loaded GDT with the
    /// current privilege level.
    unsafe fn reload_code_segment(&mut self, selector: SegmentSelector);

    /// Load TR.
    ///
    /// # Safety
    /// `selector` must name an available TSS descriptor of the loaded GDT.
    unsafe fn load_task_register(&mut self, selector: SegmentSelector);

    fn read_cr0(&self) -> u32;

    /// # Safety
    /// Can switch paging or protection off under the running code.
    unsafe fn write_cr0(&mut self, value: u32);

    /// Linear address of the last page fault.
    fn read_cr2(&self) -> u32;

    fn read_cr3(&self) -> u32;

    /// # Safety
    /// `value` must point to a valid page directory.
    unsafe fn write_cr3(&mut self, value: u32);

    fn interrupts_enabled(&self) -> bool;

    fn disable_interrupts(&mut self);

    /// # Safety
    /// The IDT must be loaded and every unmasked source must be handled.
    unsafe fn enable_interrupts(&mut self);

    /// Stop the processor for good.
    fn halt(&mut self) -> !;
}

/// Operand of `lgdt`/`lidt`: byte limit and linear base of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTablePointer {
    /// Size of the table in bytes, minus one.
    pub limit: u16,
    pub base: u32,
}

impl DescriptorTablePointer {
    /// Pointer for a table of `entries` 8-byte descriptors at `base`.
    pub const fn new(base: u32, entries: usize) -> Self {
        DescriptorTablePointer {
            limit: (entries * crate::config::DESCRIPTOR_SIZE - 1) as u16,
            base,
        }
    }

    /// The 6-byte in-memory operand: limit, then base, little endian.
    pub fn to_bytes(&self) -> [u8; 6] {
        let mut bytes = [0u8; 6];
        bytes[..2].copy_from_slice(&self.limit.to_le_bytes());
        bytes[2..].copy_from_slice(&self.base.to_le_bytes());
        bytes
    }
}

/// Run `f` with interrupts disabled, restoring the previous state after.
pub fn without_interrupts<C, R, F>(cpu: &mut C, f: F) -> R
where
    C: Cpu + ?Sized,
    F: FnOnce(&mut C) -> R,
{
    let was_enabled = cpu.interrupts_enabled();
    if was_enabled {
        cpu.disable_interrupts();
    }

    let result = f(cpu);

    if was_enabled {
        // SAFETY: interrupts were enabled on entry, so the IDT was ready then.
        unsafe { cpu.enable_interrupts() };
    }
    result
}

/// Address of `value` as a 32-bit linear address.
///
/// Identity on the 32-bit kernel; on a 64-bit test host the address is
/// truncated, which is fine because it only ever lands in recorded
/// table pointers.
#[inline]
pub fn linear_address<T>(value: &T) -> u32 {
    value as *const T as usize as u32
}
