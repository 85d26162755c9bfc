//! The processor itself, behind the `pmode` hardware traits.

use core::arch::asm;

use pmode::hal::{Cpu, DescriptorTablePointer, PortIo};
use x86_64::structures::gdt::SegmentSelector;

const EFLAGS_IF: u32 = 1 << 9;

/// Handle on the running CPU.
pub struct HardwareCpu {
    _private: (),
}

impl HardwareCpu {
    /// # Safety
    /// Every privileged instruction becomes reachable through the handle;
    /// the caller must run at ring 0.
    pub const unsafe fn new() -> Self {
        HardwareCpu { _private: () }
    }

    /// Sleep until the next interrupt.
    pub fn wait_for_interrupt(&mut self) {
        // SAFETY: `hlt` resumes on the next interrupt.
        unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }
}

impl PortIo for HardwareCpu {
    #[inline(always)]
    unsafe fn write_u8(&mut self, port: u16, value: u8) {
        // SAFETY: forwarded to the caller.
        unsafe {
            asm!("out dx, al", in("dx") port, in("al") value, options(nostack, preserves_flags));
        }
    }

    #[inline(always)]
    unsafe fn read_u8(&mut self, port: u16) -> u8 {
        let value: u8;
        // SAFETY: forwarded to the caller.
        unsafe {
            asm!("in al, dx", in("dx") port, out("al") value, options(nostack, preserves_flags));
        }
        value
    }
}

impl Cpu for HardwareCpu {
    unsafe fn load_gdt(&mut self, pointer: &DescriptorTablePointer) {
        let operand = pointer.to_bytes();
        // SAFETY: forwarded to the caller; the operand is read before return.
        unsafe {
            asm!(
                "lgdt [{}]",
                in(reg) operand.as_ptr(),
                options(readonly, nostack, preserves_flags)
            );
        }
    }

    unsafe fn load_idt(&mut self, pointer: &DescriptorTablePointer) {
        let operand = pointer.to_bytes();
        // SAFETY: as for `load_gdt`.
        unsafe {
            asm!(
                "lidt [{}]",
                in(reg) operand.as_ptr(),
                options(readonly, nostack, preserves_flags)
            );
        }
    }

    unsafe fn reload_data_segments(&mut self, selector: SegmentSelector) {
        // SAFETY: forwarded to the caller.
        unsafe {
            asm!(
                "mov ds, {0:x}",
                "mov es, {0:x}",
                "mov fs, {0:x}",
                "mov gs, {0:x}",
                "mov ss, {0:x}",
                in(reg) selector.0,
                options(nostack, preserves_flags)
            );
        }
    }

    unsafe fn reload_code_segment(&mut self, selector: SegmentSelector) {
        // Far return into the next instruction with the new CS.
        // SAFETY: forwarded to the caller.
        unsafe {
            asm!(
                "push {sel}",
                "lea {tmp}, [2f]",
                "push {tmp}",
                "retf",
                "2:",
                sel = in(reg) u32::from(selector.0),
                tmp = lateout(reg) _,
                options(preserves_flags)
            );
        }
    }

    unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
        // SAFETY: forwarded to the caller.
        unsafe {
            asm!("ltr {0:x}", in(reg) selector.0, options(nostack, preserves_flags));
        }
    }

    fn read_cr0(&self) -> u32 {
        let value: u32;
        // SAFETY: reading CR0 has no side effects.
        unsafe { asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    unsafe fn write_cr0(&mut self, value: u32) {
        // SAFETY: forwarded to the caller.
        unsafe { asm!("mov cr0, {}", in(reg) value, options(nostack, preserves_flags)) };
    }

    fn read_cr2(&self) -> u32 {
        let value: u32;
        // SAFETY: reading CR2 has no side effects.
        unsafe { asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    fn read_cr3(&self) -> u32 {
        let value: u32;
        // SAFETY: reading CR3 has no side effects.
        unsafe { asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    unsafe fn write_cr3(&mut self, value: u32) {
        // SAFETY: forwarded to the caller.
        unsafe { asm!("mov cr3, {}", in(reg) value, options(nostack, preserves_flags)) };
    }

    fn interrupts_enabled(&self) -> bool {
        let eflags: u32;
        // SAFETY: pushes and pops one word of the current stack.
        unsafe { asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags)) };
        eflags & EFLAGS_IF != 0
    }

    fn disable_interrupts(&mut self) {
        // SAFETY: masking interrupts cannot break memory safety.
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    unsafe fn enable_interrupts(&mut self) {
        // SAFETY: forwarded to the caller.
        unsafe { asm!("sti", options(nomem, nostack)) };
    }

    fn halt(&mut self) -> ! {
        loop {
            // SAFETY: stops the processor until the next NMI, then again.
            unsafe { asm!("cli", "hlt", options(nomem, nostack)) };
        }
    }
}

/// Read GDTR.
pub fn sgdt() -> DescriptorTablePointer {
    let mut operand = [0u8; 6];
    // SAFETY: stores six bytes into `operand`.
    unsafe { asm!("sgdt [{}]", in(reg) operand.as_mut_ptr(), options(nostack, preserves_flags)) };
    decode_pointer(operand)
}

/// Read IDTR.
pub fn sidt() -> DescriptorTablePointer {
    let mut operand = [0u8; 6];
    // SAFETY: stores six bytes into `operand`.
    unsafe { asm!("sidt [{}]", in(reg) operand.as_mut_ptr(), options(nostack, preserves_flags)) };
    decode_pointer(operand)
}

/// Read the task register.
pub fn str() -> SegmentSelector {
    let selector: u16;
    // SAFETY: reading TR has no side effects.
    unsafe { asm!("str {0:x}", out(reg) selector, options(nomem, nostack, preserves_flags)) };
    SegmentSelector(selector)
}

fn decode_pointer(operand: [u8; 6]) -> DescriptorTablePointer {
    DescriptorTablePointer {
        limit: u16::from_le_bytes([operand[0], operand[1]]),
        base: u32::from_le_bytes([operand[2], operand[3], operand[4], operand[5]]),
    }
}
