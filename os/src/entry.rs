//! Interrupt entry stubs.
//!
//! `isr_stubs` holds 256 stubs, 16 bytes apart. Each pushes a zero where the
//! CPU pushes no error code, then its vector, and jumps to `isr_common`,
//! which saves the rest of an [`InterruptFrame`] and calls
//! [`interrupt_entry`].

use core::arch::global_asm;
use core::ptr::addr_of;

use pmode::hal::Cpu;
use pmode::idt::{InterruptFrame, Trampolines};

use crate::cpu::HardwareCpu;
use crate::kernel;

const STUB_STRIDE: u32 = 16;

global_asm!(
    r#"
    .section .text.isr, "ax"

    .global isr_stubs
    .p2align 4
isr_stubs:
    .set vector, 0
    .rept 256
    .p2align 4
    .if (vector == 8) || (vector == 17) || (vector == 21)
    .elseif (vector >= 10) && (vector <= 14)
    .elseif (vector == 29) || (vector == 30)
    .else
    pushl $0
    .endif
    pushl $vector
    jmp isr_common
    .set vector, vector + 1
    .endr

isr_common:
    pushal
    pushl %ds
    pushl %es
    pushl %fs
    pushl %gs
    movw $0x10, %ax
    movw %ax, %ds
    movw %ax, %es
    movw %ax, %fs
    movw %ax, %gs
    pushl %esp
    cld
    call interrupt_entry
    addl $4, %esp
    popl %gs
    popl %fs
    popl %es
    popl %ds
    popal
    addl $8, %esp
    iretl

    .global isr_unexpected
    .p2align 4
isr_unexpected:
    cld
    call unexpected_interrupt
"#,
    options(att_syntax)
);

extern "C" {
    static isr_stubs: u8;
    static isr_unexpected: u8;
}

/// Where the stubs above ended up.
pub fn trampolines() -> Trampolines {
    // SAFETY: only the addresses of the symbols are taken.
    let (stubs, fallback) = unsafe { (addr_of!(isr_stubs), addr_of!(isr_unexpected)) };
    Trampolines {
        fallback: fallback as usize as u32,
        stubs: stubs as usize as u32,
        stride: STUB_STRIDE,
    }
}

#[no_mangle]
extern "C" fn interrupt_entry(frame: &mut InterruptFrame) {
    // SAFETY: interrupt handlers run at ring 0.
    let mut cpu = unsafe { HardwareCpu::new() };
    kernel::dispatch(frame, &mut cpu);
}

/// Target of every gate between the fallback fill and the stub install.
#[no_mangle]
extern "C" fn unexpected_interrupt() -> ! {
    // SAFETY: interrupt handlers run at ring 0.
    let mut cpu = unsafe { HardwareCpu::new() };
    log::error!("interrupt before its gate was installed");
    cpu.halt()
}
