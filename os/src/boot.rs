//! Multiboot header and the first instructions run.
//!
//! The loader enters `_start` in 32-bit protected mode with paging off,
//! EAX holding the multiboot magic and EBX the info structure address.

use core::arch::global_asm;

use crate::kernel::{self, BootConfig};

/// Value in EAX when a multiboot loader started the kernel.
const BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

global_asm!(
    r#"
    .section .multiboot, "a"
    .p2align 2
    .long 0x1BADB002
    .long 0x00000003
    .long -(0x1BADB002 + 0x00000003)

    .section .boot, "ax"
    .global _start
_start:
    cli
    movl $_kernel_stack_top, %esp
    xorl %ebp, %ebp
    pushl %ebx
    pushl %eax
    call kernel_main
2:
    cli
    hlt
    jmp 2b
"#,
    options(att_syntax)
);

#[no_mangle]
extern "C" fn kernel_main(magic: u32, info: u32) -> ! {
    let config = BootConfig::default();

    if let Err(err) = crate::serial::init_logger(config.log_level) {
        serial_println!("logger: {}", err);
    }
    if magic != BOOTLOADER_MAGIC {
        log::warn!("boot: unexpected loader magic 0x{:08x}", magic);
    }
    log::info!("boot: multiboot info at 0x{:08x}", info);

    match kernel::early_init(&config) {
        Ok(state) => kernel::kernel_loop(state),
        Err(err) => {
            log::error!("boot: {}", err);
            kernel::halt()
        }
    }
}
