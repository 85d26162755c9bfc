//! pmode-os: a 32-bit protected-mode kernel.
//!
//! Boots from a multiboot loader, installs the GDT and TSS, remaps the
//! 8259 pair and loads the IDT, then builds an identity-mapped address
//! space and turns paging on. Everything except the assembly glue lives
//! in the `pmode` crate; this binary owns the singletons and the CPU.
//!
//! Build with
//!
//! ```text
//! cargo build -p pmode-os --target i686-pmode.json \
//!     -Zbuild-std=core -Zbuild-std-features=compiler-builtins-mem
//! ```

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
#[macro_use]
mod serial;

#[cfg(target_os = "none")]
mod boot;
#[cfg(target_os = "none")]
mod cpu;
#[cfg(target_os = "none")]
mod entry;
#[cfg(target_os = "none")]
mod kernel;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("PANIC: {}", info);
    kernel::halt()
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("pmode-os only runs on bare metal; build it with --target i686-pmode.json");
}
