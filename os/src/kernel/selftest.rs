//! Checks run once the kernel is up.
//!
//! Reads back what the processor actually loaded and compares it with the
//! tables the kernel built.

use pmode::config::{DESCRIPTOR_SIZE, GDT_ENTRIES, IDT_ENTRIES};
use pmode::gdt::TSS_SELECTOR;
use pmode::hal::Cpu;
use pmode::paging;

use super::{cpu, ADDRESS_SPACE, DISPATCHER, GDT};
use crate::cpu as hw;

fn check(what: &str, found: u32, expected: u32) -> bool {
    if found == expected {
        log::info!("selftest: {} = 0x{:x}", what, found);
        true
    } else {
        log::error!("selftest: {} = 0x{:x}, expected 0x{:x}", what, found, expected);
        false
    }
}

pub fn verify_gdt() -> bool {
    let gdtr = hw::sgdt();
    let base = GDT.lock().table_address();
    let limit = (GDT_ENTRIES * DESCRIPTOR_SIZE - 1) as u32;
    let limit_ok = check("GDTR limit", gdtr.limit.into(), limit);
    let base_ok = check("GDTR base", gdtr.base, base);
    limit_ok && base_ok
}

pub fn verify_idt() -> bool {
    let idtr = hw::sidt();
    let base = DISPATCHER.lock().idt().pointer().base;
    let limit = (IDT_ENTRIES * DESCRIPTOR_SIZE - 1) as u32;
    let limit_ok = check("IDTR limit", idtr.limit.into(), limit);
    let base_ok = check("IDTR base", idtr.base, base);
    limit_ok && base_ok
}

pub fn verify_tss() -> bool {
    check("TR", hw::str().0.into(), TSS_SELECTOR.0.into())
}

pub fn verify_paging() -> bool {
    let cpu = cpu();
    let Some(cr3) = ADDRESS_SPACE.lock().as_ref().map(|space| space.cr3()) else {
        log::error!("selftest: no address space");
        return false;
    };
    let enabled = check("CR0.PG", paging::is_enabled(&cpu).into(), 1);
    let directory = check("CR3", cpu.read_cr3(), cr3);
    enabled && directory
}

/// Run every check; true if all passed.
pub fn run() -> bool {
    let results = [verify_gdt(), verify_idt(), verify_tss(), verify_paging()];
    let passed = results.iter().filter(|&&ok| ok).count();
    log::info!("selftest: {}/{} passed", passed, results.len());
    passed == results.len()
}
