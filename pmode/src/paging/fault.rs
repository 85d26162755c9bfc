//! Page fault reporting.
//!
//! There is no demand paging: every page fault is reported and the CPU is
//! halted.

use core::fmt;

use x86_64::structures::idt::PageFaultErrorCode;

use crate::addr::VirtAddr;
use crate::hal::Cpu;
use crate::idt::InterruptFrame;

/// A decoded page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Linear address from CR2.
    pub address: VirtAddr,
    pub code: PageFaultErrorCode,
    pub eip: u32,
}

impl PageFault {
    pub fn new(address: VirtAddr, err_code: u32, eip: u32) -> Self {
        PageFault {
            address,
            code: PageFaultErrorCode::from_bits_truncate(u64::from(err_code)),
            eip,
        }
    }

    /// Read CR2 and decode the error code pushed for this fault.
    pub fn read<C: Cpu + ?Sized>(frame: &InterruptFrame, cpu: &C) -> Self {
        Self::new(VirtAddr::new(cpu.read_cr2()), frame.err_code, frame.eip)
    }

    /// The page was present, so a protection check failed.
    pub fn is_protection_violation(&self) -> bool {
        self.code.contains(PageFaultErrorCode::PROTECTION_VIOLATION)
    }

    pub fn is_write(&self) -> bool {
        self.code.contains(PageFaultErrorCode::CAUSED_BY_WRITE)
    }

    pub fn is_user(&self) -> bool {
        self.code.contains(PageFaultErrorCode::USER_MODE)
    }

    pub fn is_instruction_fetch(&self) -> bool {
        self.code.contains(PageFaultErrorCode::INSTRUCTION_FETCH)
    }
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = if self.is_instruction_fetch() {
            "fetch"
        } else if self.is_write() {
            "write"
        } else {
            "read"
        };
        write!(
            f,
            "{} {} 0x{:08x} from ring {} at eip 0x{:08x}: {}",
            if self.is_user() { "user" } else { "kernel" },
            access,
            self.address.as_u32(),
            if self.is_user() { 3 } else { 0 },
            self.eip,
            if self.is_protection_violation() {
                "protection violation"
            } else {
                "page not present"
            }
        )
    }
}

/// Fault handler for vector 14: report the fault and halt.
pub fn page_fault_handler(frame: &mut InterruptFrame, cpu: &mut dyn Cpu) {
    let fault = PageFault::read(frame, cpu);
    log::error!("PAGE FAULT: {} (error code 0x{:x})", fault, frame.err_code);
    cpu.halt();
}
