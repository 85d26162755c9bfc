//! Vector space partition and the per-class index transforms.
//!
//! ```text
//! 0..=21, 28..=30          faults      index v, or v - 6
//! 22..=27, 31              reserved    diagnostic, halt
//! primary_base + 0..8      IRQ 0..8    index = line
//! secondary_base + 0..8    IRQ 8..16
//! every other v >= 32      software    index = v - 32 - IRQ vectors below v
//! ```
//!
//! Each transform is a bijection between the class's vectors and
//! `0..class size`.

use core::fmt;

use crate::config::{PicConfig, FAULT_HANDLERS, FIRST_EXTERNAL_VECTOR, SOFTWARE_HANDLERS};

/// Last vector of the low fault block.
const LOW_FAULTS_END: u8 = 21;
/// First vector of the high fault block (#HV, #VC, #SX).
const HIGH_FAULTS_START: u8 = 28;
const HIGH_FAULTS_END: u8 = 30;
const HIGH_FAULTS_SHIFT: u8 = HIGH_FAULTS_START - LOW_FAULTS_END - 1;

/// Which registry a vector belongs to, with its class index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorClass {
    Fault(usize),
    /// IRQ line 0..16.
    Irq(u8),
    Software(usize),
    /// An architecturally reserved exception vector.
    Reserved,
}

/// Why a [`PicConfig`] cannot be turned into a vector layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// A base is not a multiple of 8.
    Misaligned(u8),
    /// A base falls inside the exception range.
    CollidesWithExceptions(u8),
    /// Both controllers use the same base.
    SameBase(u8),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LayoutError::Misaligned(base) => {
                write!(f, "PIC vector base 0x{:x} is not a multiple of 8", base)
            }
            LayoutError::CollidesWithExceptions(base) => {
                write!(f, "PIC vector base 0x{:x} overlaps the exception vectors", base)
            }
            LayoutError::SameBase(base) => {
                write!(f, "both PICs use vector base 0x{:x}", base)
            }
        }
    }
}

/// Validated placement of the two IRQ blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorLayout {
    primary_base: u8,
    secondary_base: u8,
}

impl VectorLayout {
    /// IRQs at 0x20..0x30.
    pub const DEFAULT: Self = VectorLayout {
        primary_base: crate::config::DEFAULT_PRIMARY_BASE,
        secondary_base: crate::config::DEFAULT_SECONDARY_BASE,
    };

    pub fn new(config: &PicConfig) -> Result<Self, LayoutError> {
        for base in [config.primary_base, config.secondary_base] {
            if base % 8 != 0 {
                return Err(LayoutError::Misaligned(base));
            }
            if base < FIRST_EXTERNAL_VECTOR {
                return Err(LayoutError::CollidesWithExceptions(base));
            }
        }
        if config.primary_base == config.secondary_base {
            return Err(LayoutError::SameBase(config.primary_base));
        }
        Ok(VectorLayout {
            primary_base: config.primary_base,
            secondary_base: config.secondary_base,
        })
    }

    pub fn primary_base(&self) -> u8 {
        self.primary_base
    }

    pub fn secondary_base(&self) -> u8 {
        self.secondary_base
    }

    pub fn classify(&self, vector: u8) -> VectorClass {
        if let Some(index) = fault_index(vector) {
            VectorClass::Fault(index)
        } else if vector < FIRST_EXTERNAL_VECTOR {
            VectorClass::Reserved
        } else if let Some(line) = self.irq_line(vector) {
            VectorClass::Irq(line)
        } else {
            VectorClass::Software(self.software_index_unchecked(vector))
        }
    }

    /// IRQ line raised on `vector`, if any.
    pub fn irq_line(&self, vector: u8) -> Option<u8> {
        let in_block =
            |base: u8| (u16::from(base)..u16::from(base) + 8).contains(&u16::from(vector));
        if in_block(self.primary_base) {
            Some(vector - self.primary_base)
        } else if in_block(self.secondary_base) {
            Some(vector - self.secondary_base + 8)
        } else {
            None
        }
    }

    pub fn irq_vector(&self, line: u8) -> Option<u8> {
        match line {
            0..=7 => Some(self.primary_base + line),
            8..=15 => Some(self.secondary_base + line - 8),
            _ => None,
        }
    }

    pub fn software_index(&self, vector: u8) -> Option<usize> {
        if vector < FIRST_EXTERNAL_VECTOR || self.irq_line(vector).is_some() {
            return None;
        }
        Some(self.software_index_unchecked(vector))
    }

    pub fn software_vector(&self, index: usize) -> Option<u8> {
        if index >= SOFTWARE_HANDLERS {
            return None;
        }
        let (low, high) = self.sorted_bases();
        let mut vector = usize::from(FIRST_EXTERNAL_VECTOR) + index;
        if vector >= usize::from(low) {
            vector += 8;
        }
        if vector >= usize::from(high) {
            vector += 8;
        }
        u8::try_from(vector).ok()
    }

    fn software_index_unchecked(&self, vector: u8) -> usize {
        let irq_below = [self.primary_base, self.secondary_base]
            .iter()
            .filter(|&&base| vector >= base)
            .count()
            * 8;
        usize::from(vector - FIRST_EXTERNAL_VECTOR) - irq_below
    }

    fn sorted_bases(&self) -> (u8, u8) {
        if self.primary_base < self.secondary_base {
            (self.primary_base, self.secondary_base)
        } else {
            (self.secondary_base, self.primary_base)
        }
    }
}

impl Default for VectorLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Fault registry index of `vector`; `None` outside the fault domain.
pub fn fault_index(vector: u8) -> Option<usize> {
    match vector {
        0..=LOW_FAULTS_END => Some(usize::from(vector)),
        HIGH_FAULTS_START..=HIGH_FAULTS_END => Some(usize::from(vector - HIGH_FAULTS_SHIFT)),
        _ => None,
    }
}

pub fn fault_vector(index: usize) -> Option<u8> {
    if index >= FAULT_HANDLERS {
        return None;
    }
    let vector = index as u8;
    if vector <= LOW_FAULTS_END {
        Some(vector)
    } else {
        Some(vector + HIGH_FAULTS_SHIFT)
    }
}

/// Whether the CPU pushes an error code for this exception.
pub fn has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10..=14 | 17 | 21 | 29 | 30)
}

const EXCEPTION_NAMES: [Option<&str>; FIRST_EXTERNAL_VECTOR as usize] = [
    Some("Division Error"),
    Some("Debug"),
    Some("Non-Maskable Interrupt"),
    Some("Breakpoint"),
    Some("Overflow"),
    Some("BOUND Range Exceeded"),
    Some("Invalid Opcode"),
    Some("Device Not Available"),
    Some("Double Fault"),
    Some("Coprocessor Segment Overrun"),
    Some("Invalid TSS"),
    Some("Segment Not Present"),
    Some("Stack-Segment Fault"),
    Some("General Protection Fault"),
    Some("Page Fault"),
    Some("Reserved"),
    Some("x87 Floating-Point Exception"),
    Some("Alignment Check"),
    Some("Machine Check"),
    Some("SIMD Floating-Point Exception"),
    Some("Virtualization Exception"),
    Some("Control Protection Exception"),
    None,
    None,
    None,
    None,
    None,
    None,
    Some("Hypervisor Injection Exception"),
    Some("VMM Communication Exception"),
    Some("Security Exception"),
    None,
];

/// Architectural name of exception `vector`.
pub fn exception_name(vector: u8) -> Option<&'static str> {
    EXCEPTION_NAMES.get(usize::from(vector)).copied().flatten()
}
