//! Gate descriptor encoding and the 256-entry table.
//!
//! ```text
//! byte 0..2  handler offset 0..15
//! byte 2..4  code segment selector
//! byte 4     zero
//! byte 5     P | DPL(2) | 0 | type(4)
//! byte 6..8  handler offset 16..31
//! ```

use core::fmt;

use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

use crate::config::IDT_ENTRIES;
use crate::hal::{linear_address, DescriptorTablePointer};

const ATTR_PRESENT: u8 = 1 << 7;
const ATTR_DPL_SHIFT: u8 = 5;
const ATTR_DPL_MASK: u8 = 0b11 << ATTR_DPL_SHIFT;

/// 32-bit gate kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateKind {
    /// Clears IF on entry.
    Interrupt = 0xE,
    /// Leaves IF alone.
    Trap = 0xF,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct GateDescriptor([u8; 8]);

impl GateDescriptor {
    /// A non-present gate; vectoring through it raises #NP.
    pub const MISSING: Self = GateDescriptor([0; 8]);

    pub fn new(
        offset: u32,
        selector: SegmentSelector,
        kind: GateKind,
        dpl: PrivilegeLevel,
    ) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0..2].copy_from_slice(&(offset as u16).to_le_bytes());
        bytes[2..4].copy_from_slice(&selector.0.to_le_bytes());
        bytes[5] = ATTR_PRESENT | (dpl as u8) << ATTR_DPL_SHIFT | kind as u8;
        bytes[6..8].copy_from_slice(&((offset >> 16) as u16).to_le_bytes());
        GateDescriptor(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn offset(&self) -> u32 {
        u32::from(u16::from_le_bytes([self.0[0], self.0[1]]))
            | u32::from(u16::from_le_bytes([self.0[6], self.0[7]])) << 16
    }

    pub fn selector(&self) -> SegmentSelector {
        SegmentSelector(u16::from_le_bytes([self.0[2], self.0[3]]))
    }

    pub fn type_attr(&self) -> u8 {
        self.0[5]
    }

    pub fn is_present(&self) -> bool {
        self.type_attr() & ATTR_PRESENT != 0
    }

    pub fn dpl(&self) -> PrivilegeLevel {
        PrivilegeLevel::from_u16(u16::from((self.type_attr() & ATTR_DPL_MASK) >> ATTR_DPL_SHIFT))
    }

    /// `None` for a type nibble that is not a 32-bit interrupt or trap gate.
    pub fn kind(&self) -> Option<GateKind> {
        match self.type_attr() & 0x0F {
            0xE => Some(GateKind::Interrupt),
            0xF => Some(GateKind::Trap),
            _ => None,
        }
    }

    /// Rewrite only the privilege level allowed to `int` through this gate.
    pub fn set_dpl(&mut self, dpl: PrivilegeLevel) {
        self.0[5] = (self.0[5] & !ATTR_DPL_MASK) | (dpl as u8) << ATTR_DPL_SHIFT;
    }
}

impl fmt::Debug for GateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateDescriptor")
            .field("offset", &format_args!("{:#010x}", self.offset()))
            .field("selector", &format_args!("{:#x}", self.selector().0))
            .field("type_attr", &format_args!("{:#04x}", self.type_attr()))
            .finish()
    }
}

/// The table the IDTR points at.
#[derive(Clone)]
#[repr(C, align(8))]
pub struct InterruptDescriptorTable {
    gates: [GateDescriptor; IDT_ENTRIES],
}

impl InterruptDescriptorTable {
    pub const fn new() -> Self {
        InterruptDescriptorTable {
            gates: [GateDescriptor::MISSING; IDT_ENTRIES],
        }
    }

    pub fn gate(&self, vector: u8) -> &GateDescriptor {
        &self.gates[usize::from(vector)]
    }

    pub fn gate_mut(&mut self, vector: u8) -> &mut GateDescriptor {
        &mut self.gates[usize::from(vector)]
    }

    pub fn set(&mut self, vector: u8, gate: GateDescriptor) {
        self.gates[usize::from(vector)] = gate;
    }

    pub fn gates(&self) -> &[GateDescriptor; IDT_ENTRIES] {
        &self.gates
    }

    /// IDTR value for the table at its current address.
    pub fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer::new(linear_address(self), IDT_ENTRIES)
    }
}

impl Default for InterruptDescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
