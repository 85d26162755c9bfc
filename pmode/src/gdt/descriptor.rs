//! Segment and system descriptor encoding.
//!
//! A descriptor is packed by hand into its 8-byte hardware layout:
//!
//! ```text
//! byte 0..2  limit 0..15
//! byte 2..4  base 0..15
//! byte 4     base 16..23
//! byte 5     access: P | DPL(2) | S | type(4)
//! byte 6     flags: G | D/B | L | AVL, then limit 16..19
//! byte 7     base 24..31
//! ```

use core::fmt;

use x86_64::PrivilegeLevel;

/// The S bit of the access byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DescriptorClass {
    /// TSS, LDT and gate descriptors.
    System = 0,
    /// Code and data segments.
    Segment = 1,
}

/// How the 20-bit limit is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Granularity {
    Byte = 0,
    Page = 1,
}

/// The 4-bit type field: segment permissions, or the system descriptor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentType(pub u8);

impl SegmentType {
    pub const DATA_READ_WRITE: Self = SegmentType(0x2);
    pub const CODE_EXECUTE_READ: Self = SegmentType(0xA);
    pub const TSS_AVAILABLE: Self = SegmentType(0x9);
    pub const TSS_BUSY: Self = SegmentType(0xB);
}

const ACCESS_PRESENT: u8 = 1 << 7;
const FLAG_GRANULARITY: u8 = 1 << 3;
const FLAG_DEFAULT_SIZE: u8 = 1 << 2;

/// Largest encodable limit.
pub const MAX_LIMIT: u32 = 0xF_FFFF;

/// One GDT entry in its hardware byte layout.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Descriptor([u8; 8]);

impl Descriptor {
    /// The mandatory all-zero entry at index 0.
    pub const NULL: Self = Descriptor([0; 8]);

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Descriptor(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// The descriptor as the little-endian quadword the CPU reads.
    pub const fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    pub fn base(&self) -> u32 {
        let b = &self.0;
        u32::from(b[2]) | u32::from(b[3]) << 8 | u32::from(b[4]) << 16 | u32::from(b[7]) << 24
    }

    /// The raw 20-bit limit, before granularity scaling.
    pub fn limit(&self) -> u32 {
        let b = &self.0;
        u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[6] & 0x0F) << 16
    }

    pub fn access(&self) -> u8 {
        self.0[5]
    }

    /// G, D/B, L and AVL, in the low nibble.
    pub fn flags(&self) -> u8 {
        self.0[6] >> 4
    }

    pub fn is_present(&self) -> bool {
        self.access() & ACCESS_PRESENT != 0
    }

    pub fn ring(&self) -> PrivilegeLevel {
        PrivilegeLevel::from_u16(u16::from((self.access() >> 5) & 0b11))
    }

    pub fn class(&self) -> DescriptorClass {
        if self.access() & (1 << 4) != 0 {
            DescriptorClass::Segment
        } else {
            DescriptorClass::System
        }
    }

    pub fn segment_type(&self) -> SegmentType {
        SegmentType(self.access() & 0x0F)
    }

    pub fn granularity(&self) -> Granularity {
        if self.flags() & FLAG_GRANULARITY != 0 {
            Granularity::Page
        } else {
            Granularity::Byte
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Descriptor({:#018x})", self.as_u64())
    }
}

/// Encodes a present descriptor.
///
/// Segment descriptors get the 32-bit default operand size; system
/// descriptors leave D/B clear. Limit bits above 20 are dropped.
pub fn build_descriptor(
    base: u32,
    limit: u32,
    ring: PrivilegeLevel,
    class: DescriptorClass,
    segment_type: SegmentType,
    granularity: Granularity,
) -> Descriptor {
    let limit = limit & MAX_LIMIT;
    let access = ACCESS_PRESENT
        | (ring as u8 & 0b11) << 5
        | (class as u8) << 4
        | (segment_type.0 & 0x0F);

    let mut flags = 0u8;
    if granularity == Granularity::Page {
        flags |= FLAG_GRANULARITY;
    }
    if class == DescriptorClass::Segment {
        flags |= FLAG_DEFAULT_SIZE;
    }

    let mut bytes = [0u8; 8];
    bytes[0..2].copy_from_slice(&(limit as u16).to_le_bytes());
    bytes[2..4].copy_from_slice(&(base as u16).to_le_bytes());
    bytes[4] = (base >> 16) as u8;
    bytes[5] = access;
    bytes[6] = (flags << 4) | ((limit >> 16) as u8 & 0x0F);
    bytes[7] = (base >> 24) as u8;
    Descriptor(bytes)
}

/// Flat 4 GiB code segment.
pub fn flat_code_segment(ring: PrivilegeLevel) -> Descriptor {
    build_descriptor(
        0,
        MAX_LIMIT,
        ring,
        DescriptorClass::Segment,
        SegmentType::CODE_EXECUTE_READ,
        Granularity::Page,
    )
}

/// Flat 4 GiB data segment.
pub fn flat_data_segment(ring: PrivilegeLevel) -> Descriptor {
    build_descriptor(
        0,
        MAX_LIMIT,
        ring,
        DescriptorClass::Segment,
        SegmentType::DATA_READ_WRITE,
        Granularity::Page,
    )
}

/// Available 32-bit TSS at `base` spanning `size` bytes.
pub fn tss_segment(base: u32, size: u32) -> Descriptor {
    build_descriptor(
        base,
        size - 1,
        PrivilegeLevel::Ring0,
        DescriptorClass::System,
        SegmentType::TSS_AVAILABLE,
        Granularity::Byte,
    )
}
