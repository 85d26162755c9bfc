//! 8259 PIC pair: remap IRQ 0–15 away from the exception vectors, mask
//! lines, and acknowledge interrupts.
//!
//! The secondary controller is cascaded on IR2 of the primary. All port
//! traffic goes through [`PortIo`].

use crate::config::{
    PicConfig, IRQ_LINES, PIC_EOI, PIC_ICW1_INIT, PIC_ICW4_8086, PIC_PRIMARY_CASCADE,
    PIC_PRIMARY_COMMAND, PIC_PRIMARY_DATA, PIC_SECONDARY_CASCADE, PIC_SECONDARY_COMMAND,
    PIC_SECONDARY_DATA,
};
use crate::hal::PortIo;
use crate::idt::vector::{LayoutError, VectorLayout};
use crate::idt::RegistrationError;

/// Both controllers and the mask last written to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainedPics {
    layout: VectorLayout,
    /// Bit `n` set masks line `n`; low byte primary, high byte secondary.
    mask: u16,
    /// Masks found in the controllers before initialization.
    previous_mask: u16,
}

impl ChainedPics {
    /// Driver for `layout`. Nothing is written until [`initialize`].
    ///
    /// [`initialize`]: ChainedPics::initialize
    pub const fn new(layout: VectorLayout, mask: u16) -> Self {
        ChainedPics {
            layout,
            mask,
            previous_mask: 0,
        }
    }

    pub fn from_config(config: &PicConfig) -> Result<Self, LayoutError> {
        Ok(Self::new(VectorLayout::new(config)?, config.initial_mask))
    }

    pub fn layout(&self) -> &VectorLayout {
        &self.layout
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn previous_mask(&self) -> u16 {
        self.previous_mask
    }

    /// Run the ICW1..ICW4 sequence on both controllers, then apply the
    /// configured mask.
    ///
    /// # Safety
    /// Reprograms the interrupt controllers; interrupts must be disabled and
    /// an IDT covering the new vectors must be in place before they are
    /// enabled again.
    pub unsafe fn initialize<P: PortIo + ?Sized>(&mut self, io: &mut P) {
        // SAFETY: the caller owns the controllers for the whole sequence.
        unsafe {
            let primary = io.read_u8(PIC_PRIMARY_DATA);
            let secondary = io.read_u8(PIC_SECONDARY_DATA);
            self.previous_mask = u16::from_le_bytes([primary, secondary]);

            io.write_u8(PIC_PRIMARY_COMMAND, PIC_ICW1_INIT);
            io.write_u8(PIC_SECONDARY_COMMAND, PIC_ICW1_INIT);

            io.write_u8(PIC_PRIMARY_DATA, self.layout.primary_base());
            io.write_u8(PIC_SECONDARY_DATA, self.layout.secondary_base());

            io.write_u8(PIC_PRIMARY_DATA, PIC_PRIMARY_CASCADE);
            io.write_u8(PIC_SECONDARY_DATA, PIC_SECONDARY_CASCADE);

            io.write_u8(PIC_PRIMARY_DATA, PIC_ICW4_8086);
            io.write_u8(PIC_SECONDARY_DATA, PIC_ICW4_8086);

            self.write_mask(io);
        }

        log::info!(
            "pic: irq 0-7 -> 0x{:x}, irq 8-15 -> 0x{:x}, mask 0x{:04x} (was 0x{:04x})",
            self.layout.primary_base(),
            self.layout.secondary_base(),
            self.mask,
            self.previous_mask
        );
    }

    /// Replace the whole mask.
    ///
    /// # Safety
    /// Unmasking a line with no handler is only safe if its interrupts are
    /// acceptable to drop.
    pub unsafe fn set_mask<P: PortIo + ?Sized>(&mut self, io: &mut P, mask: u16) {
        self.mask = mask;
        // SAFETY: forwarded to the caller.
        unsafe { self.write_mask(io) };
    }

    /// # Safety
    /// See [`ChainedPics::set_mask`].
    pub unsafe fn mask_line<P: PortIo + ?Sized>(
        &mut self,
        io: &mut P,
        line: u8,
    ) -> Result<(), RegistrationError> {
        let bit = line_bit(line)?;
        // SAFETY: forwarded to the caller.
        unsafe { self.set_mask(io, self.mask | bit) };
        Ok(())
    }

    /// # Safety
    /// See [`ChainedPics::set_mask`].
    pub unsafe fn unmask_line<P: PortIo + ?Sized>(
        &mut self,
        io: &mut P,
        line: u8,
    ) -> Result<(), RegistrationError> {
        let bit = line_bit(line)?;
        // SAFETY: forwarded to the caller.
        unsafe { self.set_mask(io, self.mask & !bit) };
        Ok(())
    }

    /// # Safety
    /// Must only acknowledge an interrupt that is actually in service.
    pub unsafe fn notify_end_of_interrupt<P: PortIo + ?Sized>(&self, io: &mut P, line: u8) {
        // SAFETY: forwarded to the caller.
        unsafe { end_of_interrupt(io, line) };
    }

    unsafe fn write_mask<P: PortIo + ?Sized>(&self, io: &mut P) {
        let [primary, secondary] = self.mask.to_le_bytes();
        // SAFETY: the data ports only accept OCW1 after initialization.
        unsafe {
            io.write_u8(PIC_PRIMARY_DATA, primary);
            io.write_u8(PIC_SECONDARY_DATA, secondary);
        }
    }
}

/// Acknowledge IRQ `line`: the secondary first when the line is wired
/// there, then always the primary, which sees every secondary line as IR2.
///
/// # Safety
/// Must only acknowledge an interrupt that is actually in service.
pub unsafe fn end_of_interrupt<P: PortIo + ?Sized>(io: &mut P, line: u8) {
    // SAFETY: forwarded to the caller.
    unsafe {
        if line >= 8 {
            io.write_u8(PIC_SECONDARY_COMMAND, PIC_EOI);
        }
        io.write_u8(PIC_PRIMARY_COMMAND, PIC_EOI);
    }
}

fn line_bit(line: u8) -> Result<u16, RegistrationError> {
    if usize::from(line) < IRQ_LINES {
        Ok(1 << line)
    } else {
        Err(RegistrationError::NoSuchIrqLine(line))
    }
}
