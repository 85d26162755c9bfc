//! Handler registries, one per vector class.

use core::fmt;

use super::frame::InterruptFrame;
use crate::hal::Cpu;

/// Code run for a vector.
///
/// The frame is the interrupted context; changes to it are restored on
/// return. `cpu` is the processor the interrupt arrived on.
pub trait Handler: Sync {
    fn handle(&self, frame: &mut InterruptFrame, cpu: &mut dyn Cpu);
}

impl<F> Handler for F
where
    F: Fn(&mut InterruptFrame, &mut dyn Cpu) + Sync,
{
    fn handle(&self, frame: &mut InterruptFrame, cpu: &mut dyn Cpu) {
        self(frame, cpu)
    }
}

/// A registration call named a vector or line outside the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    NotAFault(u8),
    NoSuchIrqLine(u8),
    NotASoftwareVector(u8),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RegistrationError::NotAFault(vector) => {
                write!(f, "vector 0x{:x} is not a registrable fault", vector)
            }
            RegistrationError::NoSuchIrqLine(line) => write!(f, "no IRQ line {}", line),
            RegistrationError::NotASoftwareVector(vector) => {
                write!(f, "vector 0x{:x} is not a software interrupt", vector)
            }
        }
    }
}

/// Sparse table from class index to handler.
pub struct Registry<const N: usize> {
    slots: [Option<&'static dyn Handler>; N],
}

impl<const N: usize> Registry<N> {
    pub const fn new() -> Self {
        Registry { slots: [None; N] }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn get(&self, index: usize) -> Option<&'static dyn Handler> {
        self.slots.get(index).copied().flatten()
    }

    /// Store `handler` at `index`, replacing any previous one. Returns
    /// `false` without touching the table when `index` is out of range.
    pub fn set(&mut self, index: usize, handler: &'static dyn Handler) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(handler);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn registered(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl<const N: usize> Default for Registry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for Registry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("capacity", &N)
            .field("registered", &self.registered())
            .finish()
    }
}
