//! Error types for paging operations

use crate::addr::{Page, PhysAddr, PhysFrame, VirtAddr};

/// Paging operation errors with context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// Frame allocator has no more frames available
    OutOfFrames,

    /// Frame handed back to an allocator that does not own it
    FrameOutOfRange {
        frame: PhysFrame,
    },

    /// Frame freed while already free
    DoubleFree {
        frame: PhysFrame,
    },

    /// Physical base of a relocated range is not page aligned
    Misaligned {
        addr: PhysAddr,
    },

    /// Range end lies below its start
    InvalidRange {
        start: VirtAddr,
        end: VirtAddr,
    },

    /// Page already has a valid entry
    ///
    /// Each page is mapped at most once; unmap first to change it.
    AlreadyMapped {
        page: Page,
    },

    /// Frame already backs a valid entry
    FrameAliased {
        frame: PhysFrame,
    },

    /// Paging enabled with an empty page directory
    NothingMapped,
}

impl PagingError {
    /// Returns a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            Self::OutOfFrames => "physical memory exhausted",
            Self::FrameOutOfRange { .. } => "frame does not belong to this allocator",
            Self::DoubleFree { .. } => "frame is already free",
            Self::Misaligned { .. } => "address is not page aligned",
            Self::InvalidRange { .. } => "invalid address range",
            Self::AlreadyMapped { .. } => "page is already mapped",
            Self::FrameAliased { .. } => "frame is already mapped",
            Self::NothingMapped => "page directory is empty",
        }
    }
}

/// Convenience type alias for Results with PagingError
pub type PagingResult<T> = Result<T, PagingError>;

impl core::fmt::Display for PagingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::FrameOutOfRange { frame }
            | Self::DoubleFree { frame }
            | Self::FrameAliased { frame } => {
                write!(f, "{}: {}", self.description(), frame)
            }
            Self::Misaligned { addr } => {
                write!(
                    f,
                    "{}: address 0x{:x} must be aligned to 0x1000",
                    self.description(),
                    addr.as_u32()
                )
            }
            Self::InvalidRange { start, end } => {
                write!(
                    f,
                    "{}: 0x{:x}-0x{:x}",
                    self.description(),
                    start.as_u32(),
                    end.as_u32()
                )
            }
            Self::AlreadyMapped { page } => {
                write!(
                    f,
                    "{}: page at 0x{:x}",
                    self.description(),
                    page.start_address().as_u32()
                )
            }
            _ => write!(f, "{}", self.description()),
        }
    }
}
