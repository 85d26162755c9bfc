//! Physical frame allocator
//!
//! A fixed pool of `N` consecutive frames managed as an intrusive free
//! list: every free slot stores the index of the next free slot. Both
//! operations are O(1). A fresh pool hands frames out in ascending order;
//! freed frames are reused last-freed-first.

use core::fmt;

use super::{PagingError, PagingResult};
use crate::addr::PhysFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    InUse,
    /// Free; holds the next free slot, `None` at the end of the list.
    Free(Option<usize>),
}

/// Where page tables get their frames from.
pub trait PhysAllocator {
    fn allocate(&mut self) -> PagingResult<PhysFrame>;
    fn free(&mut self, frame: PhysFrame) -> PagingResult<()>;
}

/// Fixed-capacity frame pool covering `base .. base + N`.
pub struct FrameAllocator<const N: usize> {
    base: PhysFrame,
    slots: [Slot; N],
    head: Option<usize>,
    free: usize,
}

impl<const N: usize> FrameAllocator<N> {
    /// A pool in which every frame is free.
    pub const fn new(base: PhysFrame) -> Self {
        let mut slots = [Slot::InUse; N];
        let mut i = 0;
        while i < N {
            slots[i] = if i + 1 < N {
                Slot::Free(Some(i + 1))
            } else {
                Slot::Free(None)
            };
            i += 1;
        }
        FrameAllocator {
            base,
            slots,
            head: if N > 0 { Some(0) } else { None },
            free: N,
        }
    }

    /// Pop the head of the free list.
    pub fn allocate(&mut self) -> PagingResult<PhysFrame> {
        let index = self.head.ok_or(PagingError::OutOfFrames)?;
        debug_assert!(self.slots[index] != Slot::InUse, "free list head {} in use", index);
        let next = match self.slots[index] {
            Slot::Free(next) => next,
            Slot::InUse => None,
        };
        self.slots[index] = Slot::InUse;
        self.head = next;
        self.free -= 1;
        Ok(self.base + index as u32)
    }

    /// Push `frame` back onto the head of the free list.
    pub fn free(&mut self, frame: PhysFrame) -> PagingResult<()> {
        let index = self
            .index_of(frame)
            .ok_or(PagingError::FrameOutOfRange { frame })?;
        if self.slots[index] != Slot::InUse {
            return Err(PagingError::DoubleFree { frame });
        }
        self.slots[index] = Slot::Free(self.head);
        self.head = Some(index);
        self.free += 1;
        Ok(())
    }

    pub fn contains(&self, frame: PhysFrame) -> bool {
        self.index_of(frame).is_some()
    }

    pub fn base(&self) -> PhysFrame {
        self.base
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn free_frames(&self) -> usize {
        self.free
    }

    pub fn used_frames(&self) -> usize {
        N - self.free
    }

    fn index_of(&self, frame: PhysFrame) -> Option<usize> {
        let index = frame.number().checked_sub(self.base.number())? as usize;
        (index < N).then_some(index)
    }
}

impl<const N: usize> PhysAllocator for FrameAllocator<N> {
    fn allocate(&mut self) -> PagingResult<PhysFrame> {
        FrameAllocator::allocate(self)
    }

    fn free(&mut self, frame: PhysFrame) -> PagingResult<()> {
        FrameAllocator::free(self, frame)
    }
}

impl<const N: usize> fmt::Debug for FrameAllocator<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("base", &self.base)
            .field("capacity", &N)
            .field("free", &self.free)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool<const N: usize>() -> FrameAllocator<N> {
        FrameAllocator::new(PhysFrame::from_number(0x100))
    }

    #[test]
    fn test_exhaustion_after_capacity() {
        let mut frames = pool::<8>();
        for i in 0..8 {
            assert_eq!(frames.allocate(), Ok(PhysFrame::from_number(0x100 + i)));
        }
        assert_eq!(frames.allocate(), Err(PagingError::OutOfFrames));
        assert_eq!(frames.free_frames(), 0);
        assert_eq!(frames.allocate(), Err(PagingError::OutOfFrames));
    }

    #[test]
    fn test_last_freed_is_reused_first() {
        let mut frames = pool::<4>();
        let f0 = frames.allocate().unwrap();
        let f1 = frames.allocate().unwrap();
        let f2 = frames.allocate().unwrap();
        assert_eq!(
            [f0, f1, f2].map(|f| f.number() - 0x100),
            [0, 1, 2]
        );

        frames.free(f1).unwrap();
        assert_eq!(frames.allocate(), Ok(f1));
    }

    #[test]
    fn test_lifo_order() {
        let mut frames = pool::<4>();
        let all: Vec<_> = (0..4).map(|_| frames.allocate().unwrap()).collect();
        frames.free(all[0]).unwrap();
        frames.free(all[3]).unwrap();
        frames.free(all[2]).unwrap();

        assert_eq!(frames.allocate(), Ok(all[2]));
        assert_eq!(frames.allocate(), Ok(all[3]));
        assert_eq!(frames.allocate(), Ok(all[0]));
        assert_eq!(frames.allocate(), Err(PagingError::OutOfFrames));
    }

    #[test]
    fn test_free_rejects_foreign_and_double_free() {
        let mut frames = pool::<2>();
        let frame = frames.allocate().unwrap();

        let foreign = PhysFrame::from_number(0x99);
        assert_eq!(frames.free(foreign), Err(PagingError::FrameOutOfRange { frame: foreign }));
        let past_end = PhysFrame::from_number(0x102);
        assert_eq!(frames.free(past_end), Err(PagingError::FrameOutOfRange { frame: past_end }));

        frames.free(frame).unwrap();
        assert_eq!(frames.free(frame), Err(PagingError::DoubleFree { frame }));
        let never_allocated = PhysFrame::from_number(0x101);
        assert_eq!(
            frames.free(never_allocated),
            Err(PagingError::DoubleFree { frame: never_allocated })
        );
        assert_eq!(frames.free_frames(), 2);
    }

    #[test]
    fn test_empty_pool() {
        let mut frames = pool::<0>();
        assert_eq!(frames.allocate(), Err(PagingError::OutOfFrames));
    }
}
