//! Register snapshot handed over by the interrupt entry stubs.

/// Saved state of the interrupted context, lowest address first.
///
/// The entry stub pushes the error code (or a zero) and the vector, then
/// `pushal`, then GS/FS/ES/DS, so the fields below mirror that stack
/// image. The CPU pushes `useresp`/`ss` only on a ring 3 -> ring 0
/// transition; read them only when `cs` has RPL 3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct InterruptFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// ESP at the time of `pushal`; not restored by `popal`.
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

impl InterruptFrame {
    /// Frame for `vector` with the given error code and everything else zero.
    pub const fn new(vector: u8, err_code: u32) -> Self {
        InterruptFrame {
            gs: 0,
            fs: 0,
            es: 0,
            ds: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            int_no: vector as u32,
            err_code,
            eip: 0,
            cs: 0,
            eflags: 0,
            useresp: 0,
            ss: 0,
        }
    }

    pub fn vector(&self) -> u8 {
        self.int_no as u8
    }

    /// Whether the interrupted code ran in ring 3.
    pub fn from_user_mode(&self) -> bool {
        self.cs & 0b11 == 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn test_layout_matches_stub() {
        assert_eq!(size_of::<InterruptFrame>(), 19 * 4);
        assert_eq!(offset_of!(InterruptFrame, edi), 16);
        assert_eq!(offset_of!(InterruptFrame, eax), 44);
        assert_eq!(offset_of!(InterruptFrame, int_no), 48);
        assert_eq!(offset_of!(InterruptFrame, err_code), 52);
        assert_eq!(offset_of!(InterruptFrame, eip), 56);
        assert_eq!(offset_of!(InterruptFrame, ss), 72);
    }

    #[test]
    fn test_from_user_mode() {
        let mut frame = InterruptFrame::new(0x80, 0);
        frame.cs = 0x08;
        assert!(!frame.from_user_mode());
        frame.cs = 0x1B;
        assert!(frame.from_user_mode());
        assert_eq!(frame.vector(), 0x80);
    }
}
