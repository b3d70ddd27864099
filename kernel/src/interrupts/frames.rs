// Exception and Interrupt Context Frames
//
// Two snapshots of processor state, each matching the push order of its
// entry routine in `dispatch.rs` exactly:
//
// - `ExceptionFrame`: built by `_exception_enter`. Every general-purpose
//   register, the vector, the error code (0 when the CPU pushed none) and the
//   hardware frame. Debuggers and the fatal path consume this shape.
// - `InterruptFrame`: built by `_interrupt_enter` on the hot IRQ path. Only
//   the caller-saved registers plus the hardware frame; the callee-saved set
//   is present only with the `debug-info` feature.
//
// Both live on the interrupted stack and are valid only while the handler
// that received them runs. `ContextFrame` tags which one a consumer holds;
// one is never reinterpreted as the other.

use crate::arch::{KERNEL_CODE_SELECTOR, RFLAGS_RESERVED};
use core::fmt;
use core::mem::size_of;
use static_assertions::const_assert_eq;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,

    pub vector: u64,
    pub error_code: u64,

    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

const_assert_eq!(size_of::<ExceptionFrame>(), 22 * size_of::<u64>());

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptFrame {
    #[cfg(feature = "debug-info")]
    pub r15: u64,
    #[cfg(feature = "debug-info")]
    pub r14: u64,
    #[cfg(feature = "debug-info")]
    pub r13: u64,
    #[cfg(feature = "debug-info")]
    pub r12: u64,
    #[cfg(feature = "debug-info")]
    pub rbp: u64,
    #[cfg(feature = "debug-info")]
    pub rbx: u64,

    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,

    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

#[cfg(feature = "debug-info")]
const_assert_eq!(size_of::<InterruptFrame>(), 20 * size_of::<u64>());
#[cfg(not(feature = "debug-info"))]
const_assert_eq!(size_of::<InterruptFrame>(), 14 * size_of::<u64>());

const DEAD: u64 = 0xDEAD_DEAD_DEAD_DEAD;

/// Stand-in frame for fatal conditions detected in software, where no trap
/// captured any register state.
pub static DEFAULT_EXCEPTION_FRAME: ExceptionFrame = ExceptionFrame {
    r15: DEAD,
    r14: DEAD,
    r13: DEAD,
    r12: DEAD,
    r11: DEAD,
    r10: DEAD,
    r9: DEAD,
    r8: DEAD,
    rbp: DEAD,
    rbx: DEAD,
    rax: DEAD,
    rcx: DEAD,
    rdx: DEAD,
    rdi: DEAD,
    rsi: DEAD,
    vector: DEAD,
    error_code: DEAD,
    rip: DEAD,
    cs: KERNEL_CODE_SELECTOR as u64,
    rflags: RFLAGS_RESERVED,
    rsp: DEAD,
    ss: DEAD,
};

#[derive(Debug, Clone, Copy)]
pub enum ContextFrame<'a> {
    Exception(&'a ExceptionFrame),
    Interrupt(&'a InterruptFrame),
}

impl<'a> ContextFrame<'a> {
    pub fn instruction_pointer(&self) -> u64 {
        match self {
            ContextFrame::Exception(frame) => frame.rip,
            ContextFrame::Interrupt(frame) => frame.rip,
        }
    }

    pub fn code_segment(&self) -> u64 {
        match self {
            ContextFrame::Exception(frame) => frame.cs,
            ContextFrame::Interrupt(frame) => frame.cs,
        }
    }

    pub fn flags(&self) -> u64 {
        match self {
            ContextFrame::Exception(frame) => frame.rflags,
            ContextFrame::Interrupt(frame) => frame.rflags,
        }
    }

    pub fn privilege_level(&self) -> u8 {
        (self.code_segment() & 0x3) as u8
    }

    /// True for the shared stand-in frame rather than a captured one.
    pub fn is_default(&self) -> bool {
        matches!(self, ContextFrame::Exception(frame) if core::ptr::eq(*frame, &DEFAULT_EXCEPTION_FRAME))
    }
}

impl fmt::Display for ExceptionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vector={:#x} error={:#018x}", self.vector, self.error_code)?;
        writeln!(
            f,
            "RAX={:#018x} RBX={:#018x} RCX={:#018x} RDX={:#018x}",
            self.rax, self.rbx, self.rcx, self.rdx
        )?;
        writeln!(
            f,
            "RSI={:#018x} RDI={:#018x} RBP={:#018x} RSP={:#018x}",
            self.rsi, self.rdi, self.rbp, self.rsp
        )?;
        writeln!(
            f,
            "R8 ={:#018x} R9 ={:#018x} R10={:#018x} R11={:#018x}",
            self.r8, self.r9, self.r10, self.r11
        )?;
        writeln!(
            f,
            "R12={:#018x} R13={:#018x} R14={:#018x} R15={:#018x}",
            self.r12, self.r13, self.r14, self.r15
        )?;
        write!(
            f,
            "RIP={:#018x} CS={:#06x} RFLAGS={:#018x} SS={:#06x}",
            self.rip, self.cs, self.rflags, self.ss
        )
    }
}

impl fmt::Display for InterruptFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "RAX={:#018x} RCX={:#018x} RDX={:#018x} RSI={:#018x} RDI={:#018x}",
            self.rax, self.rcx, self.rdx, self.rsi, self.rdi
        )?;
        writeln!(
            f,
            "R8 ={:#018x} R9 ={:#018x} R10={:#018x} R11={:#018x}",
            self.r8, self.r9, self.r10, self.r11
        )?;
        #[cfg(feature = "debug-info")]
        writeln!(
            f,
            "RBX={:#018x} RBP={:#018x} R12={:#018x} R13={:#018x} R14={:#018x} R15={:#018x}",
            self.rbx, self.rbp, self.r12, self.r13, self.r14, self.r15
        )?;
        write!(
            f,
            "RIP={:#018x} CS={:#06x} RFLAGS={:#018x} RSP={:#018x} SS={:#06x}",
            self.rip, self.cs, self.rflags, self.rsp, self.ss
        )
    }
}

impl<'a> fmt::Display for ContextFrame<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextFrame::Exception(frame) => write!(f, "{}", frame),
            ContextFrame::Interrupt(frame) => write!(f, "{}", frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn exception_frame_layout_matches_entry_push_order() {
        assert_eq!(offset_of!(ExceptionFrame, r15), 0);
        assert_eq!(offset_of!(ExceptionFrame, rsi), 14 * 8);
        assert_eq!(offset_of!(ExceptionFrame, vector), 15 * 8);
        assert_eq!(offset_of!(ExceptionFrame, error_code), 16 * 8);
        assert_eq!(offset_of!(ExceptionFrame, rip), 17 * 8);
        assert_eq!(offset_of!(ExceptionFrame, ss), 21 * 8);
    }

    #[test]
    fn interrupt_frame_ends_with_hardware_frame() {
        let size = size_of::<InterruptFrame>();
        assert_eq!(offset_of!(InterruptFrame, rip), size - 5 * 8);
        assert_eq!(offset_of!(InterruptFrame, rdi), size - 6 * 8);
        assert_eq!(offset_of!(InterruptFrame, r11), size - 14 * 8);
    }

    #[test]
    fn context_frame_accessors_follow_variant() {
        let exc = ExceptionFrame { rip: 0x1000, cs: 0x1B, ..Default::default() };
        let irq = InterruptFrame { rip: 0x2000, cs: 0x08, rflags: 0x202, ..Default::default() };

        let a = ContextFrame::Exception(&exc);
        let b = ContextFrame::Interrupt(&irq);

        assert_eq!(a.instruction_pointer(), 0x1000);
        assert_eq!(a.privilege_level(), 3);
        assert_eq!(b.instruction_pointer(), 0x2000);
        assert_eq!(b.privilege_level(), 0);
        assert_eq!(b.flags(), 0x202);
        assert!(!a.is_default());
    }

    #[test]
    fn default_frame_is_recognised() {
        let frame = ContextFrame::Exception(&DEFAULT_EXCEPTION_FRAME);
        assert!(frame.is_default());
        assert_eq!(frame.code_segment(), KERNEL_CODE_SELECTOR as u64);
    }
}
