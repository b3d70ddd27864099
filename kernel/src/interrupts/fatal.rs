// Fatal Error Dispatch
//
// `report_fatal` is the single non-returning failure path of the kernel. It
// runs two handlers in order:
//
// 1. the kernel handler, which records the reason and dumps the frame;
// 2. the system handler, overridable with `set_sys_fatal_handler`, which
//    decides what happens next (halt or reset by default).
//
// When a condition is detected in software there is no captured frame; the
// caller passes `None` and `DEFAULT_EXCEPTION_FRAME` is used instead.
//
// Recoverable conditions (a failed device write, a page fault that a fixup
// hook resolved) never reach this module.

use super::frames::{ContextFrame, DEFAULT_EXCEPTION_FRAME};
use super::lock::irq_lock;
use crate::arch;
use crate::log_panic;
use core::fmt;
use spin::RwLock;

const LOG_ORIGIN: &str = "fatal";

const SYS_X86_RST_CNT_REG: u16 = 0xCF9;
const SYS_X86_RST_CNT_SYS_RST: u8 = 0x02;
const SYS_X86_RST_CNT_CPU_RST: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FatalReason {
    SpuriousInterrupt = 0,
    PageFault = 1,
    GeneralProtectionFault = 2,
    InvalidTaskExit = 3,
    StackCheckFailure = 4,
    AllocationFailure = 5,
    CpuException = 6,
}

impl FatalReason {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FatalReason::SpuriousInterrupt),
            1 => Some(FatalReason::PageFault),
            2 => Some(FatalReason::GeneralProtectionFault),
            3 => Some(FatalReason::InvalidTaskExit),
            4 => Some(FatalReason::StackCheckFailure),
            5 => Some(FatalReason::AllocationFailure),
            6 => Some(FatalReason::CpuException),
            _ => None,
        }
    }

    /// Reason reported for an unhandled CPU exception vector.
    pub const fn for_exception(vector: u64) -> Self {
        match vector {
            13 => FatalReason::GeneralProtectionFault,
            14 => FatalReason::PageFault,
            _ => FatalReason::CpuException,
        }
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::SpuriousInterrupt => write!(f, "Unhandled exception or spurious interrupt"),
            FatalReason::PageFault => write!(f, "Page fault"),
            FatalReason::GeneralProtectionFault => write!(f, "General protection fault"),
            FatalReason::InvalidTaskExit => write!(f, "Invalid exit from a task"),
            FatalReason::StackCheckFailure => write!(f, "Stack check failure"),
            FatalReason::AllocationFailure => write!(f, "Kernel allocation failure"),
            FatalReason::CpuException => write!(f, "Unhandled CPU exception"),
        }
    }
}

/// What the default system handler does once the kernel handler has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    Halt,
    Reset,
}

pub type SysFatalHandler = fn(FatalReason, ContextFrame<'_>) -> !;

pub struct FatalDispatcher {
    sys_handler: RwLock<SysFatalHandler>,
}

impl FatalDispatcher {
    pub const fn new(sys_handler: SysFatalHandler) -> Self {
        Self {
            sys_handler: RwLock::new(sys_handler),
        }
    }

    pub fn set_handler(&self, handler: SysFatalHandler) {
        *self.sys_handler.write() = handler;
    }

    pub fn report(&self, reason: FatalReason, frame: Option<ContextFrame<'_>>) -> ! {
        let frame = frame.unwrap_or(ContextFrame::Exception(&DEFAULT_EXCEPTION_FRAME));

        kernel_fatal_handler(reason, &frame);

        // copy the pointer out; the handler never returns to release a guard.
        // A fault inside `set_handler` finds the lock taken and halts.
        let handler = self
            .sys_handler
            .try_read()
            .map_or(default_sys_fatal_handler as SysFatalHandler, |handler| *handler);
        handler(reason, frame)
    }
}

static FATAL: FatalDispatcher = FatalDispatcher::new(default_sys_fatal_handler);

/// Report an unrecoverable condition. Never returns.
pub fn report_fatal(reason: FatalReason, frame: Option<ContextFrame<'_>>) -> ! {
    FATAL.report(reason, frame)
}

/// Replace the system-level fatal handler.
pub fn set_sys_fatal_handler(handler: SysFatalHandler) {
    FATAL.set_handler(handler);
}

fn kernel_fatal_handler(reason: FatalReason, frame: &ContextFrame<'_>) {
    log_panic!(LOG_ORIGIN, "***** {} (reason {}) *****", reason, reason.code());

    if frame.is_default() {
        log_panic!(LOG_ORIGIN, "No context frame captured (software-detected condition)");
        return;
    }

    log_panic!(
        LOG_ORIGIN,
        "Faulting context: RIP={:#018x} CPL={}",
        frame.instruction_pointer(),
        frame.privilege_level()
    );
    log_panic!(LOG_ORIGIN, "{}", frame);
}

pub fn default_sys_fatal_handler(reason: FatalReason, _frame: ContextFrame<'_>) -> ! {
    // never unlocked: nothing runs after this point
    let _key = irq_lock();

    match crate::config::FATAL_POLICY {
        FatalPolicy::Halt => {
            log_panic!(LOG_ORIGIN, "Fatal error ({}): system halted", reason.code());
        }
        FatalPolicy::Reset => {
            log_panic!(LOG_ORIGIN, "Fatal error ({}): resetting system", reason.code());
            reset_system();
        }
    }

    loop {
        arch::halt();
    }
}

/// Request a full reset through the reset control register.
pub fn reset_system() {
    // SAFETY: 0xCF9 is the chipset reset control register; the write does not
    // return control on real hardware.
    unsafe {
        arch::outb(SYS_X86_RST_CNT_REG, SYS_X86_RST_CNT_SYS_RST);
        arch::outb(
            SYS_X86_RST_CNT_REG,
            SYS_X86_RST_CNT_SYS_RST | SYS_X86_RST_CNT_CPU_RST,
        );
    }
}
