// Common Interrupt and Exception Entry
//
// Every connected vector lands in a small stub generated by `irq_connect!` or
// `exc_connect!`. The stub pushes what is specific to it and jumps to one of
// two shared entry routines defined here:
//
// - `_interrupt_enter`: the stub has pushed (arg, isr). The entry swaps them
//   into rdi/rsi while parking the displaced registers in their slots, saves
//   the remaining caller-saved registers (and the callee-saved set with
//   `debug-info`), then calls `irq_dispatch(frame, isr, arg)`.
// - `_exception_enter`: the stub has pushed (error code, vector, handler).
//   The entry saves every general-purpose register so the stack holds an
//   `ExceptionFrame`, then calls `exception_dispatch(frame, handler)`.
//
// Stack at the call, lowest address first:
//
//     _interrupt_enter:  [r15..rbx]? r11 r10 r9 r8 rax rcx rdx rsi rdi | rip cs rflags rsp ss
//     _exception_enter:  r15..r8 rbp rbx rax rcx rdx rdi rsi vector error | rip cs rflags rsp ss
//
// Both pushes leave the stack 16-byte aligned at the `call`. Both routines
// restore exactly what they saved and return with `iretq`.
//
// The two spurious entries (`_irq_spurious`, `_irq_spurious_no_error`) fill
// every vector nobody claimed; they report a fatal spurious interrupt.

use super::controller::{self, IrqController};
use super::fatal::{report_fatal, FatalReason};
use super::frames::{ContextFrame, ExceptionFrame, InterruptFrame};
use core::sync::atomic::{AtomicU32, Ordering};

/// Interrupt service routine as connected by `irq_connect!`.
pub type Isr = extern "C" fn(arg: usize);

/// Exception handler as connected by `exc_connect!`. Returning resumes the
/// interrupted context described by the (possibly modified) frame.
pub type ExceptionHandler = extern "C" fn(frame: &mut ExceptionFrame);

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
core::arch::global_asm!(
    ".section .text",
    ".global _interrupt_enter",
    "_interrupt_enter:",
    "xchg rdi, [rsp + 8]",
    "xchg rsi, [rsp]",
    "push rdx",
    "push rcx",
    "push rax",
    "push r8",
    "push r9",
    "push r10",
    "push r11",
    ".if {debug}",
    "push rbx",
    "push rbp",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    ".endif",
    "mov rdx, rdi",
    "mov rdi, rsp",
    "cld",
    "call {irq_dispatch}",
    ".if {debug}",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbp",
    "pop rbx",
    ".endif",
    "pop r11",
    "pop r10",
    "pop r9",
    "pop r8",
    "pop rax",
    "pop rcx",
    "pop rdx",
    "pop rsi",
    "pop rdi",
    "iretq",
    "",
    ".global _exception_enter",
    "_exception_enter:",
    "xchg rsi, [rsp]",
    "push rdi",
    "push rdx",
    "push rcx",
    "push rax",
    "push rbx",
    "push rbp",
    "push r8",
    "push r9",
    "push r10",
    "push r11",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov rdi, rsp",
    "cld",
    "call {exception_dispatch}",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop r11",
    "pop r10",
    "pop r9",
    "pop r8",
    "pop rbp",
    "pop rbx",
    "pop rax",
    "pop rcx",
    "pop rdx",
    "pop rdi",
    "pop rsi",
    "add rsp, 16",
    "iretq",
    "",
    ".global _irq_spurious_no_error",
    ".global _irq_spurious",
    "_irq_spurious_no_error:",
    "push 0",
    "_irq_spurious:",
    "push -1",
    "push rax",
    "lea rax, [rip + {spurious}]",
    "xchg rax, [rsp]",
    "jmp _exception_enter",
    debug = const cfg!(feature = "debug-info") as u8,
    irq_dispatch = sym irq_dispatch,
    exception_dispatch = sym exception_dispatch,
    spurious = sym spurious_handler,
);

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
extern "C" {
    fn _irq_spurious();
    fn _irq_spurious_no_error();
}

/// Tells gen_idt which handlers fill the unclaimed vectors.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[used]
#[link_section = ".intList.header"]
static INT_LIST_HEADER: super::descriptor::IntListHeader = super::descriptor::IntListHeader {
    spurious: _irq_spurious,
    spurious_no_error: _irq_spurious_no_error,
    num_vectors: crate::config::NUM_VECTORS as u32,
    reserved: 0,
};

/// Depth of interrupt handlers currently running on this CPU.
pub struct InterruptNesting {
    depth: AtomicU32,
}

impl InterruptNesting {
    pub const fn new() -> Self {
        Self {
            depth: AtomicU32::new(0),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    fn enter(&self) -> NestingGuard<'_> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        NestingGuard { nesting: self }
    }
}

impl Default for InterruptNesting {
    fn default() -> Self {
        Self::new()
    }
}

struct NestingGuard<'a> {
    nesting: &'a InterruptNesting,
}

impl Drop for NestingGuard<'_> {
    fn drop(&mut self) {
        self.nesting.depth.fetch_sub(1, Ordering::Relaxed);
    }
}

static NESTING: InterruptNesting = InterruptNesting::new();

/// True while an interrupt service routine is running.
pub fn in_interrupt() -> bool {
    NESTING.depth() != 0
}

pub fn nesting_depth() -> u32 {
    NESTING.depth()
}

/// Run one interrupt service routine and acknowledge it. A handler that
/// re-enables interrupts may be re-entered; each level is counted.
pub fn dispatch_with(
    nesting: &InterruptNesting,
    controller: Option<&dyn IrqController>,
    isr: Isr,
    arg: usize,
) {
    let _level = nesting.enter();

    isr(arg);

    if let Some(controller) = controller {
        controller.eoi();
    }
}

/// Called by `_interrupt_enter` with the saved frame, the stub's routine and
/// its argument.
pub extern "C" fn irq_dispatch(_frame: &InterruptFrame, isr: Isr, arg: usize) {
    dispatch_with(&NESTING, controller::active(), isr, arg);
}

/// Called by `_exception_enter` with the full frame and the stub's handler.
pub extern "C" fn exception_dispatch(frame: &mut ExceptionFrame, handler: ExceptionHandler) {
    handler(frame);
}

/// Handler behind both spurious entries.
pub extern "C" fn spurious_handler(frame: &mut ExceptionFrame) {
    report_fatal(FatalReason::SpuriousInterrupt, Some(ContextFrame::Exception(frame)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::controller::tests::{Event, RecordingController};
    use std::sync::atomic::AtomicUsize;

    struct Observer {
        nesting: *const InterruptNesting,
        calls: AtomicUsize,
        depth_seen: AtomicU32,
    }

    extern "C" fn observing_isr(arg: usize) {
        // SAFETY: tests pass the address of a live `Observer`.
        let observer = unsafe { &*(arg as *const Observer) };
        let nesting = unsafe { &*observer.nesting };
        observer.calls.fetch_add(1, Ordering::SeqCst);
        observer.depth_seen.store(nesting.depth(), Ordering::SeqCst);
    }

    #[test]
    fn isr_receives_its_argument_and_eoi_follows() {
        let nesting = InterruptNesting::new();
        let controller = RecordingController::default();
        let observer = Observer {
            nesting: &nesting,
            calls: AtomicUsize::new(0),
            depth_seen: AtomicU32::new(0),
        };

        dispatch_with(&nesting, Some(&controller), observing_isr, &observer as *const Observer as usize);

        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.depth_seen.load(Ordering::SeqCst), 1);
        assert_eq!(nesting.depth(), 0);
        assert_eq!(controller.events(), vec![Event::Eoi]);
    }

    struct Reentrant {
        nesting: *const InterruptNesting,
        inner: Observer,
        outer_depth: AtomicU32,
    }

    extern "C" fn reentering_isr(arg: usize) {
        // SAFETY: tests pass the address of a live `Reentrant`.
        let state = unsafe { &*(arg as *const Reentrant) };
        let nesting = unsafe { &*state.nesting };
        state.outer_depth.store(nesting.depth(), Ordering::SeqCst);

        dispatch_with(nesting, None, observing_isr, &state.inner as *const Observer as usize);
    }

    #[test]
    fn nested_dispatch_counts_each_level() {
        let nesting = InterruptNesting::new();
        let state = Reentrant {
            nesting: &nesting,
            inner: Observer {
                nesting: &nesting,
                calls: AtomicUsize::new(0),
                depth_seen: AtomicU32::new(0),
            },
            outer_depth: AtomicU32::new(0),
        };

        dispatch_with(&nesting, None, reentering_isr, &state as *const Reentrant as usize);

        assert_eq!(state.outer_depth.load(Ordering::SeqCst), 1);
        assert_eq!(state.inner.depth_seen.load(Ordering::SeqCst), 2);
        assert_eq!(nesting.depth(), 0);
    }

    extern "C" fn skip_instruction(frame: &mut ExceptionFrame) {
        frame.rip += 2;
    }

    #[test]
    fn exception_handler_may_rewrite_the_frame() {
        let mut frame = ExceptionFrame {
            vector: 6,
            rip: 0x4000,
            ..Default::default()
        };

        exception_dispatch(&mut frame, skip_instruction);

        assert_eq!(frame.rip, 0x4002);
    }
}
