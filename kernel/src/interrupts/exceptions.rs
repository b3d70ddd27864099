// CPU Exception Handling
//
// Default handler for the architectural exception vectors (0-21, except the
// reserved vector 15). Every vector is connected with `exc_connect!` so the
// handler receives a complete `ExceptionFrame`.
//
// Exception handling flow:
// - Log the exception name, vector and error code
// - Page fault (#PF, 14): read CR2, decode the error-code bits and offer the
//   fault to the installed fixup hook; a hook that resolves it resumes the
//   faulting context (possibly at a different RIP)
// - General protection fault (#GP, 13): decode the selector error code
// - Anything unresolved goes to `report_fatal` with the captured frame
//
// The hook is the only way an exception returns; there is no default hook.

use super::fatal::{report_fatal, FatalReason};
use super::frames::{ContextFrame, ExceptionFrame};
use crate::arch;
use crate::{exc_connect, log_debug, log_panic};
use bitflags::bitflags;
use core::fmt;
use spin::RwLock;

const LOG_ORIGIN: &str = "exception";

pub const PAGE_FAULT_VECTOR: u64 = 14;
pub const GENERAL_PROTECTION_VECTOR: u64 = 13;

const EXCEPTION_NAMES: [&str; 32] = [
    "#DE - Divide Error",
    "#DB - Debug",
    "NMI - Non-Maskable Interrupt",
    "#BP - Breakpoint",
    "#OF - Overflow",
    "#BR - Bound Range Exceeded",
    "#UD - Invalid Opcode",
    "#NM - Device Not Available",
    "#DF - Double Fault",
    "Coprocessor Segment Overrun",
    "#TS - Invalid TSS",
    "#NP - Segment Not Present",
    "#SS - Stack-Segment Fault",
    "#GP - General Protection Fault",
    "#PF - Page Fault",
    "Reserved",
    "#MF - x87 FPU Floating-Point Error",
    "#AC - Alignment Check",
    "#MC - Machine Check",
    "#XM - SIMD Floating-Point Exception",
    "#VE - Virtualization Exception",
    "#CP - Control Protection Exception",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
];

pub fn exception_name(vector: u64) -> &'static str {
    EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("Spurious or unknown vector")
}

bitflags! {
    /// Error code pushed by the CPU on a page fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultError: u64 {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
        const RESERVED_BIT = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorTable {
    Gdt,
    Idt,
    Ldt,
}

/// Selector error code of #GP, #TS, #NP and #SS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorError {
    pub external: bool,
    pub table: DescriptorTable,
    pub index: u16,
}

impl SelectorError {
    /// `None` when the fault did not involve a selector.
    pub fn decode(error_code: u64) -> Option<Self> {
        if error_code == 0 {
            return None;
        }

        let table = match (error_code >> 1) & 0x3 {
            0 => DescriptorTable::Gdt,
            2 => DescriptorTable::Ldt,
            _ => DescriptorTable::Idt,
        };

        Some(Self {
            external: error_code & 0x1 != 0,
            table,
            index: ((error_code >> 3) & 0x1FFF) as u16,
        })
    }
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.table, self.index)?;
        if self.external {
            write!(f, " (external event)")?;
        }
        Ok(())
    }
}

/// Hook offered every page fault before it becomes fatal. Returns true when
/// the fault was resolved; the frame may be edited to resume elsewhere.
pub type PageFaultFixup = fn(fault_addr: u64, error: PageFaultError, frame: &mut ExceptionFrame) -> bool;

static PAGE_FAULT_FIXUP: RwLock<Option<PageFaultFixup>> = RwLock::new(None);

pub fn set_page_fault_fixup(fixup: Option<PageFaultFixup>) {
    *PAGE_FAULT_FIXUP.write() = fixup;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Resume,
    Fatal(FatalReason),
}

/// Decide what happens to an exception. `fault_addr` is CR2 and only
/// meaningful for page faults.
pub fn classify(frame: &mut ExceptionFrame, fault_addr: u64, fixup: Option<PageFaultFixup>) -> Disposition {
    let vector = frame.vector;

    if vector == PAGE_FAULT_VECTOR {
        let error = PageFaultError::from_bits_truncate(frame.error_code);
        if let Some(fixup) = fixup {
            if fixup(fault_addr, error, frame) {
                log_debug!(LOG_ORIGIN, "page fault at {:#018x} resolved, resuming at {:#018x}", fault_addr, frame.rip);
                return Disposition::Resume;
            }
        }
    }

    log_panic!(
        LOG_ORIGIN,
        "CPU exception: {} (vector={}) error={:#x}",
        exception_name(vector),
        vector,
        frame.error_code
    );

    match vector {
        PAGE_FAULT_VECTOR => {
            let error = PageFaultError::from_bits_truncate(frame.error_code);
            log_panic!(LOG_ORIGIN, "Page Fault at address {:#018x} ({:?})", fault_addr, error);
        }
        GENERAL_PROTECTION_VECTOR => {
            if let Some(selector) = SelectorError::decode(frame.error_code) {
                log_panic!(LOG_ORIGIN, "Segment selector: {}", selector);
            }
        }
        _ => {}
    }

    Disposition::Fatal(FatalReason::for_exception(vector))
}

/// Handler connected to every architectural exception vector.
pub extern "C" fn handle_cpu_exception(frame: &mut ExceptionFrame) {
    let fault_addr = if frame.vector == PAGE_FAULT_VECTOR {
        arch::read_cr2()
    } else {
        0
    };

    // a fault while the hook is being replaced runs without one
    let fixup = PAGE_FAULT_FIXUP.try_read().and_then(|hook| *hook);

    if let Disposition::Fatal(reason) = classify(frame, fault_addr, fixup) {
        report_fatal(reason, Some(ContextFrame::Exception(frame)));
    }
}

exc_connect!(0, handle_cpu_exception);
exc_connect!(1, handle_cpu_exception);
exc_connect!(2, handle_cpu_exception);
exc_connect!(3, handle_cpu_exception);
exc_connect!(4, handle_cpu_exception);
exc_connect!(5, handle_cpu_exception);
exc_connect!(6, handle_cpu_exception);
exc_connect!(7, handle_cpu_exception);
exc_connect!(8, handle_cpu_exception);
exc_connect!(9, handle_cpu_exception);
exc_connect!(10, handle_cpu_exception);
exc_connect!(11, handle_cpu_exception);
exc_connect!(12, handle_cpu_exception);
exc_connect!(13, handle_cpu_exception);
exc_connect!(14, handle_cpu_exception);
exc_connect!(16, handle_cpu_exception);
exc_connect!(17, handle_cpu_exception);
exc_connect!(18, handle_cpu_exception);
exc_connect!(19, handle_cpu_exception);
exc_connect!(20, handle_cpu_exception);
exc_connect!(21, handle_cpu_exception);

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(vector: u64, error_code: u64) -> ExceptionFrame {
        ExceptionFrame {
            vector,
            error_code,
            rip: 0xFFFF_8000_0000_4000,
            cs: 0x08,
            ..Default::default()
        }
    }

    fn skip_faulting_copy(addr: u64, error: PageFaultError, frame: &mut ExceptionFrame) -> bool {
        if addr == 0x1000 && error.contains(PageFaultError::WRITE) {
            frame.rip = 0xFFFF_8000_0000_5000;
            return true;
        }
        false
    }

    #[test]
    fn resolved_page_fault_resumes_at_new_rip() {
        let mut frame = fault(PAGE_FAULT_VECTOR, 0x2);

        let disposition = classify(&mut frame, 0x1000, Some(skip_faulting_copy));

        assert_eq!(disposition, Disposition::Resume);
        assert_eq!(frame.rip, 0xFFFF_8000_0000_5000);
    }

    #[test]
    fn unresolved_page_fault_is_fatal() {
        let mut frame = fault(PAGE_FAULT_VECTOR, 0x4);

        assert_eq!(
            classify(&mut frame, 0xDEAD_0000, Some(skip_faulting_copy)),
            Disposition::Fatal(FatalReason::PageFault)
        );
        assert_eq!(
            classify(&mut frame, 0x1000, None),
            Disposition::Fatal(FatalReason::PageFault)
        );
    }

    #[test]
    fn other_vectors_map_to_their_reason() {
        let mut gp = fault(GENERAL_PROTECTION_VECTOR, 0x18);
        assert_eq!(
            classify(&mut gp, 0, None),
            Disposition::Fatal(FatalReason::GeneralProtectionFault)
        );

        let mut ud = fault(6, 0);
        assert_eq!(classify(&mut ud, 0, None), Disposition::Fatal(FatalReason::CpuException));
    }

    #[test]
    fn selector_error_code_is_decoded() {
        assert_eq!(SelectorError::decode(0), None);

        let gdt = SelectorError::decode(0x18).unwrap();
        assert_eq!(gdt.table, DescriptorTable::Gdt);
        assert_eq!(gdt.index, 3);
        assert!(!gdt.external);

        let idt = SelectorError::decode((0x68 << 3) | 0x2 | 0x1).unwrap();
        assert_eq!(idt.table, DescriptorTable::Idt);
        assert_eq!(idt.index, 0x68);
        assert!(idt.external);
    }

    #[test]
    fn names_cover_the_architectural_range() {
        assert_eq!(exception_name(14), "#PF - Page Fault");
        assert_eq!(exception_name(15), "Reserved");
        assert_eq!(exception_name(u64::MAX), "Spurious or unknown vector");
    }
}
