// Interrupt Descriptor Table (IDT)
//
// Hardware layout of the IDT and the table builder used offline by gen_idt.
// The kernel does not populate gates at run time: the generated table is
// assembled into the image at `_idt_base_address` (see `linked`) and
// `load()` only points the CPU at it.
//
// Key responsibilities:
// - Define the exact 16-byte gate format (`IdtEntry`)
// - Build a full 256-gate `VectorTable` where every vector is routed either
//   to a connected stub or to one of the two spurious handlers
// - Detect two stubs claiming the same vector
// - Load the table with `lidt`
//
// Implementation details:
// - Vectors whose exception pushes an error code (8, 10-14, 17, 21, 29, 30)
//   default to `_irq_spurious`; all others to `_irq_spurious_no_error`, which
//   pushes a dummy code so both share one frame shape
// - Connected stubs use interrupt gates (IF cleared on entry) with the
//   requested DPL; DPL 3 allows `int n` from user mode

use super::descriptor::Dpl;
use crate::arch::KERNEL_CODE_SELECTOR;
use crate::config::NUM_VECTORS;
use core::fmt;
use core::mem::size_of;
use static_assertions::const_assert_eq;

pub const GATE_SIZE: usize = 16;
pub const IDT_BYTES: usize = NUM_VECTORS * GATE_SIZE;

const GATE_PRESENT: u8 = 0x80;
const DPL_SHIFT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateKind {
    Interrupt = 0x0E,
    Trap = 0x0F,
}

/// True for exception vectors where the CPU pushes an error code.
pub const fn has_error_code(vector: u32) -> bool {
    matches!(vector, 8 | 10..=14 | 17 | 21 | 29 | 30)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

const_assert_eq!(size_of::<IdtEntry>(), GATE_SIZE);

impl IdtEntry {
    pub const fn missing() -> Self {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    pub const fn new(handler: u64, kind: GateKind, dpl: Dpl) -> Self {
        IdtEntry {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SELECTOR,
            ist: 0,
            type_attr: GATE_PRESENT | ((dpl as u8 & 0x3) << DPL_SHIFT) | kind as u8,
            offset_mid: ((handler >> 16) & 0xFFFF) as u16,
            offset_high: ((handler >> 32) & 0xFFFF_FFFF) as u32,
            reserved: 0,
        }
    }

    pub const fn handler(&self) -> u64 {
        (self.offset_low as u64) | ((self.offset_mid as u64) << 16) | ((self.offset_high as u64) << 32)
    }

    pub const fn dpl(&self) -> u8 {
        (self.type_attr >> DPL_SHIFT) & 0x3
    }

    pub const fn is_present(&self) -> bool {
        self.type_attr & GATE_PRESENT != 0
    }

    pub fn to_bytes(&self) -> [u8; GATE_SIZE] {
        let mut out = [0u8; GATE_SIZE];
        out[0..2].copy_from_slice(&self.offset_low.to_le_bytes());
        out[2..4].copy_from_slice(&self.selector.to_le_bytes());
        out[4] = self.ist;
        out[5] = self.type_attr;
        out[6..8].copy_from_slice(&self.offset_mid.to_le_bytes());
        out[8..12].copy_from_slice(&self.offset_high.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdtError {
    VectorOutOfRange { vector: u32 },
    VectorInUse { vector: u8, existing: u64 },
}

impl fmt::Display for IdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdtError::VectorOutOfRange { vector } => {
                write!(f, "vector {} does not exist in a {}-gate IDT", vector, NUM_VECTORS)
            }
            IdtError::VectorInUse { vector, existing } => write!(
                f,
                "vector {} already routed to stub {:#x}",
                vector, existing
            ),
        }
    }
}

#[repr(C, align(16))]
pub struct VectorTable {
    entries: [IdtEntry; NUM_VECTORS],
    claimed: [bool; NUM_VECTORS],
}

impl VectorTable {
    /// Table with every vector routed to the matching spurious handler.
    pub fn with_spurious(spurious: u64, spurious_no_error: u64) -> Self {
        let mut entries = [IdtEntry::missing(); NUM_VECTORS];
        for (vector, entry) in entries.iter_mut().enumerate() {
            let handler = if has_error_code(vector as u32) {
                spurious
            } else {
                spurious_no_error
            };
            *entry = IdtEntry::new(handler, GateKind::Interrupt, Dpl::Kernel);
        }

        Self {
            entries,
            claimed: [false; NUM_VECTORS],
        }
    }

    /// Route `vector` to a connected stub.
    pub fn install(&mut self, vector: u32, handler: u64, dpl: Dpl) -> Result<(), IdtError> {
        let index = vector as usize;
        if index >= NUM_VECTORS {
            return Err(IdtError::VectorOutOfRange { vector });
        }

        if self.claimed[index] {
            return Err(IdtError::VectorInUse {
                vector: vector as u8,
                existing: self.entries[index].handler(),
            });
        }

        self.entries[index] = IdtEntry::new(handler, GateKind::Interrupt, dpl);
        self.claimed[index] = true;
        Ok(())
    }

    pub fn entry(&self, vector: u8) -> &IdtEntry {
        &self.entries[vector as usize]
    }

    pub fn is_claimed(&self, vector: u8) -> bool {
        self.claimed[vector as usize]
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.iter().filter(|c| **c).count()
    }

    /// Serialise the gates in vector order into `out`.
    pub fn write_to(&self, out: &mut [u8; IDT_BYTES]) {
        for (gate, chunk) in self.entries.iter().zip(out.chunks_exact_mut(GATE_SIZE)) {
            chunk.copy_from_slice(&gate.to_bytes());
        }
    }
}

/// Point the CPU at the IDT produced by gen_idt.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn load() {
    use crate::{log_debug, log_info};
    use x86_64::instructions::tables::lidt;
    use x86_64::structures::DescriptorTablePointer;
    use x86_64::VirtAddr;

    const LOG_ORIGIN: &str = "idt";

    extern "C" {
        static _idt_base_address: [u8; IDT_BYTES];
    }

    // SAFETY: `interrupts::linked` assembles the generated table at this
    // symbol; it is never written after link.
    let base = unsafe { core::ptr::addr_of!(_idt_base_address) as u64 };
    log_debug!(LOG_ORIGIN, "IDT address: 0x{:X}", base);

    let pointer = DescriptorTablePointer {
        limit: (IDT_BYTES - 1) as u16,
        base: VirtAddr::new(base),
    };

    // SAFETY: every gate of the generated table names a stub linked into this
    // image, and the table lives for the rest of the kernel's life.
    unsafe { lidt(&pointer) };

    log_info!(LOG_ORIGIN, "IDT loaded with {} entries", NUM_VECTORS);
}
