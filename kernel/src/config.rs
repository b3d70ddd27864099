// Kernel Configuration
//
// Numeric build configuration for the interrupt layer. Boolean switches are
// Cargo features (see kernel/Cargo.toml); everything that is a number lives
// here so gen_idt and the kernel agree on the same values.

use crate::interrupts::fatal::FatalPolicy;
use crate::log::LogLevel;

/// Number of gates in the IDT.
pub const NUM_VECTORS: usize = 256;

/// First vector available to IRQs; 0-31 are reserved for CPU exceptions.
pub const VECTOR_BASE: u32 = 32;

/// Vectors per priority level in dynamic mapping mode.
pub const VECTORS_PER_PRIORITY: u32 = 16;

/// Priority levels that fit above `VECTOR_BASE`.
pub const NUM_PRIORITIES: u32 = (NUM_VECTORS as u32 - VECTOR_BASE) / VECTORS_PER_PRIORITY;

/// Vector of IRQ 0 in fixed mapping mode (8259 / MVIC wiring).
pub const FIXED_VECTOR_OFFSET: u32 = 0x20;

/// IRQ lines covered by the IRQ-to-vector map (I/O APIC redirection entries).
pub const IRQ_MAP_SIZE: usize = 64;

pub const LOAPIC_BASE: u64 = 0xFEE0_0000;
pub const IOAPIC_BASE: u64 = 0xFEC0_0000;

/// Quark SE always-on periodic timer line on the I/O APIC.
pub const AON_TIMER_IRQ: u32 = 28;
pub const AON_TIMER_IRQ_PRI: u32 = 2;

/// Always-on counter block (AONC_0).
pub const AONC_BASE: u64 = 0xB080_0700;
/// SCSS interrupt mask register of the always-on timer.
pub const SCSS_INT_AON_TIMER_MASK: u64 = 0xB080_04C8;

pub const FATAL_POLICY: FatalPolicy = FatalPolicy::Halt;

pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Info;
