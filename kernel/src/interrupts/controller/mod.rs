// Interrupt Controller Abstraction
//
// The interrupt layer talks to exactly one controller per build: the I/O APIC
// (paired with the local APIC for EOI) in dynamic mapping mode, or the 8259
// pair in fixed mapping mode. Both sit behind `IrqController` so connection,
// per-line enable/disable and dispatch never name the hardware.
//
// Key responsibilities:
// - Define `TriggerFlags` (edge/level, high/low) as passed to `irq_connect!`
// - Hold the active controller, installed once during `interrupts::init`
// - Track the trigger mode each IRQ line was connected with and reject a
//   second connection that disagrees
//
// Correctness notes:
// - A line is programmed masked; `irq_enable` unmasks it
// - Trigger conflicts are programming errors and panic
// - Controllers reach their registers through `HwAccess`; `Machine` is the
//   real bus, tests substitute a register model

mod ioapic;
mod pic;

pub use ioapic::{IoApic, LocalApic};
pub use pic::Pic8259;

use crate::arch;
use crate::config::IRQ_MAP_SIZE;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Once;

bitflags! {
    /// Trigger mode of an IRQ line. Bit positions match the I/O APIC
    /// redirection entry so the value can be OR-ed in unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TriggerFlags: u32 {
        const LOW = 1 << 13;
        const LEVEL = 1 << 15;
    }
}

impl TriggerFlags {
    pub const EDGE: Self = Self::empty();
    pub const HIGH: Self = Self::empty();

    pub fn is_level(self) -> bool {
        self.contains(Self::LEVEL)
    }

    pub fn is_active_low(self) -> bool {
        self.contains(Self::LOW)
    }
}

/// Register access of an interrupt controller.
pub trait HwAccess: Sync {
    /// # Safety
    ///
    /// Some ports have read side effects.
    unsafe fn inb(&self, port: u16) -> u8;

    /// # Safety
    ///
    /// Writing an arbitrary I/O port can reprogram any legacy device.
    unsafe fn outb(&self, port: u16, value: u8);

    /// # Safety
    ///
    /// `addr` must be a mapped, 4-byte aligned device register.
    unsafe fn read32(&self, addr: u64) -> u32;

    /// # Safety
    ///
    /// `addr` must be a mapped, 4-byte aligned device register.
    unsafe fn write32(&self, addr: u64, value: u32);

    /// Delay roughly one microsecond between legacy programming steps.
    fn io_wait(&self) {
        // SAFETY: port 0x80 is the unused POST code register.
        unsafe { self.outb(0x80, 0) }
    }
}

/// The ports and physical registers of the executing machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Machine;

impl HwAccess for Machine {
    unsafe fn inb(&self, port: u16) -> u8 {
        arch::inb(port)
    }

    unsafe fn outb(&self, port: u16, value: u8) {
        arch::outb(port, value)
    }

    unsafe fn read32(&self, addr: u64) -> u32 {
        arch::mmio_read32(addr)
    }

    unsafe fn write32(&self, addr: u64, value: u32) {
        arch::mmio_write32(addr, value)
    }
}

impl<T: HwAccess + ?Sized> HwAccess for &T {
    unsafe fn inb(&self, port: u16) -> u8 {
        (**self).inb(port)
    }

    unsafe fn outb(&self, port: u16, value: u8) {
        (**self).outb(port, value)
    }

    unsafe fn read32(&self, addr: u64) -> u32 {
        (**self).read32(addr)
    }

    unsafe fn write32(&self, addr: u64, value: u32) {
        (**self).write32(addr, value)
    }
}

pub trait IrqController: Sync {
    /// Route `irq` to `vector` with the given trigger mode, left masked.
    fn irq_config(&self, irq: u32, vector: u8, flags: TriggerFlags);
    fn enable(&self, irq: u32);
    fn disable(&self, irq: u32);
    /// Signal end of interrupt for the line being serviced.
    fn eoi(&self);
    fn name(&self) -> &'static str;
}

static CONTROLLER: Once<&'static dyn IrqController> = Once::new();

/// Install the controller used for connection and EOI. Only the first call
/// has any effect.
pub fn install(controller: &'static dyn IrqController) {
    CONTROLLER.call_once(|| controller);
}

pub fn active() -> Option<&'static dyn IrqController> {
    CONTROLLER.get().copied()
}

const UNSET: u32 = u32::MAX;

/// Trigger mode recorded per IRQ line at connection time.
pub struct TriggerRegistry {
    lines: [AtomicU32; IRQ_MAP_SIZE],
}

impl TriggerRegistry {
    pub const fn new() -> Self {
        const EMPTY: AtomicU32 = AtomicU32::new(UNSET);
        Self {
            lines: [EMPTY; IRQ_MAP_SIZE],
        }
    }

    /// Record the trigger mode of `irq`. Connecting the same line twice with
    /// the same mode is allowed; a different mode panics.
    pub fn record(&self, irq: u32, flags: TriggerFlags) {
        let Some(line) = self.lines.get(irq as usize) else {
            return;
        };

        if let Err(existing) =
            line.compare_exchange(UNSET, flags.bits(), Ordering::AcqRel, Ordering::Acquire)
        {
            assert!(
                existing == flags.bits(),
                "IRQ {} connected with trigger {:?}, previously {:?}",
                irq,
                flags,
                TriggerFlags::from_bits_truncate(existing)
            );
        }
    }

    pub fn get(&self, irq: u32) -> Option<TriggerFlags> {
        let bits = self.lines.get(irq as usize)?.load(Ordering::Acquire);
        if bits == UNSET {
            None
        } else {
            Some(TriggerFlags::from_bits_truncate(bits))
        }
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) static TRIGGERS: TriggerRegistry = TriggerRegistry::new();
