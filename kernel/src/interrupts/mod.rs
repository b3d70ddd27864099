// Interrupt Subsystem Orchestration
//
// Top-level coordination for the interrupt layer. Everything that decides
// where an interrupt goes is fixed before the kernel runs (descriptors in
// `.intList`, the IDT and IRQ-to-vector map produced by gen_idt); this module
// only activates those tables and exposes the run-time services.
//
// Initialization flow:
// - `init()` loads the generated IDT first, ensuring exception safety
// - Publishes the IRQ-to-vector map (dynamic mapping only)
// - Initializes and installs the interrupt controller (I/O APIC, or the
//   8259 pair with fixed mapping)
// - Calibrates the latency hooks
//
// Runtime services:
// - `irq_lock()` / `irq_unlock()` mask and restore maskable interrupts
// - `irq_connect!` / `irq_enable()` / `irq_disable()` wire and gate lines
// - `report_fatal()` is the single non-returning failure path
//
// Correctness notes:
// - Interrupts stay masked until `init()` has returned; enabling them is the
//   caller's decision

pub mod connect;
pub mod controller;
pub mod descriptor;
pub mod dispatch;
pub mod exceptions;
pub mod fatal;
pub mod frames;
pub mod idt;
pub mod latency;
mod linked;
pub mod lock;
pub mod vectors;

pub use connect::{irq_disable, irq_enable};
pub use controller::TriggerFlags;
pub use dispatch::in_interrupt;
pub use fatal::{report_fatal, set_sys_fatal_handler, FatalReason};
pub use frames::{ContextFrame, ExceptionFrame, InterruptFrame};
pub use lock::{irq_lock, irq_unlock, without_interrupts, LockKey};

use crate::log_info;
use controller::IrqController;

const LOG_ORIGIN: &str = "interrupts";

#[cfg(not(feature = "fixed-irq-mapping"))]
static IOAPIC: controller::IoApic =
    controller::IoApic::new(crate::config::IOAPIC_BASE, crate::config::LOAPIC_BASE);

#[cfg(feature = "fixed-irq-mapping")]
static PIC: controller::Pic8259 = controller::Pic8259::new();

/// Controller matching the build's mapping mode, initialized.
pub fn default_controller() -> &'static dyn IrqController {
    #[cfg(not(feature = "fixed-irq-mapping"))]
    {
        IOAPIC.init();
        &IOAPIC
    }

    #[cfg(feature = "fixed-irq-mapping")]
    {
        PIC.init();
        &PIC
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none", not(feature = "fixed-irq-mapping")))]
fn linked_vector_map() -> vectors::IrqVectorMap {
    extern "C" {
        static _irq_vector_map: [u8; crate::config::IRQ_MAP_SIZE];
    }

    // SAFETY: `linked` assembles the staged map at this symbol; it is
    // read-only after link.
    vectors::IrqVectorMap::from_bytes(unsafe { &*core::ptr::addr_of!(_irq_vector_map) })
}

pub fn init(controller: &'static dyn IrqController) {
    log_info!(LOG_ORIGIN, "Initializing interrupt system...");

    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        idt::load();

        #[cfg(not(feature = "fixed-irq-mapping"))]
        vectors::install_vector_map(linked_vector_map());
    }

    controller::install(controller);
    latency::calibrate();

    log_info!(
        LOG_ORIGIN,
        "Interrupt system initialized ({} controller, {} mapping)",
        controller.name(),
        if cfg!(feature = "fixed-irq-mapping") { "fixed" } else { "dynamic" }
    );
}
