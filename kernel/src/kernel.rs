// Keel Kernel Interrupt Layer
//
// Crate root of the x86 interrupt layer. The image links this crate, runs
// gen_idt over the linked ELF to produce the IDT and the IRQ-to-vector map,
// and links again with the generated tables; at run time nothing about
// vector assignment changes.
//
// Key responsibilities:
// - Declare the subsystems (architecture, logging, interrupts, drivers)
// - `kernel_init()`: bring up serial logging, activate the generated tables,
//   install the interrupt controller and the board's drivers
// - Halt through the logger on panic
//
// Correctness notes:
// - `kernel_init()` leaves interrupts masked; the caller unmasks them once
//   its own state is ready
// - Unit tests build against `std` with the hosted architecture backend

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod build_info;
pub mod config;
pub mod drivers;
pub mod interrupts;
pub mod log;
pub mod serial;
pub mod sync;

pub use interrupts::{irq_lock, irq_unlock, report_fatal, FatalReason, LockKey, TriggerFlags};

#[doc(hidden)]
pub mod __private {
    pub use paste::paste;
}

const LOG_KERNEL_INIT: &str = "kernel:init";

pub fn kernel_init() {
    serial::init();

    log_info!(LOG_KERNEL_INIT, "{}", build_info::BOOT_BANNER);
    log_info!(LOG_KERNEL_INIT, "Build switches: {}", build_info::feature_summary());

    interrupts::init(interrupts::default_controller());

    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    drivers::counter::aonpt::board::init();

    // masked time spent bringing up the controller and the board drivers
    #[cfg(feature = "int-latency-benchmark")]
    interrupts::latency::report();

    log_info!(LOG_KERNEL_INIT, "Interrupt layer ready");
}

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    arch::disable_interrupts();
    log_panic!("PANIC", "{}", info);
    loop {
        arch::halt();
    }
}
