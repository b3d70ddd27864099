// Legacy 8259 PIC Pair
//
// Fixed-mapping controller: the master/slave pair is remapped so IRQ n
// arrives on vector n + 0x20, which is exactly the fixed vector assignment.
// Trigger mode is set per line through the ELCR registers (edge by default;
// the 8259 has no polarity control, so `LOW` is ignored).
//
// When the I/O APIC is in use, `disable_legacy` remaps the pair out of the
// exception range and masks all of its lines.

use super::{HwAccess, IrqController, Machine, TriggerFlags};
use crate::config::FIXED_VECTOR_OFFSET;
use crate::{log_info, log_warn};

const LOG_ORIGIN: &str = "pic";

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const ELCR1: u16 = 0x4D0;
const ELCR2: u16 = 0x4D1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;
const OCW2_EOI: u8 = 0x20;
const OCW3_READ_ISR: u8 = 0x0B;

const LINES_PER_CHIP: u32 = 8;
const LINES: u32 = 2 * LINES_PER_CHIP;
const CASCADE_IRQ: u32 = 2;

/// Data and ELCR port of the chip serving `irq`, plus the line bit in it.
pub(super) fn line_ports(irq: u32) -> Option<(u16, u16, u8)> {
    match irq {
        0..LINES_PER_CHIP => Some((PIC1_DATA, ELCR1, 1 << irq)),
        LINES_PER_CHIP..LINES => Some((PIC2_DATA, ELCR2, 1 << (irq - LINES_PER_CHIP))),
        _ => {
            log_warn!(LOG_ORIGIN, "IRQ{} is not wired to the 8259 pair", irq);
            None
        }
    }
}

/// In fully nested mode the interrupt being finished is the highest-priority
/// (lowest-numbered) line in service on the master. It came from the slave
/// only when that line is the cascade input.
fn serviced_by_slave(master_in_service: u8) -> bool {
    master_in_service.trailing_zeros() == CASCADE_IRQ
}

#[derive(Debug, Default)]
pub struct Pic8259<H: HwAccess = Machine> {
    hw: H,
}

impl Pic8259 {
    pub const fn new() -> Self {
        Self::with_hw(Machine)
    }
}

impl<H: HwAccess> Pic8259<H> {
    pub const fn with_hw(hw: H) -> Self {
        Self { hw }
    }

    fn remap(&self, master_base: u8, slave_base: u8) {
        let steps = [
            (PIC1_CMD, ICW1_INIT | ICW1_ICW4),
            (PIC2_CMD, ICW1_INIT | ICW1_ICW4),
            (PIC1_DATA, master_base),
            (PIC2_DATA, slave_base),
            (PIC1_DATA, 1 << CASCADE_IRQ),
            (PIC2_DATA, CASCADE_IRQ as u8),
            (PIC1_DATA, ICW4_8086),
            (PIC2_DATA, ICW4_8086),
        ];

        for (port, value) in steps {
            // SAFETY: standard ICW1-ICW4 sequence on the 8259 command/data ports.
            unsafe { self.hw.outb(port, value) };
            self.hw.io_wait();
        }
    }

    fn set_masks(&self, master: u8, slave: u8) {
        // SAFETY: OCW1 writes only change the line masks.
        unsafe {
            self.hw.outb(PIC1_DATA, master);
            self.hw.outb(PIC2_DATA, slave);
        }
    }

    /// Remap to the fixed vectors with every line masked except the cascade.
    pub fn init(&self) {
        let base = FIXED_VECTOR_OFFSET as u8;
        self.remap(base, base + LINES_PER_CHIP as u8);
        self.set_masks(!(1 << CASCADE_IRQ), 0xFF);

        log_info!(LOG_ORIGIN, "8259 remapped to {:#x}/{:#x}", base, base + 8);
    }

    pub fn disable_legacy(&self) {
        let base = FIXED_VECTOR_OFFSET as u8;
        self.remap(base, base + LINES_PER_CHIP as u8);
        self.set_masks(0xFF, 0xFF);

        log_info!(LOG_ORIGIN, "Legacy PIC fully disabled (remapped + masked)");
    }

    fn update_port(&self, port: u16, f: impl FnOnce(u8) -> u8) {
        // SAFETY: mask and ELCR registers have no read side effects.
        unsafe {
            let current = self.hw.inb(port);
            self.hw.outb(port, f(current));
        }
    }
}

impl<H: HwAccess> IrqController for Pic8259<H> {
    fn irq_config(&self, irq: u32, vector: u8, flags: TriggerFlags) {
        debug_assert_eq!(vector as u32, irq + FIXED_VECTOR_OFFSET);

        let Some((data, elcr, bit)) = line_ports(irq) else {
            return;
        };
        self.update_port(data, |mask| mask | bit);
        self.update_port(elcr, |elcr| {
            if flags.is_level() {
                elcr | bit
            } else {
                elcr & !bit
            }
        });
    }

    fn enable(&self, irq: u32) {
        let Some((data, _, bit)) = line_ports(irq) else {
            return;
        };
        self.update_port(data, |mask| mask & !bit);
    }

    fn disable(&self, irq: u32) {
        let Some((data, _, bit)) = line_ports(irq) else {
            return;
        };
        self.update_port(data, |mask| mask | bit);
    }

    fn eoi(&self) {
        // SAFETY: OCW3 selects the master in-service register for the next
        // command-port read; the EOIs are non-specific.
        unsafe {
            self.hw.outb(PIC1_CMD, OCW3_READ_ISR);
            if serviced_by_slave(self.hw.inb(PIC1_CMD)) {
                self.hw.outb(PIC2_CMD, OCW2_EOI);
            }
            self.hw.outb(PIC1_CMD, OCW2_EOI);
        }
    }

    fn name(&self) -> &'static str {
        "8259"
    }
}
