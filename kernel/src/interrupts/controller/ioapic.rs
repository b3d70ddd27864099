// I/O APIC and Local APIC
//
// Dynamic-mapping controller. Each IRQ line owns one 64-bit redirection entry
// in the I/O APIC naming the vector, trigger mode, polarity and mask; end of
// interrupt is signalled to the local APIC.
//
// Implementation details:
// - Registers are reached through the IOREGSEL/IOWIN window; the select and
//   the data access must not be split by another access, so every window
//   access holds an `IrqMutex`
// - Entries are programmed masked with fixed delivery to APIC ID 0
// - `init` routes ISA interrupts through the IMCR and masks every entry

use super::pic::Pic8259;
use super::{HwAccess, IrqController, Machine, TriggerFlags};
use crate::sync::IrqMutex;
use crate::{log_debug, log_info};

const LOG_ORIGIN: &str = "ioapic";

const IOAPIC_IOREGSEL: u64 = 0x00;
const IOAPIC_IOWIN: u64 = 0x10;
const IOAPIC_VERSION: u32 = 0x01;
const IOAPIC_REDTBL: u32 = 0x10;

pub(super) const RTE_MASKED: u32 = 1 << 16;

const APIC_ID: u64 = 0x20;
const APIC_TPR: u64 = 0x80;
const APIC_EOI: u64 = 0xB0;
const APIC_SPURIOUS: u64 = 0xF0;
const APIC_SW_ENABLE: u32 = 0x100;

const IMCR_ADDR: u16 = 0x22;
const IMCR_DATA: u16 = 0x23;
const IMCR_SELECT: u8 = 0x70;

/// Low word of a redirection entry.
pub(super) fn redirection_low(vector: u8, flags: TriggerFlags, masked: bool) -> u32 {
    let mut low = vector as u32 | flags.bits();
    if masked {
        low |= RTE_MASKED;
    }
    low
}

const fn redirection_index(irq: u32) -> u32 {
    IOAPIC_REDTBL + irq * 2
}

pub struct LocalApic<H: HwAccess = Machine> {
    base: u64,
    hw: H,
}

impl<H: HwAccess> LocalApic<H> {
    pub const fn with_hw(base: u64, hw: H) -> Self {
        Self { base, hw }
    }

    fn read(&self, offset: u64) -> u32 {
        // SAFETY: `base` is the identity-mapped local APIC register page.
        unsafe { self.hw.read32(self.base + offset) }
    }

    fn write(&self, offset: u64, value: u32) {
        // SAFETY: `base` is the identity-mapped local APIC register page.
        unsafe { self.hw.write32(self.base + offset, value) }
    }

    pub fn init(&self) {
        let spurious = self.read(APIC_SPURIOUS);
        self.write(APIC_SPURIOUS, spurious | APIC_SW_ENABLE | 0xFF);
        self.write(APIC_TPR, 0);

        log_debug!(LOG_ORIGIN, "Local APIC ID: {}", self.read(APIC_ID) >> 24);
    }

    pub fn eoi(&self) {
        self.write(APIC_EOI, 0);
    }
}

pub struct IoApic<H: HwAccess + Copy = Machine> {
    base: u64,
    hw: H,
    lapic: LocalApic<H>,
    window: IrqMutex<()>,
}

impl IoApic {
    pub const fn new(base: u64, lapic_base: u64) -> Self {
        Self::with_hw(base, lapic_base, Machine)
    }
}

impl<H: HwAccess + Copy> IoApic<H> {
    pub const fn with_hw(base: u64, lapic_base: u64, hw: H) -> Self {
        Self {
            base,
            hw,
            lapic: LocalApic::with_hw(lapic_base, hw),
            window: IrqMutex::new(()),
        }
    }

    fn read(&self, index: u32) -> u32 {
        let _window = self.window.lock();
        // SAFETY: `base` is the identity-mapped I/O APIC register window.
        unsafe {
            self.hw.write32(self.base + IOAPIC_IOREGSEL, index);
            self.hw.read32(self.base + IOAPIC_IOWIN)
        }
    }

    fn write(&self, index: u32, value: u32) {
        let _window = self.window.lock();
        // SAFETY: `base` is the identity-mapped I/O APIC register window.
        unsafe {
            self.hw.write32(self.base + IOAPIC_IOREGSEL, index);
            self.hw.write32(self.base + IOAPIC_IOWIN, value);
        }
    }

    fn update_low(&self, irq: u32, f: impl FnOnce(u32) -> u32) {
        let index = redirection_index(irq);
        let low = self.read(index);
        self.write(index, f(low));
    }

    pub fn redirection_entries(&self) -> u32 {
        ((self.read(IOAPIC_VERSION) >> 16) & 0xFF) + 1
    }

    /// Route ISA lines to the APIC, mask every redirection entry and enable
    /// the local APIC.
    pub fn init(&self) {
        // SAFETY: IMCR and the 8259 ports are legacy chipset registers owned
        // by this controller once the APIC takes over.
        unsafe {
            self.hw.outb(IMCR_ADDR, IMCR_SELECT);
            self.hw.io_wait();
            let current = self.hw.inb(IMCR_DATA);
            self.hw.outb(IMCR_DATA, current | 0x01);
            self.hw.io_wait();
        }
        Pic8259::with_hw(self.hw).disable_legacy();

        let entries = self.redirection_entries();
        for irq in 0..entries {
            self.write(redirection_index(irq), RTE_MASKED);
            self.write(redirection_index(irq) + 1, 0);
        }

        self.lapic.init();

        log_info!(LOG_ORIGIN, "I/O APIC ready, {} redirection entries masked", entries);
    }
}

impl<H: HwAccess + Copy> IrqController for IoApic<H> {
    fn irq_config(&self, irq: u32, vector: u8, flags: TriggerFlags) {
        let index = redirection_index(irq);
        self.write(index + 1, 0);
        self.write(index, redirection_low(vector, flags, true));

        log_debug!(LOG_ORIGIN, "IRQ{} -> vector {:#x} ({:?})", irq, vector, flags);
    }

    fn enable(&self, irq: u32) {
        self.update_low(irq, |low| low & !RTE_MASKED);
    }

    fn disable(&self, irq: u32) {
        self.update_low(irq, |low| low | RTE_MASKED);
    }

    fn eoi(&self) {
        self.lapic.eoi();
    }

    fn name(&self) -> &'static str {
        "ioapic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::controller::tests::SimHw;

    const BASE: u64 = 0xFEC0_0000;
    const LAPIC: u64 = 0xFEE0_0000;

    fn sim() -> SimHw {
        SimHw::with_window(BASE + IOAPIC_IOREGSEL, BASE + IOAPIC_IOWIN)
    }

    #[test]
    fn redirection_entry_carries_vector_and_trigger() {
        let low = redirection_low(0x41, TriggerFlags::LEVEL | TriggerFlags::LOW, true);
        assert_eq!(low & 0xFF, 0x41);
        assert_ne!(low & (1 << 15), 0);
        assert_ne!(low & (1 << 13), 0);
        assert_ne!(low & RTE_MASKED, 0);

        let edge = redirection_low(0x50, TriggerFlags::EDGE | TriggerFlags::HIGH, false);
        assert_eq!(edge, 0x50);
    }

    #[test]
    fn redirection_entries_are_two_registers_apart() {
        assert_eq!(redirection_index(0), 0x10);
        assert_eq!(redirection_index(28), 0x48);
    }

    #[test]
    fn init_masks_every_entry_and_the_legacy_pair() {
        let hw = sim();
        hw.set_register(IOAPIC_VERSION, 23 << 16);
        hw.set_register(redirection_index(5), 0x41);
        hw.set_mmio(LAPIC + APIC_SPURIOUS, 0x1000);
        let ioapic = IoApic::with_hw(BASE, LAPIC, &hw);

        ioapic.init();

        assert_eq!(ioapic.redirection_entries(), 24);
        for irq in 0..24 {
            assert_eq!(hw.register(redirection_index(irq)), Some(RTE_MASKED));
            assert_eq!(hw.register(redirection_index(irq) + 1), Some(0));
        }
        assert_eq!(hw.latched(IMCR_DATA), Some(0x01));
        assert_eq!(hw.latched(0x21), Some(0xFF));
        assert_eq!(hw.latched(0xA1), Some(0xFF));
        assert!(hw
            .mmio_writes()
            .contains(&(LAPIC + APIC_SPURIOUS, 0x1000 | APIC_SW_ENABLE | 0xFF)));
    }

    #[test]
    fn connected_line_stays_masked_until_enabled() {
        let hw = sim();
        let ioapic = IoApic::with_hw(BASE, LAPIC, &hw);
        let flags = TriggerFlags::LEVEL | TriggerFlags::LOW;

        ioapic.irq_config(28, 0x42, flags);
        assert_eq!(hw.register(redirection_index(28)), Some(redirection_low(0x42, flags, true)));
        assert_eq!(hw.register(redirection_index(28) + 1), Some(0));

        ioapic.enable(28);
        assert_eq!(hw.register(redirection_index(28)), Some(redirection_low(0x42, flags, false)));

        ioapic.disable(28);
        assert_eq!(hw.register(redirection_index(28)), Some(redirection_low(0x42, flags, true)));
    }

    #[test]
    fn eoi_goes_to_the_local_apic() {
        let hw = sim();
        let ioapic = IoApic::with_hw(BASE, LAPIC, &hw);
        ioapic.irq_config(3, 0x40, TriggerFlags::EDGE);

        hw.clear_writes();
        ioapic.eoi();

        assert_eq!(hw.mmio_writes(), vec![(LAPIC + APIC_EOI, 0)]);
        assert!(hw.port_writes().is_empty());
    }
}
