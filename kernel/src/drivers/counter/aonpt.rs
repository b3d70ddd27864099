// Always-On Periodic Timer (AONPT) Counter
//
// Counter driver for the Quark SE always-on periodic timer, a 32-bit
// countdown timer that raises one interrupt when it reaches zero.
//
// Key responsibilities:
// - `start`: clear any alarm and load the maximum count (interrupt unused)
// - `stop`: load a zero count
// - `set_alarm`: only on a started timer; store the callback, then load the
//   alarm count; a failed load clears the callback again
// - `handle_interrupt`: run the stored callback, then acknowledge
//
// Implementation details:
// - A zero configured count is how "not started" is detected
// - The callback slot is per instance, behind an `IrqMutex`, so the ISR can
//   never observe a half-written alarm
// - With `aon-api-reentrancy`, configuration writes from different threads
//   are serialized by a `spin::Mutex<()>` gate; otherwise the gate compiles
//   to nothing
// - With `device-power-management`, suspend saves the SCSS interrupt mask
//   and resume restores it

use super::{Counter, CounterCallback, CounterError};
use crate::arch;
use crate::drivers::PowerState;
use crate::sync::IrqMutex;
use crate::log_debug;
use core::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "device-power-management")]
use core::sync::atomic::AtomicU32;

const LOG_ORIGIN: &str = "aonpt";

/// Configuration write that did not take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFailed;

/// Register access of one AON periodic timer.
pub trait AonptRegs: Sync {
    /// Load `count` and restart the countdown.
    fn set_count(&self, count: u32) -> Result<(), WriteFailed>;
    /// Count loaded by the last `set_count`.
    fn configured_count(&self) -> u32;
    /// Current countdown value.
    fn value(&self) -> u32;
    fn clear_interrupt(&self);
    /// SCSS interrupt mask word; bit 0 masks the timer interrupt.
    fn interrupt_mask(&self) -> u32;
    fn set_interrupt_mask(&self, mask: u32);
}

/// Binary gate around configuration writes.
#[derive(Default)]
pub struct ReentrancyGate {
    #[cfg(feature = "aon-api-reentrancy")]
    lock: spin::Mutex<()>,
}

impl ReentrancyGate {
    pub const fn new() -> Self {
        Self {
            #[cfg(feature = "aon-api-reentrancy")]
            lock: spin::Mutex::new(()),
        }
    }

    /// Held until the returned guard is dropped.
    #[cfg(feature = "aon-api-reentrancy")]
    pub fn enter(&self) -> spin::MutexGuard<'_, ()> {
        self.lock.lock()
    }

    #[cfg(not(feature = "aon-api-reentrancy"))]
    pub fn enter(&self) {}
}

#[derive(Clone, Copy)]
struct Alarm {
    callback: CounterCallback,
    user_data: usize,
}

pub struct AonCounter<R: AonptRegs> {
    regs: R,
    alarm: IrqMutex<Option<Alarm>>,
    gate: ReentrancyGate,
    power_state: AtomicU8,
    #[cfg(feature = "device-power-management")]
    saved_mask: AtomicU32,
}

impl<R: AonptRegs> AonCounter<R> {
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            alarm: IrqMutex::new(None),
            gate: ReentrancyGate::new(),
            power_state: AtomicU8::new(PowerState::Active as u8),
            #[cfg(feature = "device-power-management")]
            saved_mask: AtomicU32::new(0),
        }
    }

    /// Unmask the timer interrupt at the SCSS. The IRQ itself is connected
    /// by the board.
    pub fn init(&self) {
        *self.alarm.lock() = None;

        self.regs.set_interrupt_mask(self.regs.interrupt_mask() & !0x1);
        self.power_state.store(PowerState::Active as u8, Ordering::Relaxed);

        log_debug!(LOG_ORIGIN, "AON periodic timer ready");
    }

    /// Interrupt-context entry: run the alarm callback, then acknowledge.
    pub fn handle_interrupt(&self) {
        let alarm = *self.alarm.lock();

        if let Some(alarm) = alarm {
            (alarm.callback)(self, alarm.user_data);
        }

        self.regs.clear_interrupt();
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }
}

impl<R: AonptRegs> Counter for AonCounter<R> {
    fn start(&self) -> Result<(), CounterError> {
        *self.alarm.lock() = None;

        // countdown timer: start from the top
        let _gate = self.gate.enter();
        self.regs.set_count(u32::MAX).map_err(|_| CounterError::Io)
    }

    fn stop(&self) -> Result<(), CounterError> {
        let _gate = self.gate.enter();
        let _ = self.regs.set_count(0);
        Ok(())
    }

    fn read(&self) -> u32 {
        self.regs.value()
    }

    fn set_alarm(&self, callback: CounterCallback, count: u32, user_data: usize) -> Result<(), CounterError> {
        if self.regs.configured_count() == 0 {
            return Err(CounterError::NotSupported);
        }

        *self.alarm.lock() = Some(Alarm { callback, user_data });

        let _gate = self.gate.enter();
        if self.regs.set_count(count).is_err() {
            *self.alarm.lock() = None;
            return Err(CounterError::Io);
        }

        Ok(())
    }
}

#[cfg(feature = "device-power-management")]
impl<R: AonptRegs> crate::drivers::DevicePm for AonCounter<R> {
    fn set_power_state(&self, state: PowerState) {
        match state {
            PowerState::Suspend => {
                self.saved_mask.store(self.regs.interrupt_mask(), Ordering::Relaxed);
            }
            PowerState::Active => {
                self.regs.set_interrupt_mask(self.saved_mask.load(Ordering::Relaxed));
            }
        }

        self.power_state.store(state as u8, Ordering::Relaxed);
    }

    fn get_power_state(&self) -> PowerState {
        PowerState::from_u8(self.power_state.load(Ordering::Relaxed))
    }
}

const AONPT_CNT: u64 = 0x08;
const AONPT_CTRL: u64 = 0x10;
const AONPT_CFG: u64 = 0x14;

const AONPT_CTRL_CLEAR_INT: u32 = 1 << 0;
const AONPT_CTRL_RESET: u32 = 1 << 1;

/// Memory-mapped AONPT of the Quark SE SoC.
pub struct QmsiAonpt {
    base: u64,
    mask_reg: u64,
}

impl QmsiAonpt {
    pub const fn new(base: u64, mask_reg: u64) -> Self {
        Self { base, mask_reg }
    }

    fn read(&self, offset: u64) -> u32 {
        // SAFETY: `base` is the always-on counter block of this SoC.
        unsafe { arch::mmio_read32(self.base + offset) }
    }

    fn write(&self, offset: u64, value: u32) {
        // SAFETY: `base` is the always-on counter block of this SoC.
        unsafe { arch::mmio_write32(self.base + offset, value) }
    }
}

impl AonptRegs for QmsiAonpt {
    fn set_count(&self, count: u32) -> Result<(), WriteFailed> {
        self.write(AONPT_CFG, count);
        self.write(AONPT_CTRL, self.read(AONPT_CTRL) | AONPT_CTRL_RESET);

        if self.read(AONPT_CFG) == count {
            Ok(())
        } else {
            Err(WriteFailed)
        }
    }

    fn configured_count(&self) -> u32 {
        self.read(AONPT_CFG)
    }

    fn value(&self) -> u32 {
        self.read(AONPT_CNT)
    }

    fn clear_interrupt(&self) {
        self.write(AONPT_CTRL, self.read(AONPT_CTRL) | AONPT_CTRL_CLEAR_INT);
    }

    fn interrupt_mask(&self) -> u32 {
        // SAFETY: `mask_reg` is the SCSS AON timer mask register.
        unsafe { arch::mmio_read32(self.mask_reg) }
    }

    fn set_interrupt_mask(&self, mask: u32) {
        // SAFETY: `mask_reg` is the SCSS AON timer mask register.
        unsafe { arch::mmio_write32(self.mask_reg, mask) }
    }
}

/// The board's AON timer instance and its interrupt wiring.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod board {
    use super::{AonCounter, QmsiAonpt, LOG_ORIGIN};
    use crate::config::{AONC_BASE, AON_TIMER_IRQ, AON_TIMER_IRQ_PRI, SCSS_INT_AON_TIMER_MASK};
    use crate::interrupts::{irq_enable, TriggerFlags};
    use crate::{irq_connect, log_info};

    pub static AON_TIMER: AonCounter<QmsiAonpt> =
        AonCounter::new(QmsiAonpt::new(AONC_BASE, SCSS_INT_AON_TIMER_MASK));

    extern "C" fn aonpt_isr(_arg: usize) {
        AON_TIMER.handle_interrupt();
    }

    pub fn init() {
        let vector = irq_connect!(
            AON_TIMER_IRQ,
            AON_TIMER_IRQ_PRI,
            aonpt_isr,
            0,
            TriggerFlags::EDGE | TriggerFlags::HIGH
        );
        irq_enable(AON_TIMER_IRQ);

        AON_TIMER.init();

        log_info!(LOG_ORIGIN, "AON timer on IRQ{} (vector {:#x})", AON_TIMER_IRQ, vector);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize};

    /// Timer model: counts down by one on every read of the value.
    #[derive(Default)]
    pub(crate) struct SimAonpt {
        cfg: AtomicU32,
        elapsed: AtomicU32,
        fail_writes: AtomicBool,
        mask: AtomicU32,
        cleared: AtomicUsize,
    }

    impl SimAonpt {
        fn with_mask(mask: u32) -> Self {
            let sim = Self::default();
            sim.mask.store(mask, Ordering::SeqCst);
            sim
        }
    }

    impl AonptRegs for SimAonpt {
        fn set_count(&self, count: u32) -> Result<(), WriteFailed> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(WriteFailed);
            }
            self.cfg.store(count, Ordering::SeqCst);
            self.elapsed.store(0, Ordering::SeqCst);
            Ok(())
        }

        fn configured_count(&self) -> u32 {
            self.cfg.load(Ordering::SeqCst)
        }

        fn value(&self) -> u32 {
            let elapsed = self.elapsed.fetch_add(1, Ordering::SeqCst) + 1;
            self.cfg.load(Ordering::SeqCst).saturating_sub(elapsed)
        }

        fn clear_interrupt(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }

        fn interrupt_mask(&self) -> u32 {
            self.mask.load(Ordering::SeqCst)
        }

        fn set_interrupt_mask(&self, mask: u32) {
            self.mask.store(mask, Ordering::SeqCst);
        }
    }

    static FIRED: AtomicUsize = AtomicUsize::new(0);
    static LAST_DATA: AtomicUsize = AtomicUsize::new(0);

    fn record_alarm(counter: &dyn Counter, user_data: usize) {
        let _ = counter.read();
        FIRED.fetch_add(1, Ordering::SeqCst);
        LAST_DATA.store(user_data, Ordering::SeqCst);
    }

    static OTHER_FIRED: AtomicUsize = AtomicUsize::new(0);

    fn other_alarm(_counter: &dyn Counter, _user_data: usize) {
        OTHER_FIRED.fetch_add(1, Ordering::SeqCst);
    }

    static DISCARDED_FIRED: AtomicUsize = AtomicUsize::new(0);

    fn discarded_alarm(_counter: &dyn Counter, _user_data: usize) {
        DISCARDED_FIRED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn alarm_before_start_is_not_supported() {
        let counter = AonCounter::new(SimAonpt::default());
        counter.init();

        assert_eq!(
            counter.set_alarm(record_alarm, 100, 0),
            Err(CounterError::NotSupported)
        );
    }

    #[test]
    fn started_counter_reads_strictly_decreasing() {
        let counter = AonCounter::new(SimAonpt::default());
        counter.init();
        counter.start().unwrap();

        let first = counter.read();
        let second = counter.read();
        let third = counter.read();

        assert!(first < u32::MAX);
        assert!(second < first);
        assert!(third < second);
    }

    #[test]
    fn alarm_callback_receives_user_data() {
        let counter = AonCounter::new(SimAonpt::default());
        counter.init();
        counter.start().unwrap();

        counter.set_alarm(record_alarm, 500, 0xC0FFEE).unwrap();
        assert_eq!(counter.regs().configured_count(), 500);

        counter.handle_interrupt();

        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_DATA.load(Ordering::SeqCst), 0xC0FFEE);
        assert_eq!(counter.regs().cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_alarm_replaces_the_first() {
        let counter = AonCounter::new(SimAonpt::default());
        counter.init();
        counter.start().unwrap();

        counter.set_alarm(record_alarm, 10, 1).unwrap();
        counter.set_alarm(other_alarm, 20, 2).unwrap();
        counter.handle_interrupt();

        assert_eq!(OTHER_FIRED.load(Ordering::SeqCst), 1);
        assert_eq!(counter.regs().configured_count(), 20);
    }

    #[test]
    fn failed_alarm_write_clears_callback() {
        let counter = AonCounter::new(SimAonpt::default());
        counter.init();
        counter.start().unwrap();

        counter.regs().fail_writes.store(true, Ordering::SeqCst);
        assert_eq!(counter.set_alarm(discarded_alarm, 30, 0), Err(CounterError::Io));

        counter.handle_interrupt();
        assert_eq!(DISCARDED_FIRED.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_start_reports_io() {
        let counter = AonCounter::new(SimAonpt::default());
        counter.regs().fail_writes.store(true, Ordering::SeqCst);

        assert_eq!(counter.start(), Err(CounterError::Io));
    }

    #[test]
    fn stop_disarms_and_blocks_alarms() {
        let counter = AonCounter::new(SimAonpt::default());
        counter.init();
        counter.start().unwrap();

        assert_eq!(counter.stop(), Ok(()));
        assert_eq!(counter.regs().configured_count(), 0);
        assert_eq!(
            counter.set_alarm(record_alarm, 5, 0),
            Err(CounterError::NotSupported)
        );
    }

    #[test]
    fn init_unmasks_timer_interrupt_only() {
        let counter = AonCounter::new(SimAonpt::with_mask(0xFF));
        counter.init();

        assert_eq!(counter.regs().interrupt_mask(), 0xFE);
    }

    #[cfg(feature = "device-power-management")]
    #[test]
    fn suspend_resume_restores_interrupt_mask() {
        use crate::drivers::DevicePm;

        let counter = AonCounter::new(SimAonpt::with_mask(0x3));
        counter.init();
        assert_eq!(counter.get_power_state(), PowerState::Active);

        counter.set_power_state(PowerState::Suspend);
        assert_eq!(counter.get_power_state(), PowerState::Suspend);

        counter.regs().set_interrupt_mask(0xFFFF_FFFF);
        counter.set_power_state(PowerState::Active);

        assert_eq!(counter.regs().interrupt_mask(), 0x2);
        assert_eq!(counter.get_power_state(), PowerState::Active);
    }

    #[test]
    fn gate_is_reusable_after_guard_drop() {
        let gate = ReentrancyGate::new();
        drop(gate.enter());
        drop(gate.enter());
    }

    #[cfg(feature = "aon-api-reentrancy")]
    #[test]
    fn gate_is_exclusive_while_entered() {
        let gate = ReentrancyGate::new();

        let held = gate.enter();
        assert!(gate.lock.try_lock().is_none());

        drop(held);
        assert!(gate.lock.try_lock().is_some());
    }
}
