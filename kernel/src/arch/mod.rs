// Architecture Abstraction Layer
//
// Low-level x86_64 primitives used by the interrupt layer: the interrupt
// flag, port and MMIO access, the timestamp counter, CR2 and the halt
// instruction.
//
// Two backends exist:
// - `native`: bare-metal builds (`target_os = "none"`), backed by the
//   `x86_64` crate and inline assembly
// - `hosted`: every other build (unit tests, host tools), which keeps a
//   simulated RFLAGS word so the masking discipline can run off-target
//
// Correctness and safety notes:
// - The hosted backend never touches real hardware; port writes are dropped
//   and port reads return 0xFF (floating bus)
// - Under `cfg(test)` the simulated RFLAGS is per test thread so tests that
//   mask "interrupts" cannot observe one another

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

/// RFLAGS.IF: maskable interrupts are enabled.
pub const RFLAGS_IF: u64 = 1 << 9;
/// RFLAGS bit 1 always reads as one.
pub const RFLAGS_RESERVED: u64 = 1 << 1;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod native {
    use x86_64::instructions::{hlt, interrupts, port::Port};
    use x86_64::registers::{control::Cr2, rflags};

    #[inline(always)]
    pub fn read_flags() -> u64 {
        rflags::read_raw()
    }

    #[inline(always)]
    pub fn disable_interrupts() {
        interrupts::disable();
    }

    #[inline(always)]
    pub fn enable_interrupts() {
        interrupts::enable();
    }

    #[inline(always)]
    pub fn halt() {
        hlt();
    }

    #[inline(always)]
    pub fn timestamp() -> u64 {
        // SAFETY: rdtsc has no side effects and is available on every x86_64 CPU.
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[inline(always)]
    pub fn read_cr2() -> u64 {
        Cr2::read().as_u64()
    }

    /// # Safety
    ///
    /// Writing an arbitrary I/O port can reprogram any legacy device.
    #[inline]
    pub unsafe fn outb(port: u16, value: u8) {
        Port::<u8>::new(port).write(value);
    }

    /// # Safety
    ///
    /// Some ports have read side effects (status registers, FIFOs).
    #[inline]
    pub unsafe fn inb(port: u16) -> u8 {
        Port::<u8>::new(port).read()
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod hosted {
    use super::{RFLAGS_IF, RFLAGS_RESERVED};
    use core::sync::atomic::{AtomicU64, Ordering};

    static TIMESTAMP: AtomicU64 = AtomicU64::new(0);

    #[cfg(test)]
    std::thread_local! {
        static FLAGS: core::cell::Cell<u64> = const { core::cell::Cell::new(RFLAGS_IF | RFLAGS_RESERVED) };
    }

    #[cfg(test)]
    fn update_flags(f: impl FnOnce(u64) -> u64) {
        FLAGS.with(|flags| flags.set(f(flags.get())));
    }

    #[cfg(test)]
    pub fn read_flags() -> u64 {
        FLAGS.with(|flags| flags.get())
    }

    #[cfg(not(test))]
    static FLAGS: AtomicU64 = AtomicU64::new(RFLAGS_IF | RFLAGS_RESERVED);

    #[cfg(not(test))]
    fn update_flags(f: impl FnOnce(u64) -> u64) {
        let current = FLAGS.load(Ordering::Relaxed);
        FLAGS.store(f(current), Ordering::Relaxed);
    }

    #[cfg(not(test))]
    pub fn read_flags() -> u64 {
        FLAGS.load(Ordering::Relaxed)
    }

    pub fn disable_interrupts() {
        update_flags(|flags| flags & !RFLAGS_IF);
    }

    pub fn enable_interrupts() {
        update_flags(|flags| flags | RFLAGS_IF);
    }

    pub fn halt() {
        core::hint::spin_loop();
    }

    pub fn timestamp() -> u64 {
        TIMESTAMP.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn read_cr2() -> u64 {
        0
    }

    /// # Safety
    ///
    /// Mirrors the native signature; the hosted backend drops the write.
    pub unsafe fn outb(_port: u16, _value: u8) {}

    /// # Safety
    ///
    /// Mirrors the native signature; the hosted backend reads a floating bus.
    pub unsafe fn inb(_port: u16) -> u8 {
        0xFF
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use native::*;

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub use hosted::*;

#[inline(always)]
pub fn interrupts_enabled() -> bool {
    read_flags() & RFLAGS_IF != 0
}

/// # Safety
///
/// `addr` must be a mapped, 4-byte aligned device register.
#[inline]
pub unsafe fn mmio_read32(addr: u64) -> u32 {
    core::ptr::read_volatile(addr as *const u32)
}

/// # Safety
///
/// `addr` must be a mapped, 4-byte aligned device register.
#[inline]
pub unsafe fn mmio_write32(addr: u64, value: u32) {
    core::ptr::write_volatile(addr as *mut u32, value);
}
