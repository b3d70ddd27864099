// Interrupt Lock/Unlock
//
// `irq_lock()` masks maskable interrupts on the executing CPU and returns a
// `LockKey` describing the interrupt state *before* the call;
// `irq_unlock(key)` restores exactly that state. The key, not a depth
// counter, is the source of truth, so arbitrarily nested pairs compose:
//
//     let outer = irq_lock();
//     let inner = irq_lock();   // interrupts were already off
//     irq_unlock(inner);        // no-op, still masked
//     irq_unlock(outer);        // back to the state before `outer`
//
// `LockKey` is move-only and `#[must_use]`: it cannot be copied, built from
// an integer, or used twice.
//
// Invoking a kernel routine that blocks while holding a key may run other
// threads with interrupts enabled; the key still restores the caller's state
// once the routine returns.
//
// The interrupt-latency benchmark hooks only run on real transitions
// (enabled -> masked, masked -> enabled); they never alter which state is
// restored.

use super::latency;
use crate::arch::{self, RFLAGS_IF};

/// Access to the maskable-interrupt enable flag of one execution context.
pub trait InterruptMask {
    /// Raw flags word; only `RFLAGS_IF` is interpreted.
    fn flags(&self) -> u64;
    fn disable(&self);
    fn enable(&self);
}

/// The CPU executing the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Processor;

impl InterruptMask for Processor {
    #[inline(always)]
    fn flags(&self) -> u64 {
        arch::read_flags()
    }

    #[inline(always)]
    fn disable(&self) {
        arch::disable_interrupts();
    }

    #[inline(always)]
    fn enable(&self) {
        arch::enable_interrupts();
    }
}

/// Interrupt state captured by a lock, consumed by the matching unlock.
#[must_use = "dropping a lock key leaves interrupts masked"]
pub struct LockKey(u64);

impl LockKey {
    #[inline(always)]
    fn was_enabled(&self) -> bool {
        self.0 & RFLAGS_IF != 0
    }
}

#[inline(always)]
pub fn lock_on<M: InterruptMask + ?Sized>(mask: &M) -> LockKey {
    let key = LockKey(mask.flags());
    mask.disable();

    if key.was_enabled() {
        latency::start();
    }

    key
}

#[inline(always)]
pub fn unlock_on<M: InterruptMask + ?Sized>(mask: &M, key: LockKey) {
    if !key.was_enabled() {
        return;
    }

    latency::stop();

    mask.enable();
}

/// Mask interrupts on this CPU; callable from thread or interrupt context.
#[inline(always)]
pub fn irq_lock() -> LockKey {
    lock_on(&Processor)
}

/// Restore the interrupt state captured by `key`.
#[inline(always)]
pub fn irq_unlock(key: LockKey) {
    unlock_on(&Processor, key)
}

/// Run `f` with interrupts masked, restoring the previous state afterwards.
#[inline(always)]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let key = irq_lock();
    let result = f();
    irq_unlock(key);
    result
}
