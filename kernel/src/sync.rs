// Interrupt-safe spin lock.
//
// Data shared between thread context and interrupt handlers must not be
// touched with interrupts enabled: a handler spinning on a lock already held by
// the code it interrupted would never make progress. `IrqMutex` takes an
// interrupt lock key before acquiring the spin lock and gives it back after
// releasing it.

use crate::interrupts::lock::{irq_lock, irq_unlock, LockKey};
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

pub struct IrqMutex<T: ?Sized> {
    inner: spin::Mutex<T>,
}

pub struct IrqMutexGuard<'a, T: ?Sized + 'a> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    key: Option<LockKey>,
}

impl<T> IrqMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }
}

impl<T: ?Sized> IrqMutex<T> {
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        loop {
            let key = irq_lock();

            if let Some(guard) = self.inner.try_lock() {
                return IrqMutexGuard {
                    guard: ManuallyDrop::new(guard),
                    key: Some(key),
                };
            }

            // let a pending handler run before spinning again
            irq_unlock(key);
            core::hint::spin_loop();
        }
    }

    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let key = irq_lock();

        match self.inner.try_lock() {
            Some(guard) => Some(IrqMutexGuard {
                guard: ManuallyDrop::new(guard),
                key: Some(key),
            }),
            None => {
                irq_unlock(key);
                None
            }
        }
    }
}

impl<'a, T: ?Sized> Drop for IrqMutexGuard<'a, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here, before the key is
        // released; it is never touched again.
        unsafe { ManuallyDrop::drop(&mut self.guard) };

        if let Some(key) = self.key.take() {
            irq_unlock(key);
        }
    }
}

impl<'a, T: ?Sized> Deref for IrqMutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T: ?Sized> DerefMut for IrqMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: Default> Default for IrqMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
