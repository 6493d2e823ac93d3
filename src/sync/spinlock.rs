/// Interrupt-safe spinlock.
///
/// On a single CPU the only concurrent actor is an interrupt handler, so
/// mutual exclusion means: remember whether interrupts were enabled,
/// disable them, take the lock. The guard releases the lock and restores
/// the saved interrupt state on drop, so nested locks unwind correctly.
///
/// Discipline: no blocking call may be made while a guard is alive. Every
/// waiter-list enqueue drops its guard before `block_current`.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};
use x86_64::instructions::interrupts;

/// Save the interrupt flag and disable interrupts. Returns the saved state.
pub fn save_disable() -> bool {
    let was_enabled = interrupts::are_enabled();
    interrupts::disable();
    was_enabled
}

/// Restore a state saved by `save_disable`.
pub fn restore(was_enabled: bool) {
    if was_enabled {
        interrupts::enable();
    }
}

pub struct SpinLock<T> {
    inner: Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let was_enabled = save_disable();
        SpinLockGuard {
            guard: Some(self.inner.lock()),
            was_enabled,
        }
    }
}

pub struct SpinLockGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
    was_enabled: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().unwrap()
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap()
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock before re-enabling interrupts.
        self.guard.take();
        restore(self.was_enabled);
    }
}
