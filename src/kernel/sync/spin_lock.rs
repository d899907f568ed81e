//!
//! Critical sections and spinlocks
//!
//! Two primitives, per spec §4.A:
//!
//! - [`critical_section`]: save-and-disable / restore the CPU's interrupt
//!   flag. Sufficient mutual exclusion on a single core; on its own it does
//!   **not** protect against another CPU.
//! - [`SpinLock`]: a ticket lock that additionally enters a critical
//!   section while held, so it is the primitive actually safe to use from
//!   interrupt context and across CPUs. `Mutex` is kept as the name the
//!   rest of the kernel calls it by (consistent with every other spinning,
//!   never-blocking lock in this crate).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Save-and-disable / restore interrupts. Never suspends; never fails.
pub mod critical_section {
    use crate::arch::x86_64::cpu;

    /// Disables interrupts and returns whether they were previously enabled.
    #[inline(always)]
    pub fn enter() -> bool {
        let was_enabled = cpu::interrupts_enabled();
        unsafe { cpu::cli() };
        was_enabled
    }

    /// Restores interrupts to the state `enter()` observed.
    #[inline(always)]
    pub fn exit(was_enabled: bool) {
        if was_enabled {
            unsafe { cpu::sti() };
        }
    }
}

/// A flag-only critical section guard with no protected data, used by
/// subsystems (the queue, the interrupt table) that already hold their own
/// lock and only need the interrupt-disable half of [`SpinLock`].
pub struct SpinLockFlag {
    locked: AtomicBool,
}

pub struct SpinLockFlagGuard<'a> {
    flag: &'a AtomicBool,
    saved_interrupt_state: bool,
}

impl SpinLockFlag {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> SpinLockFlagGuard<'_> {
        let saved_interrupt_state = critical_section::enter();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinLockFlagGuard {
            flag: &self.locked,
            saved_interrupt_state,
        }
    }

    pub fn try_lock(&self) -> Result<SpinLockFlagGuard<'_>, ()> {
        let saved_interrupt_state = critical_section::enter();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(SpinLockFlagGuard {
                flag: &self.locked,
                saved_interrupt_state,
            })
        } else {
            critical_section::exit(saved_interrupt_state);
            Err(())
        }
    }
}

impl Default for SpinLockFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpinLockFlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        critical_section::exit(self.saved_interrupt_state);
    }
}

/// An interrupt-safe ticket spinlock guarding `T`.
///
/// Acquisition order is strict FIFO among spinning CPUs (spec §5: "a single
/// queue observed with its lock held exposes strict ... ordering" applies
/// equally here via the ticket counter). Must never be held across a
/// voluntary scheduling point.
pub struct SpinLock<T: ?Sized> {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
    data: UnsafeCell<T>,
}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    saved_interrupt_state: bool,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let saved_interrupt_state = critical_section::enter();
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }
        SpinLockGuard {
            lock: self,
            saved_interrupt_state,
        }
    }

    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, ()> {
        let saved_interrupt_state = critical_section::enter();
        let serving = self.now_serving.load(Ordering::Acquire);
        if self
            .next_ticket
            .compare_exchange(serving, serving + 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(SpinLockGuard {
                lock: self,
                saved_interrupt_state,
            })
        } else {
            critical_section::exit(saved_interrupt_state);
            Err(())
        }
    }

    /// Bypasses the lock entirely. Only safe before other CPUs are running
    /// (early boot) or where the caller otherwise guarantees exclusivity.
    pub unsafe fn force_unlock(&self) {
        self.now_serving.fetch_add(1, Ordering::Release);
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        critical_section::exit(self.saved_interrupt_state);
    }
}

/// Kept as the name the rest of the kernel spells this type with.
pub type Mutex<T> = SpinLock<T>;
pub type MutexGuard<'a, T> = SpinLockGuard<'a, T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_exclusion_basic() {
        let lock = SpinLock::new(0usize);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLockFlag::new();
        let _guard = lock.lock();
        assert!(lock.try_lock().is_err());
    }
}
