//!
//! Mutex: a futex-backed lock with optional recursion and priority
//! inheritance (component 4.J)

use crate::kernel::contracts::{Scheduler, ThreadRef};
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::sync::futex::{Futex, QueueDiscipline, WakeReason};
use crate::kernel::sync::spin_lock::SpinLockFlag;

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

pub struct MutexFlags {
    pub recursive: bool,
    pub priority_inheritance: bool,
}

struct Owner {
    thread: Option<ThreadRef>,
    initial_priority: u8,
    boosted: bool,
}

pub struct Mutex {
    futex: Futex,
    locked: AtomicI32,
    recursion: AtomicU32,
    waiters: AtomicU32,
    flags: MutexFlags,
    owner: SpinLockFlag,
    owner_state: core::cell::UnsafeCell<Owner>,
}

unsafe impl Sync for Mutex {}

impl Mutex {
    pub const fn new(flags: MutexFlags, discipline: QueueDiscipline) -> Self {
        Self {
            futex: Futex::new(0, discipline),
            locked: AtomicI32::new(0),
            recursion: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
            flags,
            owner: SpinLockFlag::new(),
            owner_state: core::cell::UnsafeCell::new(Owner {
                thread: None,
                initial_priority: 0,
                boosted: false,
            }),
        }
    }

    fn owner_mut(&self) -> &mut Owner {
        unsafe { &mut *self.owner_state.get() }
    }

    pub fn lock(&self, scheduler: &dyn Scheduler) -> KernelResult<()> {
        let current = scheduler.current_thread();
        loop {
            if self
                .locked
                .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                let guard = self.owner.lock();
                let owner = self.owner_mut();
                owner.thread = Some(current);
                owner.initial_priority = scheduler.priority_of(current);
                owner.boosted = false;
                drop(guard);
                return Ok(());
            }

            {
                let guard = self.owner.lock();
                let owner = self.owner_mut();
                if self.flags.recursive && owner.thread == Some(current) {
                    self.recursion.fetch_add(1, Ordering::AcqRel);
                    drop(guard);
                    return Ok(());
                }
                if self.flags.priority_inheritance {
                    if let Some(owner_thread) = owner.thread {
                        let caller_priority = scheduler.priority_of(current);
                        let owner_priority = scheduler.priority_of(owner_thread);
                        if caller_priority < owner_priority {
                            if !owner.boosted {
                                owner.initial_priority = owner_priority;
                                owner.boosted = true;
                            }
                            scheduler.set_priority(owner_thread, caller_priority);
                        }
                    }
                }
            }

            self.waiters.fetch_add(1, Ordering::AcqRel);
            match self.futex.wait(0, scheduler) {
                Ok(WakeReason::Wake) => {}
                Ok(WakeReason::Cancelled) => {
                    self.waiters.fetch_sub(1, Ordering::AcqRel);
                    return Err(KernelError::Cancelled);
                }
                Ok(WakeReason::Destroyed) | Err(KernelError::Destroyed) => {
                    return Err(KernelError::Destroyed)
                }
                Err(KernelError::NotBlocked) => {}
                Err(e) => return Err(e),
            }
        }
    }

    pub fn try_lock(&self, scheduler: &dyn Scheduler) -> KernelResult<()> {
        let current = scheduler.current_thread();
        if self
            .locked
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            let guard = self.owner.lock();
            let owner = self.owner_mut();
            owner.thread = Some(current);
            owner.initial_priority = scheduler.priority_of(current);
            owner.boosted = false;
            drop(guard);
            return Ok(());
        }
        let guard = self.owner.lock();
        let owner = self.owner_mut();
        if self.flags.recursive && owner.thread == Some(current) {
            self.recursion.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        if self.flags.priority_inheritance {
            if let Some(owner_thread) = owner.thread {
                let caller_priority = scheduler.priority_of(current);
                let owner_priority = scheduler.priority_of(owner_thread);
                if caller_priority < owner_priority {
                    if !owner.boosted {
                        owner.initial_priority = owner_priority;
                        owner.boosted = true;
                    }
                    scheduler.set_priority(owner_thread, caller_priority);
                }
            }
        }
        drop(guard);
        Err(KernelError::NotBlocked)
    }

    pub fn unlock(&self, scheduler: &dyn Scheduler) -> KernelResult<()> {
        let current = scheduler.current_thread();
        let guard = self.owner.lock();
        let owner = self.owner_mut();
        if owner.thread != Some(current) {
            return Err(KernelError::UnauthorizedAction);
        }
        if self.flags.recursive && self.recursion.load(Ordering::Acquire) > 0 {
            self.recursion.fetch_sub(1, Ordering::AcqRel);
            return Ok(());
        }
        if owner.boosted {
            scheduler.set_priority(current, owner.initial_priority);
            owner.boosted = false;
        }
        owner.thread = None;
        drop(guard);

        self.locked.store(0, Ordering::Release);
        if self.waiters.load(Ordering::Acquire) > 0 {
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            self.futex.wake(1, scheduler);
        }
        Ok(())
    }

    pub fn destroy(&self, scheduler: &dyn Scheduler) {
        self.futex.destroy(scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::contracts::ExitCause;
    use core::sync::atomic::AtomicU8;

    struct MockScheduler {
        current: core::cell::Cell<ThreadRef>,
        priorities: [AtomicU8; 2],
    }

    impl Scheduler for MockScheduler {
        fn current_thread(&self) -> ThreadRef {
            self.current.get()
        }
        fn release_thread(&self, _thread: ThreadRef) {}
        fn thread_exit(&self, _cause: ExitCause, _value: i32) -> ! {
            panic!("unused")
        }
        fn schedule(&self) {}
        fn is_thread_valid(&self, _thread: ThreadRef) -> bool {
            true
        }
        fn priority_of(&self, thread: ThreadRef) -> u8 {
            self.priorities[thread as usize].load(Ordering::Relaxed)
        }
        fn set_priority(&self, thread: ThreadRef, priority: u8) {
            self.priorities[thread as usize].store(priority, Ordering::Relaxed);
        }
    }

    #[test]
    fn lock_unlock_round_trips() {
        let mutex = Mutex::new(
            MutexFlags { recursive: false, priority_inheritance: false },
            QueueDiscipline::Fifo,
        );
        let scheduler = MockScheduler {
            current: core::cell::Cell::new(0),
            priorities: [AtomicU8::new(10), AtomicU8::new(1)],
        };
        mutex.lock(&scheduler).unwrap();
        mutex.unlock(&scheduler).unwrap();
        mutex.lock(&scheduler).unwrap();
    }

    #[test]
    fn unlock_by_non_owner_rejected() {
        let mutex = Mutex::new(
            MutexFlags { recursive: false, priority_inheritance: false },
            QueueDiscipline::Fifo,
        );
        let scheduler = MockScheduler {
            current: core::cell::Cell::new(0),
            priorities: [AtomicU8::new(10), AtomicU8::new(1)],
        };
        mutex.lock(&scheduler).unwrap();
        scheduler.current.set(1);
        assert_eq!(mutex.unlock(&scheduler), Err(KernelError::UnauthorizedAction));
    }

    #[test]
    fn recursive_lock_allows_reentry() {
        let mutex = Mutex::new(
            MutexFlags { recursive: true, priority_inheritance: false },
            QueueDiscipline::Fifo,
        );
        let scheduler = MockScheduler {
            current: core::cell::Cell::new(0),
            priorities: [AtomicU8::new(10), AtomicU8::new(1)],
        };
        mutex.lock(&scheduler).unwrap();
        mutex.try_lock(&scheduler).unwrap();
        mutex.unlock(&scheduler).unwrap();
        mutex.unlock(&scheduler).unwrap();
    }

    #[test]
    fn priority_inheritance_boosts_and_restores_owner() {
        let mutex = Mutex::new(
            MutexFlags { recursive: false, priority_inheritance: true },
            QueueDiscipline::Priority,
        );
        let scheduler = MockScheduler {
            current: core::cell::Cell::new(0),
            priorities: [AtomicU8::new(10), AtomicU8::new(1)],
        };
        mutex.lock(&scheduler).unwrap();

        scheduler.current.set(1);
        assert_eq!(mutex.try_lock(&scheduler), Err(KernelError::NotBlocked));

        scheduler.current.set(0);
        assert_eq!(scheduler.priority_of(0), 1);
        mutex.unlock(&scheduler).unwrap();
        assert_eq!(scheduler.priority_of(0), 10);
    }
}
