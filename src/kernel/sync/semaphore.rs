//!
//! Semaphore: a futex wrapped with a signed level (component 4.J)

use crate::kernel::contracts::Scheduler;
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::sync::futex::{Futex, QueueDiscipline, WakeReason};

use core::sync::atomic::{AtomicI32, Ordering};

pub struct Semaphore {
    level: AtomicI32,
    binary: bool,
    futex: Futex,
}

impl Semaphore {
    pub const fn new(initial: i32, binary: bool, discipline: QueueDiscipline) -> Self {
        Self {
            level: AtomicI32::new(initial),
            binary,
            futex: Futex::new(0, discipline),
        }
    }

    /// Atomically decrements `level` while positive; otherwise waits on
    /// the futex with `expected=0`, retrying on spurious cancellation.
    pub fn wait(&self, scheduler: &dyn Scheduler) -> KernelResult<()> {
        loop {
            let current = self.level.load(Ordering::Acquire);
            if current > 0
                && self
                    .level
                    .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return Ok(());
            }
            match self.futex.wait(0, scheduler) {
                Ok(WakeReason::Wake) => continue,
                Ok(WakeReason::Cancelled) => return Err(KernelError::Cancelled),
                Ok(WakeReason::Destroyed) | Err(KernelError::Destroyed) => {
                    return Err(KernelError::Destroyed)
                }
                Err(KernelError::NotBlocked) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn try_wait(&self) -> KernelResult<()> {
        let current = self.level.load(Ordering::Acquire);
        if current > 0
            && self
                .level
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            Ok(())
        } else {
            Err(KernelError::NotBlocked)
        }
    }

    /// Increments `level` and wakes at most one waiter if it became
    /// positive; binary semaphores saturate at one.
    pub fn post(&self, scheduler: &dyn Scheduler) {
        let new_level = if self.binary {
            self.level.fetch_max(0, Ordering::AcqRel);
            self.level.store(1, Ordering::Release);
            1
        } else {
            self.level.fetch_add(1, Ordering::AcqRel) + 1
        };
        if new_level > 0 {
            self.futex.wake(1, scheduler);
        }
    }

    pub fn destroy(&self, scheduler: &dyn Scheduler) {
        self.futex.destroy(scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::contracts::{ExitCause, ThreadRef};

    struct MockScheduler;
    impl Scheduler for MockScheduler {
        fn current_thread(&self) -> ThreadRef {
            1
        }
        fn release_thread(&self, _thread: ThreadRef) {}
        fn thread_exit(&self, _cause: ExitCause, _value: i32) -> ! {
            panic!("unused")
        }
        fn schedule(&self) {}
        fn is_thread_valid(&self, _thread: ThreadRef) -> bool {
            true
        }
        fn priority_of(&self, _thread: ThreadRef) -> u8 {
            10
        }
        fn set_priority(&self, _thread: ThreadRef, _priority: u8) {}
    }

    #[test]
    fn try_wait_consumes_one_level() {
        let sem = Semaphore::new(1, false, QueueDiscipline::Fifo);
        assert!(sem.try_wait().is_ok());
        assert_eq!(sem.try_wait(), Err(KernelError::NotBlocked));
    }

    #[test]
    fn post_raises_level_for_try_wait() {
        let sem = Semaphore::new(0, false, QueueDiscipline::Fifo);
        let scheduler = MockScheduler;
        assert_eq!(sem.try_wait(), Err(KernelError::NotBlocked));
        sem.post(&scheduler);
        assert!(sem.try_wait().is_ok());
    }

    #[test]
    fn binary_semaphore_saturates_at_one() {
        let sem = Semaphore::new(0, true, QueueDiscipline::Fifo);
        let scheduler = MockScheduler;
        sem.post(&scheduler);
        sem.post(&scheduler);
        assert!(sem.try_wait().is_ok());
        assert_eq!(sem.try_wait(), Err(KernelError::NotBlocked));
    }
}
