//!
//! Futex: kernel-internal wait/wake primitive (component 4.J, first half)
//!
//! Backed by an observed `i32` handle. `Semaphore` and `Mutex` are both
//! built on top of this; nothing else in the core touches a futex
//! directly. The scheduler is taken as `&dyn Scheduler` per call rather
//! than stored, since the concrete scheduler is only available once
//! kickstart has run (spec §1: the scheduler body is an external
//! collaborator).

use crate::kernel::collections::queue::{Queue, QueueNode};
use crate::kernel::contracts::{Scheduler, ThreadRef};
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::sync::spin_lock::SpinLockFlag;

use alloc::boxed::Box;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WakeReason {
    Wake,
    Destroyed,
    Cancelled,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum QueueDiscipline {
    Fifo,
    Priority,
}

struct Waiter {
    thread: ThreadRef,
    priority: u8,
    reason: Option<WakeReason>,
}

pub struct Futex {
    handle: AtomicI32,
    alive: AtomicBool,
    discipline: QueueDiscipline,
    waiters: Queue<Waiter>,
    /// Guards the read-modify-write of `handle` against `waiters`
    /// enqueue so `wait` observes a consistent snapshot (spec §4.J
    /// "atomically enqueue ... if `*handle == expected`").
    lock: SpinLockFlag,
}

impl Futex {
    pub const fn new(initial: i32, discipline: QueueDiscipline) -> Self {
        Self {
            handle: AtomicI32::new(initial),
            alive: AtomicBool::new(true),
            discipline,
            waiters: Queue::new(),
            lock: SpinLockFlag::new(),
        }
    }

    pub fn handle(&self) -> &AtomicI32 {
        &self.handle
    }

    /// Atomically enqueues the caller if `*handle == expected`, then
    /// blocks until woken, destroyed, or cancelled.
    pub fn wait(
        &self,
        expected: i32,
        scheduler: &dyn Scheduler,
    ) -> KernelResult<WakeReason> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(KernelError::Destroyed);
        }
        let guard = self.lock.lock();
        if self.handle.load(Ordering::Acquire) != expected {
            return Err(KernelError::NotBlocked);
        }

        let current = scheduler.current_thread();
        let priority = scheduler.priority_of(current);
        let mut node = NonNull::from(Box::leak(Box::new(QueueNode::new(Waiter {
            thread: current,
            priority,
            reason: None,
        }))));

        match self.discipline {
            QueueDiscipline::Fifo => self.waiters.push(node),
            QueueDiscipline::Priority => {
                let prio = priority as u64;
                self.waiters.push_priority(node, prio)
            }
        }
        .expect("futex waiter queue node double-enqueued");
        drop(guard);

        loop {
            if let Some(reason) = unsafe { node.as_ref() }.data.reason {
                let waiter = unsafe { Box::from_raw(node.as_ptr()) };
                let _ = waiter;
                return Ok(reason);
            }
            scheduler.schedule();
        }
    }

    /// Releases at most `count` waiters, returning how many actually
    /// woke. Safe to call on an empty queue.
    pub fn wake(&self, count: usize, scheduler: &dyn Scheduler) -> usize {
        self.wake_with_reason(count, WakeReason::Wake, scheduler)
    }

    fn wake_with_reason(&self, count: usize, reason: WakeReason, scheduler: &dyn Scheduler) -> usize {
        let _guard = self.lock.lock();
        let mut woken = 0;
        while woken < count {
            let Some(mut node) = self.waiters.pop() else {
                break;
            };
            let thread = unsafe { node.as_ref() }.data.thread;
            unsafe { node.as_mut() }.data.reason = Some(reason);
            scheduler.release_thread(thread);
            woken += 1;
        }
        woken
    }

    /// Wakes every waiter with reason `Destroyed` and marks the futex
    /// unusable; subsequent operations return `KernelError::Destroyed`.
    pub fn destroy(&self, scheduler: &dyn Scheduler) {
        self.alive.store(false, Ordering::Release);
        self.wake_with_reason(usize::MAX, WakeReason::Destroyed, scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU8;

    struct MockScheduler {
        current: ThreadRef,
        priority: AtomicU8,
    }

    impl Scheduler for MockScheduler {
        fn current_thread(&self) -> ThreadRef {
            self.current
        }
        fn release_thread(&self, _thread: ThreadRef) {}
        fn thread_exit(&self, _cause: crate::kernel::contracts::ExitCause, _value: i32) -> ! {
            panic!("thread_exit called in test");
        }
        fn schedule(&self) {}
        fn is_thread_valid(&self, _thread: ThreadRef) -> bool {
            true
        }
        fn priority_of(&self, _thread: ThreadRef) -> u8 {
            self.priority.load(Ordering::Relaxed)
        }
        fn set_priority(&self, _thread: ThreadRef, priority: u8) {
            self.priority.store(priority, Ordering::Relaxed);
        }
    }

    #[test]
    fn wait_on_already_signaled_is_not_blocked() {
        let futex = Futex::new(1, QueueDiscipline::Fifo);
        let scheduler = MockScheduler { current: 1, priority: AtomicU8::new(10) };
        assert_eq!(futex.wait(0, &scheduler), Err(KernelError::NotBlocked));
    }

    #[test]
    fn wake_on_empty_returns_zero() {
        let futex = Futex::new(0, QueueDiscipline::Fifo);
        let scheduler = MockScheduler { current: 1, priority: AtomicU8::new(10) };
        assert_eq!(futex.wake(1, &scheduler), 0);
    }
}
