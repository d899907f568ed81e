//!
//! Synchronization primitives (component 4.A, 4.J)
//!
//! `spin_lock` never suspends and is safe from interrupt context.
//! `futex`/`semaphore`/`mutex` may suspend the calling thread and must
//! only be used from schedulable (non-interrupt) context.

pub mod futex;
pub mod mutex;
pub mod semaphore;
pub mod spin_lock;
