//!
//! Time manager (component 4.H)
//!
//! Registers timer drivers by role and dispatches ticks to the
//! scheduler. The timer hardware itself (HPET, TSC, RTC, APIC timer) is
//! out of scope (spec §1); this module only owns the role table and the
//! main-timer tick handler.

use crate::kernel::contracts::Scheduler;
use crate::kernel::error::{KernelError, KernelResult};

use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerRole {
    Main,
    Rtc,
    Auxiliary,
    Lifetime,
}

/// Function table a timer driver provides (spec §3 "Thread control
/// block"-adjacent "Timer records"). Every field is mandatory except
/// `tick_manager`, which `on_main_tick` invokes only "if present" (spec
/// §4.H).
pub struct TimerDriver {
    pub get_frequency: fn() -> u64,
    pub set_frequency: fn(u64),
    pub get_time_ns: fn() -> u64,
    pub set_time_ns: fn(u64),
    /// Calendar date as (year, month, day).
    pub get_date: fn() -> (u16, u8, u8),
    /// Wall-clock time of day as (hour, minute, second).
    pub get_daytime: fn() -> (u8, u8, u8),
    pub enable: fn(),
    pub disable: fn(),
    /// Installs the driver's own interrupt entry point; `add_timer` calls
    /// this with the role's internal tick entry so the driver knows what
    /// to fire on its hardware interrupt.
    pub set_handler: fn(fn()),
    pub remove_handler: fn(),
    pub get_irq: fn() -> u16,
    /// Optional per-tick callback the driver itself wants invoked,
    /// separate from EOI and scheduler dispatch.
    pub tick_manager: Option<fn()>,
}

struct Registration {
    role: TimerRole,
    driver: &'static TimerDriver,
}

const MAX_TIMERS: usize = 4;

pub struct TimerManager {
    registrations: [Option<Registration>; MAX_TIMERS],
    registration_count: usize,
    tick_count: AtomicU64,
    active_wait_counter: AtomicU64,
    scheduler_registered: bool,
}

impl TimerManager {
    pub const fn new() -> Self {
        const NONE: Option<Registration> = None;
        Self {
            registrations: [NONE; MAX_TIMERS],
            registration_count: 0,
            tick_count: AtomicU64::new(0),
            active_wait_counter: AtomicU64::new(0),
            scheduler_registered: false,
        }
    }

    pub fn add_timer(&mut self, role: TimerRole, driver: &'static TimerDriver) -> KernelResult<()> {
        if self.registration_count >= MAX_TIMERS {
            return Err(KernelError::NotSupported);
        }
        self.registrations[self.registration_count] = Some(Registration { role, driver });
        self.registration_count += 1;
        (driver.set_handler)(role_tick_entry(role));
        (driver.enable)();
        Ok(())
    }

    fn find(&self, role: TimerRole) -> Option<&'static TimerDriver> {
        self.registrations
            .iter()
            .flatten()
            .find(|r| r.role == role)
            .map(|r| r.driver)
    }

    pub fn main_timer(&self) -> Option<&'static TimerDriver> {
        self.find(TimerRole::Main)
    }

    pub fn mark_scheduler_registered(&mut self) {
        self.scheduler_registered = true;
    }

    /// Called from the main timer's interrupt handler: bumps the tick
    /// counter, EOIs through `interrupt_manager`, invokes the main
    /// timer's own `tick_manager` if present, then either asks the
    /// scheduler to run or, if none is registered yet, decrements the
    /// busy-wait counter `wait_no_sched` watches (spec §4.H).
    pub fn on_main_tick(&self, interrupt_manager: &crate::kernel::interrupt::InterruptManager, scheduler: Option<&dyn Scheduler>) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);
        if let Some(main) = self.main_timer() {
            interrupt_manager.send_eoi((main.get_irq)());
            if let Some(tick_manager) = main.tick_manager {
                tick_manager();
            }
        }
        match scheduler {
            Some(s) => s.schedule(),
            None => {
                self.active_wait_counter.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Busy-spin timebase used before the scheduler exists. Returns
    /// immediately if a scheduler is already registered.
    pub fn wait_no_sched(&self, nanoseconds: u64) {
        if self.scheduler_registered {
            return;
        }
        let ticks_needed = match self.main_timer() {
            Some(main) => {
                let frequency = (main.get_frequency)().max(1);
                (nanoseconds * frequency) / 1_000_000_000
            }
            None => return,
        };
        self.active_wait_counter.store(ticks_needed, Ordering::Relaxed);
        while self.active_wait_counter.load(Ordering::Relaxed) > 0 {
            core::hint::spin_loop();
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }
}

/// The internal entry point `add_timer` installs on a driver via
/// `set_handler`, one per role.
fn role_tick_entry(role: TimerRole) -> fn() {
    match role {
        TimerRole::Main => main_timer_tick_entry,
        TimerRole::Rtc => rtc_timer_tick_entry,
        TimerRole::Auxiliary => auxiliary_timer_tick_entry,
        TimerRole::Lifetime => lifetime_timer_tick_entry,
    }
}

fn main_timer_tick_entry() {
    let cluster = crate::kernel::manager_cluster::get_kernel_manager_cluster();
    let scheduler = *cluster.scheduler.lock();
    cluster
        .timer_manager
        .lock()
        .on_main_tick(&cluster.interrupt_manager.lock(), scheduler);
}

fn rtc_timer_tick_entry() {
    bump_non_main_tick_count();
}

fn auxiliary_timer_tick_entry() {
    bump_non_main_tick_count();
}

fn lifetime_timer_tick_entry() {
    bump_non_main_tick_count();
}

fn bump_non_main_tick_count() {
    crate::kernel::manager_cluster::get_kernel_manager_cluster()
        .timer_manager
        .lock()
        .tick_count
        .fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_frequency() -> u64 {
        1_000_000_000
    }
    fn stub_set_frequency(_f: u64) {}
    fn stub_get_time() -> u64 {
        0
    }
    fn stub_set_time(_t: u64) {}
    fn stub_enable() {}
    fn stub_disable() {}
    fn stub_irq() -> u16 {
        64
    }
    fn stub_get_date() -> (u16, u8, u8) {
        (1970, 1, 1)
    }
    fn stub_get_daytime() -> (u8, u8, u8) {
        (0, 0, 0)
    }
    fn stub_set_handler(_handler: fn()) {}
    fn stub_remove_handler() {}

    static STUB_DRIVER: TimerDriver = TimerDriver {
        get_frequency: stub_frequency,
        set_frequency: stub_set_frequency,
        get_time_ns: stub_get_time,
        set_time_ns: stub_set_time,
        get_date: stub_get_date,
        get_daytime: stub_get_daytime,
        enable: stub_enable,
        disable: stub_disable,
        set_handler: stub_set_handler,
        remove_handler: stub_remove_handler,
        get_irq: stub_irq,
        tick_manager: None,
    };

    #[test]
    fn add_timer_registers_by_role() {
        let mut manager = TimerManager::new();
        manager.add_timer(TimerRole::Main, &STUB_DRIVER).unwrap();
        assert!(manager.main_timer().is_some());
        assert!(manager.find(TimerRole::Rtc).is_none());
    }

    #[test]
    fn registry_rejects_beyond_capacity() {
        let mut manager = TimerManager::new();
        for _ in 0..MAX_TIMERS {
            manager.add_timer(TimerRole::Auxiliary, &STUB_DRIVER).unwrap();
        }
        assert_eq!(
            manager.add_timer(TimerRole::Auxiliary, &STUB_DRIVER),
            Err(KernelError::NotSupported)
        );
    }
}
