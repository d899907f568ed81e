//!
//! Interrupt manager (component 4.D)
//!
//! A fixed-size table of handlers indexed by vector, plus a single
//! pluggable [`InterruptDriver`] that the real interrupt controller
//! (PIC/IO-APIC, out of scope here) installs once at boot.

use crate::kernel::config::{
    INT_ENTRY_COUNT, MAX_INTERRUPT_LINE, MIN_INTERRUPT_LINE, VECTOR_PANIC,
};
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::panic::VCpuContext;
use crate::kernel::sync::spin_lock::SpinLockFlag;

use core::sync::atomic::{AtomicUsize, Ordering};

/// The four operations an interrupt controller driver must provide
/// (spec §3 "Interrupt driver record", §6). Exactly one may be installed;
/// replacing an already-installed real driver panics.
pub trait InterruptDriver: Sync {
    fn set_mask(&self, line: u16, masked: bool);
    fn send_eoi(&self, line: u16);
    fn is_spurious(&self, vector: u16) -> bool;
    fn get_interrupt_line_from_irq(&self, irq: u16) -> Option<u16>;
}

struct NullDriver;

impl InterruptDriver for NullDriver {
    fn set_mask(&self, _line: u16, _masked: bool) {}
    fn send_eoi(&self, _line: u16) {}
    fn is_spurious(&self, _vector: u16) -> bool {
        false
    }
    fn get_interrupt_line_from_irq(&self, _irq: u16) -> Option<u16> {
        None
    }
}

static NULL_DRIVER: NullDriver = NullDriver;

pub type Handler = fn();

pub struct InterruptManager {
    handlers: [Option<Handler>; INT_ENTRY_COUNT],
    driver: &'static dyn InterruptDriver,
    driver_is_placeholder: bool,
    lock: SpinLockFlag,
    spurious_count: AtomicUsize,
}

impl InterruptManager {
    pub const fn new() -> Self {
        Self {
            handlers: [None; INT_ENTRY_COUNT],
            driver: &NULL_DRIVER,
            driver_is_placeholder: true,
            lock: SpinLockFlag::new(),
            spurious_count: AtomicUsize::new(0),
        }
    }

    /// Zeros the handler array (already zero from `new`) and reserves the
    /// panic vector slot implicitly (`dispatch` special-cases it before
    /// ever consulting `handlers`).
    pub fn init(&mut self) {
        let _guard = self.lock.lock();
        self.handlers = [None; INT_ENTRY_COUNT];
    }

    pub fn set_driver(&mut self, driver: &'static dyn InterruptDriver) -> KernelResult<()> {
        let _guard = self.lock.lock();
        if !self.driver_is_placeholder {
            panic!("interrupt driver already installed");
        }
        self.driver = driver;
        self.driver_is_placeholder = false;
        Ok(())
    }

    fn validate_line(vector: u16) -> KernelResult<()> {
        if vector < MIN_INTERRUPT_LINE || vector > MAX_INTERRUPT_LINE {
            Err(KernelError::UnauthorizedInterruptLine)
        } else {
            Ok(())
        }
    }

    pub fn register(&mut self, vector: u16, handler: Handler) -> KernelResult<()> {
        Self::validate_line(vector)?;
        let _guard = self.lock.lock();
        let slot = &mut self.handlers[vector as usize];
        if slot.is_some() {
            return Err(KernelError::InterruptAlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn remove(&mut self, vector: u16) -> KernelResult<()> {
        Self::validate_line(vector)?;
        let _guard = self.lock.lock();
        let slot = &mut self.handlers[vector as usize];
        if slot.is_none() {
            return Err(KernelError::InterruptNotRegistered);
        }
        *slot = None;
        Ok(())
    }

    pub fn register_irq(&mut self, irq: u16, handler: Handler) -> KernelResult<()> {
        let vector = self.driver.get_interrupt_line_from_irq(irq).ok_or(KernelError::NoSuchIrq)?;
        self.register(vector, handler)
    }

    pub fn remove_irq(&mut self, irq: u16) -> KernelResult<()> {
        let vector = self.driver.get_interrupt_line_from_irq(irq).ok_or(KernelError::NoSuchIrq)?;
        self.remove(vector)
    }

    pub fn set_mask(&self, line: u16, masked: bool) {
        self.driver.set_mask(line, masked);
    }

    pub fn send_eoi(&self, line: u16) {
        self.driver.send_eoi(line);
    }

    pub fn spurious_count(&self) -> usize {
        self.spurious_count.load(Ordering::Relaxed)
    }

    /// Called from the architecture trampoline with the vector that
    /// fired, whether the interrupted context had interrupts enabled,
    /// and the vCPU context the trampoline saved (spec §4.D "Main
    /// dispatch", §4.E, §9 GLOSSARY "vCPU").
    pub fn dispatch(
        &self,
        vector: u16,
        interrupted_context_had_interrupts_enabled: bool,
        context: &VCpuContext,
    ) {
        if !interrupted_context_had_interrupts_enabled
            && vector != VECTOR_PANIC
            && vector >= MIN_INTERRUPT_LINE
        {
            return;
        }
        if vector == VECTOR_PANIC {
            crate::kernel::panic::panic_from_interrupt(context);
        }
        if self.driver.is_spurious(vector) {
            self.spurious_count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.handlers[vector as usize] {
            Some(handler) => handler(),
            None => crate::kernel::panic::panic_from_interrupt(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static mut HIT_COUNT: usize = 0;
    fn counting_handler() {
        unsafe { HIT_COUNT += 1 };
    }

    #[test]
    fn register_then_remove_leaves_slot_empty() {
        let mut manager = InterruptManager::new();
        manager.init();
        manager.register(64, counting_handler).unwrap();
        assert_eq!(
            manager.register(64, counting_handler),
            Err(KernelError::InterruptAlreadyRegistered)
        );
        manager.remove(64).unwrap();
        assert_eq!(manager.remove(64), Err(KernelError::InterruptNotRegistered));
    }

    #[test]
    fn out_of_range_vector_rejected() {
        let mut manager = InterruptManager::new();
        manager.init();
        assert_eq!(
            manager.register(10, counting_handler),
            Err(KernelError::UnauthorizedInterruptLine)
        );
    }

    #[test]
    fn dispatch_invokes_registered_handler() {
        let mut manager = InterruptManager::new();
        manager.init();
        manager.register(64, counting_handler).unwrap();
        let before = unsafe { HIT_COUNT };
        manager.dispatch(64, true, &VCpuContext::zeroed());
        assert_eq!(unsafe { HIT_COUNT }, before + 1);
    }
}
