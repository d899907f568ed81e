//!
//! x86_64 IDT wiring
//!
//! Installs the generated per-vector stubs (see [`stubs`]) into a 256
//! entry IDT and loads it. This is purely the machine-specific half of
//! interrupt handling; vector registration and dispatch are owned by
//! [`crate::kernel::interrupt::InterruptManager`] and are reached
//! through [`handler::common_trampoline`].

pub mod handler;
pub mod idt;
pub mod stubs;
pub mod tss;

use crate::arch::x86_64::device::cpu;
use crate::kernel::config::INT_ENTRY_COUNT;
use crate::kernel::sync::spin_lock::SpinLock;
use idt::Idt;

pub struct ArchInterruptTable {
    idt: Idt,
}

impl ArchInterruptTable {
    pub const fn new() -> Self {
        Self { idt: Idt::new() }
    }

    pub fn init(&mut self, code_selector: u16) {
        for vector in 0..INT_ENTRY_COUNT {
            self.idt.set_gate(vector, stubs::STUB_TABLE[vector], code_selector);
        }
        let idtr = self.idt.descriptor();
        unsafe { cpu::lidt(&idtr as *const _ as usize) };
    }
}

pub static ARCH_INTERRUPT_TABLE: SpinLock<ArchInterruptTable> = SpinLock::new(ArchInterruptTable::new());

/// Loads the IDT with `code_selector` (the kernel code segment loaded
/// from the GDT before entry). Must run after the kernel heap is
/// initialized and before interrupts are re-enabled (spec §9 bring-up
/// order: "heap -> CPU -> interrupt table").
pub fn init(code_selector: u16) {
    ARCH_INTERRUPT_TABLE.lock().init(code_selector);
}
