//!
//! Core and inter-processor-interrupt manager (component 4.I)
//!
//! Feature-gated behind `smp`: a uniprocessor build never links this
//! module (spec §4.I "Non-goals: everything here is inert on a build
//! without the `smp` feature"). Owns per-CPU bookkeeping and a
//! fixed-capacity IPI parameter queue per CPU; the LAPIC itself is an
//! external collaborator plugged in at kickstart (spec §1, §6).

use crate::kernel::collections::fifo::FIFO;
use crate::kernel::config::{IPI_QUEUE_CAPACITY, SOC_CPU_COUNT};
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::sync::spin_lock::SpinLockFlag;

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IpiKind {
    Panic,
    TlbInvalidate,
    Schedule,
}

#[derive(Debug, Copy, Clone)]
pub struct IpiParams {
    pub kind: IpiKind,
    pub argument: u64,
}

/// The LAPIC driver contract (spec §6): AP startup, per-core identity,
/// and actually firing an interrupt at another core. Concrete hardware
/// access is out of scope.
pub trait LapicDriver: Sync {
    fn cpu_id(&self) -> usize;
    fn send_ipi(&self, target_cpu: usize, vector: u16);
    fn send_ipi_broadcast(&self, vector: u16);
    fn start_ap(&self, cpu_id: usize, entry_point_paddr: u64) -> KernelResult<()>;
}

struct CoreState {
    present: bool,
    online: AtomicBool,
    params: FIFO<IpiParams, IPI_QUEUE_CAPACITY>,
}

impl CoreState {
    const fn new() -> Self {
        Self {
            present: false,
            online: AtomicBool::new(false),
            params: FIFO::new(0),
        }
    }
}

pub struct CoreManager {
    cores: [CoreState; SOC_CPU_COUNT],
    lapic: Option<&'static dyn LapicDriver>,
    boot_cpu: usize,
    core_count: AtomicUsize,
    lock: SpinLockFlag,
}

impl CoreManager {
    pub const fn new() -> Self {
        const CORE: CoreState = CoreState::new();
        Self {
            cores: [CORE; SOC_CPU_COUNT],
            lapic: None,
            boot_cpu: 0,
            core_count: AtomicUsize::new(0),
            lock: SpinLockFlag::new(),
        }
    }

    pub fn register_lapic_driver(&mut self, driver: &'static dyn LapicDriver) {
        self.lapic = Some(driver);
        self.boot_cpu = driver.cpu_id();
        self.cores[self.boot_cpu].present = true;
        self.cores[self.boot_cpu].online.store(true, Ordering::SeqCst);
        self.core_count.store(1, Ordering::SeqCst);
    }

    pub fn core_count(&self) -> usize {
        self.core_count.load(Ordering::Relaxed)
    }

    /// Boots one application processor through the real-mode trampoline
    /// the platform prepared at `entry_point_paddr` (spec §4.I "AP
    /// bring-up"). Marks the core present but not yet online; the AP
    /// itself flips `online` once it reaches `ap_init`.
    pub fn boot_ap(&mut self, cpu_id: usize, entry_point_paddr: u64) -> KernelResult<()> {
        if cpu_id >= SOC_CPU_COUNT {
            return Err(KernelError::IncorrectValue);
        }
        let lapic = self.lapic.ok_or(KernelError::UnauthorizedAction)?;
        let _guard = self.lock.lock();
        if self.cores[cpu_id].present {
            return Err(KernelError::UnauthorizedAction);
        }
        self.cores[cpu_id].present = true;
        lapic.start_ap(cpu_id, entry_point_paddr)?;
        Ok(())
    }

    /// Called from the AP's own boot path once its local state is ready.
    pub fn ap_init(&self, cpu_id: usize) -> KernelResult<()> {
        if cpu_id >= SOC_CPU_COUNT || !self.cores[cpu_id].present {
            return Err(KernelError::IncorrectValue);
        }
        self.cores[cpu_id].online.store(true, Ordering::SeqCst);
        self.core_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_online(&self, cpu_id: usize) -> bool {
        cpu_id < SOC_CPU_COUNT && self.cores[cpu_id].online.load(Ordering::Relaxed)
    }

    /// Queues `params` for `target_cpu` then fires the vector (spec
    /// §4.I "Send"): the receiving core's trampoline dequeues from its
    /// own slot before running the handler body.
    pub fn send_ipi(&self, target_cpu: usize, vector: u16, params: IpiParams) -> KernelResult<()> {
        if target_cpu >= SOC_CPU_COUNT || !self.cores[target_cpu].online.load(Ordering::Relaxed) {
            return Err(KernelError::NoSuchId);
        }
        let lapic = self.lapic.ok_or(KernelError::UnauthorizedAction)?;
        let slot = &self.cores[target_cpu].params as *const _ as *mut FIFO<IpiParams, IPI_QUEUE_CAPACITY>;
        if !unsafe { &mut *slot }.enqueue(params) {
            return Err(KernelError::NoMoreMemory);
        }
        lapic.send_ipi(target_cpu, vector);
        Ok(())
    }

    pub fn send_ipi_broadcast(&self, vector: u16, params: IpiParams) {
        if let Some(lapic) = self.lapic {
            for cpu_id in 0..SOC_CPU_COUNT {
                if self.cores[cpu_id].online.load(Ordering::Relaxed) && cpu_id != lapic.cpu_id() {
                    let slot = &self.cores[cpu_id].params as *const _ as *mut FIFO<IpiParams, IPI_QUEUE_CAPACITY>;
                    unsafe { &mut *slot }.enqueue(params);
                }
            }
            lapic.send_ipi_broadcast(vector);
        }
    }

    /// Pops the next queued parameter for `cpu_id`, called from the
    /// receiving core's own IPI handler.
    pub fn take_ipi_params(&self, cpu_id: usize) -> Option<IpiParams> {
        if cpu_id >= SOC_CPU_COUNT {
            return None;
        }
        let slot = &self.cores[cpu_id].params as *const _ as *mut FIFO<IpiParams, IPI_QUEUE_CAPACITY>;
        unsafe { &mut *slot }.dequeue()
    }
}

/// Best-effort panic broadcast: called from [`crate::kernel::panic`]
/// with no guarantee the cluster is fully initialized, so every step
/// degrades silently instead of panicking again.
pub fn try_broadcast_panic() {
    use crate::kernel::config::VECTOR_PANIC;
    use crate::kernel::manager_cluster::get_kernel_manager_cluster;

    if let Ok(core_manager) = get_kernel_manager_cluster().core_manager.try_lock() {
        core_manager.send_ipi_broadcast(
            VECTOR_PANIC,
            IpiParams {
                kind: IpiKind::Panic,
                argument: 0,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU16;

    struct MockLapic {
        id: usize,
        last_target: AtomicUsize,
        last_vector: AtomicU16,
    }

    impl LapicDriver for MockLapic {
        fn cpu_id(&self) -> usize {
            self.id
        }
        fn send_ipi(&self, target_cpu: usize, vector: u16) {
            self.last_target.store(target_cpu, Ordering::SeqCst);
            self.last_vector.store(vector, Ordering::SeqCst);
        }
        fn send_ipi_broadcast(&self, vector: u16) {
            self.last_vector.store(vector, Ordering::SeqCst);
        }
        fn start_ap(&self, _cpu_id: usize, _entry_point_paddr: u64) -> KernelResult<()> {
            Ok(())
        }
    }

    static MOCK_LAPIC: MockLapic = MockLapic {
        id: 0,
        last_target: AtomicUsize::new(usize::MAX),
        last_vector: AtomicU16::new(0),
    };

    #[test]
    fn register_driver_marks_boot_cpu_online() {
        let mut manager = CoreManager::new();
        manager.register_lapic_driver(&MOCK_LAPIC);
        assert!(manager.is_online(0));
        assert_eq!(manager.core_count(), 1);
    }

    #[test]
    fn boot_ap_then_ap_init_brings_core_online() {
        let mut manager = CoreManager::new();
        manager.register_lapic_driver(&MOCK_LAPIC);
        manager.boot_ap(1, 0x8000).unwrap();
        assert!(!manager.is_online(1));
        manager.ap_init(1).unwrap();
        assert!(manager.is_online(1));
        assert_eq!(manager.core_count(), 2);
    }

    #[test]
    fn send_ipi_to_offline_core_fails() {
        let mut manager = CoreManager::new();
        manager.register_lapic_driver(&MOCK_LAPIC);
        let result = manager.send_ipi(
            3,
            99,
            IpiParams {
                kind: IpiKind::Schedule,
                argument: 0,
            },
        );
        assert_eq!(result, Err(KernelError::NoSuchId));
    }

    #[test]
    fn send_ipi_to_online_core_queues_and_fires() {
        let mut manager = CoreManager::new();
        manager.register_lapic_driver(&MOCK_LAPIC);
        manager.boot_ap(1, 0x8000).unwrap();
        manager.ap_init(1).unwrap();
        manager
            .send_ipi(
                1,
                VectorForTest::RESCHEDULE,
                IpiParams {
                    kind: IpiKind::Schedule,
                    argument: 42,
                },
            )
            .unwrap();
        let popped = manager.take_ipi_params(1).unwrap();
        assert_eq!(popped.argument, 42);
    }

    struct VectorForTest;
    impl VectorForTest {
        const RESCHEDULE: u16 = 33;
    }
}
