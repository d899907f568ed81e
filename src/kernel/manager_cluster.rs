//!
//! Cluster of kernel-wide singleton managers
//!
//! Every member is either a const-constructible value or a lock wrapping
//! one, so the whole cluster can be a `static` with a trivial constructor
//! and a later runtime `init` (spec §9 "Global state and init ordering").

use crate::kernel::contracts::{Mapper, Scheduler};
use crate::kernel::drivers::DriverManager;
use crate::kernel::interrupt::InterruptManager;
use crate::kernel::memory_manager::heap::Heap;
use crate::kernel::sync::spin_lock::SpinLock;
use crate::kernel::timer_manager::TimerManager;
use crate::kernel::tty::TtyManager;

#[cfg(feature = "smp")]
use crate::kernel::smp::CoreManager;

pub struct KernelManagerCluster {
    pub heap: Heap,
    pub interrupt_manager: SpinLock<InterruptManager>,
    pub tty_manager: SpinLock<TtyManager>,
    pub driver_manager: SpinLock<DriverManager>,
    pub timer_manager: SpinLock<TimerManager>,
    #[cfg(feature = "smp")]
    pub core_manager: SpinLock<CoreManager>,
    pub scheduler: SpinLock<Option<&'static dyn Scheduler>>,
    pub mapper: SpinLock<Option<&'static dyn Mapper>>,
}

pub static STATIC_KERNEL_MANAGER_CLUSTER: KernelManagerCluster = init_manager_cluster();

const fn init_manager_cluster() -> KernelManagerCluster {
    KernelManagerCluster {
        heap: Heap::new(),
        interrupt_manager: SpinLock::new(InterruptManager::new()),
        tty_manager: SpinLock::new(TtyManager::new()),
        driver_manager: SpinLock::new(DriverManager::new()),
        timer_manager: SpinLock::new(TimerManager::new()),
        #[cfg(feature = "smp")]
        core_manager: SpinLock::new(CoreManager::new()),
        scheduler: SpinLock::new(None),
        mapper: SpinLock::new(None),
    }
}

#[inline(always)]
pub fn get_kernel_manager_cluster() -> &'static KernelManagerCluster {
    &STATIC_KERNEL_MANAGER_CLUSTER
}
