//!
//! External collaborator contracts
//!
//! Everything spec §1 calls "deliberately out of scope": the scheduler
//! body, the real interrupt controller, the LAPIC, and virtual memory
//! mapping. The core only depends on these traits; concrete
//! implementations are plugged in by the platform at kickstart time
//! (spec §6 "Core-provided contracts to collaborators" names the
//! opposite direction — these are the contracts the core *requires*).

use crate::kernel::error::KernelResult;
use crate::kernel::memory_manager::data_type::{MSize, PAddress, VAddress};
use crate::kernel::memory_manager::MemoryPermissionFlags;

/// Opaque handle to a scheduler-owned thread control block. The core
/// never looks inside it; it only ever holds it and passes it back.
pub type ThreadRef = u64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExitCause {
    Normal,
    Killed,
    Faulted,
}

/// The scheduler body (thread creation, election, quanta) lives outside
/// the core. This is the contract it must satisfy (spec §6).
pub trait Scheduler: Sync {
    fn current_thread(&self) -> ThreadRef;
    fn release_thread(&self, thread: ThreadRef);
    fn thread_exit(&self, cause: ExitCause, value: i32) -> !;
    fn schedule(&self);
    fn is_thread_valid(&self, thread: ThreadRef) -> bool;
    /// Priority in `0` (highest) .. `255` (lowest), used by the
    /// priority-inheritance mutex.
    fn priority_of(&self, thread: ThreadRef) -> u8;
    fn set_priority(&self, thread: ThreadRef, priority: u8);
}

/// Virtual memory mapping (spec §1, §6): `map(phys,size,flags)` and
/// `unmap(virt,size)` as primitives, nothing more.
pub trait Mapper: Sync {
    fn map(&self, phys: PAddress, size: MSize, flags: MemoryPermissionFlags) -> KernelResult<VAddress>;
    fn unmap(&self, virt: VAddress, size: MSize) -> KernelResult<()>;
}
