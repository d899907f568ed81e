#![cfg_attr(not(test), no_std)]
#![feature(naked_functions)]
#![feature(panic_info_message)]

//! Core kernel runtime: interrupt dispatch, the kernel heap, the doubly
//! linked queues used throughout the kernel, the flattened-device-tree
//! parser and driver manager, the core/IPI manager, and the futex-backed
//! synchronization primitives. Console drivers, the scheduler body, paging,
//! and individual device drivers are external collaborators; this crate
//! only defines the contracts they plug into (see `kernel::contracts`).

extern crate alloc;

pub const OS_NAME: &str = "Embercore";
pub const OS_VERSION: &str = env!("CARGO_PKG_VERSION");

#[macro_use]
pub mod kernel;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod arch;
