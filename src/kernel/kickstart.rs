//!
//! Kickstart (component 4.K)
//!
//! The single deterministic bring-up sequence spec §9 names exactly:
//! "kickstart disables interrupts -> inits heap -> inits CPU -> inits
//! interrupt table (with placeholder driver) -> parses FDT -> inits
//! memory mapping -> driver manager walks FDT and attaches drivers (one
//! of which registers the real interrupt driver, others register
//! timers) -> core manager starts APs -> returns control to the
//! scheduler." Nothing above this module decides ordering; everything
//! below it is a dumb, already-const-constructed singleton waiting for
//! its `init`.

use crate::arch::x86_64::device::cpu;
use crate::arch::x86_64::interrupt as arch_interrupt;
use crate::kernel::drivers::DriverDescriptor;
use crate::kernel::manager_cluster::get_kernel_manager_cluster;
use crate::kernel::memory_manager::data_type::{MSize, VAddress};

/// Backing store for the initial kernel heap. A freestanding kernel has
/// no allocator to allocate its own allocator's memory from, so this is
/// a fixed-size static reserved at link time, the same trick the
/// teacher used for its early physical memory pool.
const INITIAL_HEAP_SIZE: usize = 4 * 1024 * 1024;

#[repr(align(16))]
struct HeapStorage([u8; INITIAL_HEAP_SIZE]);

static mut INITIAL_HEAP_STORAGE: HeapStorage = HeapStorage([0; INITIAL_HEAP_SIZE]);

/// `fdt_address` is the physical address of the flattened device tree
/// blob the boot protocol handed the kernel (spec §4.F); it is assumed
/// already identity-mapped at this very early stage.
/// `code_selector` is the kernel code segment loaded by the bootloader
/// before entry, needed to build IDT gate descriptors.
/// `drivers` is the link-time collected table handed to the driver
/// manager (spec §4.G); an empty slice is valid and simply attaches
/// nothing.
pub fn kickstart(fdt_address: usize, code_selector: u16, drivers: &'static [DriverDescriptor]) -> ! {
    unsafe { cpu::cli() };

    let cluster = get_kernel_manager_cluster();

    unsafe {
        cluster
            .heap
            .init(
                VAddress::new(core::ptr::addr_of_mut!(INITIAL_HEAP_STORAGE) as usize),
                MSize::new(INITIAL_HEAP_SIZE),
            )
            .expect("failed to initialize kernel heap");
    }

    arch_interrupt::init(code_selector);
    cluster.interrupt_manager.lock().init();

    let fdt_blob = unsafe {
        core::slice::from_raw_parts(fdt_address as *const u8, fdt_blob_len(fdt_address))
    };

    let mut fdt_manager = crate::kernel::drivers::fdt::FdtManager::new();
    if let Err(e) = fdt_manager.init(fdt_blob) {
        panic!("failed to parse device tree: {}", e);
    }

    {
        let mut driver_manager = cluster.driver_manager.lock();
        driver_manager.init(drivers);
        match driver_manager.attach_all(&mut fdt_manager) {
            Ok(count) => pr_info!("driver manager attached {} device(s)", count),
            Err(e) => pr_err!("driver manager walk failed: {}", e),
        }
    }

    #[cfg(feature = "smp")]
    {
        pr_info!(
            "core manager: {} core(s) online",
            cluster.core_manager.lock().core_count()
        );
    }

    unsafe { cpu::sti() };
    pr_info!("kickstart complete, handing off to scheduler");

    loop {
        if let Some(scheduler) = *cluster.scheduler.lock() {
            scheduler.schedule();
        } else {
            unsafe { cpu::halt() };
        }
    }
}

/// Reads the FDT header's `totalsize` field (big-endian, second u32 in
/// the blob) so the initial slice covers exactly the tree and nothing
/// past it (spec §4.F).
fn fdt_blob_len(fdt_address: usize) -> usize {
    let header = unsafe { core::slice::from_raw_parts(fdt_address as *const u8, 8) };
    u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize
}
