#![no_std]
#![no_main]

//! Freestanding entry point. All real logic lives in the `embercore`
//! library; this binary only exists so Cargo produces an ELF the
//! bootloader can load. The actual `_start` trampoline is defined in
//! `embercore::arch::x86_64` and is reached directly by the bootloader,
//! never through `fn main`.

use embercore::kernel::panic::panic_halt;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    panic_halt(info)
}

// Required by the `#![no_main]` freestanding binary target even though it
// is never called: the real control flow enters at `_start`.
#[no_mangle]
pub extern "C" fn main() -> ! {
    loop {
        unsafe { embercore::arch::x86_64::cpu::halt() };
    }
}
