//!
//! Raw interrupt entry trampoline
//!
//! Every IDT gate points at one of the small per-vector stubs generated
//! in [`super::stubs`]; each stub only pushes a dummy error code (for
//! vectors the CPU doesn't supply one for) and the vector number, then
//! falls through to this shared prologue, which saves the general
//! purpose registers, calls into Rust, restores them, and `iretq`s back.

use core::arch::naked_asm;

use crate::arch::x86_64::device::cpu;
use crate::kernel::manager_cluster::get_kernel_manager_cluster;
use crate::kernel::panic::VCpuContext;

const RFLAGS_INTERRUPT_FLAG: u64 = 1 << 9;

/// Reads the pushed register frame at the fixed word offsets the
/// trampoline below lays out, and pairs it with a live read of the
/// control registers, to build the vCPU context the panic path dumps
/// (spec §4.E, §9 GLOSSARY "vCPU"). No privilege level change ever
/// happens in this kernel, so the CPU-pushed frame never includes the
/// orig `rsp`/`ss` pair; `rsp` is instead reported as the address right
/// after the `iretq` frame, and `ss` is left `0`.
unsafe fn build_vcpu_context(vector: u64, frame: *const u64) -> VCpuContext {
    let word = |index: isize| unsafe { *frame.offset(index) };
    VCpuContext {
        vector,
        error_code: word(16),
        rax: word(14),
        rbx: word(13),
        rcx: word(12),
        rdx: word(11),
        rsi: word(10),
        rdi: word(9),
        rbp: word(8),
        r8: word(7),
        r9: word(6),
        r10: word(5),
        r11: word(4),
        r12: word(3),
        r13: word(2),
        r14: word(1),
        r15: word(0),
        rip: word(17),
        cs: word(18),
        rflags: word(19),
        rsp: unsafe { frame.offset(17) as u64 },
        ss: 0,
        cr0: cpu::read_cr0(),
        cr2: cpu::read_cr2(),
        cr3: cpu::read_cr3(),
        cr4: cpu::read_cr4(),
    }
}

extern "C" fn rust_interrupt_handler(vector: u64, frame: *const u64) {
    let context = unsafe { build_vcpu_context(vector, frame) };
    let interrupts_were_enabled = (context.rflags & RFLAGS_INTERRUPT_FLAG) != 0;
    get_kernel_manager_cluster()
        .interrupt_manager
        .lock()
        .dispatch(vector as u16, interrupts_were_enabled, &context);
}

/// Fifteen general-purpose registers saved below the per-stub
/// vector/error-code pair and the CPU-pushed `rip/cs/rflags/rsp/ss`
/// frame. Offsets below are in qwords from the post-push `rsp`.
#[naked]
pub unsafe extern "C" fn common_trampoline() {
    naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, [rsp + 15*8]", // vector
        "mov rsi, rsp",          // pointer to the whole saved frame
        "call {handler}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "add rsp, 16", // drop the stub's vector and dummy error code
        "iretq",
        handler = sym rust_interrupt_handler,
    );
}

/// Emits one naked stub for `$vector` named `$name`: it only exists to
/// get the vector number onto the stack before falling into the shared
/// [`common_trampoline`], matching the discipline every other pluggable
/// point in this kernel uses of keeping machine-specific glue as thin as
/// possible (spec §9).
macro_rules! interrupt_stub {
    ($name:ident, $vector:expr) => {
        #[naked]
        pub unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {trampoline}",
                vector = const $vector,
                trampoline = sym $crate::arch::x86_64::interrupt::handler::common_trampoline,
            );
        }
    };
}

pub(crate) use interrupt_stub;
