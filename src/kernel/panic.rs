//!
//! Panic subsystem (component 4.E)
//!
//! A kernel panic is terminal: print a header describing the
//! originating vector, dump the saved vCPU (general-purpose registers,
//! control registers, flags decoded field-by-field) and a best-effort
//! stack walk, then broadcast a `PANIC` IPI so every other CPU also
//! halts (spec §4.E), then spin with interrupts disabled forever. No
//! recovery path is defined.

use crate::arch::x86_64::device::cpu;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);

const MAX_STACK_WALK_FRAMES: usize = 16;

/// The architecture context saved by the interrupt trampoline at entry
/// (spec GLOSSARY "vCPU"). Every general-purpose register the trampoline
/// pushes, plus the CPU-pushed `rip`/`cs`/`rflags`/`rsp`/`ss` frame and
/// the control registers read at dump time.
#[derive(Clone, Copy)]
pub struct VCpuContext {
    pub vector: u64,
    pub error_code: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub cr0: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,
}

impl VCpuContext {
    /// An all-zero context, useful for exercising dispatch paths that
    /// don't depend on specific register contents (tests only).
    #[cfg(test)]
    pub fn zeroed() -> Self {
        VCpuContext {
            vector: 0,
            error_code: 0,
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
            cr0: 0,
            cr2: 0,
            cr3: 0,
            cr4: 0,
        }
    }
}

/// The crate's single `#[panic_handler]` delegates here (see `main.rs`).
/// Reached by a direct call, not through the interrupt vector, so there
/// is no saved vCPU frame to dump (spec §9 "Open questions" — this is
/// exactly the gap `panic_from_interrupt` exists to close); the control
/// registers, current flags, and a stack walk from the live frame
/// pointer are still read and printed on a best-effort basis.
pub fn panic_halt(info: &PanicInfo) -> ! {
    unsafe { cpu::cli() };
    if !PANICKING.swap(true, Ordering::SeqCst) {
        println!("\n!!!! Kernel panic !!!!\n---- Debug information ----");
        if let Some(location) = info.location() {
            println!("Line {} in {}", location.line(), location.file());
        }
        println!("Message: {}", info.message());
        dump_live_context();
        println!("---- End of Debug information ----\nSystem will halt.");
        broadcast_panic_ipi();
    }
    cpu::halt_loop();
}

/// Entry point for the software-triggered panic vector (spec §4.D, §4.E):
/// ordinary code disables interrupts and raises the reserved panic
/// vector rather than calling straight into this function, so the
/// interrupt trampoline has already pushed a full register context by
/// the time `InterruptManager::dispatch` reaches here. A direct call
/// would miss that saved context.
pub fn panic_from_interrupt(context: &VCpuContext) -> ! {
    unsafe { cpu::cli() };
    if !PANICKING.swap(true, Ordering::SeqCst) {
        println!(
            "\n!!!! Kernel panic (interrupt vector {}: {}) !!!!",
            context.vector,
            exception_name(context.vector)
        );
        println!("An unregistered interrupt vector fired, or the panic vector was raised.");
        dump_vcpu_context(context);
        broadcast_panic_ipi();
    }
    cpu::halt_loop();
}

fn exception_name(vector: u64) -> &'static str {
    match vector {
        0 => "divide error",
        1 => "debug",
        2 => "non-maskable interrupt",
        3 => "breakpoint",
        4 => "overflow",
        5 => "bound range exceeded",
        6 => "invalid opcode",
        7 => "device not available",
        8 => "double fault",
        9 => "coprocessor segment overrun",
        10 => "invalid TSS",
        11 => "segment not present",
        12 => "stack fault",
        13 => "general protection fault",
        14 => "page fault",
        16 => "x87 floating-point exception",
        17 => "alignment check",
        18 => "machine check",
        19 => "SIMD floating-point exception",
        20 => "virtualization exception",
        21 => "control protection exception",
        32 => "panic",
        33 => "scheduler software interrupt",
        34 => "IPI",
        255 => "spurious",
        _ => "interrupt",
    }
}

fn dump_vcpu_context(context: &VCpuContext) {
    println!("---- Registers ----");
    println!(
        "rax={:#018x} rbx={:#018x} rcx={:#018x} rdx={:#018x}",
        context.rax, context.rbx, context.rcx, context.rdx
    );
    println!(
        "rsi={:#018x} rdi={:#018x} rbp={:#018x} rsp={:#018x}",
        context.rsi, context.rdi, context.rbp, context.rsp
    );
    println!(
        "r8 ={:#018x} r9 ={:#018x} r10={:#018x} r11={:#018x}",
        context.r8, context.r9, context.r10, context.r11
    );
    println!(
        "r12={:#018x} r13={:#018x} r14={:#018x} r15={:#018x}",
        context.r12, context.r13, context.r14, context.r15
    );
    println!(
        "rip={:#018x} cs={:#x} ss={:#x} error_code={:#x}",
        context.rip, context.cs, context.ss, context.error_code
    );
    println!("---- Control registers ----");
    println!(
        "cr0={:#018x} cr2={:#018x} cr3={:#018x} cr4={:#018x}",
        context.cr0, context.cr2, context.cr3, context.cr4
    );
    println!("---- Flags ----");
    dump_rflags(context.rflags);
    println!("---- Stack walk ----");
    walk_stack(context.rbp);
}

fn dump_live_context() {
    println!("---- Control registers ----");
    println!(
        "cr0={:#018x} cr2={:#018x} cr3={:#018x} cr4={:#018x}",
        cpu::read_cr0(),
        cpu::read_cr2(),
        cpu::read_cr3(),
        cpu::read_cr4()
    );
    println!("---- Flags ----");
    dump_rflags(cpu::read_rflags());
    println!("---- Stack walk (no saved vCPU frame, walked from the live frame pointer) ----");
    walk_stack(cpu::read_rbp());
}

/// Decodes the named bits of `RFLAGS` field-by-field (spec §4.E).
fn dump_rflags(rflags: u64) {
    const NAMED_BITS: &[(u64, &str)] = &[
        (1 << 0, "CF"),
        (1 << 2, "PF"),
        (1 << 4, "AF"),
        (1 << 6, "ZF"),
        (1 << 7, "SF"),
        (1 << 8, "TF"),
        (1 << 9, "IF"),
        (1 << 10, "DF"),
        (1 << 11, "OF"),
        (1 << 14, "NT"),
    ];
    for (bit, name) in NAMED_BITS {
        if rflags & bit != 0 {
            print!("{name} ");
        }
    }
    println!("(raw {:#018x})", rflags);
}

/// Frame-pointer-chain walk, bounded so a corrupted chain can't loop
/// forever: each frame's return address is read at `[rbp + 8]`, the
/// caller's frame pointer at `[rbp]` (spec §4.E "best-effort").
fn walk_stack(mut frame_pointer: u64) {
    for depth in 0..MAX_STACK_WALK_FRAMES {
        if frame_pointer == 0 || frame_pointer % 8 != 0 {
            break;
        }
        let return_address = unsafe { *((frame_pointer + 8) as *const u64) };
        println!("#{depth}: {:#018x}", return_address);
        if return_address == 0 {
            break;
        }
        frame_pointer = unsafe { *(frame_pointer as *const u64) };
    }
}

#[cfg(feature = "smp")]
fn broadcast_panic_ipi() {
    crate::kernel::smp::try_broadcast_panic();
}

#[cfg(not(feature = "smp"))]
fn broadcast_panic_ipi() {}
