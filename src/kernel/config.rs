//!
//! Compile-time kernel tunables
//!
//! Named constants instead of magic numbers scattered through the core.
//! Sizes are in bytes unless the name says otherwise.

/// Number of entries in the interrupt vector table (spec §3, §4.D).
pub const INT_ENTRY_COUNT: usize = 256;

/// First and last vector the core will hand out via `register`/`remove`.
/// 0..31 are reserved for CPU exceptions.
pub const MIN_INTERRUPT_LINE: u16 = 32;
pub const MAX_INTERRUPT_LINE: u16 = 254;

/// Reserved vectors (spec §6 table).
pub const VECTOR_PANIC: u16 = 32;
pub const VECTOR_SCHEDULE: u16 = 33;
pub const VECTOR_IPI: u16 = 34;
pub const VECTOR_PIC_IRQ_BASE: u16 = 48;
pub const VECTOR_IOAPIC_IRQ_BASE: u16 = 64;
pub const VECTOR_SPURIOUS: u16 = 255;

/// Maximum number of CPUs the core/IPI manager will track. Each carries a
/// fixed-capacity IPI parameter queue of this size.
pub const SOC_CPU_COUNT: usize = 64;
pub const IPI_QUEUE_CAPACITY: usize = 32;

/// Bucket count for the segregated free-list heap allocator (spec §4.B):
/// bucket `k` holds free chunks of size in `(2^(k-1), 2^k]`, `k` in `1..=32`.
pub const HEAP_BUCKET_COUNT: usize = 32;

/// Byte alignment every heap allocation is rounded up to.
pub const HEAP_ALIGNMENT: usize = 4;

/// Depth of the TTY manager's input/output ring buffers.
pub const TTY_BUFFER_SIZE: usize = 512;
