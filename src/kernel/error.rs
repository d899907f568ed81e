//!
//! Kernel error taxonomy
//!
//! One closed enum for every fallible operation the core exposes, rather
//! than a family of per-subsystem error types. Mirrors spec §7 one for
//! one: every kind named there has exactly one variant here.

use core::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KernelError {
    NullPointer,
    NoMoreMemory,
    IncorrectValue,
    UnauthorizedAction,
    InterruptAlreadyRegistered,
    InterruptNotRegistered,
    UnauthorizedInterruptLine,
    NoSuchIrq,
    Destroyed,
    NotBlocked,
    Cancelled,
    NoSuchId,
    NotSupported,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NullPointer => "mandatory pointer argument is null",
            Self::NoMoreMemory => "heap returned no memory",
            Self::IncorrectValue => "argument out of range or primitive uninitialized",
            Self::UnauthorizedAction => "action not permitted in the current state",
            Self::InterruptAlreadyRegistered => "interrupt vector already has a handler",
            Self::InterruptNotRegistered => "interrupt vector has no handler",
            Self::UnauthorizedInterruptLine => "interrupt line outside the valid range",
            Self::NoSuchIrq => "IRQ not mapped by the installed interrupt driver",
            Self::Destroyed => "operation on a destroyed synchronization primitive",
            Self::NotBlocked => "futex wait condition already satisfied",
            Self::Cancelled => "wait aborted externally",
            Self::NoSuchId => "thread id no longer valid",
            Self::NotSupported => "timer role not recognized",
        };
        f.write_str(s)
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
