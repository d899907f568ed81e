//!
//! TTY manager: the opaque print sink the core talks to (spec §1)
//!
//! A single `Writer` trait object is installed once by whichever console
//! driver the platform attaches (out of scope here); everything above
//! this module only ever calls `print!`/`println!`/`pr_*!`.

use crate::kernel::collections::fifo::FIFO;
use crate::kernel::config::TTY_BUFFER_SIZE;
use crate::kernel::manager_cluster::get_kernel_manager_cluster;
use crate::kernel::sync::spin_lock::SpinLockFlag;

use core::fmt;
use core::mem::MaybeUninit;

pub trait Writer: Sync {
    fn write(&self, buf: &[u8], size_to_write: usize) -> fmt::Result;
}

pub struct TtyManager {
    lock: SpinLockFlag,
    output_queue: FIFO<u8, TTY_BUFFER_SIZE>,
    output_driver: Option<&'static dyn Writer>,
}

impl TtyManager {
    pub const fn new() -> Self {
        Self {
            lock: SpinLockFlag::new(),
            output_queue: FIFO::new(0),
            output_driver: None,
        }
    }

    /// Installs the console driver. Only one may ever be installed,
    /// mirroring the "at most one writer" discipline the rest of the core
    /// uses for pluggable drivers (spec §9).
    pub fn open(&mut self, driver: &'static dyn Writer) -> bool {
        let _guard = self.lock.lock();
        if self.output_driver.is_some() {
            return false;
        }
        self.output_driver = Some(driver);
        true
    }

    pub fn puts(&mut self, s: &str) -> fmt::Result {
        if self.output_driver.is_none() {
            return Err(fmt::Error);
        }
        let _guard = match self.lock.try_lock() {
            Ok(g) => g,
            Err(()) => return Ok(()),
        };
        for c in s.bytes() {
            if !self.output_queue.enqueue(c) {
                self.flush()?;
                if !self.output_queue.enqueue(c) {
                    return Err(fmt::Error);
                }
            }
            if c == b'\n' {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> fmt::Result {
        let mut buffer: [u8; TTY_BUFFER_SIZE] =
            [unsafe { MaybeUninit::uninit().assume_init() }; TTY_BUFFER_SIZE];
        let mut len = 0usize;
        while let Some(b) = self.output_queue.dequeue() {
            buffer[len] = b;
            len += 1;
            if len == TTY_BUFFER_SIZE {
                break;
            }
        }
        self.output_driver.unwrap().write(&buffer, len)
    }
}

impl fmt::Write for TtyManager {
    fn write_str(&mut self, string: &str) -> fmt::Result {
        self.puts(string)
    }
}

pub fn kernel_print(args: fmt::Arguments) {
    use core::fmt::Write;
    let _ = get_kernel_manager_cluster()
        .tty_manager
        .lock()
        .write_fmt(args);
}

#[track_caller]
pub fn print_debug_message(level: usize, args: fmt::Arguments) {
    use core::panic::Location;
    let level_str = match level {
        3 => "[ERROR]",
        4 => "[WARN]",
        6 => "[INFO]",
        7 => "[DEBUG]",
        _ => "[???]",
    };
    let location = Location::caller();
    kernel_print(format_args!(
        "{} {}:{} | {}",
        level_str,
        location.file(),
        location.line(),
        args
    ));
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::kernel::tty::kernel_print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! println {
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(concat!($fmt, "\n"), $($arg)*));
}

/// Boot-trace level, lower in severity than `pr_info!`. Not present in
/// the teacher's original four macros; added because `print_debug_message`
/// already reserved level 7 for it but nothing emitted it (see SPEC_FULL.md).
#[macro_export]
macro_rules! pr_debug {
    ($fmt:expr) => ($crate::kernel::tty::print_debug_message(7, format_args!(concat!($fmt, "\n"))));
    ($fmt:expr, $($arg:tt)*) => ($crate::kernel::tty::print_debug_message(7, format_args!(concat!($fmt, "\n"), $($arg)*)));
}

#[macro_export]
macro_rules! pr_info {
    ($fmt:expr) => ($crate::kernel::tty::print_debug_message(6, format_args!(concat!($fmt, "\n"))));
    ($fmt:expr, $($arg:tt)*) => ($crate::kernel::tty::print_debug_message(6, format_args!(concat!($fmt, "\n"), $($arg)*)));
}

#[macro_export]
macro_rules! pr_warn {
    ($fmt:expr) => ($crate::kernel::tty::print_debug_message(4, format_args!(concat!($fmt, "\n"))));
    ($fmt:expr, $($arg:tt)*) => ($crate::kernel::tty::print_debug_message(4, format_args!(concat!($fmt, "\n"), $($arg)*)));
}

#[macro_export]
macro_rules! pr_err {
    ($fmt:expr) => ($crate::kernel::tty::print_debug_message(3, format_args!(concat!($fmt, "\n"))));
    ($fmt:expr, $($arg:tt)*) => ($crate::kernel::tty::print_debug_message(3, format_args!(concat!($fmt, "\n"), $($arg)*)));
}
