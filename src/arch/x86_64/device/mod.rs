//!
//! Architecture-specific device glue
//!
//! Concrete device drivers (serial console, LAPIC, timers) are external
//! collaborators plugged in at kickstart (spec §1); this module only
//! carries the raw CPU instruction wrappers every other arch file needs.

pub mod cpu;
