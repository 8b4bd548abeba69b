//! # Emudore Kernel
//!
//! Privileged core of a single-address-space x86_64 kernel whose only job
//! is to host an emulated home computer once boot completes.
//!
//! ## Subsystems
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `memory`     | First-fit heap over a fixed region, global allocator  |
//! | `arch`       | GDT/TSS, IDT entry stubs, halt and masking helpers    |
//! | `interrupts` | Vector table, dispatcher, 8259 PIC, PIT timer         |
//! | `syscalls`   | The `int 0x80` gateway and its call table             |
//! | `task`       | Preemptive round-robin scheduler                      |
//! | `drivers`    | Driver lifecycle registry and concrete devices        |
//! | `fs`         | MBR partition table parsing                           |
//! | `kernel`     | Ordered bootstrap sequence and init status tracking   |
//!
//! Everything except the `arch` instruction wrappers is plain data and
//! logic, so the crate builds against `std` under `cfg(test)` and the core
//! is exercised on the host.

#![cfg_attr(not(test), no_std)]
#![feature(abi_x86_interrupt)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod hal;
pub mod interrupts;
pub mod kernel;
pub mod logger;
pub mod memory;
pub mod syscalls;
pub mod task;

pub use config::KernelConfig;
pub use error::KernelError;
