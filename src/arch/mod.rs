//! # CPU Support
//!
//! - `gdt`: segments and the TSS (double-fault stack)
//! - `idt`: 256 entry stubs feeding the interrupt dispatcher
//!
//! The instruction wrappers below only execute privileged instructions on
//! bare metal. Host builds (unit tests) get inert stand-ins so the logic
//! above them can run unchanged.

pub mod gdt;
pub mod idt;

/// Runs `f` with maskable interrupts disabled, restoring the previous state.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    #[cfg(target_os = "none")]
    {
        x86_64::instructions::interrupts::without_interrupts(f)
    }
    #[cfg(not(target_os = "none"))]
    {
        f()
    }
}

/// `sti`. Only the interrupt controller's activation path calls this.
#[inline]
pub fn enable_interrupts() {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::enable();
}

/// Sleep until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_os = "none")]
    x86_64::instructions::hlt();
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}

/// Stops the machine for good.
pub fn halt() -> ! {
    loop {
        #[cfg(target_os = "none")]
        {
            x86_64::instructions::interrupts::disable();
            x86_64::instructions::hlt();
        }
        #[cfg(not(target_os = "none"))]
        core::hint::spin_loop();
    }
}
