#![cfg_attr(target_os = "none", no_std, no_main)]

#[cfg(target_os = "none")]
extern crate alloc;
#[cfg(target_os = "none")]
extern crate rlibc;

#[cfg(target_os = "none")]
use alloc::boxed::Box;
#[cfg(target_os = "none")]
use bootloader_api::{entry_point, BootInfo};
#[cfg(target_os = "none")]
use core::panic::PanicInfo;

#[cfg(target_os = "none")]
use emudore_kernel::{
    arch,
    drivers::router::EmulatorIo,
    kernel::{init_kernel, Kernel},
    logger, println,
    syscalls::raw,
    KernelConfig,
};

#[cfg(target_os = "none")]
entry_point!(kernel_main);

/// Stand-in for the emulated machine until one is linked in: it only
/// reports what the keyboard router hands it.
#[cfg(target_os = "none")]
struct HeadlessMachine;

#[cfg(target_os = "none")]
impl EmulatorIo for HeadlessMachine {
    fn key_down(&mut self, code: u8) {
        log::debug!("machine: key down {:#04x}", code);
    }

    fn key_up(&mut self, code: u8) {
        log::trace!("machine: key up {:#04x}", code);
    }

    fn enter_monitor(&mut self) {
        println!("\n(monitor)");
    }

    fn monitor_key_down(&mut self, code: u8) {
        log::debug!("monitor: key {:#04x}", code);
    }

    fn set_graphics_mode(&mut self) {
        log::debug!("machine: graphics mode restored");
    }

    fn reload_palette(&mut self) {
        log::debug!("machine: palette reloaded");
    }
}

#[cfg(target_os = "none")]
extern "C" fn heartbeat() -> ! {
    raw::write("heartbeat: first task scheduled\n");
    raw::exit(0)
}

#[cfg(target_os = "none")]
fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    let config = KernelConfig::from_build_env();
    if let Err(e) = logger::init(config.log_level) {
        println!("Failed to init logger: {}", e);
    }
    log::info!("boot: {} memory regions from the loader", boot_info.memory_regions.len());

    // Zero-sized, so boxing it before the heap exists does not allocate.
    let machine = Box::new(HeadlessMachine);
    let kernel = match init_kernel(config, machine) {
        Ok(kernel) => kernel,
        Err(e) => {
            println!("Kernel initialization failed: {}", e);
            arch::halt();
        }
    };

    kernel.hand_off(run_machine)
}

#[cfg(target_os = "none")]
fn run_machine(kernel: Kernel) -> ! {
    if let Err(e) = kernel.spawn("heartbeat", heartbeat) {
        log::warn!("boot: no heartbeat task: {}", e);
    }
    loop {
        arch::wait_for_interrupt();
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("KERNEL PANIC: {}", info);
    arch::halt()
}

#[cfg(not(target_os = "none"))]
fn main() {}
