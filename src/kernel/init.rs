//! Kernel initialization phases
use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

use crate::arch::gdt::{self, KernelSelectors};
use crate::arch::{self, idt};
use crate::config::KernelConfig;
use crate::drivers::ata::{AtaDriver, DiskError, PRIMARY_IRQ};
use crate::drivers::keyboard::{self, KeyboardDriver};
use crate::drivers::pci::PciController;
use crate::drivers::router::{EmulatorIo, KeyboardEventRouter};
use crate::drivers::speaker::SpeakerDriver;
use crate::drivers::{bind_irq, DriverRegistry};
use crate::error::KernelError;
use crate::fs::msdos::{self, BootSector, PartitionError};
use crate::hal::{PortIo, X86Ports};
use crate::interrupts::pic::{Irq, Pic8259};
use crate::interrupts::timer::{self, TimerTick};
use crate::interrupts::{self, InterruptDispatcher};
use crate::kernel::status::{register_component, update_component_status, InitStatus};
use crate::logger::SerialConsole;
use crate::memory;
use crate::println;
use crate::syscalls::SyscallGateway;
use crate::task::{self, SchedulerError, TaskEntry, TaskId, TaskScheduler};

const DESCRIPTOR_TABLES: &str = "Descriptor Tables";
const HEAP: &str = "Heap";
const INTERRUPTS: &str = "Interrupt System";
const SCHEDULER: &str = "Scheduler";
const DRIVERS: &str = "Drivers";
const DISK: &str = "Disk";

const PHASES: [&str; 6] = [DESCRIPTOR_TABLES, HEAP, INTERRUPTS, SCHEDULER, DRIVERS, DISK];

/// Drivers the kernel brings up, with handles to the ones boot code talks
/// to directly.
pub struct DeviceSet<P: PortIo> {
    pub registry: DriverRegistry,
    pub router: Arc<Mutex<KeyboardEventRouter>>,
    pub disk: Arc<Mutex<AtaDriver<P>>>,
    pub speaker: Arc<Mutex<SpeakerDriver<P>>>,
}

/// Everything that is up once [`init_kernel`] returns.
pub struct Kernel {
    pub config: KernelConfig,
    pub dispatcher: &'static InterruptDispatcher,
    pub scheduler: Arc<Mutex<TaskScheduler>>,
    pub devices: DeviceSet<X86Ports>,
    /// `None` when there is no disk or its boot sector is not valid.
    pub partitions: Option<BootSector>,
}

impl Kernel {
    /// Adds a task to the rotation. Safe to call with interrupts live.
    pub fn spawn(&self, name: &'static str, entry: TaskEntry) -> Result<TaskId, KernelError> {
        let id = arch::without_interrupts(|| self.scheduler.lock().spawn(name, entry))?;
        Ok(id)
    }

    /// Parks `id`. When `id` is the caller the block goes through the
    /// syscall gate, so the caller is switched away before this returns.
    pub fn block(&self, id: TaskId) -> Result<(), KernelError> {
        let is_caller = arch::without_interrupts(|| -> Result<bool, SchedulerError> {
            let mut scheduler = self.scheduler.lock();
            if scheduler.current_id() == id {
                return Ok(true);
            }
            scheduler.block(id)?;
            Ok(false)
        })?;
        if is_caller {
            task::block_current();
        }
        Ok(())
    }

    /// Puts a blocked task back in the rotation. It runs when its turn comes.
    pub fn unblock(&self, id: TaskId) -> Result<(), KernelError> {
        arch::without_interrupts(|| self.scheduler.lock().unblock(id))?;
        Ok(())
    }

    /// Gives the machine to the emulator. The boot context carries on as
    /// task 0 inside `start`.
    pub fn hand_off(self, start: impl FnOnce(Kernel) -> !) -> ! {
        println!("\nStarting Emulation...............[OK]");
        start(self)
    }
}

/// Initialize kernel in proper order with error handling
///
/// `emulator` is wired into the keyboard router before interrupts are
/// enabled, so no key can reach a half-built machine.
pub fn init_kernel(config: KernelConfig, emulator: Box<dyn EmulatorIo>) -> Result<Kernel, KernelError> {
    for name in PHASES {
        register_component(name);
    }
    println!("========================================");
    println!("        Emudore Kernel Initialization   ");
    println!("========================================\n");

    init_phase(1, DESCRIPTOR_TABLES, || {
        gdt::init();
        Ok(())
    })?;
    init_phase(2, HEAP, || {
        memory::init_heap(config.heap_size)?;
        Ok(())
    })?;
    let dispatcher = init_phase(3, INTERRUPTS, || init_interrupts(&config))?;
    let scheduler = init_phase(4, SCHEDULER, || {
        arch::without_interrupts(|| start_scheduling(&config, dispatcher, gdt::selectors(), &mut X86Ports))
    })?;
    let devices = init_phase(5, DRIVERS, || register_drivers(&config, dispatcher, X86Ports, emulator))?;

    let summary = devices.registry.activate_all();
    if summary.failed > 0 {
        update_component_status(DRIVERS, InitStatus::Degraded);
    }

    dispatcher.activate();
    log::info!("interrupts: enabled");

    let partitions = init_phase(6, DISK, || Ok(report_disk(&devices.disk).ok()))?;
    if partitions.is_none() {
        update_component_status(DISK, InitStatus::Degraded);
    }

    println!("\nKernel initialization complete!\n");
    Ok(Kernel {
        config,
        dispatcher,
        scheduler,
        devices,
        partitions,
    })
}

fn init_phase<T>(
    step: usize,
    name: &'static str,
    init_fn: impl FnOnce() -> Result<T, KernelError>,
) -> Result<T, KernelError> {
    update_component_status(name, InitStatus::InProgress);
    println!("[{}/{}] Initializing {}...", step, PHASES.len(), name);

    match init_fn() {
        Ok(value) => {
            update_component_status(name, InitStatus::Completed);
            println!("    ok: {} initialized\n", name);
            Ok(value)
        }
        Err(e) => {
            update_component_status(name, InitStatus::Failed(e));
            println!("    failed: {}: {}\n", name, e);
            Err(e)
        }
    }
}

/// Remaps the PICs, installs the dispatcher and loads the IDT. Nothing is
/// unmasked yet.
fn init_interrupts(config: &KernelConfig) -> Result<&'static InterruptDispatcher, KernelError> {
    config.validate()?;
    // Safety: `validate` keeps both PIC windows clear of the exception range
    // and of the syscall gate.
    let pic = unsafe { Pic8259::new(config.irq_base) };
    let dispatcher = interrupts::install(InterruptDispatcher::new(config, Box::new(pic))?)?;
    idt::init();
    Ok(dispatcher)
}

/// Builds the scheduler, programs the PIT and wires the timer and syscall
/// vectors to it.
pub fn start_scheduling(
    config: &KernelConfig,
    dispatcher: &InterruptDispatcher,
    selectors: KernelSelectors,
    pit: &mut dyn PortIo,
) -> Result<Arc<Mutex<TaskScheduler>>, KernelError> {
    let scheduler = Arc::new(Mutex::new(TaskScheduler::new(selectors, config.task_stack_size)?));

    timer::program_pit(pit, config.timer_hz);
    dispatcher.register_irq(
        Irq::Timer.line(),
        Arc::new(Mutex::new(TimerTick::new(scheduler.clone()))),
    )?;

    let gateway = SyscallGateway::new(scheduler.clone(), Box::new(SerialConsole));
    dispatcher.register(dispatcher.syscall_vector(), Arc::new(Mutex::new(gateway)));
    dispatcher.attach_scheduler(scheduler.clone());
    log::info!(
        "scheduler: {} Hz quantum, syscall gate {:#x}",
        config.timer_hz,
        dispatcher.syscall_vector()
    );
    Ok(scheduler)
}

/// Constructs every driver, binds the ones with IRQ lines and fills the
/// registry in activation order.
pub fn register_drivers<P>(
    config: &KernelConfig,
    dispatcher: &InterruptDispatcher,
    ports: P,
    emulator: Box<dyn EmulatorIo>,
) -> Result<DeviceSet<P>, KernelError>
where
    P: PortIo + Clone + 'static,
{
    let router = Arc::new(Mutex::new(KeyboardEventRouter::new(config.toggle_key)));
    router.lock().attach(emulator)?;

    let keyboard = bind_irq(
        dispatcher,
        keyboard::IRQ_LINE,
        KeyboardDriver::new(ports.clone(), router.clone()),
    )?;
    let pci = Arc::new(Mutex::new(PciController::new(ports.clone())));
    let disk = bind_irq(
        dispatcher,
        PRIMARY_IRQ,
        AtaDriver::new(ports.clone(), config.ata_io_base, true),
    )?;
    let speaker = Arc::new(Mutex::new(SpeakerDriver::new(ports)));

    let mut registry = DriverRegistry::new();
    registry.add(keyboard);
    registry.add(pci);
    registry.add(disk.clone());
    registry.add(speaker.clone());

    for (first, second) in registry.port_conflicts() {
        log::warn!("drivers: {} and {} claim the same ports", first, second);
    }

    Ok(DeviceSet {
        registry,
        router,
        disk,
        speaker,
    })
}

/// Reads the MBR of the primary master and prints its partition table.
pub fn report_disk<P: PortIo>(disk: &Mutex<AtaDriver<P>>) -> Result<BootSector, PartitionError> {
    println!("\nReading ATA Drive MBR: ");
    let result = arch::without_interrupts(|| {
        let mut disk = disk.lock();
        if disk.info().is_none() {
            return Err(PartitionError::Disk(DiskError::NoDevice));
        }
        msdos::read_partitions(&mut *disk)
    });

    match &result {
        Ok(sector) => {
            println!(" Valid boot sector!\n");
            msdos::print_report(sector);
        }
        Err(PartitionError::InvalidBootSector) => println!(" Invalid boot sector!"),
        Err(e) => log::warn!("disk: {}", e),
    }
    result
}
