//! # Interrupt Dispatch
//!
//! Every vector enters through the same assembly stub (see `arch::idt`),
//! which builds a [`TrapFrame`] and calls [`InterruptDispatcher::dispatch`].
//! The dispatcher looks the vector up, runs the registered handler or the
//! class default, acknowledges hardware lines and tells the stub which
//! frame to resume. A handler that blocked or woke tasks without switching
//! itself gets the switch done for it by the attached scheduler.
//!
//! ```text
//! vector   0 ..  31   CPU exceptions       default: halt (breakpoint: resume)
//! vector  irq_base+k  IRQ line k           default: EOI only
//! vector  syscall     software gate        default: ignore
//! others              software interrupts  default: ignore
//! ```

pub mod pic;
pub mod timer;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::{Mutex, Once};

use crate::arch;
use crate::config::{KernelConfig, FIRST_FREE_VECTOR, IRQ_LINES};
use crate::task::TaskScheduler;
pub use pic::{InterruptController, Irq, Pic8259};

const BREAKPOINT: u8 = 3;

static EXCEPTION_NAMES: [&str; 32] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point",
    "alignment check",
    "machine check",
    "SIMD floating-point",
    "virtualization",
    "control protection",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "hypervisor injection",
    "VMM communication",
    "security",
    "reserved",
];

/// Register state saved by the entry stub, lowest address first. The
/// layout is shared with the assembly in `arch::idt`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    // pushed by the CPU
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// What the entry stub should return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// The frame that was interrupted.
    Interrupted,
    /// Another saved frame, i.e. a context switch.
    Switch(NonNull<TrapFrame>),
}

/// A capability bound to one vector. Runs with interrupts masked and must
/// neither block nor unmask them.
pub trait InterruptHandler: Send {
    fn handle_interrupt(&mut self, frame: &mut TrapFrame) -> Resume;
}

pub type SharedHandler = Arc<Mutex<dyn InterruptHandler>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorClass {
    Exception(u8),
    Irq(u8),
    Syscall,
    Software(u8),
}

/// A CPU exception nobody handled. There is no recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalFault {
    pub vector: u8,
    pub error_code: u64,
    pub rip: u64,
}

impl FatalFault {
    pub fn name(&self) -> &'static str {
        EXCEPTION_NAMES
            .get(usize::from(self.vector))
            .copied()
            .unwrap_or("unknown")
    }
}

impl fmt::Display for FatalFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "EXCEPTION: {} (vector {}, error code {:#x}) at {:#x}",
            self.name(),
            self.vector,
            self.error_code,
            self.rip
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    IrqBaseOverlapsExceptions(u8),
    IrqRangeOverflow(u8),
    SyscallInsideIrqRange(u8),
    NoSuchIrqLine(u8),
    AlreadyInstalled,
}

impl fmt::Display for InterruptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IrqBaseOverlapsExceptions(base) => {
                write!(f, "IRQ base {:#x} overlaps the exception vectors", base)
            }
            Self::IrqRangeOverflow(base) => write!(f, "IRQ base {:#x} runs past vector 255", base),
            Self::SyscallInsideIrqRange(v) => {
                write!(f, "syscall vector {:#x} lies inside the IRQ range", v)
            }
            Self::NoSuchIrqLine(line) => write!(f, "no IRQ line {}", line),
            Self::AlreadyInstalled => f.write_str("an interrupt dispatcher is already installed"),
        }
    }
}

pub struct InterruptDispatcher {
    irq_base: u8,
    syscall_vector: u8,
    vectors: Mutex<[Option<SharedHandler>; 256]>,
    controller: Mutex<Box<dyn InterruptController>>,
    scheduler: Once<Arc<Mutex<TaskScheduler>>>,
    active: AtomicBool,
    unhandled: AtomicU64,
    spurious: AtomicU64,
}

impl InterruptDispatcher {
    /// Validates the vector layout and remaps the controller. Every line
    /// stays masked until [`activate`](Self::activate).
    pub fn new(
        config: &KernelConfig,
        mut controller: Box<dyn InterruptController>,
    ) -> Result<Self, InterruptError> {
        let irq_base = config.irq_base;
        if irq_base < FIRST_FREE_VECTOR {
            return Err(InterruptError::IrqBaseOverlapsExceptions(irq_base));
        }
        if irq_base.checked_add(IRQ_LINES - 1).is_none() {
            return Err(InterruptError::IrqRangeOverflow(irq_base));
        }
        let syscall_vector = config.syscall_vector;
        let irq_end = u16::from(irq_base) + u16::from(IRQ_LINES);
        if (u16::from(irq_base)..irq_end).contains(&u16::from(syscall_vector)) {
            return Err(InterruptError::SyscallInsideIrqRange(syscall_vector));
        }

        controller.initialize();
        log::debug!(
            "interrupts: IRQs on {:#x}..{:#x}, syscall gate {:#x}",
            irq_base,
            irq_end,
            syscall_vector
        );

        Ok(Self {
            irq_base,
            syscall_vector,
            vectors: Mutex::new(core::array::from_fn(|_| None)),
            controller: Mutex::new(controller),
            scheduler: Once::new(),
            active: AtomicBool::new(false),
            unhandled: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
        })
    }

    pub fn irq_base(&self) -> u8 {
        self.irq_base
    }

    pub fn syscall_vector(&self) -> u8 {
        self.syscall_vector
    }

    pub fn irq_vector(&self, line: u8) -> Result<u8, InterruptError> {
        if line < IRQ_LINES {
            Ok(self.irq_base + line)
        } else {
            Err(InterruptError::NoSuchIrqLine(line))
        }
    }

    pub fn classify(&self, vector: u8) -> VectorClass {
        if vector < FIRST_FREE_VECTOR {
            VectorClass::Exception(vector)
        } else if vector >= self.irq_base && vector - self.irq_base < IRQ_LINES {
            VectorClass::Irq(vector - self.irq_base)
        } else if vector == self.syscall_vector {
            VectorClass::Syscall
        } else {
            VectorClass::Software(vector)
        }
    }

    /// Binds `handler` to `vector`, returning whatever was bound before.
    pub fn register(&self, vector: u8, handler: SharedHandler) -> Option<SharedHandler> {
        let previous = arch::without_interrupts(|| {
            self.vectors.lock()[usize::from(vector)].replace(handler)
        });
        if previous.is_some() {
            log::debug!("interrupts: handler for vector {:#x} replaced", vector);
        }
        previous
    }

    pub fn register_irq(
        &self,
        line: u8,
        handler: SharedHandler,
    ) -> Result<Option<SharedHandler>, InterruptError> {
        let vector = self.irq_vector(line)?;
        Ok(self.register(vector, handler))
    }

    pub fn unregister(&self, vector: u8) -> Option<SharedHandler> {
        arch::without_interrupts(|| self.vectors.lock()[usize::from(vector)].take())
    }

    pub fn is_registered(&self, vector: u8) -> bool {
        self.vectors.lock()[usize::from(vector)].is_some()
    }

    /// Unmasks the controller and sets IF. Calling it again does nothing.
    pub fn activate(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            log::warn!("interrupts: already active");
            return;
        }
        self.controller.lock().enable();
        log::info!("interrupts: active");
        arch::enable_interrupts();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Interrupts that reached a class default rather than a handler.
    pub fn unhandled_count(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    /// IRQs the controller withdrew before they were serviced.
    pub fn spurious_count(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }

    /// Lets `dispatch` act on reschedule requests left by any handler.
    /// Only the first scheduler attached is kept.
    pub fn attach_scheduler(&self, scheduler: Arc<Mutex<TaskScheduler>>) -> bool {
        let mut attached = false;
        self.scheduler.call_once(|| {
            attached = true;
            scheduler
        });
        if !attached {
            log::warn!("interrupts: a scheduler is already attached");
        }
        attached
    }

    pub fn dispatch(&self, frame: &mut TrapFrame) -> Result<Resume, FatalFault> {
        let vector = frame.vector as u8;
        let class = self.classify(vector);

        if let VectorClass::Irq(line) = class {
            if self.controller.lock().is_spurious(vector) {
                self.spurious.fetch_add(1, Ordering::Relaxed);
                log::trace!("interrupts: spurious IRQ {}", line);
                return Ok(Resume::Interrupted);
            }
        }

        // Clone out so the table is not locked while the handler runs.
        let handler = self.vectors.lock()[usize::from(vector)].clone();

        let mut resume = match handler {
            Some(handler) => handler.lock().handle_interrupt(frame),
            None => {
                self.unhandled.fetch_add(1, Ordering::Relaxed);
                self.fallback(class, frame)?
            }
        };

        // Handlers have dropped their locks by now, the scheduler's included.
        if resume == Resume::Interrupted {
            if let Some(scheduler) = self.scheduler.get() {
                let mut scheduler = scheduler.lock();
                if scheduler.take_need_resched() {
                    resume = scheduler.schedule(frame);
                }
            }
        }

        if let VectorClass::Irq(_) = class {
            self.controller.lock().end_of_interrupt(vector);
        }
        Ok(resume)
    }

    fn fallback(&self, class: VectorClass, frame: &TrapFrame) -> Result<Resume, FatalFault> {
        match class {
            VectorClass::Exception(BREAKPOINT) => {
                log::warn!("EXCEPTION: BREAKPOINT at {:#x}", frame.rip);
                Ok(Resume::Interrupted)
            }
            VectorClass::Exception(vector) => Err(FatalFault {
                vector,
                error_code: frame.error_code,
                rip: frame.rip,
            }),
            VectorClass::Irq(line) => {
                log::trace!("interrupts: unhandled IRQ {}", line);
                Ok(Resume::Interrupted)
            }
            VectorClass::Syscall | VectorClass::Software(_) => Ok(Resume::Interrupted),
        }
    }
}

static DISPATCHER: Once<InterruptDispatcher> = Once::new();

/// Makes `dispatcher` the target of the entry stubs for the rest of the
/// kernel's life.
pub fn install(dispatcher: InterruptDispatcher) -> Result<&'static InterruptDispatcher, InterruptError> {
    if DISPATCHER.is_completed() {
        return Err(InterruptError::AlreadyInstalled);
    }
    Ok(DISPATCHER.call_once(|| dispatcher))
}

pub fn installed() -> Option<&'static InterruptDispatcher> {
    DISPATCHER.get()
}
