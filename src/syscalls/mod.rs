//! # Syscall Gate
//!
//! Software enters the kernel with `int 0x80`. The gate is an ordinary
//! [`InterruptHandler`] on the syscall vector: it decodes the registers,
//! runs the call, writes the result (or `-errno`) back into `rax` and,
//! when the call yielded, blocked or exited, hands the frame to the
//! scheduler before returning.

pub mod dispatcher;
pub mod handlers;
pub mod numbers;

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

use crate::interrupts::{InterruptHandler, Resume, TrapFrame};
use crate::task::TaskScheduler;
pub use dispatcher::{dispatch_syscall, SyscallContext, SyscallError, SyscallResult};
pub use numbers::SyscallNumber;

/// Where `Write` output ends up.
pub trait Console: Send {
    fn write_str(&mut self, text: &str);
}

pub struct SyscallGateway {
    scheduler: Arc<Mutex<TaskScheduler>>,
    console: Box<dyn Console>,
}

impl SyscallGateway {
    pub fn new(scheduler: Arc<Mutex<TaskScheduler>>, console: Box<dyn Console>) -> Self {
        Self { scheduler, console }
    }
}

impl InterruptHandler for SyscallGateway {
    fn handle_interrupt(&mut self, frame: &mut TrapFrame) -> Resume {
        let ctx = SyscallContext::from_frame(frame);
        let mut scheduler = self.scheduler.lock();

        let result = dispatch_syscall(ctx, &mut scheduler, self.console.as_mut());
        frame.rax = match result {
            Ok(value) => value,
            Err(err) => err.as_errno() as u64,
        };

        if scheduler.take_need_resched() {
            scheduler.schedule(frame)
        } else {
            Resume::Interrupted
        }
    }
}

/// Callers' side of the gate. These assume the default syscall vector.
pub mod raw {
    use super::SyscallNumber;
    use crate::config::KernelConfig;

    pub const GATE: u8 = KernelConfig::default().syscall_vector;

    pub fn syscall3(number: SyscallNumber, arg0: u64, arg1: u64, arg2: u64) -> i64 {
        #[cfg(target_os = "none")]
        {
            let ret: u64;
            // rbx is reserved by LLVM, so arg0 is swapped in and out around the trap.
            unsafe {
                core::arch::asm!(
                    "xchg {arg0}, rbx",
                    "int {gate}",
                    "xchg {arg0}, rbx",
                    arg0 = inout(reg) arg0 => _,
                    gate = const GATE,
                    inlateout("rax") number as u64 => ret,
                    in("rcx") arg1,
                    in("rdx") arg2,
                );
            }
            ret as i64
        }
        #[cfg(not(target_os = "none"))]
        {
            let _ = (number, arg0, arg1, arg2);
            super::SyscallError::NotImplemented.as_errno()
        }
    }

    pub fn yield_now() {
        syscall3(SyscallNumber::Yield, 0, 0, 0);
    }

    /// Returns once another task has unblocked the caller.
    pub fn block_current() -> i64 {
        syscall3(SyscallNumber::Block, 0, 0, 0)
    }

    pub fn unblock(id: u32) -> i64 {
        syscall3(SyscallNumber::Unblock, u64::from(id), 0, 0)
    }

    pub fn write(text: &str) -> i64 {
        syscall3(SyscallNumber::Write, text.as_ptr() as u64, text.len() as u64, 0)
    }

    pub fn exit(status: i32) -> ! {
        syscall3(SyscallNumber::Exit, status as u64, 0, 0);
        crate::arch::halt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::gdt;
    use crate::task::{TaskId, TaskState};
    use std::string::String;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<StdMutex<String>>);

    impl Console for Captured {
        fn write_str(&mut self, text: &str) {
            self.0.lock().unwrap().push_str(text);
        }
    }

    extern "C" fn worker() -> ! {
        unreachable!()
    }

    fn gateway() -> (SyscallGateway, Arc<Mutex<TaskScheduler>>, Captured) {
        let scheduler = Arc::new(Mutex::new(TaskScheduler::new(gdt::selectors(), 4096).unwrap()));
        let console = Captured::default();
        let gate = SyscallGateway::new(scheduler.clone(), Box::new(console.clone()));
        (gate, scheduler, console)
    }

    fn call(number: u64, arg0: u64, arg1: u64) -> TrapFrame {
        TrapFrame {
            vector: 0x80,
            rax: number,
            rbx: arg0,
            rcx: arg1,
            ..TrapFrame::default()
        }
    }

    #[test]
    fn write_reaches_console() {
        let (mut gate, _, console) = gateway();
        let text = "hello, kernel";
        let mut frame = call(4, text.as_ptr() as u64, text.len() as u64);
        assert_eq!(gate.handle_interrupt(&mut frame), Resume::Interrupted);
        assert_eq!(frame.rax, text.len() as u64);
        assert_eq!(console.0.lock().unwrap().as_str(), text);
    }

    #[test]
    fn bad_write_arguments_return_einval() {
        let (mut gate, _, console) = gateway();
        let mut frame = call(4, 0, 5);
        gate.handle_interrupt(&mut frame);
        assert_eq!(frame.rax as i64, -22);

        let bytes = [0xFFu8, 0xFE];
        let mut frame = call(4, bytes.as_ptr() as u64, 2);
        gate.handle_interrupt(&mut frame);
        assert_eq!(frame.rax as i64, -22);
        assert!(console.0.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_number_returns_enosys() {
        let (mut gate, _, _) = gateway();
        let mut frame = call(999, 0, 0);
        assert_eq!(gate.handle_interrupt(&mut frame), Resume::Interrupted);
        assert_eq!(frame.rax as i64, -38);
    }

    #[test]
    fn getpid_reports_current_task() {
        let (mut gate, _, _) = gateway();
        let mut frame = call(20, 0, 0);
        gate.handle_interrupt(&mut frame);
        assert_eq!(frame.rax, u64::from(TaskId::KERNEL.0));
    }

    #[test]
    fn yield_switches_to_the_next_task() {
        let (mut gate, scheduler, _) = gateway();
        let id = scheduler.lock().spawn("worker", worker).unwrap();
        let mut frame = call(24, 0, 0);
        let Resume::Switch(next) = gate.handle_interrupt(&mut frame) else {
            panic!("yield did not switch");
        };
        assert_eq!(frame.rax, 0);
        assert_eq!(scheduler.lock().current_id(), id);

        let next = unsafe { next.as_ref() };
        let selectors = gdt::selectors();
        assert_eq!(next.rip, worker as usize as u64);
        assert_eq!(next.cs, u64::from(selectors.code));
        assert_eq!(next.ss, u64::from(selectors.data));
    }

    fn running(scheduler: &TaskScheduler) -> usize {
        scheduler.tasks().filter(|t| t.state == TaskState::Running).count()
    }

    #[test]
    fn block_switches_away_in_the_same_crossing() {
        let (mut gate, scheduler, _) = gateway();
        let id = scheduler.lock().spawn("worker", worker).unwrap();

        let mut frame = call(29, 0, 0);
        assert!(matches!(gate.handle_interrupt(&mut frame), Resume::Switch(_)));
        assert_eq!(frame.rax, 0);

        let s = scheduler.lock();
        assert_eq!(s.state(TaskId::KERNEL), Some(TaskState::Blocked));
        assert_eq!(s.current_id(), id);
        assert_eq!(s.state(id), Some(TaskState::Running));
        assert_eq!(running(&s), 1);
    }

    #[test]
    fn blocking_the_last_ready_task_runs_idle() {
        let (mut gate, scheduler, _) = gateway();
        let mut frame = call(29, 0, 0);
        assert!(matches!(gate.handle_interrupt(&mut frame), Resume::Switch(_)));
        let s = scheduler.lock();
        assert_eq!(s.current_id(), TaskId::IDLE);
        assert_eq!(s.state(TaskId::IDLE), Some(TaskState::Running));
    }

    #[test]
    fn unblock_returns_a_task_to_the_rotation() {
        let (mut gate, scheduler, _) = gateway();
        let id = scheduler.lock().spawn("worker", worker).unwrap();

        let mut boot = call(29, 0, 0);
        let Resume::Switch(task_frame) = gate.handle_interrupt(&mut boot) else {
            panic!("block did not switch");
        };
        let task_frame = unsafe { &mut *task_frame.as_ptr() };
        task_frame.rax = 37;
        task_frame.rbx = u64::from(TaskId::KERNEL.0);

        assert_eq!(gate.handle_interrupt(task_frame), Resume::Interrupted);
        assert_eq!(task_frame.rax, 0);
        {
            let s = scheduler.lock();
            assert_eq!(s.state(TaskId::KERNEL), Some(TaskState::Ready));
            assert_eq!(s.current_id(), id);
            assert_eq!(running(&s), 1);
        }

        // Already Ready.
        task_frame.rax = 37;
        gate.handle_interrupt(task_frame);
        assert_eq!(task_frame.rax as i64, -22);

        task_frame.rax = 37;
        task_frame.rbx = 99;
        gate.handle_interrupt(task_frame);
        assert_eq!(task_frame.rax as i64, -3);

        task_frame.rax = 37;
        task_frame.rbx = u64::MAX;
        gate.handle_interrupt(task_frame);
        assert_eq!(task_frame.rax as i64, -3);
    }

    #[test]
    fn errno_maps_back_to_the_error() {
        for err in [
            SyscallError::PermissionDenied,
            SyscallError::NoSuchTask,
            SyscallError::InvalidArgument,
            SyscallError::NoMemory,
            SyscallError::NotImplemented,
        ] {
            assert_eq!(SyscallError::from_errno(err.as_errno()), err);
        }
        assert_eq!(SyscallError::from_errno(-99), SyscallError::NotImplemented);
    }

    #[test]
    fn exit_switches_away_for_good() {
        let (mut gate, scheduler, _) = gateway();
        let id = scheduler.lock().spawn("worker", worker).unwrap();

        let mut boot = call(24, 0, 0);
        let Resume::Switch(task_frame) = gate.handle_interrupt(&mut boot) else {
            panic!("yield did not switch");
        };
        let task_frame = unsafe { &mut *task_frame.as_ptr() };
        task_frame.rax = 0;
        task_frame.rbx = 7;

        assert!(matches!(gate.handle_interrupt(task_frame), Resume::Switch(_)));
        let s = scheduler.lock();
        assert_eq!(s.current_id(), TaskId::KERNEL);
        assert_eq!(s.state(id), None);
    }

    #[test]
    fn get_ticks_never_fails() {
        let (mut gate, _, _) = gateway();
        let mut frame = call(61, 0, 0);
        gate.handle_interrupt(&mut frame);
        assert!((frame.rax as i64) >= 0);
    }
}
