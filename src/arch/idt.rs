//! Interrupt Descriptor Table and entry stubs.
//!
//! Every vector except double fault points at a 16-byte stub that pushes
//! an error code (a zero when the CPU does not supply one) and the vector
//! number, then jumps to a common routine. That routine saves the
//! general-purpose registers, calls [`trap_entry`] with the resulting
//! [`TrapFrame`] and restores from whatever frame pointer comes back.
//!
//! ```text
//!  high  ss rsp rflags cs rip      <- CPU
//!        error_code vector         <- stub
//!        rax rbx ... r14 r15       <- common routine
//!  low   ^ rsp handed to trap_entry
//! ```

use core::arch::global_asm;
use core::ptr::addr_of;

use spin::Lazy;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};
use x86_64::VirtAddr;

use crate::arch::{self, gdt};
use crate::interrupts::{self, Resume, TrapFrame};

const STUB_SIZE: u64 = 16;

global_asm!(
    ".pushsection .text.emudore_isr, \"ax\"",
    ".balign 16",
    ".global emudore_isr_stubs",
    "emudore_isr_stubs:",
    ".set emudore_vec, 0",
    ".rept 256",
    ".balign 16",
    ".if !(emudore_vec == 8 || (emudore_vec >= 10 && emudore_vec <= 14) || emudore_vec == 17 || emudore_vec == 21 || emudore_vec == 29 || emudore_vec == 30)",
    "pushq $0",
    ".endif",
    "pushq $emudore_vec",
    "jmp emudore_isr_common",
    ".set emudore_vec, emudore_vec + 1",
    ".endr",
    "",
    "emudore_isr_common:",
    "pushq %rax",
    "pushq %rbx",
    "pushq %rcx",
    "pushq %rdx",
    "pushq %rsi",
    "pushq %rdi",
    "pushq %rbp",
    "pushq %r8",
    "pushq %r9",
    "pushq %r10",
    "pushq %r11",
    "pushq %r12",
    "pushq %r13",
    "pushq %r14",
    "pushq %r15",
    "cld",
    "movq %rsp, %rdi",
    "call {dispatch}",
    "movq %rax, %rsp",
    "popq %r15",
    "popq %r14",
    "popq %r13",
    "popq %r12",
    "popq %r11",
    "popq %r10",
    "popq %r9",
    "popq %r8",
    "popq %rbp",
    "popq %rdi",
    "popq %rsi",
    "popq %rdx",
    "popq %rcx",
    "popq %rbx",
    "popq %rax",
    "addq $16, %rsp",
    "iretq",
    ".popsection",
    dispatch = sym trap_entry,
    options(att_syntax)
);

extern "C" {
    static emudore_isr_stubs: u8;
}

fn stub(vector: u8) -> VirtAddr {
    // Safety: only the symbol's address is taken.
    let base = unsafe { addr_of!(emudore_isr_stubs) } as u64;
    VirtAddr::new(base + STUB_SIZE * u64::from(vector))
}

static IDT: Lazy<InterruptDescriptorTable> = Lazy::new(|| {
    let mut idt = InterruptDescriptorTable::new();

    // Safety: every address is a stub from the block above, and each stub
    // matches the error-code convention of its vector.
    unsafe {
        // CPU EXCEPTIONS (0-31)
        idt.divide_error.set_handler_addr(stub(0));
        idt.debug.set_handler_addr(stub(1));
        idt.non_maskable_interrupt.set_handler_addr(stub(2));
        idt.breakpoint.set_handler_addr(stub(3));
        idt.overflow.set_handler_addr(stub(4));
        idt.bound_range_exceeded.set_handler_addr(stub(5));
        idt.invalid_opcode.set_handler_addr(stub(6));
        idt.device_not_available.set_handler_addr(stub(7));
        idt.invalid_tss.set_handler_addr(stub(10));
        idt.segment_not_present.set_handler_addr(stub(11));
        idt.stack_segment_fault.set_handler_addr(stub(12));
        idt.general_protection_fault.set_handler_addr(stub(13));
        idt.page_fault.set_handler_addr(stub(14));
        idt.x87_floating_point.set_handler_addr(stub(16));
        idt.alignment_check.set_handler_addr(stub(17));
        idt.machine_check.set_handler_addr(stub(18));
        idt.simd_floating_point.set_handler_addr(stub(19));
        idt.virtualization.set_handler_addr(stub(20));

        // Double fault needs its own stack to avoid cascading failures
        idt.double_fault
            .set_handler_fn(double_fault_handler)
            .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);

        // IRQs, the syscall gate and every other software vector
        for vector in 32..=255u8 {
            idt[vector].set_handler_addr(stub(vector));
        }
    }

    idt
});

pub fn init() {
    IDT.load();
    log::debug!("idt: loaded, stubs at {:?}", stub(0));
}

/// Called by the common stub with interrupts masked.
extern "C" fn trap_entry(frame: *mut TrapFrame) -> *mut TrapFrame {
    // Safety: the stub passes the frame it just pushed on the current stack.
    let frame = unsafe { &mut *frame };

    let Some(dispatcher) = interrupts::installed() else {
        if frame.vector < 32 {
            log::error!("EXCEPTION before dispatcher install, vector {}", frame.vector);
            arch::halt();
        }
        return frame;
    };

    match dispatcher.dispatch(frame) {
        Ok(Resume::Interrupted) => frame,
        Ok(Resume::Switch(next)) => next.as_ptr(),
        Err(fault) => {
            log::error!("{}", fault);
            log::error!("{:#x?}", frame);
            arch::halt()
        }
    }
}

extern "x86-interrupt" fn double_fault_handler(stack_frame: InterruptStackFrame, error_code: u64) -> ! {
    log::error!("EXCEPTION: DOUBLE FAULT (error code {})\n{:#?}", error_code, stack_frame);
    arch::halt()
}
