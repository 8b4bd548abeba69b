//! Global Descriptor Table.
//!
//! ```text
//! index 0   null
//! index 1   kernel code   selector 0x08   task frames: cs
//! index 2   kernel data   selector 0x10   task frames: ss, ds, es
//! index 3   TSS (16 bytes, two slots)
//! ```
//!
//! Long mode ignores segment bases and limits, so the table only matters
//! for the privilege level it encodes and for the TSS, whose one job here
//! is handing the double-fault handler a known-good stack.

use core::ptr::addr_of;

use spin::Lazy;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 4;

/// The CPU switches to the IST top as-is, so it must already be aligned.
#[repr(C, align(16))]
struct IstStack([u8; DOUBLE_FAULT_STACK_SIZE]);

static mut DOUBLE_FAULT_STACK: IstStack = IstStack([0; DOUBLE_FAULT_STACK_SIZE]);

fn double_fault_stack_top() -> VirtAddr {
    // Only the address is taken; nothing here reads or writes the stack.
    let base = VirtAddr::from_ptr(unsafe { addr_of!(DOUBLE_FAULT_STACK) });
    base + DOUBLE_FAULT_STACK_SIZE as u64
}

static TSS: Lazy<TaskStateSegment> = Lazy::new(|| {
    let mut tss = TaskStateSegment::new();
    tss.interrupt_stack_table[usize::from(DOUBLE_FAULT_IST_INDEX)] = double_fault_stack_top();
    tss
});

/// Ring 0 selectors as raw values, the form a [`TrapFrame`] stores them in.
///
/// [`TrapFrame`]: crate::interrupts::TrapFrame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSelectors {
    pub code: u16,
    pub data: u16,
}

struct Layout {
    code: SegmentSelector,
    data: SegmentSelector,
    tss: SegmentSelector,
}

static GDT: Lazy<(GlobalDescriptorTable, Layout)> = Lazy::new(|| {
    let mut gdt = GlobalDescriptorTable::new();
    let layout = Layout {
        code: gdt.append(Descriptor::kernel_code_segment()),
        data: gdt.append(Descriptor::kernel_data_segment()),
        tss: gdt.append(Descriptor::tss_segment(&TSS)),
    };
    (gdt, layout)
});

/// Loads the table and reloads every segment register. Must run before
/// the IDT is loaded.
pub fn init() {
    let (ref gdt, ref layout) = *GDT;
    gdt.load();

    unsafe {
        use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};

        CS::set_reg(layout.code);
        DS::set_reg(layout.data);
        ES::set_reg(layout.data);
        SS::set_reg(layout.data);
        x86_64::instructions::tables::load_tss(layout.tss);
    }
    log::debug!("gdt: loaded, cs={:?} tss={:?}", layout.code, layout.tss);
}

/// Selectors for frames the kernel builds itself, i.e. new tasks.
pub fn selectors() -> KernelSelectors {
    let (_, ref layout) = *GDT;
    KernelSelectors {
        code: layout.code.0,
        data: layout.data.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x86_64::PrivilegeLevel;

    #[test]
    fn kernel_segments_sit_right_after_null() {
        let (_, ref layout) = *GDT;
        assert_eq!(layout.code.index(), 1);
        assert_eq!(layout.data.index(), 2);
        assert_eq!(layout.tss.index(), 3);
        assert_eq!(layout.code.rpl(), PrivilegeLevel::Ring0);
        assert_eq!(layout.data.rpl(), PrivilegeLevel::Ring0);
        assert_eq!(selectors(), KernelSelectors { code: 0x08, data: 0x10 });
    }

    #[test]
    fn double_fault_stack_top_is_aligned_and_inside_the_tss() {
        let top = TSS.interrupt_stack_table[usize::from(DOUBLE_FAULT_IST_INDEX)];
        assert_eq!(top, double_fault_stack_top());
        assert_eq!(top.as_u64() % 16, 0);
        let base = VirtAddr::from_ptr(unsafe { addr_of!(DOUBLE_FAULT_STACK) });
        assert_eq!(top - base, DOUBLE_FAULT_STACK_SIZE as u64);
    }
}
