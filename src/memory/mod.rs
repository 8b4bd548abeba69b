//! # Kernel Heap
//!
//! A static buffer embedded in the kernel image is handed to a
//! [`HeapAllocator`] at boot. On bare metal the same allocator backs
//! `alloc`, so task stacks, driver state and `Vec`s all come out of it.
//!
//! ```text
//! ┌──────────────┬────────┬──────────────┬────────┬───────────────┐
//! │ hdr │ used   │ hdr │  │ free         │ hdr    │ used ...      │
//! └──────────────┴────────┴──────────────┴────────┴───────────────┘
//!  ^ region start                                   region end ^
//! ```

pub mod heap;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, addr_of_mut, NonNull};

use spin::Mutex;

use crate::arch;
pub use heap::{AllocError, BlockInfo, HeapAllocator, HeapStats};

/// Capacity of the static heap buffer; `KernelConfig::heap_size` may use
/// less of it but never more.
pub const HEAP_CAPACITY: usize = 10 * 1024 * 1024;

#[repr(align(4096))]
struct HeapBuffer([u8; HEAP_CAPACITY]);
static mut HEAP_BUFFER: HeapBuffer = HeapBuffer([0; HEAP_CAPACITY]);

#[cfg_attr(target_os = "none", global_allocator)]
static KERNEL_HEAP: LockedHeap = LockedHeap::new();

/// Global-allocator front end. The lock only guards against misuse; every
/// caller already runs with interrupts masked.
pub struct LockedHeap {
    inner: Mutex<HeapAllocator>,
}

impl LockedHeap {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(HeapAllocator::empty()),
        }
    }

    /// # Safety
    /// See [`HeapAllocator::new`].
    pub unsafe fn init(&self, heap_start: usize, heap_size: usize) -> Result<(), AllocError> {
        let heap = HeapAllocator::new(heap_start, heap_size)?;
        arch::without_interrupts(|| *self.inner.lock() = heap);
        Ok(())
    }

    pub fn stats(&self) -> HeapStats {
        arch::without_interrupts(|| self.inner.lock().stats())
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        arch::without_interrupts(|| {
            self.inner
                .lock()
                .allocate_layout(layout)
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        let result = arch::without_interrupts(|| self.inner.lock().free_layout(ptr, layout));
        if let Err(e) = result {
            log::error!("heap: bad free of {:p} ({:?}): {}", ptr, layout, e);
        }
    }
}

/// Hands the first `heap_size` bytes of the static buffer to the global
/// allocator. Boot context only, before interrupts are activated.
pub fn init_heap(heap_size: usize) -> Result<HeapStats, AllocError> {
    if heap_size > HEAP_CAPACITY {
        return Err(AllocError::InvalidSize);
    }

    // Safety: the buffer is referenced nowhere else and the allocator
    // becomes its only user from here on.
    let heap_start = unsafe { addr_of_mut!(HEAP_BUFFER) } as usize;
    unsafe { KERNEL_HEAP.init(heap_start, heap_size)? };

    let stats = KERNEL_HEAP.stats();
    log::info!(
        "heap: {:#x} - {:#x} ({} KB)",
        heap_start,
        heap_start + stats.region_size,
        stats.region_size / 1024
    );
    Ok(stats)
}

pub fn heap_stats() -> HeapStats {
    KERNEL_HEAP.stats()
}
