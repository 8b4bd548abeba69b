//! First-fit heap allocator over a fixed region.
//!
//! The region is carved into contiguous blocks, each starting with an
//! in-band [`MemoryBlock`] header that links it to its neighbours. Sizes
//! recorded in headers are payload sizes; header plus payload of every
//! block always adds up to the region size.
//!
//! The allocator holds no lock. Callers must run it from the boot thread
//! before interrupts are live, or with interrupts masked.

use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::{self, NonNull};

/// Payload alignment and size granularity.
pub const BLOCK_ALIGN: usize = 16;

pub const HEADER_SIZE: usize = size_of::<MemoryBlock>();

/// Smallest remainder worth splitting off as its own free block.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + BLOCK_ALIGN;

pub const MIN_REGION_SIZE: usize = MIN_BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    OutOfMemory,
    InvalidAddress,
    InvalidSize,
    Overflow,
    Uninitialized,
    DoubleFree,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidAddress => write!(f, "address does not belong to a heap block"),
            Self::InvalidSize => write!(f, "invalid size"),
            Self::Overflow => write!(f, "size overflow"),
            Self::Uninitialized => write!(f, "heap not initialized"),
            Self::DoubleFree => write!(f, "block is already free"),
        }
    }
}

#[repr(C, align(16))]
struct MemoryBlock {
    prev: *mut MemoryBlock,
    next: *mut MemoryBlock,
    size: usize,
    is_free: bool,
}

impl MemoryBlock {
    fn start_addr(&self) -> usize {
        self as *const Self as usize
    }

    fn payload_addr(&self) -> usize {
        self.start_addr() + HEADER_SIZE
    }

    fn end_addr(&self) -> usize {
        self.payload_addr() + self.size
    }
}

/// Snapshot of one block, as reported by [`HeapAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block header.
    pub start: usize,
    /// Payload bytes after the header.
    pub size: usize,
    pub is_free: bool,
}

impl BlockInfo {
    pub fn payload(&self) -> usize {
        self.start + HEADER_SIZE
    }

    pub fn end(&self) -> usize {
        self.payload() + self.size
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub region_size: usize,
    pub blocks: usize,
    pub used: usize,
    pub free: usize,
    pub largest_free: usize,
}

pub struct HeapAllocator {
    start: usize,
    size: usize,
    first: *mut MemoryBlock,
}

// The region is exclusively owned by the allocator once constructed.
unsafe impl Send for HeapAllocator {}

impl HeapAllocator {
    /// An allocator with no region; every request fails with `Uninitialized`.
    pub const fn empty() -> Self {
        Self {
            start: 0,
            size: 0,
            first: ptr::null_mut(),
        }
    }

    /// Takes ownership of `[start, start + size)` as one free block.
    ///
    /// The region is trimmed inwards to `BLOCK_ALIGN`; [`region_size`]
    /// reports what is actually managed.
    ///
    /// # Safety
    /// - The region must be valid, writable memory used by nothing else for
    ///   the allocator's whole lifetime.
    ///
    /// [`region_size`]: Self::region_size
    pub unsafe fn new(start: usize, size: usize) -> Result<Self, AllocError> {
        if start == 0 {
            return Err(AllocError::InvalidAddress);
        }
        let end = start.checked_add(size).ok_or(AllocError::Overflow)?;
        let base = align_up(start, BLOCK_ALIGN).ok_or(AllocError::Overflow)?;
        let top = align_down(end, BLOCK_ALIGN);
        if top <= base || top - base < MIN_REGION_SIZE {
            return Err(AllocError::InvalidSize);
        }

        let first = base as *mut MemoryBlock;
        first.write(MemoryBlock {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
            size: top - base - HEADER_SIZE,
            is_free: true,
        });

        Ok(Self {
            start: base,
            size: top - base,
            first,
        })
    }

    pub fn region_start(&self) -> usize {
        self.start
    }

    pub fn region_size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.start + self.size
    }

    /// First-fit allocation of at least `size` bytes.
    ///
    /// The request is rounded up to `BLOCK_ALIGN`. The chosen block is split
    /// unless the remainder could not hold a block of its own, in which case
    /// the whole block is handed out.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if self.first.is_null() {
            return Err(AllocError::Uninitialized);
        }
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }
        let size = align_up(size, BLOCK_ALIGN).ok_or(AllocError::OutOfMemory)?;

        let mut cursor = self.first;
        while !cursor.is_null() {
            // Safety: every linked header lies inside the owned region.
            let block = unsafe { &*cursor };
            if block.is_free && block.size >= size {
                unsafe { Self::split(cursor, size) };
                let block = unsafe { &mut *cursor };
                block.is_free = false;
                return NonNull::new(block.payload_addr() as *mut u8)
                    .ok_or(AllocError::InvalidAddress);
            }
            cursor = block.next;
        }

        Err(AllocError::OutOfMemory)
    }

    /// Returns the block owning `ptr` to the free list, merging it with a
    /// free predecessor and/or successor.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let cursor = self.find(ptr.as_ptr() as usize)?;
        // Safety: `find` only yields headers linked into this region.
        let block = unsafe { &mut *cursor };
        if block.is_free {
            return Err(AllocError::DoubleFree);
        }
        block.is_free = true;
        let (prev, next) = (block.prev, block.next);

        unsafe {
            if !next.is_null() && (*next).is_free {
                Self::absorb_next(cursor);
            }
            if !prev.is_null() && (*prev).is_free {
                Self::absorb_next(prev);
            }
        }
        Ok(())
    }

    /// `Layout`-aware allocation for the global allocator. Alignments above
    /// `BLOCK_ALIGN` over-allocate and stash the real payload address just
    /// below the pointer handed out.
    pub fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.align() <= BLOCK_ALIGN {
            return self.allocate(layout.size().max(1));
        }
        let padded = layout
            .size()
            .checked_add(layout.align() + size_of::<usize>())
            .ok_or(AllocError::Overflow)?;
        let raw = self.allocate(padded)?.as_ptr() as usize;
        let aligned =
            align_up(raw + size_of::<usize>(), layout.align()).ok_or(AllocError::Overflow)?;
        unsafe { (aligned as *mut usize).sub(1).write(raw) };
        NonNull::new(aligned as *mut u8).ok_or(AllocError::InvalidAddress)
    }

    /// # Safety
    /// `ptr` must come from [`allocate_layout`](Self::allocate_layout) with
    /// the same `layout`.
    pub unsafe fn free_layout(&mut self, ptr: NonNull<u8>, layout: Layout) -> Result<(), AllocError> {
        if layout.align() <= BLOCK_ALIGN {
            return self.free(ptr);
        }
        let raw = (ptr.as_ptr() as *const usize).sub(1).read();
        self.free(NonNull::new(raw as *mut u8).ok_or(AllocError::InvalidAddress)?)
    }

    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            cursor: self.first,
            _heap: PhantomData,
        }
    }

    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                region_size: self.size,
                ..HeapStats::default()
            },
            |mut stats, block| {
                stats.blocks += 1;
                if block.is_free {
                    stats.free += block.size;
                    stats.largest_free = stats.largest_free.max(block.size);
                } else {
                    stats.used += block.size;
                }
                stats
            },
        )
    }

    fn find(&self, payload: usize) -> Result<*mut MemoryBlock, AllocError> {
        if self.first.is_null() {
            return Err(AllocError::Uninitialized);
        }
        if !self.contains(payload) {
            return Err(AllocError::InvalidAddress);
        }
        let mut cursor = self.first;
        while !cursor.is_null() {
            let block = unsafe { &*cursor };
            if block.payload_addr() == payload {
                return Ok(cursor);
            }
            if block.payload_addr() > payload {
                break;
            }
            cursor = block.next;
        }
        Err(AllocError::InvalidAddress)
    }

    /// Carves the tail beyond `size` payload bytes into a new free block.
    unsafe fn split(cursor: *mut MemoryBlock, size: usize) {
        let block = &mut *cursor;
        let remainder = block.size - size;
        if remainder < MIN_BLOCK_SIZE {
            return;
        }

        let tail = (block.payload_addr() + size) as *mut MemoryBlock;
        tail.write(MemoryBlock {
            prev: cursor,
            next: block.next,
            size: remainder - HEADER_SIZE,
            is_free: true,
        });
        if !block.next.is_null() {
            (*block.next).prev = tail;
        }
        block.next = tail;
        block.size = size;
    }

    /// Folds the successor of `cursor` (header included) into `cursor`.
    unsafe fn absorb_next(cursor: *mut MemoryBlock) {
        let block = &mut *cursor;
        let next = &mut *block.next;
        debug_assert_eq!(block.end_addr(), next.start_addr());
        block.size += HEADER_SIZE + next.size;
        block.next = next.next;
        if !block.next.is_null() {
            (*block.next).prev = cursor;
        }
    }
}

pub struct Blocks<'a> {
    cursor: *const MemoryBlock,
    _heap: PhantomData<&'a HeapAllocator>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cursor.is_null() {
            return None;
        }
        let block = unsafe { &*self.cursor };
        self.cursor = block.next;
        Some(BlockInfo {
            start: block.start_addr(),
            size: block.size,
            is_free: block.is_free,
        })
    }
}

#[inline]
const fn align_up(addr: usize, align: usize) -> Option<usize> {
    match addr.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

#[inline]
const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}
