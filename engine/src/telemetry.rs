//! Shared memory region for live engine state.
//!
//! Values are constructed in place inside blocks of one arena so that
//! monitors can find them by byte offset. A single writer (the render thread)
//! updates them with volatile stores, readers must tolerate torn values.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

pub const TELEMETRY_ALIGNMENT: usize = 64;
const BLOCK_GRANULARITY: u32 = 16;

/// A reserved range of the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    pub offset: u32,
    pub length: u32,
}

pub struct TelemetryArena {
    base: NonNull<u8>,
    size: u32,
    free: Mutex<Vec<Block>>,
}

// SAFETY: the arena only hands out disjoint blocks; the free list is guarded
// by a mutex and the memory itself is accessed through raw pointers with
// volatile operations by the block owners.
unsafe impl Send for TelemetryArena {}
// SAFETY: see above.
unsafe impl Sync for TelemetryArena {}

impl TelemetryArena {
    pub fn new(bytes: usize) -> Result<Arc<Self>, String> {
        let size = u32::try_from(bytes.max(TELEMETRY_ALIGNMENT))
            .map_err(|_| format!("telemetry arena too large: {bytes} bytes"))?;
        let size = size.next_multiple_of(TELEMETRY_ALIGNMENT as u32);
        let layout = Layout::from_size_align(size as usize, TELEMETRY_ALIGNMENT)
            .map_err(|e| e.to_string())?;
        // SAFETY: layout has a non-zero size.
        let base = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or_else(|| format!("failed to reserve {size} bytes of telemetry memory"))?;
        Ok(Arc::new(Self {
            base,
            size,
            free: Mutex::new(vec![Block {
                offset: 0,
                length: size,
            }]),
        }))
    }

    /// Address of the memory area.
    pub fn location(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn reserved(&self) -> usize {
        self.size as usize
    }

    /// Bytes not currently handed out.
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .map(|free| free.iter().map(|b| b.length as usize).sum())
            .unwrap_or(0)
    }

    pub fn allocate(&self, length: usize) -> Result<Block, String> {
        let wanted = u32::try_from(length.max(1))
            .map_err(|_| format!("telemetry block too large: {length}"))?
            .next_multiple_of(BLOCK_GRANULARITY);
        let mut free = self.free.lock().map_err(|e| e.to_string())?;
        let Some(index) = free.iter().position(|b| b.length >= wanted) else {
            return Err(format!(
                "telemetry arena exhausted: {wanted} bytes requested of {} reserved",
                self.size
            ));
        };
        let slot = &mut free[index];
        let block = Block {
            offset: slot.offset,
            length: wanted,
        };
        slot.offset += wanted;
        slot.length -= wanted;
        if slot.length == 0 {
            free.remove(index);
        }
        Ok(block)
    }

    pub fn release(&self, block: Block) {
        let Ok(mut free) = self.free.lock() else {
            return;
        };
        let index = free.partition_point(|b| b.offset < block.offset);
        free.insert(index, block);
        if index + 1 < free.len() && free[index].offset + free[index].length == free[index + 1].offset {
            free[index].length += free[index + 1].length;
            free.remove(index + 1);
        }
        if index > 0 && free[index - 1].offset + free[index - 1].length == free[index].offset {
            free[index - 1].length += free[index].length;
            free.remove(index);
        }
    }

    fn block_ptr(&self, block: &Block) -> *mut u8 {
        // SAFETY: blocks are always inside the arena.
        unsafe { self.base.as_ptr().add(block.offset as usize) }
    }
}

impl Drop for TelemetryArena {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.size as usize, TELEMETRY_ALIGNMENT) {
            // SAFETY: base was allocated with this layout in new().
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}

/// A fixed-length array of `T` placed in telemetry memory.
pub struct TelemetryArray<T: Copy> {
    arena: Arc<TelemetryArena>,
    block: Block,
    ptr: NonNull<T>,
    len: usize,
    _marker: PhantomData<T>,
}

// SAFETY: elements are plain Copy values only written by one thread at a time.
unsafe impl<T: Copy + Send> Send for TelemetryArray<T> {}
// SAFETY: readers accept torn reads; writes go through volatile stores.
unsafe impl<T: Copy + Send> Sync for TelemetryArray<T> {}

impl<T: Copy> TelemetryArray<T> {
    pub fn new(arena: &Arc<TelemetryArena>, len: usize, init: T) -> Result<Self, String> {
        if align_of::<T>() > BLOCK_GRANULARITY as usize {
            return Err(format!(
                "telemetry values need alignment <= {BLOCK_GRANULARITY}"
            ));
        }
        let block = arena.allocate(size_of::<T>() * len.max(1))?;
        let Some(ptr) = NonNull::new(arena.block_ptr(&block).cast::<T>()) else {
            arena.release(block);
            return Err("telemetry block without address".to_string());
        };
        for i in 0..len {
            // SAFETY: the block holds `len` properly aligned elements.
            unsafe { ptr.as_ptr().add(i).write(init) };
        }
        Ok(Self {
            arena: arena.clone(),
            block,
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset of the first element within the arena.
    pub fn offset(&self) -> u32 {
        self.block.offset
    }

    pub fn block(&self) -> Block {
        self.block
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: index checked above, element was initialized in new().
        Some(unsafe { self.ptr.as_ptr().add(index).read_volatile() })
    }

    pub fn set(&self, index: usize, value: T) {
        if index < self.len {
            // SAFETY: index checked above.
            unsafe { self.ptr.as_ptr().add(index).write_volatile(value) };
        }
    }

    pub fn fill(&self, value: T) {
        for i in 0..self.len {
            self.set(i, value);
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        (0..self.len).filter_map(|i| self.get(i)).collect()
    }
}

impl<T: Copy> Drop for TelemetryArray<T> {
    fn drop(&mut self) {
        for i in 0..self.len {
            // SAFETY: every element was written in new().
            unsafe { std::ptr::drop_in_place(self.ptr.as_ptr().add(i)) };
        }
        self.arena.release(self.block);
    }
}

/// A single `T` placed in telemetry memory.
pub struct TelemetryCell<T: Copy>(TelemetryArray<T>);

impl<T: Copy> TelemetryCell<T> {
    pub fn new(arena: &Arc<TelemetryArena>, value: T) -> Result<Self, String> {
        TelemetryArray::new(arena, 1, value).map(Self)
    }

    pub fn offset(&self) -> u32 {
        self.0.offset()
    }

    pub fn get(&self) -> T {
        // SAFETY: a cell always has exactly one initialized element.
        unsafe { self.0.ptr.as_ptr().read_volatile() }
    }

    pub fn set(&self, value: T) {
        self.0.set(0, value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.get();
        f(&mut value);
        self.set(value);
    }
}
