//! Trampoline memory allocation
//!
//! Allocates executable memory within ±2GB of target addresses for relative jumps.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ptr::NonNull;

/// Trampoline allocation size (relay jump + relocated prologue + jump back)
pub const TRAMPOLINE_SIZE: usize = 128;

/// Size of one allocated block
const BLOCK_SIZE: usize = 0x1_0000;

/// Maximum search range for near allocation (2GB)
const MAX_RANGE: usize = 0x7FFF_0000;

/// Global trampoline allocator
static ALLOCATOR: Mutex<TrampolineAllocator> = Mutex::new(TrampolineAllocator::new());

/// Allocator for executable trampolines
struct TrampolineAllocator {
    /// Blocks allocated, keyed by base address
    blocks: BTreeMap<usize, BlockInfo>,
}

struct BlockInfo {
    /// Kept alive for the rest of the process; hooks are never removed
    allocation: region::Allocation,
    used: usize,
}

// SAFETY: The allocator is protected by a mutex and blocks are only accessed through it
unsafe impl Send for BlockInfo {}

fn distance(a: usize, b: usize) -> usize {
    a.abs_diff(b)
}

impl TrampolineAllocator {
    const fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
        }
    }

    /// Allocate a trampoline near the target address
    fn alloc_near(&mut self, target: usize, size: usize) -> Option<NonNull<u8>> {
        // First, try to find an existing block within range
        for (&base, block) in &mut self.blocks {
            if distance(base, target) < MAX_RANGE
                && block.used + size <= block.allocation.len()
            {
                let ptr = unsafe { block.allocation.as_mut_ptr::<u8>().add(block.used) };
                block.used += size;
                return NonNull::new(ptr);
            }
        }

        let base = self.alloc_block_near(target)?;
        let block = self.blocks.get_mut(&base)?;
        block.used = size;
        NonNull::new(block.allocation.as_mut_ptr::<u8>())
    }

    fn insert(&mut self, allocation: region::Allocation) -> usize {
        let base = allocation.as_ptr::<u8>() as usize;
        self.blocks.insert(
            base,
            BlockInfo {
                allocation,
                used: 0,
            },
        );
        base
    }

    fn alloc_block_near(&mut self, target: usize) -> Option<usize> {
        // Let the OS choose first; in a 32-bit process everything is in range
        if let Ok(allocation) = region::alloc(BLOCK_SIZE, region::Protection::READ_WRITE_EXECUTE) {
            let base = allocation.as_ptr::<u8>() as usize;
            if distance(base, target) < MAX_RANGE {
                return Some(self.insert(allocation));
            }
        }

        self.search_block_near(target)
    }

    /// Walk free address space around the target
    ///
    /// VirtualAlloc refuses reserved ranges, so hinting is only done on Windows.
    #[cfg(windows)]
    fn search_block_near(&mut self, target: usize) -> Option<usize> {
        let search_start = target.saturating_sub(MAX_RANGE) & !(BLOCK_SIZE - 1);
        let search_end = target.saturating_add(MAX_RANGE);

        for hint in (search_start..search_end).step_by(BLOCK_SIZE) {
            // Skip invalid and already mapped addresses
            if hint == 0 || region::query(hint as *const u8).is_ok() {
                continue;
            }

            let Ok(allocation) =
                region::alloc_at(hint as *const u8, BLOCK_SIZE, region::Protection::READ_WRITE_EXECUTE)
            else {
                continue;
            };

            let base = allocation.as_ptr::<u8>() as usize;
            if distance(base, target) < MAX_RANGE {
                return Some(self.insert(allocation));
            }
            // Allocation was too far, dropping it unmaps it
        }

        tracing::error!("Failed to allocate trampoline block near {:x}", target);
        None
    }

    #[cfg(not(windows))]
    fn search_block_near(&mut self, target: usize) -> Option<usize> {
        tracing::error!("Failed to allocate trampoline block near {:x}", target);
        None
    }
}

/// Allocate a trampoline buffer near the target address
pub fn alloc_trampoline(target: *const u8) -> Option<NonNull<u8>> {
    ALLOCATOR
        .lock()
        .alloc_near(target as usize, TRAMPOLINE_SIZE)
}

/// Check whether a trampoline at `trampoline` can reach `target` with rel32
pub fn in_range(trampoline: usize, target: usize) -> bool {
    distance(trampoline, target) < MAX_RANGE
}
