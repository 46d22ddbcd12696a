// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Block allocator over one arena half.
//!
//! Allocations are rounded up to power-of-two size classes between 64 B and
//! 2 MiB; freed blocks go onto the per-class free list in the half header
//! and are reused first. Oversized requests fall through to the bump cursor
//! and are never recycled. Exhaustion is signaled by `None` and always
//! propagated to the caller.

use crate::offset::OffsetPtr;
use crate::region::{BLOCK_ALIGN, Half};
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

/// Number of size classes: 64 B << i, topping out at 2 MiB.
pub const SIZE_CLASS_COUNT: usize = 16;

/// Link node living inside a freed block.
#[repr(C)]
pub struct FreeBlock {
    next: OffsetPtr<FreeBlock>,
}

fn class_for(size: usize) -> Option<usize> {
    let rounded = size.max(BLOCK_ALIGN).next_power_of_two();
    let class = rounded.trailing_zeros() as usize - BLOCK_ALIGN.trailing_zeros() as usize;
    (class < SIZE_CLASS_COUNT).then_some(class)
}

fn class_size(class: usize) -> usize {
    BLOCK_ALIGN << class
}

impl Half<'_> {
    /// Allocate `size` bytes, zero-initialized, 64-byte aligned.
    ///
    /// Returns `None` when the half is exhausted.
    #[must_use]
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let block = match class_for(size) {
            Some(class) => self
                .pop_free(class)
                .or_else(|| self.bump(class_size(class)))?,
            // oversized: bump only, no reuse on free
            None => self.bump((size + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1))?,
        };
        // SAFETY: freshly reserved range inside the half.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::write_bytes(block.as_ptr(), 0, size);
        }
        Some(block)
    }

    /// Return a block of `size` bytes to its size-class free list.
    ///
    /// `ptr` must come from [`Half::alloc`] on this half with the same
    /// `size`; oversized blocks are dropped on the floor.
    pub fn free(&self, ptr: NonNull<u8>, size: usize) {
        debug_assert!(self.contains(ptr));
        let Some(class) = class_for(size) else {
            return;
        };
        let head = &self.header().free_heads[class];
        let node = ptr.cast::<FreeBlock>();
        // SAFETY: the block is at least BLOCK_ALIGN bytes and unused.
        #[allow(unsafe_code)]
        unsafe {
            node.write(FreeBlock {
                next: OffsetPtr::null(),
            });
            node.as_ref().next.store(head.load());
        }
        head.store(Some(node));
    }

    fn pop_free(&self, class: usize) -> Option<NonNull<u8>> {
        let head = &self.header().free_heads[class];
        let node = head.load()?;
        // SAFETY: free-list nodes are valid FreeBlocks written by `free`.
        #[allow(unsafe_code)]
        let next = unsafe { node.as_ref().next.load() };
        head.store(next);
        Some(node.cast())
    }

    fn bump(&self, size: usize) -> Option<NonNull<u8>> {
        let top = &self.header().alloc_top;
        let old = top.fetch_add(size as u64, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        let offset = old as usize;
        if offset + size > self.size() {
            top.fetch_sub(size as u64, Ordering::Relaxed);
            return None;
        }
        // SAFETY: [offset, offset + size) verified inside the half.
        #[allow(unsafe_code)]
        Some(unsafe { self.base.add(offset) })
    }

    /// Bytes still unallocated by the bump cursor (free lists not counted).
    #[must_use]
    pub fn bytes_remaining(&self) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        let top = self.header().alloc_top.load(Ordering::Relaxed) as usize;
        self.size().saturating_sub(top)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::region::Arena;

    #[test]
    fn classes_round_up() {
        assert_eq!(class_for(1), Some(0));
        assert_eq!(class_for(64), Some(0));
        assert_eq!(class_for(65), Some(1));
        assert_eq!(class_for(4096), Some(6));
        assert_eq!(class_for(2 * 1024 * 1024), Some(15));
        assert_eq!(class_for(2 * 1024 * 1024 + 1), None);
    }

    #[test]
    fn alloc_is_aligned_and_zeroed() {
        let arena = Arena::anonymous(1 << 16, 1 << 16).unwrap();
        let half = arena.dp();
        let block = half.alloc(100).unwrap();
        assert_eq!(block.as_ptr() as usize % BLOCK_ALIGN, 0);
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 100) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn free_list_reuses_blocks() {
        let arena = Arena::anonymous(1 << 16, 1 << 16).unwrap();
        let half = arena.dp();
        let a = half.alloc(128).unwrap();
        half.free(a, 128);
        let b = half.alloc(128).unwrap();
        assert_eq!(a, b);
        // a different class must not reuse it
        half.free(b, 128);
        let c = half.alloc(512).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn exhaustion_returns_none() {
        let arena = Arena::anonymous(1 << 12, 1 << 12).unwrap();
        let half = arena.dp();
        let mut count = 0;
        while half.alloc(1024).is_some() {
            count += 1;
            assert!(count < 10);
        }
        assert!(count >= 1);
        // smaller blocks may still fit after large ones stop
        assert!(half.bytes_remaining() < 1024 + BLOCK_ALIGN);
    }

    #[test]
    fn halves_do_not_share_free_lists() {
        let arena = Arena::anonymous(1 << 16, 1 << 16).unwrap();
        let a = arena.dp().alloc(64).unwrap();
        arena.dp().free(a, 64);
        let b = arena.cp().alloc(64).unwrap();
        assert_ne!(a, b);
    }
}
