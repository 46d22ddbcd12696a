// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::region::{Arena, Half, HalfKind};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// A labeled allocation façade over one arena half.
///
/// Contexts carry per-subsystem accounting; a context is used only by its
/// owning component (the control plane for CP contexts), other components
/// read the blocks it hands out.
#[derive(Debug)]
pub struct MemoryContext {
    arena: Arc<Arena>,
    kind: HalfKind,
    label: String,
    allocated: AtomicUsize,
}

impl MemoryContext {
    /// A context labeled `label` over the given half.
    #[must_use]
    pub fn new(arena: Arc<Arena>, kind: HalfKind, label: &str) -> Self {
        Self {
            arena,
            kind,
            label: label.to_owned(),
            allocated: AtomicUsize::new(0),
        }
    }

    /// The half this context allocates from.
    #[must_use]
    pub fn half(&self) -> Half<'_> {
        self.arena.half(self.kind)
    }

    /// The backing arena.
    #[must_use]
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// Context label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Live bytes allocated through this context.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Allocate zeroed bytes; `None` on exhaustion (the caller unwinds its
    /// partial work and reports upward).
    #[must_use]
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        match self.half().alloc(size) {
            Some(ptr) => {
                self.allocated.fetch_add(size, Ordering::Relaxed);
                Some(ptr)
            }
            None => {
                warn!(
                    label = %self.label,
                    size,
                    "arena allocation failed"
                );
                None
            }
        }
    }

    /// Return a block allocated through this context.
    pub fn free(&self, ptr: NonNull<u8>, size: usize) {
        self.half().free(ptr, size);
        self.allocated.fetch_sub(size, Ordering::Relaxed);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accounting_tracks_live_bytes() {
        let arena = Arc::new(Arena::anonymous(1 << 16, 1 << 16).unwrap());
        let ctx = MemoryContext::new(arena, HalfKind::Cp, "balancer");
        assert_eq!(ctx.label(), "balancer");

        let a = ctx.alloc(256).unwrap();
        let _b = ctx.alloc(512).unwrap();
        assert_eq!(ctx.allocated_bytes(), 768);
        ctx.free(a, 256);
        assert_eq!(ctx.allocated_bytes(), 512);
    }

    #[test]
    fn exhaustion_reports_none_and_keeps_accounting() {
        let arena = Arc::new(Arena::anonymous(1 << 12, 1 << 12).unwrap());
        let ctx = MemoryContext::new(arena, HalfKind::Dp, "test");
        let before = ctx.allocated_bytes();
        assert!(ctx.alloc(1 << 20).is_none());
        assert_eq!(ctx.allocated_bytes(), before);
    }
}
