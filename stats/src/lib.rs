// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]

//! # Counter registry
//!
//! Named blocks of 64-bit counters with one slot set per worker, backed by
//! arena memory so operators can observe them by mapping the arena file
//! read-only. Each slot is written by exactly one worker and read by
//! anybody with relaxed atomic loads; no other synchronization exists or
//! is needed.
//!
//! The registry hands out stable [`CounterHandle`]s; module instances
//! register their blocks at configuration build time and workers index
//! into the storage with `(handle, worker_idx)`.

use arena::{Arena, MemoryContext};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Registry failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatsError {
    /// Arena half could not supply the storage block.
    #[error("counter storage allocation failed ({words} words x {workers} workers)")]
    StorageAllocation {
        /// Words per worker requested.
        words: usize,
        /// Worker count.
        workers: usize,
    },
    /// A block would not fit in the per-worker window.
    #[error("counter space exhausted registering '{name}' ({size} words)")]
    SpaceExhausted {
        /// Name being registered.
        name: String,
        /// Words requested.
        size: usize,
    },
    /// Same name registered twice with different sizes.
    #[error("'{name}' re-registered with size {size}, was {registered}")]
    SizeMismatch {
        /// Name being registered.
        name: String,
        /// Words requested now.
        size: usize,
        /// Words registered before.
        registered: usize,
    },
    /// Zero-sized blocks are meaningless.
    #[error("zero-size counter block '{name}'")]
    ZeroSize {
        /// Name being registered.
        name: String,
    },
}

/// Handle to one registered counter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHandle {
    offset: usize,
    size: usize,
}

impl CounterHandle {
    /// Words in the block.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

struct Inner {
    by_name: HashMap<String, CounterHandle>,
    next_offset: usize,
}

/// Counter registry plus its arena-resident storage.
pub struct CounterRegistry {
    inner: Mutex<Inner>,
    block: NonNull<AtomicU64>,
    workers: usize,
    words_per_worker: usize,
    // keeps the mapping alive for the raw block
    _arena: Arc<Arena>,
}

// SAFETY: the block points into the arena mapping owned via `_arena`; all
// word access goes through &AtomicU64.
#[allow(unsafe_code)]
unsafe impl Send for CounterRegistry {}
#[allow(unsafe_code)]
unsafe impl Sync for CounterRegistry {}

impl CounterRegistry {
    /// Allocate storage for `workers` slot sets of `words_per_worker`
    /// 64-bit words inside `ctx`'s arena half.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::StorageAllocation`] when the half cannot
    /// carry the block.
    pub fn new(
        ctx: &MemoryContext,
        workers: usize,
        words_per_worker: usize,
    ) -> Result<Self, StatsError> {
        let bytes = workers * words_per_worker * size_of::<u64>();
        let block = ctx
            .alloc(bytes)
            .ok_or(StatsError::StorageAllocation {
                words: words_per_worker,
                workers,
            })?
            .cast::<AtomicU64>();
        debug!(workers, words_per_worker, "allocated counter storage");
        Ok(Self {
            inner: Mutex::new(Inner {
                by_name: HashMap::new(),
                next_offset: 0,
            }),
            block,
            workers,
            words_per_worker,
            _arena: Arc::clone(ctx.arena()),
        })
    }

    /// Worker slot sets in the storage.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Register a named block of `size` words, or fetch the existing
    /// handle when the name is already present with the same size.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`] on zero size, size conflict or exhaustion.
    pub fn register(&self, name: &str, size: usize) -> Result<CounterHandle, StatsError> {
        if size == 0 {
            return Err(StatsError::ZeroSize {
                name: name.to_owned(),
            });
        }
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = inner.by_name.get(name) {
            if existing.size != size {
                return Err(StatsError::SizeMismatch {
                    name: name.to_owned(),
                    size,
                    registered: existing.size,
                });
            }
            return Ok(*existing);
        }
        if inner.next_offset + size > self.words_per_worker {
            return Err(StatsError::SpaceExhausted {
                name: name.to_owned(),
                size,
            });
        }
        let handle = CounterHandle {
            offset: inner.next_offset,
            size,
        };
        inner.next_offset += size;
        inner.by_name.insert(name.to_owned(), handle);
        debug!(name, size, offset = handle.offset, "registered counters");
        Ok(handle)
    }

    /// Look up a handle by name.
    #[must_use]
    pub fn handle(&self, name: &str) -> Option<CounterHandle> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .by_name
            .get(name)
            .copied()
    }

    /// The worker-local slots of a block.
    ///
    /// # Panics
    ///
    /// Panics when `worker` is out of range; worker indexes come from the
    /// topology and are validated at wiring time.
    #[must_use]
    pub fn slots(&self, handle: CounterHandle, worker: usize) -> &[AtomicU64] {
        assert!(worker < self.workers);
        let start = worker * self.words_per_worker + handle.offset;
        // SAFETY: start + size stays inside the allocated block: offset +
        // size <= words_per_worker by registration, worker checked above.
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts(self.block.as_ptr().add(start), handle.size)
        }
    }

    /// Sum one word of a block across all workers (operator view).
    #[must_use]
    pub fn total(&self, handle: CounterHandle, word: usize) -> u64 {
        assert!(word < handle.size);
        (0..self.workers)
            .map(|w| self.slots(handle, w)[word].load(Ordering::Relaxed))
            .sum()
    }
}

impl std::fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterRegistry")
            .field("workers", &self.workers)
            .field("words_per_worker", &self.words_per_worker)
            .finish_non_exhaustive()
    }
}

/// Bump one word of a worker's slot set.
pub fn bump(slots: &[AtomicU64], word: usize) {
    slots[word].fetch_add(1, Ordering::Relaxed);
}

/// Add to one word of a worker's slot set.
pub fn add(slots: &[AtomicU64], word: usize, value: u64) {
    slots[word].fetch_add(value, Ordering::Relaxed);
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use arena::HalfKind;
    use pretty_assertions::assert_eq;

    fn registry(workers: usize) -> CounterRegistry {
        let arena = Arc::new(Arena::anonymous(1 << 16, 1 << 16).unwrap());
        let ctx = MemoryContext::new(arena, HalfKind::Dp, "counters");
        CounterRegistry::new(&ctx, workers, 256).unwrap()
    }

    #[test]
    fn register_and_bump_per_worker() {
        let reg = registry(2);
        let h = reg.register("worker", 5).unwrap();
        bump(reg.slots(h, 0), 0);
        bump(reg.slots(h, 0), 0);
        bump(reg.slots(h, 1), 0);
        add(reg.slots(h, 1), 3, 10);

        assert_eq!(reg.slots(h, 0)[0].load(Ordering::Relaxed), 2);
        assert_eq!(reg.slots(h, 1)[0].load(Ordering::Relaxed), 1);
        assert_eq!(reg.total(h, 0), 3);
        assert_eq!(reg.total(h, 3), 10);
    }

    #[test]
    fn same_name_same_size_is_idempotent() {
        let reg = registry(1);
        let a = reg.register("balancer.vs0", 8).unwrap();
        let b = reg.register("balancer.vs0", 8).unwrap();
        assert_eq!(a, b);
        let err = reg.register("balancer.vs0", 16).unwrap_err();
        assert!(matches!(err, StatsError::SizeMismatch { .. }));
    }

    #[test]
    fn blocks_do_not_overlap() {
        let reg = registry(1);
        let a = reg.register("a", 4).unwrap();
        let b = reg.register("b", 4).unwrap();
        bump(reg.slots(a, 0), 3);
        assert_eq!(reg.slots(b, 0)[0].load(Ordering::Relaxed), 0);
    }

    #[test]
    fn space_exhaustion_is_reported() {
        let reg = registry(1);
        reg.register("big", 200).unwrap();
        let err = reg.register("more", 100).unwrap_err();
        assert!(matches!(err, StatsError::SpaceExhausted { .. }));
    }

    #[test]
    fn zero_size_is_rejected() {
        let reg = registry(1);
        assert!(matches!(
            reg.register("nil", 0),
            Err(StatsError::ZeroSize { .. })
        ));
    }
}
