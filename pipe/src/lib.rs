// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]

//! # Inter-worker data pipe
//!
//! A lock-free single-producer / single-consumer ring of owned slots. The
//! producing worker reserves a span, materializes items into it and publishes
//! the new tail with a release store; the consuming worker observes the tail
//! with an acquire load, drains a contiguous span and publishes the new head.
//! No fence beyond the release/acquire pair is needed: slots are fully
//! written before the tail moves.
//!
//! The endpoints are `!Clone` and may move to their owning worker threads;
//! wrong-way mutation is impossible by construction rather than merely
//! forbidden.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pipe construction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// Capacity must be a power of two for masked index arithmetic.
    #[error("capacity must be a power of two ({0} given)")]
    CapacityNotPowerOfTwo(usize),
    /// Zero-capacity pipes are degenerate.
    #[error("capacity must be non-zero")]
    CapacityZero,
}

struct Shared<T> {
    mask: usize,
    /// Consumer cursor; written by the consumer only.
    head: CachePadded<AtomicUsize>,
    /// Producer cursor; written by the producer only.
    tail: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: the producer touches slots in [tail, head + capacity) and the
// consumer touches [head, tail); the release/acquire cursor pair keeps the
// ranges disjoint between threads.
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for Shared<T> {}
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Sole remaining owner: drain whatever is still in flight.
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        for idx in head..tail {
            let slot = self.slots[idx & self.mask].get_mut();
            // SAFETY: [head, tail) slots hold initialized items.
            #[allow(unsafe_code)]
            unsafe {
                slot.assume_init_drop();
            }
        }
    }
}

/// Create a pipe of the given power-of-two capacity.
///
/// # Errors
///
/// Returns [`PipeError`] for a zero or non-power-of-two capacity.
pub fn data_pipe<T>(capacity: usize) -> Result<(PipeProducer<T>, PipeConsumer<T>), PipeError> {
    if capacity == 0 {
        return Err(PipeError::CapacityZero);
    }
    if !capacity.is_power_of_two() {
        return Err(PipeError::CapacityNotPowerOfTwo(capacity));
    }
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        slots,
    });
    Ok((
        PipeProducer {
            shared: Arc::clone(&shared),
        },
        PipeConsumer { shared },
    ))
}

/// The producing end of a pipe.
pub struct PipeProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PipeProducer<T> {
    /// Ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }

    /// Slots currently free from the producer's point of view.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        self.capacity() - (tail - head)
    }

    /// Reserve up to `n` slots and call `fill(i)` to materialize the i-th
    /// item of this push. Returns the number of items actually written,
    /// which is zero when the pipe is full.
    pub fn push_with(&mut self, n: usize, mut fill: impl FnMut(usize) -> T) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let free = self.capacity() - (tail - head);
        let count = n.min(free);
        for i in 0..count {
            let slot = self.shared.slots[(tail + i) & self.shared.mask].get();
            // SAFETY: slots in [tail, head + capacity) belong to the
            // producer and are vacant.
            #[allow(unsafe_code)]
            unsafe {
                (*slot).write(fill(i));
            }
        }
        if count > 0 {
            self.shared.tail.store(tail + count, Ordering::Release);
        }
        count
    }

    /// Push a single item; hands it back when the pipe is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` when no slot is free.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let mut item = Some(item);
        // Per-slot closure runs at most once for n = 1.
        #[allow(clippy::unwrap_used)]
        let written = self.push_with(1, |_| item.take().unwrap());
        match written {
            0 => Err(match item {
                Some(item) => item,
                // push_with wrote nothing, so the closure never ran
                None => unreachable!(),
            }),
            _ => Ok(()),
        }
    }
}

/// The consuming end of a pipe.
pub struct PipeConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PipeConsumer<T> {
    /// Ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }

    /// Items ready to pop.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.shared.tail.load(Ordering::Acquire);
        let head = self.shared.head.load(Ordering::Relaxed);
        tail - head
    }

    /// True when nothing is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain up to `max` ready items into `sink`, in FIFO order. Returns
    /// the number consumed; the new head is published once at the end.
    pub fn pop(&mut self, max: usize, sink: &mut impl FnMut(T)) -> usize {
        let tail = self.shared.tail.load(Ordering::Acquire);
        let head = self.shared.head.load(Ordering::Relaxed);
        let count = max.min(tail - head);
        for i in 0..count {
            let slot = self.shared.slots[(head + i) & self.shared.mask].get();
            // SAFETY: slots in [head, tail) hold initialized items owned by
            // the consumer.
            #[allow(unsafe_code)]
            let item = unsafe { (*slot).assume_init_read() };
            sink(item);
        }
        if count > 0 {
            self.shared.head.store(head + count, Ordering::Release);
        }
        count
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_bad_capacity() {
        assert_eq!(data_pipe::<u64>(0).err(), Some(PipeError::CapacityZero));
        assert_eq!(
            data_pipe::<u64>(24).err(),
            Some(PipeError::CapacityNotPowerOfTwo(24))
        );
    }

    #[test]
    fn fifo_order_within_capacity() {
        let (mut tx, mut rx) = data_pipe::<u32>(8).unwrap();
        for v in 0..5u32 {
            tx.push(v).unwrap();
        }
        let mut got = Vec::new();
        assert_eq!(rx.pop(8, &mut |v| got.push(v)), 5);
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn backpressure_full_pipe_rejects_then_recovers() {
        let (mut tx, mut rx) = data_pipe::<u32>(16).unwrap();
        for v in 0..16u32 {
            tx.push(v).unwrap();
        }
        // 17th push must be rejected with the item handed back.
        assert_eq!(tx.push(16), Err(16));
        assert_eq!(tx.push_with(4, |_| 99), 0);

        let mut sink = |_v| {};
        assert_eq!(rx.pop(4, &mut sink), 4);

        // Exactly four slots opened up.
        assert_eq!(tx.push_with(8, |i| 100 + u32::try_from(i).unwrap()), 4);
        assert_eq!(tx.push(200), Err(200));
    }

    #[test]
    fn partial_push_reports_written_count() {
        let (mut tx, _rx) = data_pipe::<u32>(4).unwrap();
        assert_eq!(tx.push_with(6, |i| u32::try_from(i).unwrap()), 4);
    }

    #[test]
    fn tail_minus_head_never_exceeds_capacity() {
        let (mut tx, mut rx) = data_pipe::<u64>(8).unwrap();
        for round in 0..100u64 {
            let pushed = tx.push_with(3, |i| round * 10 + i as u64);
            assert!(pushed <= 3);
            assert!(rx.len() <= rx.capacity());
            rx.pop(2, &mut |_| {});
            assert!(rx.len() <= rx.capacity());
        }
    }

    #[test]
    fn cross_thread_transfer_preserves_order() {
        const N: u64 = 100_000;
        let (mut tx, mut rx) = data_pipe::<u64>(64).unwrap();
        let producer = std::thread::spawn(move || {
            let mut next = 0u64;
            while next < N {
                if tx.push(next).is_ok() {
                    next += 1;
                }
            }
        });
        let mut expected = 0u64;
        while expected < N {
            rx.pop(32, &mut |v| {
                assert_eq!(v, expected);
                expected += 1;
            });
        }
        producer.join().unwrap();
    }

    #[test]
    fn dropping_endpoints_releases_in_flight_items() {
        let flag = Arc::new(());
        let (mut tx, rx) = data_pipe::<Arc<()>>(8).unwrap();
        for _ in 0..5 {
            tx.push(Arc::clone(&flag)).unwrap();
        }
        assert_eq!(Arc::strong_count(&flag), 6);
        drop(tx);
        drop(rx);
        assert_eq!(Arc::strong_count(&flag), 1);
    }
}
