// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The worker loop.
//!
//! One OS thread per `(device, queue)`, pinned to its core, busy-polling
//! a fixed-shape iteration: snapshot the configuration generation, burst
//! RX, classify and group by pipeline, dispatch the module chains, split
//! output into local TX and pipe-steered remote frames, drain incoming
//! pipes onto the local TX queue, and return credits for frames the
//! remote side has released.
//!
//! A worker is mutated only by its own thread; the control plane observes
//! it through the single-word atomics in [`WorkerStatus`] and the counter
//! registry.

use crate::driver::{Driver, PortId};
use crate::generation::CpConfig;
use net::DeviceId;
use net::buffer::PacketBufferMut;
use net::packet::{Packet, TxResult};
use pipe::{PipeConsumer, PipeProducer};
use pipeline::ModuleCtx;
use stats::{CounterHandle, CounterRegistry, add, bump};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Worker counter block layout.
pub const WORKER_COUNTERS: usize = 10;
/// Loop iterations completed.
pub const ITERATIONS: usize = 0;
/// Frames received from the local queue.
pub const RX: usize = 1;
/// Frames accepted by the local TX queue.
pub const TX: usize = 2;
/// Frames popped from incoming pipes.
pub const REMOTE_RX: usize = 3;
/// Frames pushed onto outgoing pipes.
pub const REMOTE_TX: usize = 4;
/// Every packet dropped, any reason.
pub const DROPS: usize = 5;
/// Frames that failed L2/L3 parsing.
pub const PARSE_FAIL: usize = 6;
/// Packets with no pipeline for their VLAN.
pub const CLASSIFY_MISS: usize = 7;
/// Packets rejected by a full (or absent) outgoing pipe.
pub const PIPE_FULL: usize = 8;
/// Packets rejected by a full TX queue.
pub const TX_FULL: usize = 9;

/// Device counter block layout.
pub const DEVICE_COUNTERS: usize = 3;
/// Frames received on the device.
pub const DEV_RX: usize = 0;
/// Frames transmitted on the device.
pub const DEV_TX: usize = 1;
/// Packets dropped on the device.
pub const DEV_DROPS: usize = 2;

/// Default RX burst size.
pub const DEFAULT_READ_SIZE: usize = 32;
/// Default TX burst size.
pub const DEFAULT_WRITE_SIZE: usize = 32;

/// A frame in flight across a data pipe. The producer keeps one clone;
/// release-after-transmit is observed as the strong count returning to 1.
pub type PipeFrame<Buf> = Arc<Packet<Buf>>;

/// What the control plane may read about a worker: single-word atomics
/// only.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    /// Iterations completed.
    pub iterations: AtomicU64,
    /// Generation observed at the top of the last iteration.
    pub r#gen: AtomicU64,
}

/// The producing end of one cross-worker connection.
pub struct Connection<Buf: PacketBufferMut> {
    producer: PipeProducer<PipeFrame<Buf>>,
    inflight: VecDeque<PipeFrame<Buf>>,
}

impl<Buf: PacketBufferMut> Connection<Buf> {
    /// Wrap a pipe's producing end.
    #[must_use]
    pub fn new(producer: PipeProducer<PipeFrame<Buf>>) -> Self {
        Self {
            producer,
            inflight: VecDeque::new(),
        }
    }

    /// Hand a frame to the consumer; false when the pipe is full.
    pub fn push(&mut self, frame: PipeFrame<Buf>) -> bool {
        match self.producer.push(Arc::clone(&frame)) {
            Ok(()) => {
                self.inflight.push_back(frame);
                true
            }
            Err(_) => false,
        }
    }

    /// Credit return: free in-flight frames the consumer has released,
    /// stopping at the first still-held one to preserve order.
    pub fn reclaim(&mut self) -> usize {
        let mut freed = 0;
        while let Some(front) = self.inflight.front() {
            if Arc::strong_count(front) != 1 {
                break;
            }
            self.inflight.pop_front();
            freed += 1;
        }
        freed
    }

    /// Frames awaiting release.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

/// One forwarding worker, identified by `(device, queue)`.
pub struct Worker<D: Driver> {
    idx: usize,
    device_id: DeviceId,
    port: PortId,
    queue: u16,
    core_id: u32,
    read_size: usize,
    write_size: usize,
    driver: Arc<D>,
    cp: Arc<CpConfig<D::Buf>>,
    counters: Arc<CounterRegistry>,
    worker_handle: CounterHandle,
    device_handle: CounterHandle,
    outgoing: HashMap<DeviceId, Vec<Connection<D::Buf>>>,
    incoming: Vec<PipeConsumer<PipeFrame<D::Buf>>>,
    pending: VecDeque<PipeFrame<D::Buf>>,
    stop: Arc<AtomicBool>,
    status: Arc<WorkerStatus>,
    epoch: Instant,
}

/// Everything the wiring layer needs to hand over to a worker.
pub struct WorkerSetup<D: Driver> {
    /// Global worker index.
    pub idx: usize,
    /// Owning device.
    pub device_id: DeviceId,
    /// Driver port of the device.
    pub port: PortId,
    /// RX/TX queue pair index on the port.
    pub queue: u16,
    /// CPU to pin to.
    pub core_id: u32,
    /// Shared driver handle.
    pub driver: Arc<D>,
    /// Shared configuration root.
    pub cp: Arc<CpConfig<D::Buf>>,
    /// Shared counter registry.
    pub counters: Arc<CounterRegistry>,
    /// Worker counter block.
    pub worker_handle: CounterHandle,
    /// Device counter block.
    pub device_handle: CounterHandle,
    /// Stop flag of the owning device.
    pub stop: Arc<AtomicBool>,
    /// Status the control plane watches.
    pub status: Arc<WorkerStatus>,
}

impl<D: Driver> Worker<D> {
    /// Assemble a worker; pipes are attached afterwards by the wiring.
    #[must_use]
    pub fn new(setup: WorkerSetup<D>) -> Self {
        Self {
            idx: setup.idx,
            device_id: setup.device_id,
            port: setup.port,
            queue: setup.queue,
            core_id: setup.core_id,
            read_size: DEFAULT_READ_SIZE,
            write_size: DEFAULT_WRITE_SIZE,
            driver: setup.driver,
            cp: setup.cp,
            counters: setup.counters,
            worker_handle: setup.worker_handle,
            device_handle: setup.device_handle,
            outgoing: HashMap::new(),
            incoming: Vec::new(),
            pending: VecDeque::new(),
            stop: setup.stop,
            status: setup.status,
            epoch: Instant::now(),
        }
    }

    /// Global worker index.
    #[must_use]
    pub fn idx(&self) -> usize {
        self.idx
    }

    /// Owning device.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Attach the producing end of a pipe toward `dst`.
    pub fn add_outgoing(&mut self, dst: DeviceId, connection: Connection<D::Buf>) {
        self.outgoing.entry(dst).or_default().push(connection);
    }

    /// Attach the consuming end of a pipe from a peer worker.
    pub fn add_incoming(&mut self, consumer: PipeConsumer<PipeFrame<D::Buf>>) {
        self.incoming.push(consumer);
    }

    /// Pin to the configured core and busy-poll until the stop flag.
    pub fn run(mut self) {
        pin_current_thread(self.core_id);
        debug!(worker = self.idx, core = self.core_id, "worker running");
        while !self.stop.load(Ordering::Acquire) {
            self.iterate();
        }
        debug!(worker = self.idx, "worker stopped");
    }

    /// One loop iteration. Public so tests can single-step a worker.
    #[allow(clippy::too_many_lines)]
    pub fn iterate(&mut self) {
        // 1. generation snapshot: stable for this whole iteration
        let generation = self.cp.current();
        self.status.r#gen.store(generation.r#gen, Ordering::Release);

        #[allow(clippy::cast_possible_truncation)]
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let worker_slots = self.counters.slots(self.worker_handle, self.idx);
        let device_slots = self.counters.slots(self.device_handle, self.idx);

        // 2. RX burst
        let mut bufs = Vec::with_capacity(self.read_size);
        let received = self
            .driver
            .burst_rx(self.port, self.queue, &mut bufs, self.read_size);
        add(worker_slots, RX, received as u64);
        add(device_slots, DEV_RX, received as u64);

        // 3. parse + classify
        let mut classified = Vec::with_capacity(bufs.len());
        for buf in bufs {
            let packet = match Packet::new(buf, self.device_id) {
                Ok(packet) => packet,
                Err(e) => {
                    trace!(worker = self.idx, error = %e, "parse failed");
                    bump(worker_slots, PARSE_FAIL);
                    bump(worker_slots, DROPS);
                    bump(device_slots, DEV_DROPS);
                    continue;
                }
            };
            match generation.classify(self.device_id, packet.headers().vlan) {
                Some(pipeline) => classified.push((Arc::clone(pipeline), packet)),
                None => {
                    bump(worker_slots, CLASSIFY_MISS);
                    bump(worker_slots, DROPS);
                    bump(device_slots, DEV_DROPS);
                }
            }
        }

        // 4. group by pipeline and dispatch each front
        let ctx = ModuleCtx {
            worker_idx: self.idx,
            now_ms,
            counters: self.counters.as_ref(),
        };
        let mut output = Vec::with_capacity(classified.len());
        while let Some((pipeline, first)) = classified.pop() {
            let mut batch = vec![first];
            let mut rest = Vec::with_capacity(classified.len());
            for (candidate, packet) in classified {
                if Arc::ptr_eq(&candidate, &pipeline) {
                    batch.push(packet);
                } else {
                    rest.push((candidate, packet));
                }
            }
            classified = rest;
            // pop took the last element: restore arrival order
            batch.reverse();

            let outcome = pipeline.process(&ctx, batch);
            add(worker_slots, DROPS, outcome.dropped.len() as u64);
            add(device_slots, DEV_DROPS, outcome.dropped.len() as u64);
            output.extend(outcome.output);
        }

        // 5. write: local TX now, remote via the pipe picked by flow hash
        let mut local = Vec::with_capacity(output.len());
        for mut packet in output {
            let dst = packet.meta().tx_device;
            if dst == self.device_id {
                local.push(packet);
                continue;
            }
            let pushed = match self.outgoing.get_mut(&dst) {
                Some(connections) if !connections.is_empty() => {
                    #[allow(clippy::cast_possible_truncation)]
                    let pick = (packet.meta().hash % connections.len() as u64) as usize;
                    connections[pick].push(Arc::new(packet))
                }
                _ => {
                    packet.meta_mut().tx_result = TxResult::Failed;
                    false
                }
            };
            if pushed {
                bump(worker_slots, REMOTE_TX);
            } else {
                bump(worker_slots, PIPE_FULL);
                bump(worker_slots, DROPS);
                bump(device_slots, DEV_DROPS);
            }
        }
        for chunk in local.chunks(self.write_size) {
            let frames: Vec<&[u8]> = chunk.iter().map(Packet::frame).collect();
            let accepted = self.driver.burst_tx(self.port, self.queue, &frames);
            add(worker_slots, TX, accepted as u64);
            add(device_slots, DEV_TX, accepted as u64);
            if accepted < chunk.len() {
                let rejected = (chunk.len() - accepted) as u64;
                add(worker_slots, TX_FULL, rejected);
                add(worker_slots, DROPS, rejected);
                add(device_slots, DEV_DROPS, rejected);
            }
        }

        // 6. drain incoming pipes onto the local TX queue
        let (incoming, pending) = (&mut self.incoming, &mut self.pending);
        for pipe in incoming.iter_mut() {
            let popped = pipe.pop(self.write_size, &mut |frame| pending.push_back(frame));
            add(worker_slots, REMOTE_RX, popped as u64);
        }
        while !self.pending.is_empty() {
            let take = self.write_size.min(self.pending.len());
            let frames: Vec<&[u8]> = self
                .pending
                .iter()
                .take(take)
                .map(|frame| frame.frame())
                .collect();
            let accepted = self.driver.burst_tx(self.port, self.queue, &frames);
            drop(frames);
            add(worker_slots, TX, accepted as u64);
            add(device_slots, DEV_TX, accepted as u64);
            for _ in 0..accepted {
                // dropping our clone signals the producer's credit sweep
                self.pending.pop_front();
            }
            if accepted < take {
                let rejected = (take - accepted) as u64;
                add(worker_slots, TX_FULL, rejected);
                add(worker_slots, DROPS, rejected);
                add(device_slots, DEV_DROPS, rejected);
                for _ in accepted..take {
                    self.pending.pop_front();
                }
                break;
            }
        }

        // 7. credit return on every outgoing pipe
        for connections in self.outgoing.values_mut() {
            for connection in connections {
                connection.reclaim();
            }
        }

        // 8. iteration boundary
        generation.end_of_iteration(self.idx);
        bump(worker_slots, ITERATIONS);
        self.status.iterations.fetch_add(1, Ordering::Release);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn pin_current_thread(core_id: u32) {
    let mut set = nix::sched::CpuSet::new();
    let pinned = set
        .set(core_id as usize)
        .and_then(|()| nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &set));
    if let Err(e) = pinned {
        // containers and CI runners regularly forbid affinity calls
        warn!(core_id, error = %e, "could not pin worker thread");
    }
}
