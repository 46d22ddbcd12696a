// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Topology wiring and lifecycle.
//!
//! [`Dataplane::new`] turns the declarative topology into arenas,
//! devices, workers and the cross-device pipe mesh; [`Dataplane::start`]
//! brings ports up and launches the worker threads; [`Dataplane::stop`]
//! raises the stop flags and joins everything in reverse start order.

use crate::control::ControlAgent;
use crate::device::Device;
use crate::driver::{Driver, DriverError, PortConfig};
use crate::generation::CpConfig;
use crate::worker::{
    Connection, DEVICE_COUNTERS, WORKER_COUNTERS, Worker, WorkerSetup, WorkerStatus,
};
use arena::{Arena, ArenaError, HalfKind, MemoryContext};
use config::TopologyConfig;
use net::DeviceId;
use pipe::PipeError;
use stats::{CounterRegistry, StatsError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

/// Pipe depth for every cross-device connection.
const PIPE_CAPACITY: usize = 1024;

/// Counter words reserved per worker.
const COUNTER_WORDS_PER_WORKER: usize = 4096;

/// Why the runtime could not come up.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The topology failed validation (dangling references, out-of-range
    /// or duplicate worker cores).
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Arena creation failed (missing huge pages, bad path).
    #[error(transparent)]
    Arena(#[from] ArenaError),
    /// Driver refused a port.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Counter storage could not be allocated.
    #[error(transparent)]
    Stats(#[from] StatsError),
    /// Pipe construction failed.
    #[error(transparent)]
    Pipe(#[from] PipeError),
    /// Worker thread could not be spawned.
    #[error("worker spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The assembled forwarding plane.
pub struct Dataplane<D: Driver> {
    driver: Arc<D>,
    devices: Vec<Device>,
    workers: Vec<Worker<D>>,
    handles: Vec<JoinHandle<()>>,
    statuses: Vec<Arc<WorkerStatus>>,
    worker_cores: Vec<u32>,
    cp: Arc<CpConfig<D::Buf>>,
    counters: Arc<CounterRegistry>,
    arenas: Vec<Arc<Arena>>,
    cp_memory: Arc<MemoryContext>,
}

impl<D: Driver> std::fmt::Debug for Dataplane<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataplane")
            .field("devices", &self.devices.len())
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Dataplane<D> {
    /// Wire the whole topology. Nothing runs until [`Dataplane::start`].
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] on topology validation, arena, driver,
    /// counter or pipe failure; partial setup is discarded.
    #[allow(clippy::too_many_lines, clippy::cast_possible_truncation)]
    pub fn new(topology: &TopologyConfig, driver: Arc<D>) -> Result<Self, SetupError> {
        // programmatic topologies get the same rejection a loaded file
        // does, worker core placement included
        topology.validate()?;

        // one arena per NUMA instance; registries and the generation
        // mirror live in the first
        let mut arenas = Vec::with_capacity(topology.instances.len());
        for instance in &topology.instances {
            let arena = if topology.storage.as_os_str().is_empty() {
                Arena::anonymous(instance.dp_memory, instance.cp_memory)?
            } else {
                let path = topology
                    .storage
                    .with_extension(format!("numa{}", instance.numa_id));
                Arena::create_file(&path, instance.dp_memory, instance.cp_memory)?
            };
            arenas.push(Arc::new(arena));
        }
        let home = Arc::clone(&arenas[0]);

        let total_workers: usize = topology.devices.iter().map(|d| d.workers.len()).sum();
        let dp_memory = MemoryContext::new(Arc::clone(&home), HalfKind::Dp, "counters");
        let counters = Arc::new(CounterRegistry::new(
            &dp_memory,
            total_workers,
            COUNTER_WORDS_PER_WORKER,
        )?);
        let cp_memory = Arc::new(MemoryContext::new(
            Arc::clone(&home),
            HalfKind::Cp,
            "generations",
        ));
        let cp = Arc::new(CpConfig::new(Arc::clone(&home)));

        let worker_handle = counters.register("worker", WORKER_COUNTERS)?;

        let mut devices = Vec::with_capacity(topology.devices.len());
        let mut workers: Vec<Worker<D>> = Vec::with_capacity(total_workers);
        let mut worker_cores = Vec::with_capacity(total_workers);
        let mut statuses = Vec::with_capacity(total_workers);

        for (device_idx, device_config) in topology.devices.iter().enumerate() {
            let device_id = DeviceId(u16::try_from(device_idx).unwrap_or(u16::MAX));
            let port = driver.port_init(&PortConfig {
                name: device_config.port_name.clone(),
                rss_hash: device_config.rss_hash,
                rx_queues: u16::try_from(device_config.workers.len()).unwrap_or(u16::MAX),
                tx_queues: u16::try_from(device_config.workers.len()).unwrap_or(u16::MAX),
                mtu: device_config.mtu,
                max_lro_packet_size: device_config.max_lro_packet_size,
            })?;
            let device_handle =
                counters.register(&format!("device.{}", device_config.port_name), DEVICE_COUNTERS)?;
            let mut device = Device::new(
                device_id,
                port,
                device_config.port_name.clone(),
                device_config.mac_addr.0,
                device_config.mtu,
                device_handle,
            );

            for (queue, worker_config) in device_config.workers.iter().enumerate() {
                let idx = workers.len();
                driver.mempool_create(
                    &format!("{}-q{queue}", device_config.port_name),
                    worker_config.rx_queue_len as usize,
                    worker_config.instance_id,
                );
                let status = Arc::new(WorkerStatus::default());
                let worker = Worker::new(WorkerSetup {
                    idx,
                    device_id,
                    port,
                    queue: u16::try_from(queue).unwrap_or(u16::MAX),
                    core_id: worker_config.core_id,
                    driver: Arc::clone(&driver),
                    cp: Arc::clone(&cp),
                    counters: Arc::clone(&counters),
                    worker_handle,
                    device_handle,
                    stop: device.stop_flag(),
                    status: Arc::clone(&status),
                });
                device.workers.push(idx);
                workers.push(worker);
                worker_cores.push(worker_config.core_id);
                statuses.push(status);
            }
            devices.push(device);
        }

        // pipe mesh: max(|src workers|, |dst workers|) pipes per
        // connection, spread round-robin over both worker sets
        for connection in &topology.connections {
            let src_workers = devices[usize::from(connection.src_device_id)].workers.clone();
            let dst_workers = devices[usize::from(connection.dst_device_id)].workers.clone();
            let dst_device = DeviceId(connection.dst_device_id);
            let pipes = src_workers.len().max(dst_workers.len());
            for k in 0..pipes {
                let (producer, consumer) = pipe::data_pipe(PIPE_CAPACITY)?;
                workers[src_workers[k % src_workers.len()]]
                    .add_outgoing(dst_device, Connection::new(producer));
                workers[dst_workers[k % dst_workers.len()]].add_incoming(consumer);
            }
        }

        info!(
            devices = devices.len(),
            workers = workers.len(),
            "dataplane wired"
        );
        Ok(Self {
            driver,
            devices,
            workers,
            handles: Vec::new(),
            statuses,
            worker_cores,
            cp,
            counters,
            arenas,
            cp_memory,
        })
    }

    /// A control agent over this plane's configuration root, preloaded
    /// with the in-tree module factories.
    #[must_use]
    pub fn control_agent(&self) -> ControlAgent<D::Buf> {
        ControlAgent::with_default_factories(
            Arc::clone(&self.cp),
            Arc::clone(&self.cp_memory),
            Arc::clone(&self.counters),
            self.statuses.clone(),
            self.devices.len(),
        )
    }

    /// The shared counter registry.
    #[must_use]
    pub fn counters(&self) -> &Arc<CounterRegistry> {
        &self.counters
    }

    /// The shared configuration root.
    #[must_use]
    pub fn cp(&self) -> &Arc<CpConfig<D::Buf>> {
        &self.cp
    }

    /// The device table.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// The per-worker status words.
    #[must_use]
    pub fn statuses(&self) -> &[Arc<WorkerStatus>] {
        &self.statuses
    }

    /// The backing arenas, one per NUMA instance.
    #[must_use]
    pub fn arenas(&self) -> &[Arc<Arena>] {
        &self.arenas
    }

    /// The driver handle.
    #[must_use]
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Start every port, then launch every worker pinned to its core.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`]; a failed start leaves already-started
    /// ports stopped again.
    pub fn start(&mut self) -> Result<(), SetupError> {
        for device in &self.devices {
            if let Err(e) = self.driver.port_start(device.port) {
                error!(device = %device.id, error = %e, "port start failed");
                for started in &self.devices {
                    self.driver.port_stop(started.port);
                }
                return Err(e.into());
            }
        }
        for worker in std::mem::take(&mut self.workers) {
            let name = format!("dp-worker-{}", worker.idx());
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || worker.run())?;
            self.handles.push(handle);
        }
        info!(workers = self.handles.len(), "dataplane started");
        Ok(())
    }

    /// Stop flags up, join workers, ports down — reverse start order.
    pub fn stop(&mut self) {
        for device in self.devices.iter().rev() {
            device.request_stop();
        }
        for handle in self.handles.drain(..).rev() {
            if handle.join().is_err() {
                error!("worker thread panicked before join");
            }
        }
        for device in self.devices.iter().rev() {
            self.driver.port_stop(device.port);
        }
        info!("dataplane stopped");
    }

    /// Single-step every not-yet-started worker once, in index order.
    /// Drives deterministic tests; a started plane has no workers left
    /// here.
    pub fn step_workers(&mut self) {
        for worker in &mut self.workers {
            worker.iterate();
        }
    }

    /// The core each worker is pinned to; validated against the host at
    /// wiring time.
    #[must_use]
    pub fn worker_cores(&self) -> &[u32] {
        &self.worker_cores
    }
}

impl<D: Driver> Drop for Dataplane<D> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}
