// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The driver boundary.
//!
//! Everything the forwarding core asks of a poll-mode driver fits in one
//! synchronous trait: port bring-up, queue-indexed burst RX/TX, and
//! mempool naming. No call may block or suspend; an empty burst returns
//! zero immediately.

use net::DeviceId;
use net::buffer::PacketBufferMut;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Driver-assigned port handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u16);

/// Driver failure during initialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The port name is unknown to the driver.
    #[error("unknown port '{0}'")]
    UnknownPort(String),
    /// The port exists but refused the configuration.
    #[error("port '{name}' rejected configuration: {reason}")]
    Rejected {
        /// Port name.
        name: String,
        /// Driver-specific reason.
        reason: String,
    },
}

/// Parameters for [`Driver::port_init`].
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Driver-specific port identifier.
    pub name: String,
    /// RSS hash-function bitmask.
    pub rss_hash: u64,
    /// RX queue count (one per worker).
    pub rx_queues: u16,
    /// TX queue count (one per worker).
    pub tx_queues: u16,
    /// Interface MTU.
    pub mtu: u32,
    /// Maximum LRO aggregate size, zero to disable.
    pub max_lro_packet_size: u32,
}

/// What the forwarding core consumes from the poll-mode driver.
pub trait Driver: Send + Sync + 'static {
    /// The buffer type RX produces and TX consumes.
    type Buf: PacketBufferMut + Send + Sync + 'static;

    /// Configure a port with its queues.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the port cannot be brought to a
    /// configured state; startup aborts on any failure.
    fn port_init(&self, config: &PortConfig) -> Result<PortId, DriverError>;

    /// Start a configured port.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the port cannot start.
    fn port_start(&self, port: PortId) -> Result<(), DriverError>;

    /// Stop a started port.
    fn port_stop(&self, port: PortId);

    /// Create a packet mempool for one RX queue; the handle is the pool
    /// name, the driver owns the memory.
    fn mempool_create(&self, name: &str, size: usize, numa: u32);

    /// Pull up to `max` frames from `(port, queue)`. Returns immediately
    /// with however many were ready.
    fn burst_rx(&self, port: PortId, queue: u16, out: &mut Vec<Self::Buf>, max: usize) -> usize;

    /// Offer frames to `(port, queue)`; the first `k` are accepted and
    /// the count returned. Rejected frames stay with the caller.
    fn burst_tx(&self, port: PortId, queue: u16, frames: &[&[u8]]) -> usize;
}

#[derive(Debug, Default)]
struct LoopbackPort {
    name: String,
    started: bool,
    rx: Vec<VecDeque<Vec<u8>>>,
    tx: Vec<Vec<Vec<u8>>>,
    /// TX mirrored onto this port's RX queue 0 (port wiring for tests).
    mirror_to: Option<PortId>,
    tx_capacity: usize,
}

/// In-memory driver backing virtual devices and tests.
///
/// Frames are injected with [`LoopbackDriver::inject`] and observed with
/// [`LoopbackDriver::transmitted`]; optionally a port's TX can be wired
/// into another port's RX.
#[derive(Debug, Default)]
pub struct LoopbackDriver {
    ports: Mutex<Vec<LoopbackPort>>,
    by_device: Mutex<HashMap<DeviceId, PortId>>,
}

impl LoopbackDriver {
    /// A driver with no ports yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LoopbackPort>> {
        self.ports
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue frames on a port's RX queue.
    pub fn inject(&self, port: PortId, queue: u16, frames: impl IntoIterator<Item = Vec<u8>>) {
        let mut ports = self.lock();
        if let Some(p) = ports.get_mut(usize::from(port.0))
            && let Some(rx) = p.rx.get_mut(usize::from(queue))
        {
            rx.extend(frames);
        }
    }

    /// Everything transmitted on a port so far, all queues interleaved by
    /// queue order.
    #[must_use]
    pub fn transmitted(&self, port: PortId) -> Vec<Vec<u8>> {
        let ports = self.lock();
        ports
            .get(usize::from(port.0))
            .map(|p| p.tx.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Wire `src`'s TX into `dst`'s RX queue 0.
    pub fn mirror(&self, src: PortId, dst: PortId) {
        let mut ports = self.lock();
        if let Some(p) = ports.get_mut(usize::from(src.0)) {
            p.mirror_to = Some(dst);
        }
    }

    /// Cap the TX queues of a port (to provoke full-queue drops).
    pub fn set_tx_capacity(&self, port: PortId, capacity: usize) {
        let mut ports = self.lock();
        if let Some(p) = ports.get_mut(usize::from(port.0)) {
            p.tx_capacity = capacity;
        }
    }

    /// Remember which device owns which port, for test lookups.
    pub fn bind_device(&self, device: DeviceId, port: PortId) {
        self.by_device
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(device, port);
    }

    /// The port bound to a device, if any.
    #[must_use]
    pub fn port_of(&self, device: DeviceId) -> Option<PortId> {
        self.by_device
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&device)
            .copied()
    }
}

impl Driver for LoopbackDriver {
    type Buf = net::buffer::TestBuffer;

    fn port_init(&self, config: &PortConfig) -> Result<PortId, DriverError> {
        if config.rx_queues == 0 || config.tx_queues == 0 {
            return Err(DriverError::Rejected {
                name: config.name.clone(),
                reason: "at least one rx and tx queue".to_owned(),
            });
        }
        let mut ports = self.lock();
        let id = PortId(u16::try_from(ports.len()).unwrap_or(u16::MAX));
        ports.push(LoopbackPort {
            name: config.name.clone(),
            started: false,
            rx: (0..config.rx_queues).map(|_| VecDeque::new()).collect(),
            tx: (0..config.tx_queues).map(|_| Vec::new()).collect(),
            mirror_to: None,
            tx_capacity: usize::MAX,
        });
        debug!(port = id.0, name = %config.name, "loopback port configured");
        Ok(id)
    }

    fn port_start(&self, port: PortId) -> Result<(), DriverError> {
        let mut ports = self.lock();
        match ports.get_mut(usize::from(port.0)) {
            Some(p) => {
                p.started = true;
                Ok(())
            }
            None => Err(DriverError::UnknownPort(format!("port {}", port.0))),
        }
    }

    fn port_stop(&self, port: PortId) {
        let mut ports = self.lock();
        if let Some(p) = ports.get_mut(usize::from(port.0)) {
            p.started = false;
            debug!(port = port.0, name = %p.name, "loopback port stopped");
        }
    }

    fn mempool_create(&self, name: &str, size: usize, numa: u32) {
        debug!(name, size, numa, "loopback mempool");
    }

    fn burst_rx(&self, port: PortId, queue: u16, out: &mut Vec<Self::Buf>, max: usize) -> usize {
        let mut ports = self.lock();
        let Some(p) = ports.get_mut(usize::from(port.0)) else {
            return 0;
        };
        if !p.started {
            return 0;
        }
        let Some(rx) = p.rx.get_mut(usize::from(queue)) else {
            return 0;
        };
        let count = max.min(rx.len());
        for _ in 0..count {
            // drain preserves arrival order
            if let Some(frame) = rx.pop_front() {
                out.push(net::buffer::TestBuffer::from_frame(&frame));
            }
        }
        count
    }

    fn burst_tx(&self, port: PortId, queue: u16, frames: &[&[u8]]) -> usize {
        let mut ports = self.lock();
        let Some(p) = ports.get_mut(usize::from(port.0)) else {
            return 0;
        };
        if !p.started {
            return 0;
        }
        let mirror = p.mirror_to;
        let capacity = p.tx_capacity;
        let Some(tx) = p.tx.get_mut(usize::from(queue)) else {
            return 0;
        };
        let room = capacity.saturating_sub(tx.len());
        let accepted = frames.len().min(room);
        let copies: Vec<Vec<u8>> = frames[..accepted].iter().map(|f| f.to_vec()).collect();
        tx.extend(copies.iter().cloned());
        drop(ports);

        if let Some(dst) = mirror {
            self.inject(dst, 0, copies);
        }
        accepted
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    fn config(name: &str) -> PortConfig {
        PortConfig {
            name: name.to_owned(),
            rss_hash: 0,
            rx_queues: 2,
            tx_queues: 2,
            mtu: 1500,
            max_lro_packet_size: 0,
        }
    }

    #[test]
    fn rx_requires_start_and_preserves_order() {
        let driver = LoopbackDriver::new();
        let port = driver.port_init(&config("virtio_user_0")).unwrap();
        driver.inject(port, 0, [vec![1], vec![2], vec![3]]);

        let mut out = Vec::new();
        assert_eq!(driver.burst_rx(port, 0, &mut out, 32), 0);

        driver.port_start(port).unwrap();
        assert_eq!(driver.burst_rx(port, 0, &mut out, 2), 2);
        assert_eq!(driver.burst_rx(port, 0, &mut out, 2), 1);
        let bytes: Vec<u8> = out
            .iter()
            .map(|b| net::buffer::PacketBuffer::as_slice(b)[0])
            .collect();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn tx_capacity_limits_acceptance() {
        let driver = LoopbackDriver::new();
        let port = driver.port_init(&config("virtio_user_0")).unwrap();
        driver.port_start(port).unwrap();
        driver.set_tx_capacity(port, 2);
        let frames: Vec<&[u8]> = vec![b"a", b"b", b"c"];
        assert_eq!(driver.burst_tx(port, 0, &frames), 2);
        assert_eq!(driver.transmitted(port).len(), 2);
    }

    #[test]
    fn mirror_feeds_the_peer_port() {
        let driver = LoopbackDriver::new();
        let a = driver.port_init(&config("virtio_user_0")).unwrap();
        let b = driver.port_init(&config("virtio_user_1")).unwrap();
        driver.port_start(a).unwrap();
        driver.port_start(b).unwrap();
        driver.mirror(a, b);

        assert_eq!(driver.burst_tx(a, 0, &[b"frame"]), 1);
        let mut out = Vec::new();
        assert_eq!(driver.burst_rx(b, 0, &mut out, 8), 1);
    }
}
