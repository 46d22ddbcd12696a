// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The device model: one driver port, a worker set, a counter block and a
//! stop flag checked by its workers at iteration boundaries.

use crate::driver::PortId;
use net::DeviceId;
use stats::CounterHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One forwarding device.
#[derive(Debug)]
pub struct Device {
    /// Numeric device id (index into the topology's device list).
    pub id: DeviceId,
    /// Driver port backing the device.
    pub port: PortId,
    /// Driver-specific port name.
    pub name: String,
    /// Station MAC.
    pub mac: [u8; 6],
    /// Interface MTU.
    pub mtu: u32,
    /// Global worker indexes owned by this device, in queue order.
    pub workers: Vec<usize>,
    /// Device counter block (`[rx, tx, drops]`, worker-slotted).
    pub counters: CounterHandle,
    stop: Arc<AtomicBool>,
}

impl Device {
    /// Assemble a device record.
    #[must_use]
    pub fn new(
        id: DeviceId,
        port: PortId,
        name: String,
        mac: [u8; 6],
        mtu: u32,
        counters: CounterHandle,
    ) -> Self {
        Self {
            id,
            port,
            name,
            mac,
            mtu,
            workers: Vec::new(),
            counters,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The stop flag shared with this device's workers.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Order the device's workers to exit at their next iteration
    /// boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}
