// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # Topology configuration
//!
//! The declarative structure loaded once at boot: arena storage, NUMA
//! instances, devices with their worker placements, and the device
//! connection mesh. Loading validates the cross-references (instance ids,
//! device ids, memory sizes) so wiring code downstream can index arrays
//! without re-checking.

mod topology;

pub use topology::{
    ConfigError, ConnectionConfig, DeviceConfig, InstanceConfig, LogLevel, MacAddr,
    TopologyConfig, WorkerConfig,
};
