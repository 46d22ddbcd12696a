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

//! # Forwarding runtime
//!
//! Ties the workspace together: devices and their CPU-pinned workers are
//! wired from the declarative topology, cross-device traffic rides SPSC
//! data pipes, and the control plane publishes immutable configuration
//! generations that workers snapshot once per loop iteration.
//!
//! The driver boundary is the [`driver::Driver`] trait; the in-tree
//! [`driver::LoopbackDriver`] backs virtual topologies and the test
//! suite, real NIC shims live out of tree.

pub mod control;
pub mod device;
pub mod driver;
pub mod generation;
pub mod runtime;
pub mod worker;
