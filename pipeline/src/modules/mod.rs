// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Stateless modules: VLAN-aware L2 forwarding, LPM routing, and tunnel
//! decapsulation. These share the module ABI with the stateful modules
//! and double as its reference implementations.

pub mod decap;
pub mod forward;
pub mod route;

pub use decap::{DecapFactory, DecapModule};
pub use forward::{ForwardFactory, ForwardModule};
pub use route::{RouteFactory, RouteModule};
