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

//! # L3/L4 balancer module
//!
//! Virtual services are looked up by destination LPM plus an exact
//! `(addr, port, proto)` filter; clients stick to a real through a
//! TTL-indexed session table, and new sessions pick a real on a weighted
//! consistent-hash ring probed by the packet's flow hash. Forwarding is
//! IP-in-IP (or GRE) encapsulation toward the real, with an optional
//! source masquerade `(client_src & !mask) | src_addr`.
//!
//! The session table runs two generations so it can grow live: inserts go
//! to the current generation, lookups consult both until every worker has
//! cleared its `use_prev_gen` flag, then the previous generation is
//! retired.

mod config;
mod encap;
mod module;
mod ring;
mod session;
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test;

pub use config::{BalancerConfig, RealRow, ServiceRow, TimeoutsConfig};
pub use module::{BalancerFactory, BalancerModule, RealId, VsId};
pub use ring::Ring;
pub use session::{SessionKey, SessionTable, SessionTableConfig, SessionValue};
