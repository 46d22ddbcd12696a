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

//! # Stateless NAT64 module
//!
//! IP/ICMP translation between IPv4 and IPv6 per RFC 7915, driven by an
//! explicit mapping table instead of address state: a bounded array of
//! /96 prefixes plus `{ipv4, ipv6, prefix}` mappings indexed by LPM from
//! both families. IPv6 sources are synthesized as `prefix ‖ ipv4_src` on
//! the way in and stripped back out by longest prefix match on the way
//! back.
//!
//! TCP and UDP checksums are fixed up incrementally against the changed
//! pseudo-header; ICMP and ICMPv6 cross-translate through the type/code
//! tables in [`icmp`], including the embedded packet of error messages.

pub mod config;
mod icmp;
mod module;
mod tables;
mod translate;
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test;

pub use config::Nat64Config;
pub use module::{Nat64Factory, Nat64Module};
pub use tables::{Mapping, Nat64Tables, TableError};
