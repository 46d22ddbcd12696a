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

//! # Longest-prefix-match tables
//!
//! A binary trie keyed by IPv4 (`u32`) or IPv6 (`u128`) prefixes. `get` /
//! `get_mut` / `remove` are exact-prefix operations; [`Lpm::lookup`] walks
//! the trie and returns the longest prefix covering an address. Route
//! lookup, the balancer's allowed-source trees and the NAT64 mapping tables
//! all sit on these two aliases:
//!
//! - [`Lpm4`] over [`Prefix4`]
//! - [`Lpm6`] over [`Prefix6`]

mod prefix;
mod trie;

pub use prefix::{IpPrefix, Prefix4, Prefix6, PrefixError};
pub use trie::Lpm;

/// LPM over IPv4 prefixes.
pub type Lpm4<V> = Lpm<Prefix4, V>;
/// LPM over IPv6 prefixes.
pub type Lpm6<V> = Lpm<Prefix6, V>;
