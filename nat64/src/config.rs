// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Raw (wire) configuration of a NAT64 instance.

use serde::Deserialize;

/// One static IPv4 ⇄ IPv6 mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingRow {
    /// IPv4 side.
    pub ip4: String,
    /// IPv6 side.
    pub ip6: String,
    /// Index into `prefixes` used when synthesizing sources toward this
    /// mapping.
    #[serde(default)]
    pub prefix: usize,
}

fn default_ipv6_mtu() -> u32 {
    1280
}

fn default_ipv4_mtu() -> u32 {
    1450
}

/// The whole NAT64 instance configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Nat64Config {
    /// Translation prefixes, each /96.
    pub prefixes: Vec<String>,
    /// Static mappings.
    #[serde(default)]
    pub mappings: Vec<MappingRow>,
    /// Floor for Packet Too Big toward IPv6.
    #[serde(default = "default_ipv6_mtu")]
    pub ipv6_mtu: u32,
    /// Floor for Fragmentation Needed toward IPv4.
    #[serde(default = "default_ipv4_mtu")]
    pub ipv4_mtu: u32,
    /// Drop IPv6 packets whose source matches no prefix.
    #[serde(default)]
    pub drop_unknown_prefix: bool,
    /// Drop packets whose destination matches no mapping.
    #[serde(default)]
    pub drop_unknown_mapping: bool,
}
