// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Raw (wire) configuration of a balancer instance.

use serde::Deserialize;

/// One real server under a virtual service.
#[derive(Debug, Clone, Deserialize)]
pub struct RealRow {
    /// Real server address; must match the service's family.
    pub addr: String,
    /// Scheduling weight; zero removes the real from the ring.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Masquerade source, pre-masked; absent keeps the client source.
    #[serde(default)]
    pub src_addr: Option<String>,
    /// Masquerade mask; absent with `src_addr` set means replace fully.
    #[serde(default)]
    pub src_mask: Option<String>,
    /// Disabled reals keep their sessions but take no new ones.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// One virtual service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRow {
    /// Service address.
    pub addr: String,
    /// Service port.
    pub port: u16,
    /// Transport protocol: `tcp` or `udp`.
    pub proto: String,
    /// Scheduler flags: `ops`, `prr`, `gre`.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Allowed client source prefixes; empty allows everything.
    #[serde(default)]
    pub allowed_src: Vec<String>,
    /// The reals backing this service.
    pub reals: Vec<RealRow>,
}

/// Session timeout classes, in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// TCP SYN seen, no handshake yet.
    pub tcp_syn: u32,
    /// TCP SYN+ACK seen.
    pub tcp_syn_ack: u32,
    /// TCP FIN seen.
    pub tcp_fin: u32,
    /// Established TCP.
    pub tcp: u32,
    /// UDP.
    pub udp: u32,
    /// Everything else.
    pub default: u32,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            tcp_syn: 5,
            tcp_syn_ack: 60,
            tcp_fin: 10,
            tcp: 300,
            udp: 60,
            default: 60,
        }
    }
}

/// Session table sizing.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SessionTableRow {
    /// Initial capacity of the current generation.
    pub capacity: usize,
    /// Resize when density (eighths full) reaches this; tunable, the
    /// production value is 7.
    pub density_threshold: u8,
}

impl Default for SessionTableRow {
    fn default() -> Self {
        Self {
            capacity: 65536,
            density_threshold: 7,
        }
    }
}

/// The whole balancer instance configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    /// Virtual services.
    pub services: Vec<ServiceRow>,
    /// Session timeout classes.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Session table sizing.
    #[serde(default)]
    pub session_table: SessionTableRow,
}
