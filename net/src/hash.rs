// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! 5-tuple flow hashing.
//!
//! The hash steers packets onto outgoing pipes (`hash % pipe_count`) and
//! probes the balancer ring, so it must be identical on every worker and
//! across restarts: the hasher is seeded with fixed keys.

use ahash::RandomState;
use std::hash::BuildHasher;

const SEED: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0xf39c_c060_5ced_c834,
    0x1082_276b_f3a2_7251,
    0x7109_87c8_82f7_2b42,
);

/// One direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    /// IP protocol number.
    pub protocol: u8,
    /// Source address, IPv4 mapped into the low 4 bytes.
    pub src_addr: [u8; 16],
    /// Destination address, IPv4 mapped into the low 4 bytes.
    pub dst_addr: [u8; 16],
    /// Source port, zero when the transport has none.
    pub src_port: u16,
    /// Destination port, zero when the transport has none.
    pub dst_port: u16,
}

impl FlowTuple {
    /// Embed an IPv4 address pair.
    #[must_use]
    pub fn v4(protocol: u8, src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> Self {
        let mut src_addr = [0u8; 16];
        let mut dst_addr = [0u8; 16];
        src_addr[12..].copy_from_slice(&src);
        dst_addr[12..].copy_from_slice(&dst);
        Self {
            protocol,
            src_addr,
            dst_addr,
            src_port,
            dst_port,
        }
    }

    /// Use an IPv6 address pair directly.
    #[must_use]
    pub fn v6(protocol: u8, src: [u8; 16], dst: [u8; 16], src_port: u16, dst_port: u16) -> Self {
        Self {
            protocol,
            src_addr: src,
            dst_addr: dst,
            src_port,
            dst_port,
        }
    }
}

/// Deterministic hash of a flow tuple.
#[must_use]
pub fn flow_hash(tuple: &FlowTuple) -> u64 {
    let state = RandomState::with_seeds(SEED.0, SEED.1, SEED.2, SEED.3);
    state.hash_one(tuple)
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let t = FlowTuple::v4(6, [1, 2, 3, 4], [5, 6, 7, 8], 5000, 80);
        assert_eq!(flow_hash(&t), flow_hash(&t.clone()));
    }

    #[test]
    fn hash_discriminates_ports() {
        let a = FlowTuple::v4(6, [1, 2, 3, 4], [5, 6, 7, 8], 5000, 80);
        let b = FlowTuple::v4(6, [1, 2, 3, 4], [5, 6, 7, 8], 5001, 80);
        assert_ne!(flow_hash(&a), flow_hash(&b));
    }
}
