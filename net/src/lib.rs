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

//! # Packet model
//!
//! This crate defines the packet envelope shared by every forwarding stage:
//! a buffer abstraction ([`buffer::PacketBufferMut`]), the [`packet::Packet`]
//! envelope carrying device ids and parsed header offsets, in-place header
//! views ([`headers`]), internet checksum helpers ([`checksum`]) and the
//! 5-tuple flow hash ([`hash`]).
//!
//! Parsing derives byte offsets with `etherparse` slice parsers; all header
//! mutation happens in place through the offset views so a packet is never
//! re-serialized from owned header structs.

pub mod buffer;
pub mod checksum;
pub mod hash;
pub mod headers;
pub mod packet;
#[cfg(any(test, feature = "test_buffer"))]
pub mod test_utils;

/// Numeric id of a device, assigned by topology order.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u16);

impl DeviceId {
    /// The id as an index into device-ordered arrays.
    #[must_use]
    pub fn as_index(self) -> usize {
        usize::from(self.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

impl From<u16> for DeviceId {
    fn from(value: u16) -> DeviceId {
        DeviceId(value)
    }
}
