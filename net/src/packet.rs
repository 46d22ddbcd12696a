// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet envelope.
//!
//! A [`Packet`] wraps a driver buffer together with the metadata the worker
//! loop stamps on it (device ids, flow hash, transmit result) and the parsed
//! L2/L3/L4 offsets. Offsets are derived once at RX with `etherparse` slice
//! parsers; modules rewrite the frame in place through the offset views and
//! call [`Packet::reparse`] when they change the header layout.

use crate::DeviceId;
use crate::buffer::{BufferError, PacketBuffer, PacketBufferMut};
use crate::hash::{FlowTuple, flow_hash};
use crate::headers::{
    ETH_HEADER_LEN, EthView, IcmpView, Ipv4View, Ipv6View, TcpView, UdpView, VLAN_TAG_LEN,
    ethertype, ipproto,
};
use etherparse::{Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice, UdpHeaderSlice};
use tracing::trace;

/// Why a frame could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Frame shorter than the headers it claims.
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),
    /// An ethertype the forwarding core does not carry.
    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEthertype(u16),
    /// More than one VLAN tag.
    #[error("nested vlan tags are not supported")]
    NestedVlan,
    /// Malformed IPv4 header.
    #[error("bad ipv4 header")]
    BadIpv4Header,
    /// Malformed IPv6 header.
    #[error("bad ipv6 header")]
    BadIpv6Header,
    /// Malformed transport header.
    #[error("bad {0} header")]
    BadTransportHeader(&'static str),
}

/// Network-layer protocol of a parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Kind {
    /// IPv4.
    Ipv4,
    /// IPv6.
    Ipv6,
}

/// Transport-layer protocol of a parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Kind {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp4,
    /// ICMPv6.
    Icmp6,
    /// Anything else (including fragments), by protocol number.
    Other(u8),
}

/// Byte offsets and protocol kinds derived at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeaders {
    /// VLAN id when the frame carries one 802.1Q tag.
    pub vlan: Option<u16>,
    /// Network-layer protocol.
    pub l3: L3Kind,
    /// Offset of the L3 header.
    pub l3_offset: usize,
    /// Transport-layer protocol.
    pub l4: L4Kind,
    /// Offset of the L4 header.
    pub l4_offset: usize,
    /// Offset of the transport payload.
    pub payload_offset: usize,
}

/// Outcome of the transmit attempt, stamped by the worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TxResult {
    /// Not yet handed to the driver.
    #[default]
    Pending,
    /// Accepted by the driver TX queue.
    Sent,
    /// Rejected (queue full or no route to a device).
    Failed,
}

/// Worker-stamped metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketMeta {
    /// Device the packet arrived on.
    pub rx_device: DeviceId,
    /// Device the packet leaves on; modules may redirect it.
    pub tx_device: DeviceId,
    /// 5-tuple flow hash.
    pub hash: u64,
    /// Transmit outcome.
    pub tx_result: TxResult,
}

/// A parsed packet owning its buffer.
#[derive(Debug)]
pub struct Packet<Buf: PacketBufferMut> {
    buf: Buf,
    meta: PacketMeta,
    headers: ParsedHeaders,
}

impl<Buf: PacketBufferMut> Packet<Buf> {
    /// Parse a received frame into a packet envelope.
    ///
    /// Both device ids start as `rx_device`; modules redirect `tx_device`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] (and drops the buffer) when the frame cannot
    /// be classified down to L3.
    pub fn new(buf: Buf, rx_device: DeviceId) -> Result<Self, ParseError> {
        let headers = parse_headers(buf.as_slice())?;
        let hash = compute_hash(buf.as_slice(), &headers);
        Ok(Self {
            buf,
            meta: PacketMeta {
                rx_device,
                tx_device: rx_device,
                hash,
                tx_result: TxResult::Pending,
            },
            headers,
        })
    }

    /// Worker-stamped metadata.
    #[must_use]
    pub fn meta(&self) -> &PacketMeta {
        &self.meta
    }

    /// Mutable metadata.
    pub fn meta_mut(&mut self) -> &mut PacketMeta {
        &mut self.meta
    }

    /// Parsed offsets.
    #[must_use]
    pub fn headers(&self) -> &ParsedHeaders {
        &self.headers
    }

    /// The whole frame.
    #[must_use]
    pub fn frame(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// The whole frame, mutable. Offsets stay valid as long as the caller
    /// does not change the header layout.
    pub fn frame_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    /// Transport payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf.as_slice()[self.headers.payload_offset..]
    }

    /// Ethernet header view.
    pub fn eth(&mut self) -> EthView<'_> {
        EthView(&mut self.buf.as_mut_slice()[..ETH_HEADER_LEN])
    }

    /// IPv4 header view, when the packet is IPv4.
    pub fn ipv4(&mut self) -> Option<Ipv4View<'_>> {
        match self.headers.l3 {
            L3Kind::Ipv4 => {
                let (l3, l4) = (self.headers.l3_offset, self.headers.l4_offset);
                Some(Ipv4View(&mut self.buf.as_mut_slice()[l3..l4]))
            }
            L3Kind::Ipv6 => None,
        }
    }

    /// IPv6 header view, when the packet is IPv6.
    pub fn ipv6(&mut self) -> Option<Ipv6View<'_>> {
        match self.headers.l3 {
            L3Kind::Ipv6 => {
                let l3 = self.headers.l3_offset;
                Some(Ipv6View(&mut self.buf.as_mut_slice()[l3..l3 + 40]))
            }
            L3Kind::Ipv4 => None,
        }
    }

    /// TCP header view, when the packet is TCP.
    pub fn tcp(&mut self) -> Option<TcpView<'_>> {
        match self.headers.l4 {
            L4Kind::Tcp => {
                let l4 = self.headers.l4_offset;
                Some(TcpView(&mut self.buf.as_mut_slice()[l4..]))
            }
            _ => None,
        }
    }

    /// UDP header view, when the packet is UDP.
    pub fn udp(&mut self) -> Option<UdpView<'_>> {
        match self.headers.l4 {
            L4Kind::Udp => {
                let l4 = self.headers.l4_offset;
                Some(UdpView(&mut self.buf.as_mut_slice()[l4..]))
            }
            _ => None,
        }
    }

    /// ICMP / ICMPv6 header view.
    pub fn icmp(&mut self) -> Option<IcmpView<'_>> {
        match self.headers.l4 {
            L4Kind::Icmp4 | L4Kind::Icmp6 => {
                let l4 = self.headers.l4_offset;
                Some(IcmpView(&mut self.buf.as_mut_slice()[l4..]))
            }
            _ => None,
        }
    }

    /// Insert `bytes` at frame offset `at` (encapsulation).
    ///
    /// The caller is responsible for fixing the ethertype and calling
    /// [`Packet::reparse`] afterwards.
    ///
    /// # Errors
    ///
    /// Propagates [`BufferError`] from the buffer.
    pub fn insert_bytes(&mut self, at: usize, bytes: &[u8]) -> Result<(), BufferError> {
        self.buf.open_gap(at, bytes.len())?;
        self.buf.as_mut_slice()[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Remove `len` bytes at frame offset `at` (decapsulation).
    ///
    /// # Errors
    ///
    /// Propagates [`BufferError`] from the buffer.
    pub fn remove_bytes(&mut self, at: usize, len: usize) -> Result<(), BufferError> {
        self.buf.close_gap(at, len)
    }

    /// Re-derive offsets after a layout-changing rewrite.
    ///
    /// The flow hash keeps its RX-time value: steering and session
    /// affinity follow the flow as it arrived, not what encapsulation
    /// made of it.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the rewritten frame no longer parses; the
    /// packet keeps its previous offsets in that case and must be dropped
    /// by the caller.
    pub fn reparse(&mut self) -> Result<(), ParseError> {
        self.headers = parse_headers(self.buf.as_slice())?;
        Ok(())
    }

    /// Give the buffer back (transmit path).
    #[must_use]
    pub fn into_buf(self) -> Buf {
        self.buf
    }
}

fn parse_headers(frame: &[u8]) -> Result<ParsedHeaders, ParseError> {
    if frame.len() < ETH_HEADER_LEN {
        return Err(ParseError::TooShort(frame.len()));
    }
    let mut ether = u16::from_be_bytes([frame[12], frame[13]]);
    let mut l3_offset = ETH_HEADER_LEN;
    let mut vlan = None;
    if ether == ethertype::VLAN {
        if frame.len() < ETH_HEADER_LEN + VLAN_TAG_LEN {
            return Err(ParseError::TooShort(frame.len()));
        }
        let tci = u16::from_be_bytes([frame[14], frame[15]]);
        vlan = Some(tci & 0x0fff);
        ether = u16::from_be_bytes([frame[16], frame[17]]);
        l3_offset += VLAN_TAG_LEN;
        if ether == ethertype::VLAN {
            return Err(ParseError::NestedVlan);
        }
    }

    let (l3, l4_offset, protocol, fragment) = match ether {
        ethertype::IPV4 => {
            let slice = Ipv4HeaderSlice::from_slice(&frame[l3_offset..])
                .map_err(|_| ParseError::BadIpv4Header)?;
            (
                L3Kind::Ipv4,
                l3_offset + slice.slice().len(),
                slice.protocol().0,
                slice.is_fragmenting_payload(),
            )
        }
        ethertype::IPV6 => {
            let slice = Ipv6HeaderSlice::from_slice(&frame[l3_offset..])
                .map_err(|_| ParseError::BadIpv6Header)?;
            (
                L3Kind::Ipv6,
                l3_offset + 40,
                slice.next_header().0,
                false,
            )
        }
        other => {
            trace!(ethertype = other, "unsupported ethertype");
            return Err(ParseError::UnsupportedEthertype(other));
        }
    };

    let (l4, payload_offset) = if fragment {
        // Fragments are classified by protocol only; modules that need the
        // transport header treat them as opaque.
        (L4Kind::Other(protocol), l4_offset)
    } else {
        match protocol {
            ipproto::TCP => {
                let slice = TcpHeaderSlice::from_slice(&frame[l4_offset..])
                    .map_err(|_| ParseError::BadTransportHeader("tcp"))?;
                (L4Kind::Tcp, l4_offset + slice.slice().len())
            }
            ipproto::UDP => {
                UdpHeaderSlice::from_slice(&frame[l4_offset..])
                    .map_err(|_| ParseError::BadTransportHeader("udp"))?;
                (L4Kind::Udp, l4_offset + 8)
            }
            ipproto::ICMP => {
                if frame.len() < l4_offset + 8 {
                    return Err(ParseError::BadTransportHeader("icmp"));
                }
                (L4Kind::Icmp4, l4_offset + 8)
            }
            ipproto::ICMPV6 => {
                if frame.len() < l4_offset + 8 {
                    return Err(ParseError::BadTransportHeader("icmpv6"));
                }
                (L4Kind::Icmp6, l4_offset + 8)
            }
            other => (L4Kind::Other(other), l4_offset),
        }
    };

    Ok(ParsedHeaders {
        vlan,
        l3,
        l3_offset,
        l4,
        l4_offset,
        payload_offset,
    })
}

fn compute_hash(frame: &[u8], headers: &ParsedHeaders) -> u64 {
    let (src_port, dst_port) = match headers.l4 {
        L4Kind::Tcp | L4Kind::Udp => {
            let l4 = headers.l4_offset;
            (
                u16::from_be_bytes([frame[l4], frame[l4 + 1]]),
                u16::from_be_bytes([frame[l4 + 2], frame[l4 + 3]]),
            )
        }
        _ => (0, 0),
    };
    let tuple = match headers.l3 {
        L3Kind::Ipv4 => {
            let l3 = headers.l3_offset;
            let mut src = [0u8; 4];
            let mut dst = [0u8; 4];
            src.copy_from_slice(&frame[l3 + 12..l3 + 16]);
            dst.copy_from_slice(&frame[l3 + 16..l3 + 20]);
            FlowTuple::v4(l4_protocol(headers.l4), src, dst, src_port, dst_port)
        }
        L3Kind::Ipv6 => {
            let l3 = headers.l3_offset;
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&frame[l3 + 8..l3 + 24]);
            dst.copy_from_slice(&frame[l3 + 24..l3 + 40]);
            FlowTuple::v6(l4_protocol(headers.l4), src, dst, src_port, dst_port)
        }
    };
    flow_hash(&tuple)
}

fn l4_protocol(l4: L4Kind) -> u8 {
    match l4 {
        L4Kind::Tcp => ipproto::TCP,
        L4Kind::Udp => ipproto::UDP,
        L4Kind::Icmp4 => ipproto::ICMP,
        L4Kind::Icmp6 => ipproto::ICMPV6,
        L4Kind::Other(p) => p,
    }
}
