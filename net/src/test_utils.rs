// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Frame builders for tests: valid Ethernet/IP/transport frames with
//! correct checksums, built byte-by-byte so tests state exactly what goes
//! on the wire.

#![allow(clippy::cast_possible_truncation)] // frame sizes fit u16 by construction

use crate::checksum::{pseudo_header_v4, pseudo_header_v6};
use crate::headers::{
    Ipv4Fields, Ipv6Fields, build_ipv4_header, build_ipv6_header, ethertype, ipproto,
};

/// Source MAC used by every test frame.
pub const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
/// Destination MAC used by every test frame.
pub const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

fn eth_header(ether: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14);
    frame.extend_from_slice(&DST_MAC);
    frame.extend_from_slice(&SRC_MAC);
    frame.extend_from_slice(&ether.to_be_bytes());
    frame
}

/// Wrap the L3 part of `frame` in an 802.1Q tag with the given VLAN id.
#[must_use]
pub fn vlan_tagged(vlan: u16, frame: &[u8]) -> Vec<u8> {
    let inner_ether = [frame[12], frame[13]];
    let mut out = Vec::with_capacity(frame.len() + 4);
    out.extend_from_slice(&frame[..12]);
    out.extend_from_slice(&ethertype::VLAN.to_be_bytes());
    out.extend_from_slice(&(vlan & 0x0fff).to_be_bytes());
    out.extend_from_slice(&inner_ether);
    out.extend_from_slice(&frame[14..]);
    out
}

/// IPv4 UDP frame with valid IP and UDP checksums.
#[must_use]
pub fn udp_v4_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = (8 + payload.len()) as u16;
    let mut udp = Vec::with_capacity(usize::from(udp_len));
    udp.extend_from_slice(&sport.to_be_bytes());
    udp.extend_from_slice(&dport.to_be_bytes());
    udp.extend_from_slice(&udp_len.to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    let cks = pseudo_header_v4(src, dst, ipproto::UDP, udp_len)
        .add_bytes(&udp)
        .finish();
    let cks = if cks == 0 { 0xffff } else { cks };
    udp[6..8].copy_from_slice(&cks.to_be_bytes());

    let ip = build_ipv4_header(&Ipv4Fields {
        tos: 0,
        total_len: 20 + udp_len,
        identification: 0x0100,
        flags_fragment: 0x4000,
        ttl: 64,
        protocol: ipproto::UDP,
        source: src,
        destination: dst,
    });

    let mut frame = eth_header(ethertype::IPV4);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&udp);
    frame
}

/// IPv4 TCP frame (20-byte TCP header) with the given flag byte.
#[must_use]
pub fn tcp_v4_frame(
    src: [u8; 4],
    dst: [u8; 4],
    sport: u16,
    dport: u16,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let tcp_len = (20 + payload.len()) as u16;
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&sport.to_be_bytes());
    tcp[2..4].copy_from_slice(&dport.to_be_bytes());
    tcp[4..8].copy_from_slice(&1u32.to_be_bytes()); // seq
    tcp[12] = 5 << 4; // data offset
    tcp[13] = flags;
    tcp[14..16].copy_from_slice(&0xffffu16.to_be_bytes()); // window
    tcp.extend_from_slice(payload);
    let cks = pseudo_header_v4(src, dst, ipproto::TCP, tcp_len)
        .add_bytes(&tcp)
        .finish();
    tcp[16..18].copy_from_slice(&cks.to_be_bytes());

    let ip = build_ipv4_header(&Ipv4Fields {
        tos: 0,
        total_len: 20 + tcp_len,
        identification: 0x0200,
        flags_fragment: 0x4000,
        ttl: 64,
        protocol: ipproto::TCP,
        source: src,
        destination: dst,
    });

    let mut frame = eth_header(ethertype::IPV4);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&tcp);
    frame
}

/// IPv6 UDP frame with a valid UDP checksum.
#[must_use]
pub fn udp_v6_frame(
    src: [u8; 16],
    dst: [u8; 16],
    sport: u16,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = (8 + payload.len()) as u16;
    let mut udp = Vec::with_capacity(usize::from(udp_len));
    udp.extend_from_slice(&sport.to_be_bytes());
    udp.extend_from_slice(&dport.to_be_bytes());
    udp.extend_from_slice(&udp_len.to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    let cks = pseudo_header_v6(src, dst, ipproto::UDP, u32::from(udp_len))
        .add_bytes(&udp)
        .finish();
    let cks = if cks == 0 { 0xffff } else { cks };
    udp[6..8].copy_from_slice(&cks.to_be_bytes());

    let ip = build_ipv6_header(&Ipv6Fields {
        traffic_class: 0,
        flow_label: 0,
        payload_len: udp_len,
        next_header: ipproto::UDP,
        hop_limit: 64,
        source: src,
        destination: dst,
    });

    let mut frame = eth_header(ethertype::IPV6);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&udp);
    frame
}

/// IPv6 TCP frame (20-byte TCP header) with the given flag byte.
#[must_use]
pub fn tcp_v6_frame(
    src: [u8; 16],
    dst: [u8; 16],
    sport: u16,
    dport: u16,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let tcp_len = (20 + payload.len()) as u16;
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&sport.to_be_bytes());
    tcp[2..4].copy_from_slice(&dport.to_be_bytes());
    tcp[4..8].copy_from_slice(&1u32.to_be_bytes());
    tcp[12] = 5 << 4;
    tcp[13] = flags;
    tcp[14..16].copy_from_slice(&0xffffu16.to_be_bytes());
    tcp.extend_from_slice(payload);
    let cks = pseudo_header_v6(src, dst, ipproto::TCP, u32::from(tcp_len))
        .add_bytes(&tcp)
        .finish();
    tcp[16..18].copy_from_slice(&cks.to_be_bytes());

    let ip = build_ipv6_header(&Ipv6Fields {
        traffic_class: 0,
        flow_label: 0,
        payload_len: tcp_len,
        next_header: ipproto::TCP,
        hop_limit: 64,
        source: src,
        destination: dst,
    });

    let mut frame = eth_header(ethertype::IPV6);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&tcp);
    frame
}

/// IPv4 ICMP frame with a valid ICMP checksum.
#[must_use]
pub fn icmp4_frame(
    src: [u8; 4],
    dst: [u8; 4],
    msg_type: u8,
    code: u8,
    rest: [u8; 4],
    payload: &[u8],
) -> Vec<u8> {
    let mut icmp = vec![msg_type, code, 0, 0];
    icmp.extend_from_slice(&rest);
    icmp.extend_from_slice(payload);
    let cks = crate::checksum::Accumulator::new().add_bytes(&icmp).finish();
    icmp[2..4].copy_from_slice(&cks.to_be_bytes());

    let ip = build_ipv4_header(&Ipv4Fields {
        tos: 0,
        total_len: (20 + icmp.len()) as u16,
        identification: 0x0300,
        flags_fragment: 0x4000,
        ttl: 64,
        protocol: ipproto::ICMP,
        source: src,
        destination: dst,
    });

    let mut frame = eth_header(ethertype::IPV4);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&icmp);
    frame
}

/// IPv6 ICMPv6 frame with a valid ICMPv6 checksum.
#[must_use]
pub fn icmp6_frame(
    src: [u8; 16],
    dst: [u8; 16],
    msg_type: u8,
    code: u8,
    rest: [u8; 4],
    payload: &[u8],
) -> Vec<u8> {
    let mut icmp = vec![msg_type, code, 0, 0];
    icmp.extend_from_slice(&rest);
    icmp.extend_from_slice(payload);
    let cks = pseudo_header_v6(src, dst, ipproto::ICMPV6, icmp.len() as u32)
        .add_bytes(&icmp)
        .finish();
    icmp[2..4].copy_from_slice(&cks.to_be_bytes());

    let ip = build_ipv6_header(&Ipv6Fields {
        traffic_class: 0,
        flow_label: 0,
        payload_len: icmp.len() as u16,
        next_header: ipproto::ICMPV6,
        hop_limit: 64,
        source: src,
        destination: dst,
    });

    let mut frame = eth_header(ethertype::IPV6);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&icmp);
    frame
}
