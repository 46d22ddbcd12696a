// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IP header, transport checksum and ICMP translation, both directions.
//!
//! Addresses resolve the same way at every nesting level: the destination
//! through the mapping table, the source through the /96 prefix
//! (synthesized toward IPv6, stripped toward IPv4). The embedded packet
//! of an ICMP error is the earlier translation of the same flow, so it is
//! rewritten with the same rules before the outer header is touched.

use crate::icmp::{self, IcmpAction};
use crate::tables::Nat64Tables;
use net::buffer::PacketBufferMut;
use net::checksum::{Accumulator, incremental_update};
use net::headers::{
    EthView, IPV4_HEADER_LEN, IPV6_HEADER_LEN, Ipv4Fields, Ipv6Fields, build_ipv4_header,
    build_ipv6_header, ethertype, ipproto,
};
use net::packet::{L4Kind, Packet};
use std::net::{Ipv4Addr, Ipv6Addr};

/// MTU floors applied to Packet Too Big / Fragmentation Needed values.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub ipv6_mtu: u32,
    pub ipv4_mtu: u32,
    pub drop_unknown_prefix: bool,
    pub drop_unknown_mapping: bool,
}

/// Drop classes, one counter word each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropClass {
    UnknownMapping,
    UnknownPrefix,
    Untranslatable,
    Malformed,
}

/// What became of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Translated,
    PassThrough,
    Drop(DropClass),
}

fn pseudo_words_v4(src: [u8; 4], dst: [u8; 4], proto: u8, l4_len: u16) -> Vec<u16> {
    vec![
        u16::from_be_bytes([src[0], src[1]]),
        u16::from_be_bytes([src[2], src[3]]),
        u16::from_be_bytes([dst[0], dst[1]]),
        u16::from_be_bytes([dst[2], dst[3]]),
        u16::from(proto),
        l4_len,
    ]
}

fn pseudo_words_v6(src: [u8; 16], dst: [u8; 16], next_header: u8, l4_len: u32) -> Vec<u16> {
    let mut words = Vec::with_capacity(19);
    for chunk in src.chunks_exact(2).chain(dst.chunks_exact(2)) {
        words.push(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    #[allow(clippy::cast_possible_truncation)]
    {
        words.push((l4_len >> 16) as u16);
        words.push(l4_len as u16);
    }
    words.push(u16::from(next_header));
    words
}

// RFC 1624 over two word lists of possibly different lengths; absent
// words count as zero.
fn adjust(checksum: u16, old: &[u16], new: &[u16]) -> u16 {
    let n = old.len().max(new.len());
    (0..n).fold(checksum, |cks, i| {
        incremental_update(
            cks,
            old.get(i).copied().unwrap_or(0),
            new.get(i).copied().unwrap_or(0),
        )
    })
}

struct V4Header {
    header_len: usize,
    tos: u8,
    total_len: u16,
    ttl: u8,
    protocol: u8,
    src: [u8; 4],
    dst: [u8; 4],
    fragment: bool,
}

fn read_v4(region: &[u8]) -> Option<V4Header> {
    if region.len() < IPV4_HEADER_LEN || region[0] >> 4 != 4 {
        return None;
    }
    let header_len = usize::from(region[0] & 0x0f) * 4;
    if header_len < IPV4_HEADER_LEN || region.len() < header_len {
        return None;
    }
    let mut src = [0u8; 4];
    let mut dst = [0u8; 4];
    src.copy_from_slice(&region[12..16]);
    dst.copy_from_slice(&region[16..20]);
    Some(V4Header {
        header_len,
        tos: region[1],
        total_len: u16::from_be_bytes([region[2], region[3]]),
        ttl: region[8],
        protocol: region[9],
        src,
        dst,
        fragment: u16::from_be_bytes([region[6], region[7]]) & 0x3fff != 0,
    })
}

struct V6Header {
    traffic_class: u8,
    payload_len: u16,
    next_header: u8,
    hop_limit: u8,
    src: [u8; 16],
    dst: [u8; 16],
}

fn read_v6(region: &[u8]) -> Option<V6Header> {
    if region.len() < IPV6_HEADER_LEN || region[0] >> 4 != 6 {
        return None;
    }
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&region[8..24]);
    dst.copy_from_slice(&region[24..40]);
    Some(V6Header {
        traffic_class: (region[0] << 4) | (region[1] >> 4),
        payload_len: u16::from_be_bytes([region[4], region[5]]),
        next_header: region[6],
        hop_limit: region[7],
        src,
        dst,
    })
}

/// One IPv4 address toward IPv6: the mapping table first (a mapped host
/// keeps its real IPv6), then synthesis under the hinted prefix.
fn v4_addr_to_v6(tables: &Nat64Tables, addr: [u8; 4], hint: usize) -> Option<[u8; 16]> {
    if let Some(mapping) = tables.mapping_by_v4(Ipv4Addr::from(addr)) {
        return Some(mapping.ip6);
    }
    tables.synthesize(hint, addr)
}

/// One IPv6 address toward IPv4: the mapping table first, then prefix
/// strip; `None` when the address belongs to neither.
fn v6_addr_to_v4(tables: &Nat64Tables, addr: [u8; 16]) -> Option<[u8; 4]> {
    if let Some(mapping) = tables.mapping_by_v6(Ipv6Addr::from(addr)) {
        return Some(mapping.ip4);
    }
    tables.prefix_of(Ipv6Addr::from(addr))?;
    let mut out = [0u8; 4];
    out.copy_from_slice(&addr[12..]);
    Some(out)
}

/// Resolve the v4→v6 address pair; the destination must be mapped, the
/// source synthesizes under the mapping's prefix. Returns the prefix for
/// embedded-packet resolution.
fn resolve_4to6(
    tables: &Nat64Tables,
    limits: Limits,
    src: [u8; 4],
    dst: [u8; 4],
) -> Result<([u8; 16], [u8; 16], usize), Verdict> {
    let Some(mapping) = tables.mapping_by_v4(Ipv4Addr::from(dst)) else {
        return Err(if limits.drop_unknown_mapping {
            Verdict::Drop(DropClass::UnknownMapping)
        } else {
            Verdict::PassThrough
        });
    };
    let Some(src6) = v4_addr_to_v6(tables, src, mapping.prefix) else {
        return Err(Verdict::Drop(DropClass::Malformed));
    };
    Ok((src6, mapping.ip6, mapping.prefix))
}

/// Resolve the v6→v4 address pair; mapping and prefix misses gate on
/// their respective drop flags.
fn resolve_6to4(
    tables: &Nat64Tables,
    limits: Limits,
    src: [u8; 16],
    dst: [u8; 16],
) -> Result<([u8; 4], [u8; 4]), Verdict> {
    let Some(src4) = v6_addr_to_v4(tables, src) else {
        return Err(if limits.drop_unknown_prefix {
            Verdict::Drop(DropClass::UnknownPrefix)
        } else {
            Verdict::PassThrough
        });
    };
    let Some(dst4) = v6_addr_to_v4(tables, dst) else {
        return Err(if limits.drop_unknown_mapping {
            Verdict::Drop(DropClass::UnknownMapping)
        } else {
            Verdict::PassThrough
        });
    };
    Ok((src4, dst4))
}

/// Fix a transport checksum in `frame[cks_at..cks_at+2]` for a pseudo
/// header change, when the field survived truncation.
fn fix_l4_checksum(frame: &mut [u8], cks_at: usize, old: &[u16], new: &[u16], udp: bool) {
    if cks_at + 2 > frame.len() {
        return;
    }
    let stored = u16::from_be_bytes([frame[cks_at], frame[cks_at + 1]]);
    if udp && stored == 0 {
        // no checksum on the IPv4 side; the full-compute path owns this
        return;
    }
    let mut updated = adjust(stored, old, new);
    if udp && updated == 0 {
        updated = 0xffff;
    }
    frame[cks_at..cks_at + 2].copy_from_slice(&updated.to_be_bytes());
}

/// Translate the embedded packet of an ICMP error in place. `at` is the
/// frame offset of the embedded IP header; bytes before it keep their
/// offsets across the resize.
fn embed_4to6<Buf: PacketBufferMut>(
    packet: &mut Packet<Buf>,
    at: usize,
    tables: &Nat64Tables,
    _limits: Limits,
    hint: usize,
) -> Result<(), Verdict> {
    let region = &packet.frame()[at..];
    let Some(hdr) = read_v4(region) else {
        return Err(Verdict::Drop(DropClass::Malformed));
    };
    // an error about an untranslatable flow cannot be delivered
    let Some(src6) = v4_addr_to_v6(tables, hdr.src, hint) else {
        return Err(Verdict::Drop(DropClass::UnknownMapping));
    };
    let Some(dst6) = v4_addr_to_v6(tables, hdr.dst, hint) else {
        return Err(Verdict::Drop(DropClass::UnknownMapping));
    };

    let l4_len = hdr.total_len.saturating_sub(
        u16::try_from(hdr.header_len).unwrap_or(u16::MAX),
    );
    let next_header = match hdr.protocol {
        ipproto::ICMP => ipproto::ICMPV6,
        other => other,
    };

    // transport fix-ups relative to the embedded L4 start, before offsets
    // move under the header swap
    let l4_at = at + hdr.header_len;
    let old_words = pseudo_words_v4(hdr.src, hdr.dst, hdr.protocol, l4_len);
    let new_words = pseudo_words_v6(src6, dst6, next_header, u32::from(l4_len));
    match hdr.protocol {
        ipproto::TCP => fix_l4_checksum(packet.frame_mut(), l4_at + 16, &old_words, &new_words, false),
        ipproto::UDP => fix_l4_checksum(packet.frame_mut(), l4_at + 6, &old_words, &new_words, true),
        ipproto::ICMP => {
            // echoes only; an error inside an error is not translated
            if l4_at + 2 <= packet.frame().len() {
                let old_type = packet.frame()[l4_at];
                let code = packet.frame()[l4_at + 1];
                let new_type = match old_type {
                    icmp::v4::ECHO_REQUEST => icmp::v6::ECHO_REQUEST,
                    icmp::v4::ECHO_REPLY => icmp::v6::ECHO_REPLY,
                    _ => return Err(Verdict::Drop(DropClass::Untranslatable)),
                };
                packet.frame_mut()[l4_at] = new_type;
                // ICMPv6 gains a pseudo header the ICMPv4 sum never had
                let mut new_full = vec![u16::from_be_bytes([new_type, code])];
                new_full.extend(pseudo_words_v6(src6, dst6, next_header, u32::from(l4_len)));
                fix_l4_checksum(
                    packet.frame_mut(),
                    l4_at + 2,
                    &[u16::from_be_bytes([old_type, code])],
                    &new_full,
                    false,
                );
            }
        }
        _ => {}
    }

    let v6_header = build_ipv6_header(&Ipv6Fields {
        traffic_class: hdr.tos,
        flow_label: 0,
        payload_len: l4_len,
        next_header,
        hop_limit: hdr.ttl,
        source: src6,
        destination: dst6,
    });
    packet
        .remove_bytes(at, hdr.header_len)
        .map_err(|_| Verdict::Drop(DropClass::Malformed))?;
    packet
        .insert_bytes(at, &v6_header)
        .map_err(|_| Verdict::Drop(DropClass::Malformed))?;
    Ok(())
}

fn embed_6to4<Buf: PacketBufferMut>(
    packet: &mut Packet<Buf>,
    at: usize,
    tables: &Nat64Tables,
    limits: Limits,
) -> Result<(), Verdict> {
    let region = &packet.frame()[at..];
    let Some(hdr) = read_v6(region) else {
        return Err(Verdict::Drop(DropClass::Malformed));
    };
    // an error about an untranslatable flow cannot be delivered
    let (src4, dst4) = resolve_6to4(tables, limits, hdr.src, hdr.dst).map_err(|v| match v {
        Verdict::PassThrough => Verdict::Drop(DropClass::UnknownPrefix),
        other => other,
    })?;

    let protocol = match hdr.next_header {
        ipproto::ICMPV6 => ipproto::ICMP,
        other => other,
    };
    let l4_at = at + IPV6_HEADER_LEN;
    let old_words = pseudo_words_v6(hdr.src, hdr.dst, hdr.next_header, u32::from(hdr.payload_len));
    let new_words = pseudo_words_v4(src4, dst4, protocol, hdr.payload_len);
    match hdr.next_header {
        ipproto::TCP => fix_l4_checksum(packet.frame_mut(), l4_at + 16, &old_words, &new_words, false),
        ipproto::UDP => fix_l4_checksum(packet.frame_mut(), l4_at + 6, &old_words, &new_words, true),
        ipproto::ICMPV6 => {
            if l4_at + 2 <= packet.frame().len() {
                let old_type = packet.frame()[l4_at];
                let code = packet.frame()[l4_at + 1];
                let new_type = match old_type {
                    icmp::v6::ECHO_REQUEST => icmp::v4::ECHO_REQUEST,
                    icmp::v6::ECHO_REPLY => icmp::v4::ECHO_REPLY,
                    _ => return Err(Verdict::Drop(DropClass::Untranslatable)),
                };
                packet.frame_mut()[l4_at] = new_type;
                // the ICMPv4 sum loses the pseudo header
                let mut old_full = vec![u16::from_be_bytes([old_type, code])];
                old_full.extend(old_words.clone());
                fix_l4_checksum(
                    packet.frame_mut(),
                    l4_at + 2,
                    &old_full,
                    &[u16::from_be_bytes([new_type, code])],
                    false,
                );
            }
        }
        _ => {}
    }

    let total_len = u16::try_from(IPV4_HEADER_LEN)
        .unwrap_or(20)
        .saturating_add(hdr.payload_len);
    let v4_header = build_ipv4_header(&Ipv4Fields {
        tos: hdr.traffic_class,
        total_len,
        identification: 0,
        flags_fragment: 0x4000,
        ttl: hdr.hop_limit,
        protocol,
        source: src4,
        destination: dst4,
    });
    packet
        .remove_bytes(at, IPV6_HEADER_LEN)
        .map_err(|_| Verdict::Drop(DropClass::Malformed))?;
    packet
        .insert_bytes(at, &v4_header)
        .map_err(|_| Verdict::Drop(DropClass::Malformed))?;
    Ok(())
}

/// Translate an IPv4 packet toward IPv6.
#[allow(clippy::too_many_lines)]
pub(crate) fn translate_4to6<Buf: PacketBufferMut>(
    packet: &mut Packet<Buf>,
    tables: &Nat64Tables,
    limits: Limits,
) -> Verdict {
    let l3 = packet.headers().l3_offset;
    let l4 = packet.headers().l4_offset;
    let Some(hdr) = read_v4(&packet.frame()[l3..]) else {
        return Verdict::Drop(DropClass::Malformed);
    };
    if hdr.fragment {
        return Verdict::Drop(DropClass::Untranslatable);
    }
    let (src6, dst6, prefix_hint) = match resolve_4to6(tables, limits, hdr.src, hdr.dst) {
        Ok(resolved) => resolved,
        Err(verdict) => return verdict,
    };

    let next_header = match packet.headers().l4 {
        L4Kind::Icmp4 => ipproto::ICMPV6,
        _ => hdr.protocol,
    };

    // ICMP: settle the type/code tables (and the embedded packet) first
    if packet.headers().l4 == L4Kind::Icmp4 {
        let frame = packet.frame();
        let (msg_type, code) = (frame[l4], frame[l4 + 1]);
        let rest = [frame[l4 + 4], frame[l4 + 5], frame[l4 + 6], frame[l4 + 7]];
        let action = icmp::icmp4_to_icmp6(msg_type, code, rest[0]);
        let (new_type, new_code, new_rest) = match action {
            IcmpAction::Retype { msg_type, code } => (msg_type, code, rest),
            IcmpAction::AdjustMtu { msg_type, code } => {
                let mtu4 = u32::from(u16::from_be_bytes([rest[2], rest[3]]));
                let mtu6 = if mtu4 == 0 {
                    limits.ipv6_mtu
                } else {
                    (mtu4 + 20).max(limits.ipv6_mtu)
                };
                (msg_type, code, mtu6.to_be_bytes())
            }
            IcmpAction::Pointer {
                msg_type,
                code,
                pointer,
            } => (msg_type, code, [0, 0, 0, pointer]),
            IcmpAction::Untranslatable => {
                return Verdict::Drop(DropClass::Untranslatable);
            }
        };
        if icmp::is_error_v4(msg_type)
            && let Err(verdict) = embed_4to6(packet, l4 + 8, tables, limits, prefix_hint)
        {
            return verdict;
        }
        let frame = packet.frame_mut();
        frame[l4] = new_type;
        frame[l4 + 1] = new_code;
        frame[l4 + 4..l4 + 8].copy_from_slice(&new_rest);
    }

    // swap the IP header; everything after the old IHL keeps its bytes
    let l4_len = u16::try_from(packet.frame().len() - l4).unwrap_or(u16::MAX);
    let v6_header = build_ipv6_header(&Ipv6Fields {
        traffic_class: hdr.tos,
        flow_label: 0,
        payload_len: l4_len,
        next_header,
        hop_limit: hdr.ttl,
        source: src6,
        destination: dst6,
    });
    if packet.remove_bytes(l3, hdr.header_len).is_err() {
        return Verdict::Drop(DropClass::Malformed);
    }
    if packet.insert_bytes(l3, &v6_header).is_err() {
        return Verdict::Drop(DropClass::Malformed);
    }
    EthView::set_ethertype_at(packet.frame_mut(), l3, ethertype::IPV6);
    let l4 = l3 + IPV6_HEADER_LEN;

    // transport checksums against the new pseudo header
    match packet.headers().l4 {
        L4Kind::Tcp => {
            let old = pseudo_words_v4(hdr.src, hdr.dst, hdr.protocol, l4_len);
            let new = pseudo_words_v6(src6, dst6, next_header, u32::from(l4_len));
            fix_l4_checksum(packet.frame_mut(), l4 + 16, &old, &new, false);
        }
        L4Kind::Udp => {
            let frame = packet.frame();
            let stored = u16::from_be_bytes([frame[l4 + 6], frame[l4 + 7]]);
            if stored == 0 {
                // IPv6 forbids the zero checksum: compute it in full
                let cks = Accumulator::new()
                    .add_bytes(&frame[l4..l4 + 6])
                    .add_bytes(&frame[l4 + 8..]);
                let cks = pseudo_words_v6(src6, dst6, next_header, u32::from(l4_len))
                    .iter()
                    .fold(cks, |acc, &w| acc.add_u16(w))
                    .finish();
                let cks = if cks == 0 { 0xffff } else { cks };
                packet.frame_mut()[l4 + 6..l4 + 8].copy_from_slice(&cks.to_be_bytes());
            } else {
                let old = pseudo_words_v4(hdr.src, hdr.dst, hdr.protocol, l4_len);
                let new = pseudo_words_v6(src6, dst6, next_header, u32::from(l4_len));
                fix_l4_checksum(packet.frame_mut(), l4 + 6, &old, &new, true);
            }
        }
        L4Kind::Icmp4 => {
            // recompute in full: the type tables and the embedded rewrite
            // both touched the message
            let frame = packet.frame_mut();
            frame[l4 + 2..l4 + 4].copy_from_slice(&[0, 0]);
            let pseudo = net::checksum::pseudo_header_v6(
                src6,
                dst6,
                ipproto::ICMPV6,
                u32::from(l4_len),
            );
            let cks = pseudo.add_bytes(&frame[l4..]).finish();
            frame[l4 + 2..l4 + 4].copy_from_slice(&cks.to_be_bytes());
        }
        _ => {}
    }

    match packet.reparse() {
        Ok(()) => Verdict::Translated,
        Err(_) => Verdict::Drop(DropClass::Malformed),
    }
}

/// Translate an IPv6 packet toward IPv4.
#[allow(clippy::too_many_lines)]
pub(crate) fn translate_6to4<Buf: PacketBufferMut>(
    packet: &mut Packet<Buf>,
    tables: &Nat64Tables,
    limits: Limits,
) -> Verdict {
    let l3 = packet.headers().l3_offset;
    let l4 = packet.headers().l4_offset;
    let Some(hdr) = read_v6(&packet.frame()[l3..]) else {
        return Verdict::Drop(DropClass::Malformed);
    };
    if matches!(packet.headers().l4, L4Kind::Other(_)) {
        // extension headers and fragments are not carried
        return Verdict::Drop(DropClass::Untranslatable);
    }
    let (src4, dst4) = match resolve_6to4(tables, limits, hdr.src, hdr.dst) {
        Ok(pair) => pair,
        Err(verdict) => return verdict,
    };

    let protocol = match packet.headers().l4 {
        L4Kind::Icmp6 => ipproto::ICMP,
        _ => hdr.next_header,
    };

    if packet.headers().l4 == L4Kind::Icmp6 {
        let frame = packet.frame();
        let (msg_type, code) = (frame[l4], frame[l4 + 1]);
        let rest = [frame[l4 + 4], frame[l4 + 5], frame[l4 + 6], frame[l4 + 7]];
        let action = icmp::icmp6_to_icmp4(msg_type, code, rest[3]);
        let (new_type, new_code, new_rest) = match action {
            IcmpAction::Retype { msg_type, code } => (msg_type, code, rest),
            IcmpAction::AdjustMtu { msg_type, code } => {
                let mtu6 = u32::from_be_bytes(rest);
                // the IPv6 link MTU covers 20 bytes the IPv4 path loses; a
                // zero (legacy) value floors at the configured IPv4 MTU
                let mtu4 = if mtu6 == 0 {
                    limits.ipv4_mtu
                } else {
                    mtu6.saturating_sub(20)
                };
                let mtu4 = u16::try_from(mtu4.min(u32::from(u16::MAX))).unwrap_or(u16::MAX);
                let mut out = [0u8; 4];
                out[2..4].copy_from_slice(&mtu4.to_be_bytes());
                (msg_type, code, out)
            }
            IcmpAction::Pointer {
                msg_type,
                code,
                pointer,
            } => (msg_type, code, [pointer, 0, 0, 0]),
            IcmpAction::Untranslatable => {
                return Verdict::Drop(DropClass::Untranslatable);
            }
        };
        if icmp::is_error_v6(msg_type)
            && let Err(verdict) = embed_6to4(packet, l4 + 8, tables, limits)
        {
            return verdict;
        }
        let frame = packet.frame_mut();
        frame[l4] = new_type;
        frame[l4 + 1] = new_code;
        frame[l4 + 4..l4 + 8].copy_from_slice(&new_rest);
    }

    let l4_len = u16::try_from(packet.frame().len() - l4).unwrap_or(u16::MAX);
    let total_len = u16::try_from(IPV4_HEADER_LEN).unwrap_or(20).saturating_add(l4_len);
    let v4_header = build_ipv4_header(&Ipv4Fields {
        tos: hdr.traffic_class,
        total_len,
        identification: 0,
        flags_fragment: 0x4000,
        ttl: hdr.hop_limit,
        protocol,
        source: src4,
        destination: dst4,
    });
    if packet.remove_bytes(l3, IPV6_HEADER_LEN).is_err() {
        return Verdict::Drop(DropClass::Malformed);
    }
    if packet.insert_bytes(l3, &v4_header).is_err() {
        return Verdict::Drop(DropClass::Malformed);
    }
    EthView::set_ethertype_at(packet.frame_mut(), l3, ethertype::IPV4);
    let l4 = l3 + IPV4_HEADER_LEN;

    match packet.headers().l4 {
        L4Kind::Tcp => {
            let old = pseudo_words_v6(hdr.src, hdr.dst, hdr.next_header, u32::from(l4_len));
            let new = pseudo_words_v4(src4, dst4, protocol, l4_len);
            fix_l4_checksum(packet.frame_mut(), l4 + 16, &old, &new, false);
        }
        L4Kind::Udp => {
            let old = pseudo_words_v6(hdr.src, hdr.dst, hdr.next_header, u32::from(l4_len));
            let new = pseudo_words_v4(src4, dst4, protocol, l4_len);
            fix_l4_checksum(packet.frame_mut(), l4 + 6, &old, &new, true);
        }
        L4Kind::Icmp6 => {
            // ICMPv4 carries no pseudo header: plain sum over the message
            let frame = packet.frame_mut();
            frame[l4 + 2..l4 + 4].copy_from_slice(&[0, 0]);
            let cks = Accumulator::new().add_bytes(&frame[l4..]).finish();
            frame[l4 + 2..l4 + 4].copy_from_slice(&cks.to_be_bytes());
        }
        _ => {}
    }

    match packet.reparse() {
        Ok(()) => Verdict::Translated,
        Err(_) => Verdict::Drop(DropClass::Malformed),
    }
}
