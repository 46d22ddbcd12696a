// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IP-in-IP and GRE encapsulation toward a real.

use net::buffer::{BufferError, PacketBufferMut};
use net::headers::{
    Ipv4Fields, Ipv6Fields, build_gre_header, build_ipv4_header, build_ipv6_header, ethertype,
    ipproto,
};
use net::packet::{L3Kind, Packet};
use std::net::IpAddr;

const OUTER_TTL: u8 = 64;

/// Why a packet could not be encapsulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncapError {
    /// Not enough headroom in the buffer.
    #[error("buffer rejected outer header: {0}")]
    Buffer(#[from] BufferError),
    /// Real and client families differ.
    #[error("real address family does not match the packet")]
    FamilyMismatch,
    /// The rewritten frame no longer parses (should not happen).
    #[error("post-encap reparse failed")]
    Reparse,
}

/// Masquerade: `(client & !mask) | src`, with `src` pre-masked.
fn masquerade<const N: usize>(client: [u8; N], src: Option<[u8; N]>, mask: Option<[u8; N]>) -> [u8; N] {
    let Some(src) = src else {
        return client;
    };
    let Some(mask) = mask else {
        return src;
    };
    let mut out = [0u8; N];
    for i in 0..N {
        out[i] = (client[i] & !mask[i]) | src[i];
    }
    out
}

/// Wrap the packet's L3 payload toward `real`, keeping the address family.
///
/// # Errors
///
/// Returns [`EncapError`] on family mismatch or exhausted headroom.
pub(crate) fn encapsulate<Buf: PacketBufferMut>(
    packet: &mut Packet<Buf>,
    real: IpAddr,
    src_addr: Option<IpAddr>,
    src_mask: Option<IpAddr>,
    gre: bool,
) -> Result<(), EncapError> {
    let l3_offset = packet.headers().l3_offset;
    let inner_len = packet.frame().len() - l3_offset;

    match (packet.headers().l3, real) {
        (L3Kind::Ipv4, IpAddr::V4(real)) => {
            let (client_src, tos) = {
                let view = packet
                    .ipv4()
                    .ok_or(EncapError::Reparse)?;
                (view.source(), view.tos())
            };
            let src = masquerade(
                client_src,
                match src_addr {
                    Some(IpAddr::V4(a)) => Some(a.octets()),
                    _ => None,
                },
                match src_mask {
                    Some(IpAddr::V4(m)) => Some(m.octets()),
                    _ => None,
                },
            );
            let gre_len = if gre { 4 } else { 0 };
            let outer = build_ipv4_header(&Ipv4Fields {
                tos,
                total_len: u16::try_from(20 + gre_len + inner_len)
                    .map_err(|_| EncapError::Reparse)?,
                identification: 0,
                flags_fragment: 0x4000,
                ttl: OUTER_TTL,
                protocol: if gre { ipproto::GRE } else { ipproto::IPIP },
                source: src,
                destination: real.octets(),
            });
            let mut bytes = outer.to_vec();
            if gre {
                bytes.extend_from_slice(&build_gre_header(ethertype::IPV4));
            }
            packet.insert_bytes(l3_offset, &bytes)?;
        }
        (L3Kind::Ipv6, IpAddr::V6(real)) => {
            let (client_src, tc) = {
                let view = packet
                    .ipv6()
                    .ok_or(EncapError::Reparse)?;
                (view.source(), view.traffic_class())
            };
            let src = masquerade(
                client_src,
                match src_addr {
                    Some(IpAddr::V6(a)) => Some(a.octets()),
                    _ => None,
                },
                match src_mask {
                    Some(IpAddr::V6(m)) => Some(m.octets()),
                    _ => None,
                },
            );
            let gre_len = if gre { 4 } else { 0 };
            let outer = build_ipv6_header(&Ipv6Fields {
                traffic_class: tc,
                flow_label: 0,
                payload_len: u16::try_from(gre_len + inner_len)
                    .map_err(|_| EncapError::Reparse)?,
                next_header: if gre { ipproto::GRE } else { ipproto::IPV6 },
                hop_limit: OUTER_TTL,
                source: src,
                destination: real.octets(),
            });
            let mut bytes = outer.to_vec();
            if gre {
                bytes.extend_from_slice(&build_gre_header(ethertype::IPV6));
            }
            packet.insert_bytes(l3_offset, &bytes)?;
        }
        _ => return Err(EncapError::FamilyMismatch),
    }

    packet.reparse().map_err(|_| EncapError::Reparse)
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use net::DeviceId;
    use net::buffer::TestBuffer;
    use net::test_utils::udp_v4_frame;
    use pretty_assertions::assert_eq;

    fn packet() -> Packet<TestBuffer> {
        let frame = udp_v4_frame([192, 0, 2, 34], [10, 0, 0, 1], 5000, 80, b"data");
        Packet::new(TestBuffer::from_frame(&frame), DeviceId(0)).unwrap()
    }

    #[test]
    fn ipip_outer_header_fields() {
        let mut pkt = packet();
        let inner_len = pkt.frame().len() - 14;
        encapsulate(&mut pkt, "198.51.100.7".parse().unwrap(), None, None, false).unwrap();

        let view = pkt.ipv4().unwrap();
        assert_eq!(view.protocol(), ipproto::IPIP);
        assert_eq!(view.destination(), [198, 51, 100, 7]);
        // no masquerade: outer source is the client source
        assert_eq!(view.source(), [192, 0, 2, 34]);
        assert_eq!(usize::from(view.total_len()), 20 + inner_len);

        // the inner packet is intact right behind the outer header
        let inner = &pkt.frame()[14 + 20..];
        assert_eq!(inner[9], ipproto::UDP);
        assert_eq!(&inner[12..16], &[192, 0, 2, 34]);
    }

    #[test]
    fn masquerade_combines_client_and_source() {
        let mut pkt = packet();
        encapsulate(
            &mut pkt,
            "198.51.100.7".parse().unwrap(),
            Some("100.64.0.0".parse().unwrap()),
            Some("255.255.0.0".parse().unwrap()),
            false,
        )
        .unwrap();
        // upper 16 bits from src_addr, lower 16 from the client
        assert_eq!(pkt.ipv4().unwrap().source(), [100, 64, 2, 34]);
    }

    #[test]
    fn gre_wraps_with_inner_ethertype() {
        let mut pkt = packet();
        encapsulate(&mut pkt, "198.51.100.7".parse().unwrap(), None, None, true).unwrap();
        let view = pkt.ipv4().unwrap();
        assert_eq!(view.protocol(), ipproto::GRE);
        let gre = &pkt.frame()[14 + 20..14 + 24];
        assert_eq!(gre, &[0, 0, 0x08, 0x00]);
    }

    #[test]
    fn family_mismatch_is_rejected() {
        let mut pkt = packet();
        let err = encapsulate(&mut pkt, "2001:db8::1".parse().unwrap(), None, None, false)
            .unwrap_err();
        assert_eq!(err, EncapError::FamilyMismatch);
    }
}
