// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Decap module: strip IP-in-IP and GRE outer headers, the inverse of the
//! balancer's encapsulation.

use crate::front::PacketFront;
use crate::module::{BuildCtx, Module, ModuleBuildError, ModuleCtx, ModuleFactory};
use net::buffer::PacketBufferMut;
use net::headers::{EthView, GRE_HEADER_LEN, ethertype, ipproto};
use net::packet::L3Kind;
use serde::Deserialize;
use stats::{CounterHandle, bump};
use std::net::IpAddr;
use std::sync::Arc;

use lpm::{IpPrefix, Lpm4, Lpm6, Prefix4, Prefix6};

/// Counter layout: `[decapped, passed, malformed]`.
const COUNTERS: usize = 3;
const DECAPPED: usize = 0;
const PASSED: usize = 1;
const MALFORMED: usize = 2;

/// Raw configuration of one decap instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecapConfig {
    /// Outer destination prefixes eligible for decapsulation; empty means
    /// any destination.
    #[serde(default)]
    pub allowed_dst: Vec<String>,
}

/// The decap module instance.
pub struct DecapModule {
    allowed_v4: Lpm4<()>,
    allowed_v6: Lpm6<()>,
    restrict: bool,
    counters: CounterHandle,
}

impl DecapModule {
    /// Module type name.
    pub const KIND: &'static str = "decap";
}

/// Inner payload family carried by a recognized tunnel.
enum Tunnel {
    Ip(u16, usize),  // inner ethertype, outer bytes to strip
    Gre(usize),      // outer bytes before the GRE header
}

impl<Buf: PacketBufferMut> Module<Buf> for DecapModule {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    #[allow(clippy::too_many_lines)]
    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront<Buf>) {
        let slots = ctx.counters.slots(self.counters, ctx.worker_idx);
        for mut packet in front.take_input() {
            let (allowed, protocol, outer_len) = match packet.headers().l3 {
                L3Kind::Ipv4 => {
                    let Some(view) = packet.ipv4() else {
                        front.drop(packet);
                        continue;
                    };
                    let dst = std::net::Ipv4Addr::from(view.destination());
                    (
                        !self.restrict || self.allowed_v4.lookup(dst).is_some(),
                        view.protocol(),
                        view.header_len(),
                    )
                }
                L3Kind::Ipv6 => {
                    let Some(view) = packet.ipv6() else {
                        front.drop(packet);
                        continue;
                    };
                    let dst = std::net::Ipv6Addr::from(view.destination());
                    (
                        !self.restrict || self.allowed_v6.lookup(dst).is_some(),
                        view.next_header(),
                        40,
                    )
                }
            };

            let tunnel = match protocol {
                ipproto::IPIP => Some(Tunnel::Ip(ethertype::IPV4, outer_len)),
                ipproto::IPV6 => Some(Tunnel::Ip(ethertype::IPV6, outer_len)),
                ipproto::GRE => Some(Tunnel::Gre(outer_len)),
                _ => None,
            };
            let Some(tunnel) = tunnel else {
                bump(slots, PASSED);
                front.output(packet);
                continue;
            };
            if !allowed {
                bump(slots, PASSED);
                front.output(packet);
                continue;
            }

            let l3_offset = packet.headers().l3_offset;
            let (inner_ether, strip) = match tunnel {
                Tunnel::Ip(ether, len) => (ether, len),
                Tunnel::Gre(len) => {
                    let frame = packet.frame();
                    let gre = l3_offset + len;
                    if frame.len() < gre + GRE_HEADER_LEN {
                        bump(slots, MALFORMED);
                        front.drop(packet);
                        continue;
                    }
                    // only the base header (no checksum/key/sequence)
                    if frame[gre] != 0 || frame[gre + 1] != 0 {
                        bump(slots, MALFORMED);
                        front.drop(packet);
                        continue;
                    }
                    let ether = u16::from_be_bytes([frame[gre + 2], frame[gre + 3]]);
                    (ether, len + GRE_HEADER_LEN)
                }
            };

            if packet.remove_bytes(l3_offset, strip).is_err() {
                bump(slots, MALFORMED);
                front.drop(packet);
                continue;
            }
            EthView::set_ethertype_at(packet.frame_mut(), l3_offset, inner_ether);
            match packet.reparse() {
                Ok(()) => {
                    bump(slots, DECAPPED);
                    front.output(packet);
                }
                Err(_) => {
                    bump(slots, MALFORMED);
                    front.drop(packet);
                }
            }
        }
    }
}

/// Factory for [`DecapModule`].
#[derive(Debug, Default)]
pub struct DecapFactory;

impl<Buf: PacketBufferMut> ModuleFactory<Buf> for DecapFactory {
    fn kind(&self) -> &'static str {
        DecapModule::KIND
    }

    fn build(
        &self,
        ctx: &BuildCtx<'_>,
        name: &str,
        raw: &[u8],
        _old: Option<&Arc<dyn Module<Buf>>>,
    ) -> Result<Arc<dyn Module<Buf>>, ModuleBuildError> {
        let config: DecapConfig = serde_yaml_ng::from_slice(raw)
            .map_err(|e| ModuleBuildError::Parse(e.to_string()))?;
        let mut allowed_v4 = Lpm4::new();
        let mut allowed_v6 = Lpm6::new();
        for raw_prefix in &config.allowed_dst {
            let (addr, len) = raw_prefix
                .split_once('/')
                .ok_or_else(|| ModuleBuildError::Invalid(format!("bad prefix '{raw_prefix}'")))?;
            let addr: IpAddr = addr
                .parse()
                .map_err(|_| ModuleBuildError::Invalid(format!("bad prefix '{raw_prefix}'")))?;
            let len: u8 = len
                .parse()
                .map_err(|_| ModuleBuildError::Invalid(format!("bad prefix '{raw_prefix}'")))?;
            match addr {
                IpAddr::V4(addr) => {
                    let prefix = Prefix4::new(addr, len)
                        .map_err(|e| ModuleBuildError::Invalid(e.to_string()))?;
                    allowed_v4.insert(prefix, ());
                }
                IpAddr::V6(addr) => {
                    let prefix = Prefix6::new(addr, len)
                        .map_err(|e| ModuleBuildError::Invalid(e.to_string()))?;
                    allowed_v6.insert(prefix, ());
                }
            }
        }
        let counters = ctx
            .counters
            .register(&format!("{}.{name}", DecapModule::KIND), COUNTERS)?;
        Ok(Arc::new(DecapModule {
            restrict: !config.allowed_dst.is_empty(),
            allowed_v4,
            allowed_v6,
            counters,
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::{build_ctx, module_ctx, parse};
    use net::buffer::TestBuffer;
    use net::headers::{Ipv4Fields, build_ipv4_header};
    use net::packet::L4Kind;
    use net::test_utils::udp_v4_frame;
    use pretty_assertions::assert_eq;

    fn build(config: &[u8]) -> (Arc<dyn Module<TestBuffer>>, stats::CounterRegistry) {
        let (counters, memory) = build_ctx();
        let ctx = BuildCtx {
            counters: &counters,
            memory: &memory,
            workers: 1,
        };
        let module =
            <DecapFactory as ModuleFactory<TestBuffer>>::build(&DecapFactory, &ctx, "d0", config, None)
                .unwrap();
        (module, counters)
    }

    /// Wrap an IPv4 frame's L3 part in an outer IPv4+IPIP header.
    fn ipip_wrap(frame: &[u8], outer_src: [u8; 4], outer_dst: [u8; 4]) -> Vec<u8> {
        let inner = &frame[14..];
        let outer = build_ipv4_header(&Ipv4Fields {
            tos: 0,
            total_len: u16::try_from(20 + inner.len()).unwrap(),
            identification: 0,
            flags_fragment: 0x4000,
            ttl: 64,
            protocol: ipproto::IPIP,
            source: outer_src,
            destination: outer_dst,
        });
        let mut out = frame[..14].to_vec();
        out.extend_from_slice(&outer);
        out.extend_from_slice(inner);
        out
    }

    #[test]
    fn strips_ipip_outer_header() {
        let (module, counters) = build(b"{}");
        let inner = udp_v4_frame([192, 0, 2, 1], [192, 0, 2, 2], 10, 20, b"payload");
        let wrapped = ipip_wrap(&inner, [10, 0, 0, 1], [10, 0, 0, 2]);

        let mut front = PacketFront::new(vec![parse(&wrapped)]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        assert_eq!(front.output.len(), 1);
        let packet = &front.output[0];
        assert_eq!(packet.frame(), inner.as_slice());
        assert_eq!(packet.headers().l4, L4Kind::Udp);
        let h = counters.handle("decap.d0").unwrap();
        assert_eq!(counters.total(h, DECAPPED), 1);
    }

    #[test]
    fn passes_plain_traffic_through() {
        let (module, counters) = build(b"{}");
        let plain = udp_v4_frame([192, 0, 2, 1], [192, 0, 2, 2], 10, 20, b"x");
        let mut front = PacketFront::new(vec![parse(&plain)]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        assert_eq!(front.output.len(), 1);
        assert_eq!(front.output[0].frame(), plain.as_slice());
        let h = counters.handle("decap.d0").unwrap();
        assert_eq!(counters.total(h, PASSED), 1);
    }

    #[test]
    fn respects_allowed_destinations() {
        let (module, counters) = build(b"allowed_dst: ['10.0.0.0/8']\n");
        let inner = udp_v4_frame([192, 0, 2, 1], [192, 0, 2, 2], 10, 20, b"x");
        let allowed = ipip_wrap(&inner, [172, 16, 0, 1], [10, 0, 0, 2]);
        let foreign = ipip_wrap(&inner, [172, 16, 0, 1], [172, 16, 0, 2]);

        let mut front = PacketFront::new(vec![parse(&allowed), parse(&foreign)]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        assert_eq!(front.output.len(), 2);
        assert_eq!(front.output[0].frame(), inner.as_slice());
        assert_eq!(front.output[1].frame(), foreign.as_slice());
    }
}
