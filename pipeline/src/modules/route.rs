// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Route module: longest-prefix next-hop lookup, MAC rewrite and TTL
//! accounting.

use crate::front::PacketFront;
use crate::module::{BuildCtx, Module, ModuleBuildError, ModuleCtx, ModuleFactory};
use net::DeviceId;
use net::buffer::PacketBufferMut;
use net::packet::L3Kind;
use serde::Deserialize;
use stats::{CounterHandle, bump};
use std::net::IpAddr;
use std::sync::Arc;

use lpm::{IpPrefix, Lpm4, Lpm6, Prefix4, Prefix6};

/// Counter layout: `[routed, no_route, ttl_expired]`.
const COUNTERS: usize = 3;
const ROUTED: usize = 0;
const NO_ROUTE: usize = 1;
const TTL_EXPIRED: usize = 2;

/// One raw route row.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRow {
    /// Destination prefix, e.g. `10.0.0.0/8` or `2001:db8::/32`.
    pub prefix: String,
    /// Next-hop station MAC.
    pub next_mac: String,
    /// Egress device id.
    pub device: u16,
}

/// Raw configuration of one route instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteConfig {
    /// Route rows, order-insensitive.
    #[serde(default)]
    pub routes: Vec<RouteRow>,
}

#[derive(Debug, Clone, Copy)]
struct NextHop {
    mac: [u8; 6],
    device: DeviceId,
}

/// The route module instance.
pub struct RouteModule {
    v4: Lpm4<NextHop>,
    v6: Lpm6<NextHop>,
    counters: CounterHandle,
}

impl RouteModule {
    /// Module type name.
    pub const KIND: &'static str = "route";
}

impl<Buf: PacketBufferMut> Module<Buf> for RouteModule {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront<Buf>) {
        let slots = ctx.counters.slots(self.counters, ctx.worker_idx);
        for mut packet in front.take_input() {
            let hop = match packet.headers().l3 {
                L3Kind::Ipv4 => {
                    let Some(view) = packet.ipv4() else {
                        front.drop(packet);
                        continue;
                    };
                    let dst = std::net::Ipv4Addr::from(view.destination());
                    self.v4.lookup(dst).map(|(_, hop)| *hop)
                }
                L3Kind::Ipv6 => {
                    let Some(view) = packet.ipv6() else {
                        front.drop(packet);
                        continue;
                    };
                    let dst = std::net::Ipv6Addr::from(view.destination());
                    self.v6.lookup(dst).map(|(_, hop)| *hop)
                }
            };
            let Some(hop) = hop else {
                bump(slots, NO_ROUTE);
                front.drop(packet);
                continue;
            };

            let expired = match packet.headers().l3 {
                L3Kind::Ipv4 => packet.ipv4().is_some_and(|mut v| v.decrement_ttl() == 0),
                L3Kind::Ipv6 => packet
                    .ipv6()
                    .is_some_and(|mut v| v.decrement_hop_limit() == 0),
            };
            if expired {
                bump(slots, TTL_EXPIRED);
                front.drop(packet);
                continue;
            }

            let old_src = packet.eth().destination();
            let mut eth = packet.eth();
            eth.set_source(old_src);
            eth.set_destination(hop.mac);
            packet.meta_mut().tx_device = hop.device;
            bump(slots, ROUTED);
            front.output(packet);
        }
    }
}

/// Factory for [`RouteModule`].
#[derive(Debug, Default)]
pub struct RouteFactory;

fn parse_mac(raw: &str) -> Result<[u8; 6], ModuleBuildError> {
    let mut mac = [0u8; 6];
    let mut parts = raw.split(':');
    for byte in &mut mac {
        let part = parts
            .next()
            .ok_or_else(|| ModuleBuildError::Invalid(format!("bad mac '{raw}'")))?;
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| ModuleBuildError::Invalid(format!("bad mac '{raw}'")))?;
    }
    if parts.next().is_some() {
        return Err(ModuleBuildError::Invalid(format!("bad mac '{raw}'")));
    }
    Ok(mac)
}

fn parse_prefix(raw: &str) -> Result<(IpAddr, u8), ModuleBuildError> {
    let (addr, len) = raw
        .split_once('/')
        .ok_or_else(|| ModuleBuildError::Invalid(format!("bad prefix '{raw}'")))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| ModuleBuildError::Invalid(format!("bad prefix '{raw}'")))?;
    let len: u8 = len
        .parse()
        .map_err(|_| ModuleBuildError::Invalid(format!("bad prefix '{raw}'")))?;
    Ok((addr, len))
}

impl<Buf: PacketBufferMut> ModuleFactory<Buf> for RouteFactory {
    fn kind(&self) -> &'static str {
        RouteModule::KIND
    }

    fn build(
        &self,
        ctx: &BuildCtx<'_>,
        name: &str,
        raw: &[u8],
        _old: Option<&Arc<dyn Module<Buf>>>,
    ) -> Result<Arc<dyn Module<Buf>>, ModuleBuildError> {
        let config: RouteConfig = serde_yaml_ng::from_slice(raw)
            .map_err(|e| ModuleBuildError::Parse(e.to_string()))?;
        let mut v4 = Lpm4::new();
        let mut v6 = Lpm6::new();
        for row in &config.routes {
            let hop = NextHop {
                mac: parse_mac(&row.next_mac)?,
                device: DeviceId(row.device),
            };
            match parse_prefix(&row.prefix)? {
                (IpAddr::V4(addr), len) => {
                    let prefix = Prefix4::new(addr, len)
                        .map_err(|e| ModuleBuildError::Invalid(e.to_string()))?;
                    v4.insert(prefix, hop);
                }
                (IpAddr::V6(addr), len) => {
                    let prefix = Prefix6::new(addr, len)
                        .map_err(|e| ModuleBuildError::Invalid(e.to_string()))?;
                    v6.insert(prefix, hop);
                }
            }
        }
        let counters = ctx
            .counters
            .register(&format!("{}.{name}", RouteModule::KIND), COUNTERS)?;
        Ok(Arc::new(RouteModule { v4, v6, counters }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::{build_ctx, module_ctx, parse};
    use net::buffer::TestBuffer;
    use net::test_utils::udp_v4_frame;
    use pretty_assertions::assert_eq;

    const CONFIG: &[u8] = b"
routes:
  - prefix: 0.0.0.0/0
    next_mac: '02:aa:00:00:00:01'
    device: 1
  - prefix: 10.2.0.0/16
    next_mac: '02:aa:00:00:00:02'
    device: 2
";

    fn build(counters: &stats::CounterRegistry, memory: &arena::MemoryContext) -> Arc<dyn Module<TestBuffer>> {
        let ctx = BuildCtx {
            counters,
            memory,
            workers: 1,
        };
        <RouteFactory as ModuleFactory<TestBuffer>>::build(&RouteFactory, &ctx, "r0", CONFIG, None)
            .unwrap()
    }

    #[test]
    fn longest_prefix_picks_next_hop() {
        let (counters, memory) = build_ctx();
        let module = build(&counters, &memory);

        let specific = udp_v4_frame([10, 0, 0, 1], [10, 2, 3, 4], 1, 2, b"x");
        let default = udp_v4_frame([10, 0, 0, 1], [192, 0, 2, 9], 1, 2, b"x");
        let mut front = PacketFront::new(vec![parse(&specific), parse(&default)]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        assert_eq!(front.drop.len(), 0);
        let mut out = front.output;
        assert_eq!(out[0].meta().tx_device.0, 2);
        assert_eq!(out[1].meta().tx_device.0, 1);
        assert_eq!(out[0].eth().destination(), [0x02, 0xaa, 0, 0, 0, 2]);
        // TTL was 64 on the wire
        assert_eq!(out[0].ipv4().unwrap().ttl(), 63);
    }

    #[test]
    fn ttl_expiry_drops() {
        let (counters, memory) = build_ctx();
        let module = build(&counters, &memory);

        let mut frame = udp_v4_frame([10, 0, 0, 1], [10, 2, 3, 4], 1, 2, b"x");
        frame[14 + 8] = 1; // TTL
        let mut packet = parse(&frame);
        packet.ipv4().unwrap().write_checksum();

        let mut front = PacketFront::new(vec![packet]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        assert!(front.output.is_empty());
        assert_eq!(front.drop.len(), 1);
        let h = counters.handle("route.r0").unwrap();
        assert_eq!(counters.total(h, TTL_EXPIRED), 1);
    }

    #[test]
    fn v6_miss_without_default_drops() {
        let (counters, memory) = build_ctx();
        let module = build(&counters, &memory);

        let src = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let dst = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
        let frame = net::test_utils::udp_v6_frame(src, dst, 1, 2, b"x");
        let mut front = PacketFront::new(vec![parse(&frame)]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        assert!(front.output.is_empty());
        let h = counters.handle("route.r0").unwrap();
        assert_eq!(counters.total(h, NO_ROUTE), 1);
    }
}
