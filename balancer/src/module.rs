// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![allow(clippy::cast_possible_truncation)] // u32 ids index registry vecs

use crate::config::{BalancerConfig, RealRow, ServiceRow};
use crate::encap::encapsulate;
use crate::ring::Ring;
use crate::session::{SessionKey, SessionTable, SessionTableConfig, SessionValue};
use lpm::{IpPrefix, Lpm4, Lpm6, Prefix4, Prefix6};
use net::buffer::PacketBufferMut;
use net::headers::{TcpView, ipproto};
use net::packet::{L3Kind, L4Kind, Packet};
use pipeline::{BuildCtx, Module, ModuleBuildError, ModuleCtx, ModuleFactory, PacketFront};
use stats::{CounterHandle, bump};
use std::any::Any;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Index into the service registry.
pub type VsId = u32;
/// Index into the real registry.
pub type RealId = u32;

bitflags::bitflags! {
    /// Per-service scheduler flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VsFlags: u8 {
        /// One-packet scheduling: no session table at all.
        const OPS = 0b0000_0001;
        /// Pure round robin instead of the hash ring.
        const PRR = 0b0000_0010;
        /// GRE encapsulation instead of IP-in-IP.
        const GRE = 0b0000_0100;
    }
}

// Common counter block: one word per drop/flow class.
const COMMON_COUNTERS: usize = 8;
const PROCESSED: usize = 0;
const NOT_BALANCED: usize = 1;
const SRC_NOT_ALLOWED: usize = 2;
const REAL_DISABLED: usize = 3;
const NO_REAL: usize = 4;
const ENCAP_FAILED: usize = 5;
const SESSION_CREATED: usize = 6;
const SESSION_RESCHEDULED: usize = 7;

// Per-service block: `[packets, dropped, sessions]`.
const VS_COUNTERS: usize = 3;
const VS_PACKETS: usize = 0;
const VS_DROPPED: usize = 1;
const VS_SESSIONS: usize = 2;

#[derive(Debug, Clone, Copy)]
struct TimeoutsMs {
    tcp_syn: u64,
    tcp_syn_ack: u64,
    tcp_fin: u64,
    tcp: u64,
    udp: u64,
    default: u64,
}

#[derive(Debug)]
struct Real {
    addr: IpAddr,
    weight: u32,
    enabled: bool,
    src_addr: Option<IpAddr>,
    src_mask: Option<IpAddr>,
}

struct Vs {
    flags: VsFlags,
    ring: Ring,
    allowed4: Lpm4<()>,
    allowed6: Lpm6<()>,
    restrict_src: bool,
    real_ids: Vec<RealId>,
    rr: AtomicU64,
    counters: CounterHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FilterKey {
    addr: [u8; 16],
    port: u16,
    proto: u8,
}

fn widen(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(a) => {
            let mut out = [0u8; 16];
            out[12..].copy_from_slice(&a.octets());
            out
        }
        IpAddr::V6(a) => a.octets(),
    }
}

/// The balancer module instance.
pub struct BalancerModule {
    services: Vec<Vs>,
    reals: Vec<Real>,
    filter: HashMap<FilterKey, VsId>,
    dst4: Lpm4<()>,
    dst6: Lpm6<()>,
    sessions: Arc<SessionTable>,
    timeouts: TimeoutsMs,
    counters: CounterHandle,
    real_counters: CounterHandle,
}

impl BalancerModule {
    /// Module type name.
    pub const KIND: &'static str = "balancer";

    /// The session table, exposed for control-plane maintenance
    /// (`purge_expired`, forced resize).
    #[must_use]
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Worker iteration boundary hook; drains the session-table resize
    /// protocol.
    pub fn worker_checkpoint(&self, worker_idx: usize) {
        self.sessions.worker_checkpoint(worker_idx);
    }

    fn match_vs(&self, l3: L3Kind, dst: IpAddr, port: u16, proto: u8) -> Option<VsId> {
        // LPM narrows to "some service lives on this address", the filter
        // table confirms the concrete (addr, port, proto) triple
        let candidate = match (l3, dst) {
            (L3Kind::Ipv4, IpAddr::V4(a)) => self.dst4.lookup(a).is_some(),
            (L3Kind::Ipv6, IpAddr::V6(a)) => self.dst6.lookup(a).is_some(),
            _ => false,
        };
        if !candidate {
            return None;
        }
        self.filter
            .get(&FilterKey {
                addr: widen(dst),
                port,
                proto,
            })
            .copied()
    }

    fn src_allowed(&self, vs: &Vs, src: IpAddr) -> bool {
        if !vs.restrict_src {
            return true;
        }
        match src {
            IpAddr::V4(a) => vs.allowed4.lookup(a).is_some(),
            IpAddr::V6(a) => vs.allowed6.lookup(a).is_some(),
        }
    }

    fn timeout_ms(&self, proto: u8, tcp_flags: Option<u8>) -> u64 {
        match (proto, tcp_flags) {
            (ipproto::TCP, Some(flags)) => {
                if flags & TcpView::SYN != 0 && flags & TcpView::ACK == 0 {
                    self.timeouts.tcp_syn
                } else if flags & TcpView::SYN != 0 {
                    self.timeouts.tcp_syn_ack
                } else if flags & TcpView::FIN != 0 {
                    self.timeouts.tcp_fin
                } else {
                    self.timeouts.tcp
                }
            }
            (ipproto::UDP, _) => self.timeouts.udp,
            _ => self.timeouts.default,
        }
    }

    fn real_enabled(&self, real: RealId) -> bool {
        self.reals
            .get(real as usize)
            .is_some_and(|r| r.enabled && r.weight > 0)
    }

    fn select_real(&self, vs: &Vs, hash: u64) -> Option<RealId> {
        if vs.flags.contains(VsFlags::PRR) {
            let enabled: Vec<RealId> = vs
                .real_ids
                .iter()
                .copied()
                .filter(|&r| self.real_enabled(r))
                .collect();
            if enabled.is_empty() {
                return None;
            }
            let turn = vs.rr.fetch_add(1, Ordering::Relaxed);
            let idx = (turn % enabled.len() as u64) as usize;
            return Some(enabled[idx]);
        }
        vs.ring.lookup(hash, |r| self.real_enabled(r))
    }
}

struct Classified {
    l3: L3Kind,
    src: IpAddr,
    dst: IpAddr,
    src_port: u16,
    dst_port: u16,
    proto: u8,
    tcp_flags: Option<u8>,
    hash: u64,
}

fn classify<Buf: PacketBufferMut>(packet: &mut Packet<Buf>) -> Option<Classified> {
    let proto = match packet.headers().l4 {
        L4Kind::Tcp => ipproto::TCP,
        L4Kind::Udp => ipproto::UDP,
        _ => return None,
    };
    let l3 = packet.headers().l3;
    let (src, dst) = match l3 {
        L3Kind::Ipv4 => {
            let view = packet.ipv4()?;
            (
                IpAddr::V4(view.source().into()),
                IpAddr::V4(view.destination().into()),
            )
        }
        L3Kind::Ipv6 => {
            let view = packet.ipv6()?;
            (
                IpAddr::V6(view.source().into()),
                IpAddr::V6(view.destination().into()),
            )
        }
    };
    let (src_port, dst_port, tcp_flags) = match packet.headers().l4 {
        L4Kind::Tcp => {
            let view = packet.tcp()?;
            (
                view.source_port(),
                view.destination_port(),
                Some(view.flags()),
            )
        }
        L4Kind::Udp => {
            let view = packet.udp()?;
            (view.source_port(), view.destination_port(), None)
        }
        _ => return None,
    };
    Some(Classified {
        l3,
        src,
        dst,
        src_port,
        dst_port,
        proto,
        tcp_flags,
        hash: packet.meta().hash,
    })
}

fn reschedulable(proto: u8, tcp_flags: Option<u8>) -> bool {
    match (proto, tcp_flags) {
        (ipproto::UDP, _) => true,
        (ipproto::TCP, Some(flags)) => {
            flags & TcpView::SYN != 0 && flags & (TcpView::ACK | TcpView::RST) == 0
        }
        _ => false,
    }
}

impl<Buf: PacketBufferMut> Module<Buf> for BalancerModule {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn end_of_iteration(&self, worker_idx: usize) {
        self.sessions.worker_checkpoint(worker_idx);
    }

    #[allow(clippy::too_many_lines)]
    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront<Buf>) {
        let slots = ctx.counters.slots(self.counters, ctx.worker_idx);
        let real_slots = ctx.counters.slots(self.real_counters, ctx.worker_idx);
        for mut packet in front.take_input() {
            let Some(flow) = classify(&mut packet) else {
                // not TCP/UDP over IP: none of our business
                bump(slots, NOT_BALANCED);
                front.output(packet);
                continue;
            };
            let Some(vs_id) = self.match_vs(flow.l3, flow.dst, flow.dst_port, flow.proto) else {
                bump(slots, NOT_BALANCED);
                front.output(packet);
                continue;
            };
            let vs = &self.services[vs_id as usize];
            let vs_slots = ctx.counters.slots(vs.counters, ctx.worker_idx);
            bump(slots, PROCESSED);

            if !self.src_allowed(vs, flow.src) {
                bump(slots, SRC_NOT_ALLOWED);
                bump(vs_slots, VS_DROPPED);
                front.drop(packet);
                continue;
            }

            let key = SessionKey {
                vs: vs_id,
                client_addr: widen(flow.src),
                client_port: flow.src_port,
            };
            let timeout_ms = self.timeout_ms(flow.proto, flow.tcp_flags);

            let real = if vs.flags.contains(VsFlags::OPS) {
                // one-packet scheduling: the table is never touched
                self.select_real(vs, flow.hash)
            } else if let Some(session) = self.sessions.lookup(&key, ctx.now_ms) {
                if self.real_enabled(session.real) {
                    self.sessions
                        .refresh(&key, ctx.now_ms, timeout_ms, session.real);
                    Some(session.real)
                } else if reschedulable(flow.proto, flow.tcp_flags) {
                    match self.select_real(vs, flow.hash) {
                        Some(real) => {
                            self.sessions.refresh(&key, ctx.now_ms, timeout_ms, real);
                            bump(slots, SESSION_RESCHEDULED);
                            Some(real)
                        }
                        None => None,
                    }
                } else {
                    bump(slots, REAL_DISABLED);
                    bump(vs_slots, VS_DROPPED);
                    front.drop(packet);
                    continue;
                }
            } else {
                match self.select_real(vs, flow.hash) {
                    Some(real) => {
                        self.sessions.insert(
                            key,
                            SessionValue {
                                real,
                                create_ms: ctx.now_ms,
                                last_ms: ctx.now_ms,
                                timeout_ms,
                            },
                        );
                        bump(slots, SESSION_CREATED);
                        bump(vs_slots, VS_SESSIONS);
                        Some(real)
                    }
                    None => None,
                }
            };

            let Some(real_id) = real else {
                bump(slots, NO_REAL);
                bump(vs_slots, VS_DROPPED);
                front.drop(packet);
                continue;
            };
            let real = &self.reals[real_id as usize];

            match encapsulate(
                &mut packet,
                real.addr,
                real.src_addr,
                real.src_mask,
                vs.flags.contains(VsFlags::GRE),
            ) {
                Ok(()) => {
                    bump(vs_slots, VS_PACKETS);
                    bump(real_slots, real_id as usize);
                    front.output(packet);
                }
                Err(e) => {
                    debug!(error = %e, "encap failed");
                    bump(slots, ENCAP_FAILED);
                    bump(vs_slots, VS_DROPPED);
                    front.drop(packet);
                }
            }
        }
    }
}

/// Factory for [`BalancerModule`].
#[derive(Debug, Default)]
pub struct BalancerFactory;

fn parse_addr(raw: &str) -> Result<IpAddr, ModuleBuildError> {
    raw.parse()
        .map_err(|_| ModuleBuildError::Invalid(format!("bad address '{raw}'")))
}

fn parse_proto(raw: &str) -> Result<u8, ModuleBuildError> {
    match raw {
        "tcp" => Ok(ipproto::TCP),
        "udp" => Ok(ipproto::UDP),
        other => Err(ModuleBuildError::Invalid(format!("bad proto '{other}'"))),
    }
}

fn parse_flags(raw: &[String]) -> Result<VsFlags, ModuleBuildError> {
    let mut flags = VsFlags::empty();
    for flag in raw {
        flags |= match flag.as_str() {
            "ops" => VsFlags::OPS,
            "prr" => VsFlags::PRR,
            "gre" => VsFlags::GRE,
            other => {
                return Err(ModuleBuildError::Invalid(format!("bad flag '{other}'")));
            }
        };
    }
    Ok(flags)
}

fn parse_allowed(
    rows: &[String],
) -> Result<(Lpm4<()>, Lpm6<()>), ModuleBuildError> {
    let mut v4 = Lpm4::new();
    let mut v6 = Lpm6::new();
    for raw in rows {
        let (addr, len) = raw
            .split_once('/')
            .ok_or_else(|| ModuleBuildError::Invalid(format!("bad prefix '{raw}'")))?;
        let len: u8 = len
            .parse()
            .map_err(|_| ModuleBuildError::Invalid(format!("bad prefix '{raw}'")))?;
        match parse_addr(addr)? {
            IpAddr::V4(a) => {
                v4.insert(
                    Prefix4::new(a, len).map_err(|e| ModuleBuildError::Invalid(e.to_string()))?,
                    (),
                );
            }
            IpAddr::V6(a) => {
                v6.insert(
                    Prefix6::new(a, len).map_err(|e| ModuleBuildError::Invalid(e.to_string()))?,
                    (),
                );
            }
        }
    }
    Ok((v4, v6))
}

fn build_real(row: &RealRow, vs_addr: IpAddr) -> Result<Real, ModuleBuildError> {
    let addr = parse_addr(&row.addr)?;
    if addr.is_ipv4() != vs_addr.is_ipv4() {
        return Err(ModuleBuildError::Invalid(format!(
            "real '{}' family does not match its service",
            row.addr
        )));
    }
    Ok(Real {
        addr,
        weight: row.weight,
        enabled: row.enabled,
        src_addr: row.src_addr.as_deref().map(parse_addr).transpose()?,
        src_mask: row.src_mask.as_deref().map(parse_addr).transpose()?,
    })
}

fn build_service(
    row: &ServiceRow,
    vs_id: VsId,
    reals: &mut Vec<Real>,
    filter: &mut HashMap<FilterKey, VsId>,
    dst4: &mut Lpm4<()>,
    dst6: &mut Lpm6<()>,
    counters: CounterHandle,
) -> Result<Vs, ModuleBuildError> {
    let addr = parse_addr(&row.addr)?;
    let proto = parse_proto(&row.proto)?;
    let flags = parse_flags(&row.flags)?;
    let (allowed4, allowed6) = parse_allowed(&row.allowed_src)?;

    match addr {
        IpAddr::V4(a) => {
            dst4.insert(
                Prefix4::new(a, 32).map_err(|e| ModuleBuildError::Invalid(e.to_string()))?,
                (),
            );
        }
        IpAddr::V6(a) => {
            dst6.insert(
                Prefix6::new(a, 128).map_err(|e| ModuleBuildError::Invalid(e.to_string()))?,
                (),
            );
        }
    }
    let displaced = filter.insert(
        FilterKey {
            addr: widen(addr),
            port: row.port,
            proto,
        },
        vs_id,
    );
    if displaced.is_some() {
        return Err(ModuleBuildError::Invalid(format!(
            "duplicate service {}:{}/{}",
            row.addr, row.port, row.proto
        )));
    }

    let mut real_ids = Vec::with_capacity(row.reals.len());
    let mut weights = Vec::with_capacity(row.reals.len());
    for real_row in &row.reals {
        let real_id = reals.len() as RealId;
        let real = build_real(real_row, addr)?;
        weights.push((real_id, if real.enabled { real.weight } else { 0 }));
        reals.push(real);
        real_ids.push(real_id);
    }

    Ok(Vs {
        flags,
        ring: Ring::build(&weights),
        allowed4,
        allowed6,
        restrict_src: !row.allowed_src.is_empty(),
        real_ids,
        rr: AtomicU64::new(0),
        counters,
    })
}

impl<Buf: PacketBufferMut> ModuleFactory<Buf> for BalancerFactory {
    fn kind(&self) -> &'static str {
        BalancerModule::KIND
    }

    fn build(
        &self,
        ctx: &BuildCtx<'_>,
        name: &str,
        raw: &[u8],
        old: Option<&Arc<dyn Module<Buf>>>,
    ) -> Result<Arc<dyn Module<Buf>>, ModuleBuildError> {
        let config: BalancerConfig = serde_yaml_ng::from_slice(raw)
            .map_err(|e| ModuleBuildError::Parse(e.to_string()))?;

        let mut services = Vec::with_capacity(config.services.len());
        let mut reals = Vec::new();
        let mut filter = HashMap::new();
        let mut dst4 = Lpm4::new();
        let mut dst6 = Lpm6::new();
        for (idx, row) in config.services.iter().enumerate() {
            let vs_counters = ctx.counters.register(
                &format!("{}.{name}.vs{idx}", BalancerModule::KIND),
                VS_COUNTERS,
            )?;
            let vs = build_service(
                row,
                idx as VsId,
                &mut reals,
                &mut filter,
                &mut dst4,
                &mut dst6,
                vs_counters,
            )?;
            services.push(vs);
        }

        // a reconfiguration keeps the live session table so established
        // flows survive the generation swap
        let sessions = match old
            .and_then(|module| (&**module as &dyn Any).downcast_ref::<BalancerModule>())
        {
            Some(previous) => Arc::clone(&previous.sessions),
            None => Arc::new(SessionTable::new(&SessionTableConfig {
                capacity: config.session_table.capacity,
                density_threshold: config.session_table.density_threshold,
                workers: ctx.workers,
            })),
        };

        let counters = ctx
            .counters
            .register(&format!("{}.{name}", BalancerModule::KIND), COMMON_COUNTERS)?;
        let real_counters = ctx.counters.register(
            &format!("{}.{name}.reals", BalancerModule::KIND),
            reals.len().max(1),
        )?;

        let timeouts = TimeoutsMs {
            tcp_syn: u64::from(config.timeouts.tcp_syn) * 1000,
            tcp_syn_ack: u64::from(config.timeouts.tcp_syn_ack) * 1000,
            tcp_fin: u64::from(config.timeouts.tcp_fin) * 1000,
            tcp: u64::from(config.timeouts.tcp) * 1000,
            udp: u64::from(config.timeouts.udp) * 1000,
            default: u64::from(config.timeouts.default) * 1000,
        };

        Ok(Arc::new(BalancerModule {
            services,
            reals,
            filter,
            dst4,
            dst6,
            sessions,
            timeouts,
            counters,
            real_counters,
        }))
    }
}
