// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end balancer behavior against crafted frames.

use crate::module::{BalancerFactory, BalancerModule};
use crate::session::SessionKey;
use net::DeviceId;
use net::buffer::TestBuffer;
use net::headers::TcpView;
use net::packet::Packet;
use pipeline::{BuildCtx, Module, ModuleCtx, ModuleFactory, PacketFront};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const VIP: [u8; 4] = [10, 0, 0, 1];
const REAL_A: [u8; 4] = [198, 51, 100, 1];
const REAL_B: [u8; 4] = [198, 51, 100, 2];

struct Fixture {
    counters: stats::CounterRegistry,
    _memory: arena::MemoryContext,
}

impl Fixture {
    fn new() -> Self {
        let shared = Arc::new(arena::Arena::anonymous(1 << 18, 1 << 18).unwrap());
        let memory = arena::MemoryContext::new(Arc::clone(&shared), arena::HalfKind::Cp, "test");
        let counters = stats::CounterRegistry::new(&memory, 2, 1024).unwrap();
        Self {
            counters,
            _memory: memory,
        }
    }

    fn build(
        &self,
        name: &str,
        raw: &str,
        old: Option<&Arc<dyn Module<TestBuffer>>>,
    ) -> Arc<dyn Module<TestBuffer>> {
        let ctx = BuildCtx {
            counters: &self.counters,
            memory: &self._memory,
            workers: 2,
        };
        <BalancerFactory as ModuleFactory<TestBuffer>>::build(
            &BalancerFactory,
            &ctx,
            name,
            raw.as_bytes(),
            old,
        )
        .unwrap()
    }

    fn ctx(&self, now_ms: u64) -> ModuleCtx<'_> {
        ModuleCtx {
            worker_idx: 0,
            now_ms,
            counters: &self.counters,
        }
    }
}

fn two_reals_config(a_enabled: bool) -> String {
    format!(
        "services:
  - addr: 10.0.0.1
    port: 80
    proto: tcp
    reals:
      - addr: 198.51.100.1
        weight: 1
        enabled: {a_enabled}
      - addr: 198.51.100.2
        weight: 1
"
    )
}

fn tcp_packet(src: [u8; 4], sport: u16, flags: u8) -> Packet<TestBuffer> {
    let frame = net::test_utils::tcp_v4_frame(src, VIP, sport, 80, flags, b"");
    Packet::new(TestBuffer::from_frame(&frame), DeviceId(0)).unwrap()
}

fn run(
    module: &Arc<dyn Module<TestBuffer>>,
    ctx: &ModuleCtx<'_>,
    packets: Vec<Packet<TestBuffer>>,
) -> PacketFront<TestBuffer> {
    let mut front = PacketFront::new(packets);
    front.advance();
    module.handle(ctx, &mut front);
    front
}

fn outer_dst(packet: &mut Packet<TestBuffer>) -> [u8; 4] {
    packet.ipv4().unwrap().destination()
}

#[test]
fn session_sticks_to_first_real() {
    let fx = Fixture::new();
    let module = fx.build("b0", &two_reals_config(true), None);

    let p1 = run(&module, &fx.ctx(0), vec![tcp_packet([1, 2, 3, 4], 5000, TcpView::SYN)]);
    let mut out = p1.output;
    assert_eq!(out.len(), 1);
    let first_real = outer_dst(&mut out[0]);
    assert!(first_real == REAL_A || first_real == REAL_B);

    // 200 ms later the same client hits the same real
    let p2 = run(
        &module,
        &fx.ctx(200),
        vec![tcp_packet([1, 2, 3, 4], 5000, TcpView::ACK)],
    );
    let mut out = p2.output;
    assert_eq!(out.len(), 1);
    assert_eq!(outer_dst(&mut out[0]), first_real);
}

#[test]
fn disable_reschedules_syn_but_drops_established() {
    let fx = Fixture::new();
    let gen1 = fx.build("b1", &two_reals_config(true), None);

    let p1 = run(&gen1, &fx.ctx(0), vec![tcp_packet([1, 2, 3, 4], 5000, TcpView::SYN)]);
    let mut out = p1.output;
    let first_real = outer_dst(&mut out[0]);

    // new generation with the selected real disabled; sessions carry over
    let disable_a = first_real == REAL_A;
    let gen2_raw = if disable_a {
        two_reals_config(false)
    } else {
        two_reals_config(true).replace(
            "addr: 198.51.100.2\n        weight: 1\n",
            "addr: 198.51.100.2\n        weight: 1\n        enabled: false\n",
        )
    };
    let gen2 = fx.build("b1", &gen2_raw, Some(&gen1));
    let other_real = if disable_a { REAL_B } else { REAL_A };

    // a data segment of the pinned flow dies with the real
    let p2 = run(
        &gen2,
        &fx.ctx(100),
        vec![tcp_packet([1, 2, 3, 4], 5000, TcpView::ACK)],
    );
    assert!(p2.output.is_empty());
    assert_eq!(p2.drop.len(), 1);
    let h = fx.counters.handle("balancer.b1").unwrap();
    assert_eq!(fx.counters.total(h, 3), 1); // real_disabled

    // a fresh SYN of the same 5-tuple reschedules onto the survivor
    let p3 = run(
        &gen2,
        &fx.ctx(200),
        vec![tcp_packet([1, 2, 3, 4], 5000, TcpView::SYN)],
    );
    let mut out = p3.output;
    assert_eq!(out.len(), 1);
    assert_eq!(outer_dst(&mut out[0]), other_real);
}

#[test]
fn udp_resched_is_always_allowed() {
    let fx = Fixture::new();
    let raw = "services:
  - addr: 10.0.0.1
    port: 53
    proto: udp
    reals:
      - addr: 198.51.100.1
      - addr: 198.51.100.2
";
    let gen1 = fx.build("b2", raw, None);
    let frame = net::test_utils::udp_v4_frame([1, 2, 3, 4], VIP, 5000, 53, b"q");
    let pkt = Packet::new(TestBuffer::from_frame(&frame), DeviceId(0)).unwrap();
    let p1 = run(&gen1, &fx.ctx(0), vec![pkt]);
    let mut out = p1.output;
    let first_real = outer_dst(&mut out[0]);

    let gen2_raw = if first_real == REAL_A {
        raw.replace("- addr: 198.51.100.1\n", "- addr: 198.51.100.1\n        enabled: false\n")
    } else {
        raw.replace("- addr: 198.51.100.2\n", "- addr: 198.51.100.2\n        enabled: false\n")
    };
    let gen2 = fx.build("b2", &gen2_raw, Some(&gen1));

    let frame = net::test_utils::udp_v4_frame([1, 2, 3, 4], VIP, 5000, 53, b"q");
    let pkt = Packet::new(TestBuffer::from_frame(&frame), DeviceId(0)).unwrap();
    let p2 = run(&gen2, &fx.ctx(100), vec![pkt]);
    let mut out = p2.output;
    assert_eq!(out.len(), 1);
    assert_ne!(outer_dst(&mut out[0]), first_real);
}

#[test]
fn ops_never_touches_the_session_table() {
    let fx = Fixture::new();
    let raw = "services:
  - addr: 10.0.0.1
    port: 80
    proto: tcp
    flags: [ops]
    reals:
      - addr: 198.51.100.1
      - addr: 198.51.100.2
";
    let module = fx.build("b3", raw, None);
    let front = run(
        &module,
        &fx.ctx(0),
        vec![
            tcp_packet([1, 2, 3, 4], 5000, TcpView::SYN),
            tcp_packet([1, 2, 3, 5], 5001, TcpView::SYN),
        ],
    );
    assert_eq!(front.output.len(), 2);

    let balancer = (&*module as &dyn std::any::Any)
        .downcast_ref::<BalancerModule>()
        .unwrap();
    assert!(balancer.sessions().is_empty());
}

#[test]
fn prr_rotates_reals_regardless_of_hash() {
    let fx = Fixture::new();
    let raw = "services:
  - addr: 10.0.0.1
    port: 80
    proto: tcp
    flags: [ops, prr]
    reals:
      - addr: 198.51.100.1
      - addr: 198.51.100.2
";
    let module = fx.build("b4", raw, None);
    // identical 5-tuple four times: the hash ring would pin these, round
    // robin alternates
    let packets = (0..4)
        .map(|_| tcp_packet([1, 2, 3, 4], 5000, TcpView::SYN))
        .collect();
    let front = run(&module, &fx.ctx(0), packets);
    let mut out = front.output;
    let dsts: Vec<[u8; 4]> = out.iter_mut().map(outer_dst).collect();
    assert_eq!(dsts, vec![REAL_A, REAL_B, REAL_A, REAL_B]);
}

#[test]
fn source_filter_drops_foreign_clients() {
    let fx = Fixture::new();
    let raw = "services:
  - addr: 10.0.0.1
    port: 80
    proto: tcp
    allowed_src: ['192.0.2.0/24']
    reals:
      - addr: 198.51.100.1
";
    let module = fx.build("b5", raw, None);
    let front = run(
        &module,
        &fx.ctx(0),
        vec![
            tcp_packet([192, 0, 2, 7], 5000, TcpView::SYN),
            tcp_packet([203, 0, 113, 7], 5000, TcpView::SYN),
        ],
    );
    assert_eq!(front.output.len(), 1);
    assert_eq!(front.drop.len(), 1);
    let h = fx.counters.handle("balancer.b5").unwrap();
    assert_eq!(fx.counters.total(h, 2), 1); // src_not_allowed
}

#[test]
fn non_service_traffic_passes_untouched() {
    let fx = Fixture::new();
    let module = fx.build("b6", &two_reals_config(true), None);
    // same VIP, wrong port
    let frame = net::test_utils::tcp_v4_frame([1, 2, 3, 4], VIP, 5000, 8080, TcpView::SYN, b"");
    let pkt = Packet::new(TestBuffer::from_frame(&frame), DeviceId(0)).unwrap();
    let front = run(&module, &fx.ctx(0), vec![pkt]);
    assert_eq!(front.output.len(), 1);
    assert_eq!(front.output[0].frame(), frame.as_slice());
}

#[test]
fn syn_session_gets_syn_timeout_class() {
    let fx = Fixture::new();
    let module = fx.build("b7", &two_reals_config(true), None);
    let _ = run(&module, &fx.ctx(0), vec![tcp_packet([1, 2, 3, 4], 5000, TcpView::SYN)]);

    let balancer = (&*module as &dyn std::any::Any)
        .downcast_ref::<BalancerModule>()
        .unwrap();
    let mut client_addr = [0u8; 16];
    client_addr[12..].copy_from_slice(&[1, 2, 3, 4]);
    let session = balancer
        .sessions()
        .lookup(
            &SessionKey {
                vs: 0,
                client_addr,
                client_port: 5000,
            },
            0,
        )
        .unwrap();
    // default tcp_syn timeout is 5 s
    assert_eq!(session.timeout_ms, 5000);
}
