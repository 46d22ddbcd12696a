// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Translator behavior against crafted frames.

use crate::module::Nat64Factory;
use net::DeviceId;
use net::buffer::TestBuffer;
use net::checksum::{Accumulator, pseudo_header_v4, pseudo_header_v6};
use net::headers::ipproto;
use net::packet::{L3Kind, L4Kind, Packet};
use pipeline::{BuildCtx, Module, ModuleCtx, ModuleFactory, PacketFront};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const CLIENT_V4: [u8; 4] = [192, 0, 2, 34];
const SERVER_V4: [u8; 4] = [198, 51, 100, 1];
const SERVER_V6: [u8; 16] = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4];
// prefix ‖ client v4
const CLIENT_V6: [u8; 16] = [
    0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 192, 0, 2, 34,
];

const CONFIG: &str = "
prefixes: ['2001:db8::/96']
mappings:
  - ip4: 198.51.100.1
    ip6: 2001:db8::4
drop_unknown_prefix: true
drop_unknown_mapping: true
";

struct Fixture {
    counters: stats::CounterRegistry,
    _memory: arena::MemoryContext,
}

impl Fixture {
    fn new() -> Self {
        let shared = Arc::new(arena::Arena::anonymous(1 << 18, 1 << 18).unwrap());
        let memory = arena::MemoryContext::new(Arc::clone(&shared), arena::HalfKind::Cp, "test");
        let counters = stats::CounterRegistry::new(&memory, 1, 256).unwrap();
        Self {
            counters,
            _memory: memory,
        }
    }

    fn build(&self, raw: &str) -> Arc<dyn Module<TestBuffer>> {
        let ctx = BuildCtx {
            counters: &self.counters,
            memory: &self._memory,
            workers: 1,
        };
        <Nat64Factory as ModuleFactory<TestBuffer>>::build(
            &Nat64Factory,
            &ctx,
            "n0",
            raw.as_bytes(),
            None,
        )
        .unwrap()
    }

    fn run(
        &self,
        module: &Arc<dyn Module<TestBuffer>>,
        frame: &[u8],
    ) -> PacketFront<TestBuffer> {
        let packet = Packet::new(TestBuffer::from_frame(frame), DeviceId(0)).unwrap();
        let mut front = PacketFront::new(vec![packet]);
        front.advance();
        let ctx = ModuleCtx {
            worker_idx: 0,
            now_ms: 0,
            counters: &self.counters,
        };
        module.handle(&ctx, &mut front);
        front
    }
}

#[test]
fn udp_v4_to_v6_translation() {
    let fx = Fixture::new();
    let module = fx.build(CONFIG);
    let frame = net::test_utils::udp_v4_frame(CLIENT_V4, SERVER_V4, 12345, 53, b"0123456789");

    let mut front = fx.run(&module, &frame);
    assert_eq!(front.output.len(), 1);
    let packet = &mut front.output[0];
    assert_eq!(packet.headers().l3, L3Kind::Ipv6);
    assert_eq!(packet.headers().l4, L4Kind::Udp);

    let view = packet.ipv6().unwrap();
    assert_eq!(view.source(), CLIENT_V6);
    assert_eq!(view.destination(), SERVER_V6);
    assert_eq!(view.next_header(), ipproto::UDP);
    assert_eq!(view.hop_limit(), 64);
    assert_eq!(view.payload_len(), 8 + 10);
    assert_eq!(packet.payload(), b"0123456789");

    // the UDP checksum verifies against the IPv6 pseudo header
    let l4 = packet.headers().l4_offset;
    let segment = &packet.frame()[l4..];
    let sum = pseudo_header_v6(CLIENT_V6, SERVER_V6, ipproto::UDP, 18)
        .add_bytes(segment)
        .finish();
    assert_eq!(sum, 0);
}

#[test]
fn round_trip_preserves_the_flow() {
    let fx = Fixture::new();
    let module = fx.build(CONFIG);
    let original = net::test_utils::udp_v4_frame(CLIENT_V4, SERVER_V4, 12345, 53, b"payload");

    let mut forward = fx.run(&module, &original);
    let v6_frame = forward.output.pop().unwrap().frame().to_vec();

    let mut back = fx.run(&module, &v6_frame);
    assert_eq!(back.output.len(), 1);
    let packet = &mut back.output[0];
    assert_eq!(packet.headers().l3, L3Kind::Ipv4);

    let view = packet.ipv4().unwrap();
    assert_eq!(view.source(), CLIENT_V4);
    assert_eq!(view.destination(), SERVER_V4);
    assert_eq!(packet.payload(), b"payload");

    // transport checksum still verifies on the IPv4 side
    let l4 = packet.headers().l4_offset;
    let seg_len = u16::try_from(packet.frame().len() - l4).unwrap();
    let sum = pseudo_header_v4(CLIENT_V4, SERVER_V4, ipproto::UDP, seg_len)
        .add_bytes(&packet.frame()[l4..])
        .finish();
    assert_eq!(sum, 0);
}

#[test]
fn unknown_mapping_gates_on_the_flag() {
    let fx = Fixture::new();
    let module = fx.build(CONFIG);
    let frame = net::test_utils::udp_v4_frame(CLIENT_V4, [203, 0, 113, 1], 1, 2, b"x");
    let front = fx.run(&module, &frame);
    assert!(front.output.is_empty());
    assert_eq!(front.drop.len(), 1);
    let h = fx.counters.handle("nat64.n0").unwrap();
    assert_eq!(fx.counters.total(h, 3), 1); // unknown_mapping

    let fx = Fixture::new();
    let permissive = fx.build(&CONFIG.replace("drop_unknown_mapping: true", "drop_unknown_mapping: false"));
    let front = fx.run(&permissive, &frame);
    assert_eq!(front.output.len(), 1);
    assert_eq!(front.output[0].frame(), frame.as_slice());
}

#[test]
fn unknown_prefix_drops_foreign_v6_sources() {
    let fx = Fixture::new();
    let module = fx.build(CONFIG);
    let foreign_src: [u8; 16] = [0x20, 0x01, 0x0d, 0xb9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9];
    let frame = net::test_utils::udp_v6_frame(foreign_src, SERVER_V6, 1, 2, b"x");
    let front = fx.run(&module, &frame);
    assert!(front.output.is_empty());
    let h = fx.counters.handle("nat64.n0").unwrap();
    assert_eq!(fx.counters.total(h, 4), 1); // unknown_prefix
}

#[test]
fn icmp_echo_crosses_families() {
    let fx = Fixture::new();
    let module = fx.build(CONFIG);
    let frame = net::test_utils::icmp4_frame(
        CLIENT_V4,
        SERVER_V4,
        8, // echo request
        0,
        [0x12, 0x34, 0x00, 0x01], // id/seq
        b"ping-data",
    );

    let mut front = fx.run(&module, &frame);
    assert_eq!(front.output.len(), 1);
    let packet = &mut front.output[0];
    assert_eq!(packet.headers().l4, L4Kind::Icmp6);

    let l4 = packet.headers().l4_offset;
    let message = &packet.frame()[l4..];
    assert_eq!(message[0], 128); // echo request
    assert_eq!(&message[4..8], &[0x12, 0x34, 0x00, 0x01]);

    let sum = pseudo_header_v6(
        CLIENT_V6,
        SERVER_V6,
        ipproto::ICMPV6,
        u32::try_from(message.len()).unwrap(),
    )
    .add_bytes(message)
    .finish();
    assert_eq!(sum, 0);
}

fn build_ptb_frame(mtu: u32) -> Vec<u8> {
    // the packet that was too big: the client's earlier 4→6 translation
    let invoking = net::test_utils::udp_v6_frame(CLIENT_V6, SERVER_V6, 12345, 53, b"big");
    net::test_utils::icmp6_frame(
        SERVER_V6,
        CLIENT_V6,
        2, // packet too big
        0,
        mtu.to_be_bytes(),
        &invoking[14..],
    )
}

#[test]
fn packet_too_big_becomes_frag_needed_with_adjusted_mtu() {
    let fx = Fixture::new();
    let module = fx.build(CONFIG);

    let mut front = fx.run(&module, &build_ptb_frame(1500));
    assert_eq!(front.output.len(), 1);
    let packet = &mut front.output[0];
    assert_eq!(packet.headers().l3, L3Kind::Ipv4);

    let view = packet.ipv4().unwrap();
    assert_eq!(view.source(), SERVER_V4);
    assert_eq!(view.destination(), CLIENT_V4);
    assert_eq!(view.protocol(), ipproto::ICMP);

    let l4 = packet.headers().l4_offset;
    let message = packet.frame()[l4..].to_vec();
    assert_eq!(message[0], 3); // destination unreachable
    assert_eq!(message[1], 4); // fragmentation needed
    // 20-byte header difference
    assert_eq!(u16::from_be_bytes([message[6], message[7]]), 1480);

    // the embedded invoking packet came back to its IPv4 form
    let embedded = &message[8..];
    assert_eq!(embedded[0] >> 4, 4);
    assert_eq!(&embedded[12..16], &CLIENT_V4);
    assert_eq!(&embedded[16..20], &SERVER_V4);
    assert_eq!(embedded[9], ipproto::UDP);

    // plain one's-complement sum over the whole ICMPv4 message
    assert_eq!(Accumulator::new().add_bytes(&message).finish(), 0);
}

#[test]
fn packet_too_big_zero_mtu_floors_at_config() {
    let fx = Fixture::new();
    let module = fx.build(CONFIG);
    let mut front = fx.run(&module, &build_ptb_frame(0));
    assert_eq!(front.output.len(), 1);
    let packet = &mut front.output[0];
    let l4 = packet.headers().l4_offset;
    let message = &packet.frame()[l4..];
    // default ipv4_mtu
    assert_eq!(u16::from_be_bytes([message[6], message[7]]), 1450);
}
