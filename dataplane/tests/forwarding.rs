// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end forwarding over the loopback driver: local TX, cross-device
//! steering through the data pipes, and the drop counters.

use std::sync::Arc;
use yanet_dataplane::control::GenSpec;
use yanet_dataplane::driver::{Driver, LoopbackDriver};
use yanet_dataplane::runtime::{Dataplane, SetupError};
use yanet_dataplane::worker;

const TOPOLOGY: &str = "
storage: ''
instances:
  - numa_id: 0
    dp_memory: 1048576
    cp_memory: 1048576
devices:
  - port_name: virtio_user_0
    mac_addr: '02:00:00:00:00:01'
    workers:
      - core_id: 0
        instance_id: 0
  - port_name: virtio_user_1
    mac_addr: '02:00:00:00:00:02'
    workers:
      - core_id: 1
        instance_id: 0
connections:
  - src_device_id: 0
    dst_device_id: 1
  - src_device_id: 1
    dst_device_id: 0
";

const GENERATION: &str = "
modules:
  - kind: forward
    name: to-peer
    config:
      default_device: 1
  - kind: forward
    name: to-self
    config:
      default_device: 1
pipelines:
  - name: outbound
    stages: [[forward, to-peer]]
devices:
  - device: 0
    default: outbound
";

fn plane() -> (Dataplane<LoopbackDriver>, Arc<LoopbackDriver>) {
    let topology = config::TopologyConfig::from_yaml(TOPOLOGY).unwrap();
    let driver = Arc::new(LoopbackDriver::new());
    let plane = Dataplane::new(&topology, Arc::clone(&driver)).unwrap();
    (plane, driver)
}

fn test_frame(dport: u16) -> Vec<u8> {
    net::test_utils::udp_v4_frame([192, 0, 2, 1], [192, 0, 2, 2], 4000, dport, b"payload!")
}

#[test]
fn cross_device_steering_via_pipes() {
    let (mut plane, driver) = plane();
    let agent = plane.control_agent();
    agent.apply(&GenSpec::from_yaml(GENERATION).unwrap()).unwrap();

    let port0 = plane.devices()[0].port;
    let port1 = plane.devices()[1].port;
    driver.port_start(port0).unwrap();
    driver.port_start(port1).unwrap();

    driver.inject(port0, 0, [test_frame(1), test_frame(2), test_frame(3)]);

    // iteration 1: worker 0 receives, classifies and pushes to the pipe;
    // worker 1 drains the pipe and transmits locally
    plane.step_workers();
    let sent = driver.transmitted(port1);
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], test_frame(1));
    assert_eq!(sent[2], test_frame(3));
    assert!(driver.transmitted(port0).is_empty());

    // iteration 2: worker 0's credit sweep releases the pipe slots
    plane.step_workers();

    let counters = plane.counters();
    let handle = counters.handle("worker").unwrap();
    assert_eq!(counters.total(handle, worker::RX), 3);
    assert_eq!(counters.total(handle, worker::REMOTE_TX), 3);
    assert_eq!(counters.total(handle, worker::REMOTE_RX), 3);
    assert_eq!(counters.total(handle, worker::TX), 3);
    assert_eq!(counters.total(handle, worker::DROPS), 0);
}

#[test]
fn local_delivery_stays_on_the_device() {
    let (mut plane, driver) = plane();
    let agent = plane.control_agent();
    let spec = GenSpec::from_yaml(
        &GENERATION.replace("default_device: 1", "default_device: 0"),
    )
    .unwrap();
    agent.apply(&spec).unwrap();

    let port0 = plane.devices()[0].port;
    driver.port_start(port0).unwrap();
    driver.inject(port0, 0, [test_frame(7)]);

    plane.step_workers();
    assert_eq!(driver.transmitted(port0), vec![test_frame(7)]);

    let counters = plane.counters();
    let handle = counters.handle("worker").unwrap();
    assert_eq!(counters.total(handle, worker::REMOTE_TX), 0);
    assert_eq!(counters.total(handle, worker::TX), 1);
}

#[test]
fn unclassified_and_unparseable_packets_drop() {
    let (mut plane, driver) = plane();
    // no generation applied: every packet misses classification
    let port0 = plane.devices()[0].port;
    driver.port_start(port0).unwrap();
    driver.inject(port0, 0, [test_frame(1), vec![0xff; 6]]);

    plane.step_workers();

    let counters = plane.counters();
    let handle = counters.handle("worker").unwrap();
    assert_eq!(counters.total(handle, worker::CLASSIFY_MISS), 1);
    assert_eq!(counters.total(handle, worker::PARSE_FAIL), 1);
    assert_eq!(counters.total(handle, worker::DROPS), 2);
    assert!(driver.transmitted(port0).is_empty());
}

#[test]
fn full_tx_queue_counts_and_drops_the_excess() {
    let (mut plane, driver) = plane();
    let agent = plane.control_agent();
    let spec = GenSpec::from_yaml(
        &GENERATION.replace("default_device: 1", "default_device: 0"),
    )
    .unwrap();
    agent.apply(&spec).unwrap();

    let port0 = plane.devices()[0].port;
    driver.port_start(port0).unwrap();
    driver.set_tx_capacity(port0, 2);
    driver.inject(port0, 0, (0..5u16).map(test_frame));

    plane.step_workers();

    let counters = plane.counters();
    let handle = counters.handle("worker").unwrap();
    assert_eq!(counters.total(handle, worker::TX), 2);
    assert_eq!(counters.total(handle, worker::TX_FULL), 3);
    assert_eq!(counters.total(handle, worker::DROPS), 3);
}

#[test]
fn wiring_rejects_invalid_worker_cores() {
    // both workers pinned to core 0; parse without load-time validation
    // to prove the wiring itself refuses the topology
    let raw = TOPOLOGY.replace("core_id: 1", "core_id: 0");
    let topology: config::TopologyConfig = serde_yaml_ng::from_str(&raw).unwrap();
    let driver = Arc::new(LoopbackDriver::new());
    let err = Dataplane::new(&topology, driver).unwrap_err();
    assert!(matches!(err, SetupError::Config(_)));
}

#[test]
fn device_counters_follow_their_device() {
    let (mut plane, driver) = plane();
    let agent = plane.control_agent();
    agent.apply(&GenSpec::from_yaml(GENERATION).unwrap()).unwrap();

    let port0 = plane.devices()[0].port;
    let port1 = plane.devices()[1].port;
    driver.port_start(port0).unwrap();
    driver.port_start(port1).unwrap();
    driver.inject(port0, 0, [test_frame(1)]);

    plane.step_workers();

    let counters = plane.counters();
    let dev0 = counters.handle("device.virtio_user_0").unwrap();
    let dev1 = counters.handle("device.virtio_user_1").unwrap();
    assert_eq!(counters.total(dev0, worker::DEV_RX), 1);
    assert_eq!(counters.total(dev0, worker::DEV_TX), 0);
    assert_eq!(counters.total(dev1, worker::DEV_TX), 1);
}
