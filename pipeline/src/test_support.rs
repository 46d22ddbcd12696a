// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Shared fixtures for module tests.

use crate::module::ModuleCtx;
use net::DeviceId;
use net::buffer::TestBuffer;
use net::packet::Packet;
use std::sync::Arc;

pub(crate) fn build_ctx() -> (stats::CounterRegistry, arena::MemoryContext) {
    let shared = Arc::new(arena::Arena::anonymous(1 << 18, 1 << 18).unwrap());
    let memory = arena::MemoryContext::new(Arc::clone(&shared), arena::HalfKind::Cp, "test");
    let counters = stats::CounterRegistry::new(&memory, 2, 512).unwrap();
    (counters, memory)
}

pub(crate) fn module_ctx(counters: &stats::CounterRegistry) -> ModuleCtx<'_> {
    ModuleCtx {
        worker_idx: 0,
        now_ms: 0,
        counters,
    }
}

pub(crate) fn parse(frame: &[u8]) -> Packet<TestBuffer> {
    Packet::new(TestBuffer::from_frame(frame), DeviceId(0)).unwrap()
}
