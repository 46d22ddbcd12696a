// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration generations.
//!
//! A generation is an immutable snapshot: the module registry, the
//! resolved pipelines and the per-device classification maps. The control
//! plane publishes a whole new generation with one release store; a
//! worker loads it once at the top of each loop iteration, so a packet
//! never observes a half-applied configuration.
//!
//! The published generation number is mirrored into the data-plane arena
//! half, where operators mapping the file read-only can watch it move.

use arc_swap::ArcSwap;
use arena::Arena;
use net::DeviceId;
use net::buffer::PacketBufferMut;
use pipeline::{Module, Pipeline};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::info;

/// Per-device classification: VLAN to pipeline index, with the untagged
/// (VLAN zero) entry as the fallback for unmapped tags.
#[derive(Debug, Clone, Default)]
pub struct DeviceBinding {
    /// Pipeline index per VLAN id.
    pub vlans: HashMap<u16, usize>,
    /// Pipeline index for untagged traffic and unmapped VLANs.
    pub default: Option<usize>,
}

impl DeviceBinding {
    /// Pick the pipeline index for a packet's VLAN.
    #[must_use]
    pub fn classify(&self, vlan: Option<u16>) -> Option<usize> {
        vlan.and_then(|v| self.vlans.get(&v).copied())
            .or(self.default)
    }
}

/// One immutable configuration snapshot.
pub struct ConfigGen<Buf: PacketBufferMut> {
    /// Monotonic generation number.
    pub r#gen: u64,
    /// Module registry: `(kind, instance)` to the built instance.
    pub modules: HashMap<(String, String), Arc<dyn Module<Buf>>>,
    /// Pipelines by publication order; names alongside.
    pub pipelines: Vec<(String, Arc<Pipeline<Buf>>)>,
    /// Device id to classification map.
    pub devices: HashMap<DeviceId, DeviceBinding>,
}

impl<Buf: PacketBufferMut + 'static> ConfigGen<Buf> {
    /// The empty boot generation.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            r#gen: 0,
            modules: HashMap::new(),
            pipelines: Vec::new(),
            devices: HashMap::new(),
        }
    }

    /// The pipeline a packet on `device` with `vlan` runs through.
    #[must_use]
    pub fn classify(&self, device: DeviceId, vlan: Option<u16>) -> Option<&Arc<Pipeline<Buf>>> {
        let binding = self.devices.get(&device)?;
        let idx = binding.classify(vlan)?;
        self.pipelines.get(idx).map(|(_, pipeline)| pipeline)
    }

    /// A pipeline by name, for publication-time resolution.
    #[must_use]
    pub fn pipeline_index(&self, name: &str) -> Option<usize> {
        self.pipelines.iter().position(|(n, _)| n == name)
    }

    /// End-of-iteration hook fan-out to every module instance.
    pub fn end_of_iteration(&self, worker_idx: usize) {
        for module in self.modules.values() {
            module.end_of_iteration(worker_idx);
        }
    }
}

impl<Buf: PacketBufferMut> std::fmt::Debug for ConfigGen<Buf> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigGen")
            .field("gen", &self.r#gen)
            .field("modules", &self.modules.len())
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}

/// The shared configuration root workers read from.
pub struct CpConfig<Buf: PacketBufferMut> {
    current: ArcSwap<ConfigGen<Buf>>,
    arena: Arc<Arena>,
}

impl<Buf: PacketBufferMut + 'static> CpConfig<Buf> {
    /// A root holding the empty generation.
    #[must_use]
    pub fn new(arena: Arc<Arena>) -> Self {
        Self {
            current: ArcSwap::from_pointee(ConfigGen::empty()),
            arena,
        }
    }

    /// The current generation; held for one loop iteration only.
    #[must_use]
    pub fn current(&self) -> Arc<ConfigGen<Buf>> {
        self.current.load_full()
    }

    /// The published generation number.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.load().r#gen
    }

    /// Publish a new generation; the release store here is the only
    /// synchronization between the control plane and the workers.
    pub fn publish(&self, generation: ConfigGen<Buf>) {
        let r#gen = generation.r#gen;
        self.current.store(Arc::new(generation));
        self.arena.dp().generation().store(r#gen, Ordering::Release);
        info!(r#gen, "published configuration generation");
    }

    /// The backing arena.
    #[must_use]
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }
}

impl<Buf: PacketBufferMut + 'static> std::fmt::Debug for CpConfig<Buf> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpConfig")
            .field("gen", &self.generation())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use net::buffer::TestBuffer;

    #[test]
    fn classify_prefers_vlan_then_default() {
        let mut binding = DeviceBinding::default();
        binding.vlans.insert(100, 1);
        binding.default = Some(0);
        assert_eq!(binding.classify(Some(100)), Some(1));
        assert_eq!(binding.classify(Some(200)), Some(0));
        assert_eq!(binding.classify(None), Some(0));

        let orphan = DeviceBinding::default();
        assert_eq!(orphan.classify(Some(100)), None);
    }

    #[test]
    fn publish_mirrors_gen_into_the_arena() {
        let arena = Arc::new(Arena::anonymous(1 << 16, 1 << 16).unwrap());
        let cp: CpConfig<TestBuffer> = CpConfig::new(Arc::clone(&arena));
        assert_eq!(cp.generation(), 0);

        let mut generation = ConfigGen::empty();
        generation.r#gen = 3;
        cp.publish(generation);
        assert_eq!(cp.generation(), 3);
        assert_eq!(arena.dp().generation().load(Ordering::Acquire), 3);
    }
}
