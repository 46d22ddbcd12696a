// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! L2 forward module: map a packet's VLAN onto an egress device.

use crate::front::PacketFront;
use crate::module::{BuildCtx, Module, ModuleBuildError, ModuleCtx, ModuleFactory};
use net::DeviceId;
use net::buffer::PacketBufferMut;
use serde::Deserialize;
use stats::{CounterHandle, bump};
use std::collections::HashMap;
use std::sync::Arc;

/// Counter layout: `[forwarded, no_mapping]`.
const COUNTERS: usize = 2;
const FORWARDED: usize = 0;
const NO_MAPPING: usize = 1;

/// Raw configuration of one forward instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForwardConfig {
    /// Egress device for untagged (and unmapped-VLAN) traffic.
    pub default_device: Option<u16>,
    /// Per-VLAN egress device overrides.
    #[serde(default)]
    pub vlans: HashMap<u16, u16>,
}

/// The forward module instance.
pub struct ForwardModule {
    default_device: Option<DeviceId>,
    vlans: HashMap<u16, DeviceId>,
    counters: CounterHandle,
}

impl ForwardModule {
    /// Module type name.
    pub const KIND: &'static str = "forward";

    fn target(&self, vlan: Option<u16>) -> Option<DeviceId> {
        vlan.and_then(|v| self.vlans.get(&v).copied())
            .or(self.default_device)
    }
}

impl<Buf: PacketBufferMut> Module<Buf> for ForwardModule {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront<Buf>) {
        let slots = ctx.counters.slots(self.counters, ctx.worker_idx);
        for mut packet in front.take_input() {
            match self.target(packet.headers().vlan) {
                Some(device) => {
                    packet.meta_mut().tx_device = device;
                    bump(slots, FORWARDED);
                    front.output(packet);
                }
                None => {
                    bump(slots, NO_MAPPING);
                    front.drop(packet);
                }
            }
        }
    }
}

/// Factory for [`ForwardModule`].
#[derive(Debug, Default)]
pub struct ForwardFactory;

impl<Buf: PacketBufferMut> ModuleFactory<Buf> for ForwardFactory {
    fn kind(&self) -> &'static str {
        ForwardModule::KIND
    }

    fn build(
        &self,
        ctx: &BuildCtx<'_>,
        name: &str,
        raw: &[u8],
        _old: Option<&Arc<dyn Module<Buf>>>,
    ) -> Result<Arc<dyn Module<Buf>>, ModuleBuildError> {
        let config: ForwardConfig = serde_yaml_ng::from_slice(raw)
            .map_err(|e| ModuleBuildError::Parse(e.to_string()))?;
        let counters = ctx
            .counters
            .register(&format!("{}.{name}", ForwardModule::KIND), COUNTERS)?;
        Ok(Arc::new(ForwardModule {
            default_device: config.default_device.map(DeviceId),
            vlans: config
                .vlans
                .into_iter()
                .map(|(vlan, dev)| (vlan, DeviceId(dev)))
                .collect(),
            counters,
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::{build_ctx, module_ctx, parse};
    use net::test_utils::{udp_v4_frame, vlan_tagged};
    use pretty_assertions::assert_eq;

    #[test]
    fn vlan_mapping_with_default_fallback() {
        let (counters, memory) = build_ctx();
        let ctx = BuildCtx {
            counters: &counters,
            memory: &memory,
            workers: 1,
        };
        let module = <ForwardFactory as ModuleFactory<net::buffer::TestBuffer>>::build(
            &ForwardFactory,
            &ctx,
            "f0",
            b"default_device: 1\nvlans: { 100: 2 }\n",
            None,
        )
        .unwrap();

        let plain = udp_v4_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, b"x");
        let tagged = vlan_tagged(100, &plain);
        let unknown_tag = vlan_tagged(200, &plain);

        let mut front = PacketFront::new(vec![
            parse(&plain),
            parse(&tagged),
            parse(&unknown_tag),
        ]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        let devices: Vec<u16> = front.output.iter().map(|p| p.meta().tx_device.0).collect();
        // untagged and unmapped VLAN both land on the default device
        assert_eq!(devices, vec![1, 2, 1]);
        let h = counters.handle("forward.f0").unwrap();
        assert_eq!(counters.total(h, FORWARDED), 3);
    }

    #[test]
    fn no_mapping_drops() {
        let (counters, memory) = build_ctx();
        let ctx = BuildCtx {
            counters: &counters,
            memory: &memory,
            workers: 1,
        };
        let module = <ForwardFactory as ModuleFactory<net::buffer::TestBuffer>>::build(
            &ForwardFactory,
            &ctx,
            "f1",
            b"vlans: { 100: 2 }\n",
            None,
        )
        .unwrap();

        let plain = udp_v4_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, b"x");
        let mut front = PacketFront::new(vec![parse(&plain)]);
        front.advance();
        module.handle(&module_ctx(&counters), &mut front);

        assert!(front.output.is_empty());
        assert_eq!(front.drop.len(), 1);
        let h = counters.handle("forward.f1").unwrap();
        assert_eq!(counters.total(h, NO_MAPPING), 1);
    }
}
