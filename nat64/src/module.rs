// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::config::Nat64Config;
use crate::tables::Nat64Tables;
use crate::translate::{DropClass, Limits, Verdict, translate_4to6, translate_6to4};
use net::buffer::PacketBufferMut;
use net::packet::L3Kind;
use pipeline::{BuildCtx, Module, ModuleBuildError, ModuleCtx, ModuleFactory, PacketFront};
use stats::{CounterHandle, bump};
use std::sync::Arc;
use tracing::trace;

/// Counter layout, one word per class.
const COUNTERS: usize = 7;
const TRANSLATED_4TO6: usize = 0;
const TRANSLATED_6TO4: usize = 1;
const PASSED: usize = 2;
const UNKNOWN_MAPPING: usize = 3;
const UNKNOWN_PREFIX: usize = 4;
const UNTRANSLATABLE: usize = 5;
const MALFORMED: usize = 6;

/// The NAT64 module instance.
pub struct Nat64Module {
    tables: Nat64Tables,
    limits: Limits,
    counters: CounterHandle,
}

impl Nat64Module {
    /// Module type name.
    pub const KIND: &'static str = "nat64";

    /// The lookup tables, for invariant checks and operator inspection.
    #[must_use]
    pub fn tables(&self) -> &Nat64Tables {
        &self.tables
    }
}

impl<Buf: PacketBufferMut> Module<Buf> for Nat64Module {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront<Buf>) {
        let slots = ctx.counters.slots(self.counters, ctx.worker_idx);
        for mut packet in front.take_input() {
            let verdict = match packet.headers().l3 {
                L3Kind::Ipv4 => translate_4to6(&mut packet, &self.tables, self.limits),
                L3Kind::Ipv6 => translate_6to4(&mut packet, &self.tables, self.limits),
            };
            match verdict {
                Verdict::Translated => {
                    let word = match packet.headers().l3 {
                        L3Kind::Ipv6 => TRANSLATED_4TO6,
                        L3Kind::Ipv4 => TRANSLATED_6TO4,
                    };
                    bump(slots, word);
                    front.output(packet);
                }
                Verdict::PassThrough => {
                    bump(slots, PASSED);
                    front.output(packet);
                }
                Verdict::Drop(class) => {
                    trace!(?class, "translation dropped packet");
                    let word = match class {
                        DropClass::UnknownMapping => UNKNOWN_MAPPING,
                        DropClass::UnknownPrefix => UNKNOWN_PREFIX,
                        DropClass::Untranslatable => UNTRANSLATABLE,
                        DropClass::Malformed => MALFORMED,
                    };
                    bump(slots, word);
                    front.drop(packet);
                }
            }
        }
    }
}

/// Factory for [`Nat64Module`].
#[derive(Debug, Default)]
pub struct Nat64Factory;

impl<Buf: PacketBufferMut> ModuleFactory<Buf> for Nat64Factory {
    fn kind(&self) -> &'static str {
        Nat64Module::KIND
    }

    fn build(
        &self,
        ctx: &BuildCtx<'_>,
        name: &str,
        raw: &[u8],
        _old: Option<&Arc<dyn Module<Buf>>>,
    ) -> Result<Arc<dyn Module<Buf>>, ModuleBuildError> {
        let config: Nat64Config = serde_yaml_ng::from_slice(raw)
            .map_err(|e| ModuleBuildError::Parse(e.to_string()))?;
        let tables =
            Nat64Tables::build(&config).map_err(|e| ModuleBuildError::Invalid(e.to_string()))?;
        let counters = ctx
            .counters
            .register(&format!("{}.{name}", Nat64Module::KIND), COUNTERS)?;
        Ok(Arc::new(Nat64Module {
            tables,
            limits: Limits {
                ipv6_mtu: config.ipv6_mtu,
                ipv4_mtu: config.ipv4_mtu,
                drop_unknown_prefix: config.drop_unknown_prefix,
                drop_unknown_mapping: config.drop_unknown_mapping,
            },
            counters,
        }))
    }
}
