// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::front::PacketFront;
use crate::module::{Module, ModuleCtx};
use net::buffer::PacketBufferMut;
use net::packet::Packet;
use std::sync::Arc;
use tracing::trace;

/// One resolved stage: a `(module, instance)` reference.
#[derive(Clone)]
pub struct StageRef<Buf: PacketBufferMut> {
    /// Module type name.
    pub kind: String,
    /// Instance name within the type.
    pub name: String,
    /// The instance itself.
    pub module: Arc<dyn Module<Buf>>,
}

impl<Buf: PacketBufferMut> std::fmt::Debug for StageRef<Buf> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// What a pipeline pass produced.
#[derive(Debug)]
pub struct PipelineOutcome<Buf: PacketBufferMut> {
    /// Forward further: last stage's output plus everything bypassed.
    pub output: Vec<Packet<Buf>>,
    /// To be counted and freed by the worker.
    pub dropped: Vec<Packet<Buf>>,
}

/// An ordered list of module instances.
#[derive(Debug, Clone, Default)]
pub struct Pipeline<Buf: PacketBufferMut> {
    stages: Vec<StageRef<Buf>>,
}

impl<Buf: PacketBufferMut + 'static> Pipeline<Buf> {
    /// A pipeline over the given stages.
    #[must_use]
    pub fn new(stages: Vec<StageRef<Buf>>) -> Self {
        Self { stages }
    }

    /// The resolved stages, in order.
    #[must_use]
    pub fn stages(&self) -> &[StageRef<Buf>] {
        &self.stages
    }

    /// Run a batch through the chain.
    ///
    /// Packets bypassing at stage `k` skip stages `k+1..`; their relative
    /// order among themselves is preserved.
    #[must_use]
    pub fn process(&self, ctx: &ModuleCtx<'_>, packets: Vec<Packet<Buf>>) -> PipelineOutcome<Buf> {
        let mut front = PacketFront::new(packets);
        let mut bypassed = Vec::new();
        for stage in &self.stages {
            if front.output.is_empty() {
                break;
            }
            front.advance();
            stage.module.handle(ctx, &mut front);
            debug_assert!(
                front.input.is_empty(),
                "{stage:?} left packets in the input list"
            );
            if !front.bypass.is_empty() {
                trace!(
                    stage = %stage.name,
                    count = front.bypass.len(),
                    "packets bypassed pipeline tail"
                );
                bypassed.append(&mut front.bypass);
            }
        }
        let mut output = front.output;
        output.append(&mut bypassed);
        PipelineOutcome {
            output,
            dropped: front.drop,
        }
    }
}
