// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::front::PacketFront;
use arena::MemoryContext;
use net::buffer::PacketBufferMut;
use stats::{CounterRegistry, StatsError};
use std::any::Any;
use std::sync::Arc;

/// Per-invocation context a module handler receives.
#[derive(Debug, Clone, Copy)]
pub struct ModuleCtx<'a> {
    /// Index of the invoking worker, for counter slot selection.
    pub worker_idx: usize,
    /// Coarse monotonic milliseconds, sampled once per worker iteration.
    pub now_ms: u64,
    /// The counter registry backing this instance's counters.
    pub counters: &'a CounterRegistry,
}

/// A packet-processing module instance.
///
/// Instances are immutable once published inside a configuration
/// generation; all mutable state (session tables, counters) is interior
/// and safe for the per-worker invocation pattern.
///
/// The `Any` supertrait lets a factory recover its own concrete type from
/// the previous generation's instance and carry live state (session
/// tables) across a reconfiguration.
pub trait Module<Buf: PacketBufferMut>: Any + Send + Sync {
    /// The module type name this instance was built from.
    fn kind(&self) -> &'static str;

    /// Process one packet front. Every packet in `front.input` must end up
    /// in exactly one of output, drop or bypass.
    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront<Buf>);

    /// Called by each worker at its loop-iteration boundary; stateful
    /// modules drain epoch protocols here (session-table generations).
    fn end_of_iteration(&self, worker_idx: usize) {
        let _ = worker_idx;
    }
}

/// What a factory gets to work with while building an instance.
#[derive(Debug, Clone, Copy)]
pub struct BuildCtx<'a> {
    /// Registry for the instance's counter blocks.
    pub counters: &'a CounterRegistry,
    /// Control-plane memory context for arena-resident payloads.
    pub memory: &'a MemoryContext,
    /// Worker count of the topology.
    pub workers: usize,
}

/// Instance construction failure; the previous generation stays live.
#[derive(Debug, thiserror::Error)]
pub enum ModuleBuildError {
    /// Raw config bytes did not parse.
    #[error("config parse failed: {0}")]
    Parse(String),
    /// A config value failed semantic validation.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Counter registration failed.
    #[error(transparent)]
    Counters(#[from] StatsError),
    /// Arena exhausted while building the payload.
    #[error("arena allocation failed")]
    Allocation,
}

/// Builder of module instances from raw configuration bytes.
pub trait ModuleFactory<Buf: PacketBufferMut>: Send + Sync {
    /// The module type name instances answer to.
    fn kind(&self) -> &'static str;

    /// Build an instance named `name` from `raw` bytes.
    ///
    /// The factory owns diffing against `old` and may return the existing
    /// instance unchanged when the bytes describe it already.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleBuildError`]; the caller keeps the old generation.
    fn build(
        &self,
        ctx: &BuildCtx<'_>,
        name: &str,
        raw: &[u8],
        old: Option<&Arc<dyn Module<Buf>>>,
    ) -> Result<Arc<dyn Module<Buf>>, ModuleBuildError>;
}
