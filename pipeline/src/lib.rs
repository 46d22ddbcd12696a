// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # Pipelines and the module ABI
//!
//! A pipeline is an ordered list of module instances applied to a batch of
//! packets sharing a classification. The batch travels as a
//! [`PacketFront`]: the `{input, output, drop, bypass}` quadruple. Before
//! each stage the previous stage's output becomes the new input; a module
//! must place every input packet into exactly one of `output`, `drop` or
//! `bypass`. Bypass packets leave the pipeline immediately and join the
//! worker-level output untouched by later stages.
//!
//! Modules implement [`Module`]; the control plane builds instances
//! through a [`ModuleFactory`] which owns diffing raw config bytes against
//! the previous instance. Three stateless modules live in [`modules`]:
//! `forward`, `route` and `decap`.

mod front;
mod module;
pub mod modules;
mod pipe_chain;
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support;

pub use front::PacketFront;
pub use module::{BuildCtx, Module, ModuleBuildError, ModuleCtx, ModuleFactory};
pub use pipe_chain::{Pipeline, PipelineOutcome, StageRef};
