// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The control-plane agent.
//!
//! Builds configuration generations from a declarative [`GenSpec`]:
//! module instances through their factories (handing each factory the
//! previous instance for diffing), pipelines resolved against the new
//! module registry, and per-device classification maps. Publication is a
//! single release store; [`ControlAgent::await_adoption`] then watches
//! worker iteration counters until every worker has run two full
//! iterations under the new generation, at which point the superseded
//! generation's last references unwind on their own.

use crate::generation::{ConfigGen, CpConfig, DeviceBinding};
use crate::worker::WorkerStatus;
use arena::MemoryContext;
use balancer::BalancerFactory;
use nat64::Nat64Factory;
use net::DeviceId;
use net::buffer::PacketBufferMut;
use pipeline::modules::{DecapFactory, ForwardFactory, RouteFactory};
use pipeline::{BuildCtx, ModuleBuildError, ModuleFactory, Pipeline, StageRef};
use serde::Deserialize;
use stats::CounterRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One module instance to build.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    /// Module type name (`forward`, `route`, `decap`, `balancer`,
    /// `nat64`, or anything registered).
    pub kind: String,
    /// Instance name within the type.
    pub name: String,
    /// Module-specific payload, handed to the factory as YAML bytes.
    #[serde(default)]
    pub config: serde_yaml_ng::Value,
}

/// One pipeline: an ordered list of `(kind, instance)` stage references.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name, referenced by device bindings.
    pub name: String,
    /// Stages in dispatch order.
    pub stages: Vec<(String, String)>,
}

/// Classification for one device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    /// Device id (topology order).
    pub device: u16,
    /// Pipeline per VLAN id.
    #[serde(default)]
    pub vlans: HashMap<u16, String>,
    /// Pipeline for untagged traffic and unmapped VLANs.
    #[serde(default)]
    pub default: Option<String>,
}

/// A whole generation, declaratively.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenSpec {
    /// Module instances.
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    /// Pipelines over those instances.
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
    /// Device classification maps.
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

impl GenSpec {
    /// Parse a spec from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Spec`] when the YAML does not parse.
    pub fn from_yaml(raw: &str) -> Result<Self, ControlError> {
        serde_yaml_ng::from_str(raw).map_err(|e| ControlError::Spec(e.to_string()))
    }
}

/// Why a generation could not be built; the previous one stays live.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The spec itself did not parse.
    #[error("bad generation spec: {0}")]
    Spec(String),
    /// A module kind nobody registered.
    #[error("unknown module kind '{0}'")]
    UnknownModule(String),
    /// A factory rejected its configuration.
    #[error("module '{kind}:{name}': {source}")]
    Module {
        /// Module type name.
        kind: String,
        /// Instance name.
        name: String,
        /// The factory's failure.
        source: ModuleBuildError,
    },
    /// A pipeline stage referencing an unbuilt instance.
    #[error("pipeline '{pipeline}' references unknown stage '{kind}:{name}'")]
    UnresolvedStage {
        /// Pipeline name.
        pipeline: String,
        /// Referenced module type.
        kind: String,
        /// Referenced instance.
        name: String,
    },
    /// A device binding referencing an unknown pipeline.
    #[error("device {device} references unknown pipeline '{pipeline}'")]
    UnknownPipeline {
        /// Device id.
        device: u16,
        /// Dangling pipeline name.
        pipeline: String,
    },
    /// A device id outside the topology.
    #[error("device id {0} is not in the topology")]
    BadDevice(u16),
}

/// The control-plane side of the configuration root.
pub struct ControlAgent<Buf: PacketBufferMut> {
    factories: HashMap<String, Box<dyn ModuleFactory<Buf>>>,
    cp: Arc<CpConfig<Buf>>,
    memory: Arc<MemoryContext>,
    counters: Arc<CounterRegistry>,
    statuses: Vec<Arc<WorkerStatus>>,
    device_count: usize,
}

impl<Buf: PacketBufferMut + 'static> ControlAgent<Buf> {
    /// An agent with the in-tree factories registered.
    #[must_use]
    pub fn with_default_factories(
        cp: Arc<CpConfig<Buf>>,
        memory: Arc<MemoryContext>,
        counters: Arc<CounterRegistry>,
        statuses: Vec<Arc<WorkerStatus>>,
        device_count: usize,
    ) -> Self {
        let mut agent = Self {
            factories: HashMap::new(),
            cp,
            memory,
            counters,
            statuses,
            device_count,
        };
        agent.register_factory(Box::new(ForwardFactory));
        agent.register_factory(Box::new(RouteFactory));
        agent.register_factory(Box::new(DecapFactory));
        agent.register_factory(Box::new(BalancerFactory));
        agent.register_factory(Box::new(Nat64Factory));
        agent
    }

    /// Register an additional module factory; replaces any previous one
    /// of the same kind.
    pub fn register_factory(&mut self, factory: Box<dyn ModuleFactory<Buf>>) {
        let kind = factory.kind().to_owned();
        self.factories.insert(kind, factory);
    }

    /// Build and publish a new generation from `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`]; on any failure the previous generation
    /// remains published and partially built instances unwind.
    pub fn apply(&self, spec: &GenSpec) -> Result<u64, ControlError> {
        let previous = self.cp.current();
        let build_ctx = BuildCtx {
            counters: &self.counters,
            memory: &self.memory,
            workers: self.statuses.len(),
        };

        let mut modules: HashMap<(String, String), _> = HashMap::new();
        for module_spec in &spec.modules {
            let factory = self
                .factories
                .get(&module_spec.kind)
                .ok_or_else(|| ControlError::UnknownModule(module_spec.kind.clone()))?;
            let raw = if module_spec.config.is_null() {
                // an omitted payload means "all defaults"
                "{}".to_owned()
            } else {
                serde_yaml_ng::to_string(&module_spec.config)
                    .map_err(|e| ControlError::Spec(e.to_string()))?
            };
            let key = (module_spec.kind.clone(), module_spec.name.clone());
            let old = previous.modules.get(&key);
            let built = factory
                .build(&build_ctx, &module_spec.name, raw.as_bytes(), old)
                .map_err(|source| ControlError::Module {
                    kind: module_spec.kind.clone(),
                    name: module_spec.name.clone(),
                    source,
                })?;
            debug!(kind = %module_spec.kind, name = %module_spec.name, "module instance built");
            modules.insert(key, built);
        }

        let mut pipelines = Vec::with_capacity(spec.pipelines.len());
        for pipeline_spec in &spec.pipelines {
            let mut stages = Vec::with_capacity(pipeline_spec.stages.len());
            for (kind, name) in &pipeline_spec.stages {
                let module = modules
                    .get(&(kind.clone(), name.clone()))
                    .ok_or_else(|| ControlError::UnresolvedStage {
                        pipeline: pipeline_spec.name.clone(),
                        kind: kind.clone(),
                        name: name.clone(),
                    })?;
                stages.push(StageRef {
                    kind: kind.clone(),
                    name: name.clone(),
                    module: Arc::clone(module),
                });
            }
            pipelines.push((pipeline_spec.name.clone(), Arc::new(Pipeline::new(stages))));
        }

        let mut devices = HashMap::new();
        for device_spec in &spec.devices {
            if usize::from(device_spec.device) >= self.device_count {
                return Err(ControlError::BadDevice(device_spec.device));
            }
            let resolve = |name: &str| {
                pipelines
                    .iter()
                    .position(|(n, _)| n == name)
                    .ok_or_else(|| ControlError::UnknownPipeline {
                        device: device_spec.device,
                        pipeline: name.to_owned(),
                    })
            };
            let mut binding = DeviceBinding::default();
            for (vlan, pipeline_name) in &device_spec.vlans {
                binding.vlans.insert(*vlan, resolve(pipeline_name)?);
            }
            binding.default = device_spec
                .default
                .as_deref()
                .map(resolve)
                .transpose()?;
            devices.insert(DeviceId(device_spec.device), binding);
        }

        let generation = ConfigGen {
            r#gen: previous.r#gen + 1,
            modules,
            pipelines,
            devices,
        };
        let r#gen = generation.r#gen;
        self.cp.publish(generation);
        Ok(r#gen)
    }

    /// Wait until every worker has completed two full iterations while
    /// observing generation `r#gen` or later. Returns false on timeout
    /// (workers not running, or wedged).
    #[must_use]
    pub fn await_adoption(&self, r#gen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let base: Vec<u64> = self
            .statuses
            .iter()
            .map(|s| s.iterations.load(Ordering::Acquire))
            .collect();
        loop {
            let adopted = self.statuses.iter().zip(&base).all(|(status, &before)| {
                status.r#gen.load(Ordering::Acquire) >= r#gen
                    && status.iterations.load(Ordering::Acquire) >= before + 2
            });
            if adopted {
                info!(r#gen, "generation adopted by all workers");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(r#gen, "generation adoption timed out");
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// The published generation number.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.cp.generation()
    }
}
