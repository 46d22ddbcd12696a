// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Configuration load or validation failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The YAML did not deserialize.
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    /// No NUMA instances declared.
    #[error("at least one instance is required")]
    NoInstances,
    /// No devices declared.
    #[error("at least one device is required")]
    NoDevices,
    /// An instance half with zero bytes.
    #[error("instance {numa_id}: dp_memory and cp_memory must be non-zero")]
    ZeroMemory {
        /// NUMA id of the offending instance.
        numa_id: u32,
    },
    /// Duplicate NUMA instance.
    #[error("duplicate instance numa_id {numa_id}")]
    DuplicateInstance {
        /// NUMA id declared twice.
        numa_id: u32,
    },
    /// Duplicate device port name.
    #[error("duplicate device port_name '{port_name}'")]
    DuplicateDevice {
        /// Port name declared twice.
        port_name: String,
    },
    /// A device without workers cannot forward.
    #[error("device '{port_name}' declares no workers")]
    NoWorkers {
        /// Offending device.
        port_name: String,
    },
    /// A worker referencing an unknown instance.
    #[error("device '{port_name}': worker instance_id {instance_id} is not declared")]
    UnknownInstance {
        /// Offending device.
        port_name: String,
        /// Dangling instance reference.
        instance_id: u32,
    },
    /// A queue length that is not a power of two.
    #[error("device '{port_name}': queue length {len} is not a power of two")]
    QueueLenNotPowerOfTwo {
        /// Offending device.
        port_name: String,
        /// Bad length.
        len: u32,
    },
    /// A worker pinned to a CPU the host does not have.
    #[error("device '{port_name}': core_id {core_id} exceeds the {available} host cores")]
    CoreOutOfRange {
        /// Offending device.
        port_name: String,
        /// Requested core.
        core_id: u32,
        /// Cores the host exposes.
        available: usize,
    },
    /// Two workers pinned to the same CPU; busy-poll loops never share.
    #[error("core_id {core_id} is pinned by more than one worker")]
    DuplicateCore {
        /// Core claimed twice.
        core_id: u32,
    },
    /// A connection endpoint referencing an unknown device.
    #[error("connection {src_device_id} -> {dst_device_id}: unknown device id")]
    DanglingConnection {
        /// Source device id.
        src_device_id: u16,
        /// Destination device id.
        dst_device_id: u16,
    },
    /// A connection from a device to itself.
    #[error("connection {device_id} -> {device_id}: self-connections are implicit")]
    SelfConnection {
        /// Offending device id.
        device_id: u16,
    },
    /// A MAC address string that does not parse.
    #[error("bad mac address '{0}'")]
    BadMacAddr(String),
}

/// Log verbosity, lowest to highest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Development noise.
    Debug,
    /// Operational messages.
    #[default]
    Info,
    /// Degradations.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// The level as a tracing filter directive.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// A MAC address, serialized as `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut mac = [0u8; 6];
        let mut parts = input.split(':');
        for byte in &mut mac {
            let part = parts
                .next()
                .ok_or_else(|| ConfigError::BadMacAddr(input.to_owned()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ConfigError::BadMacAddr(input.to_owned()))?;
        }
        if parts.next().is_some() {
            return Err(ConfigError::BadMacAddr(input.to_owned()));
        }
        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One NUMA instance: an arena split into DP and CP halves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// NUMA node this instance is pinned to.
    pub numa_id: u32,
    /// Bytes of the data-plane arena half.
    pub dp_memory: usize,
    /// Bytes of the control-plane arena half.
    pub cp_memory: usize,
}

/// One worker placement on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// CPU the worker thread is pinned to.
    pub core_id: u32,
    /// Instance (arena) the worker belongs to.
    pub instance_id: u32,
    /// RX queue depth.
    #[serde(default = "default_queue_len")]
    pub rx_queue_len: u32,
    /// TX queue depth.
    #[serde(default = "default_queue_len")]
    pub tx_queue_len: u32,
}

fn default_queue_len() -> u32 {
    4096
}

fn default_mtu() -> u32 {
    1500
}

fn default_max_lro() -> u32 {
    0
}

/// One forwarding device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Driver-specific port identifier; a `virtio_user_` prefix selects a
    /// virtual device.
    pub port_name: String,
    /// Station MAC.
    pub mac_addr: MacAddr,
    /// Interface MTU.
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Maximum aggregated LRO packet size; zero disables LRO.
    #[serde(default = "default_max_lro")]
    pub max_lro_packet_size: u32,
    /// RSS hash-function bitmask handed to the driver.
    #[serde(default)]
    pub rss_hash: u64,
    /// Worker placements; one RX and one TX queue each.
    pub workers: Vec<WorkerConfig>,
}

impl DeviceConfig {
    /// True for virtual (in-memory) devices.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.port_name.starts_with("virtio_user_")
    }
}

/// A requested pipe mesh between two devices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Source device id (index into `devices`).
    pub src_device_id: u16,
    /// Destination device id (index into `devices`).
    pub dst_device_id: u16,
}

/// The whole boot-time topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Path of the huge-page backed arena file.
    pub storage: PathBuf,
    /// Bytes reserved for the driver's own allocator.
    #[serde(default)]
    pub dpdk_memory: usize,
    /// Log verbosity.
    #[serde(default)]
    pub loglevel: LogLevel,
    /// NUMA instances.
    pub instances: Vec<InstanceConfig>,
    /// Forwarding devices.
    pub devices: Vec<DeviceConfig>,
    /// Cross-device pipe mesh.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl TopologyConfig {
    /// Load and validate a topology file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on i/o, parse or validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&raw)?;
        info!(
            path = %path.display(),
            devices = config.devices.len(),
            instances = config.instances.len(),
            "loaded topology"
        );
        Ok(config)
    }

    /// Parse and validate YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: TopologyConfig = serde_yaml_ng::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-reference validation against this host's core count.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_for_host(host_core_count())
    }

    /// Cross-reference validation against an explicit core budget;
    /// [`TopologyConfig::validate`] feeds it the running host's count.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate_for_host(&self, available_cores: usize) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::NoInstances);
        }
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut numa_seen = std::collections::HashSet::new();
        for instance in &self.instances {
            if instance.dp_memory == 0 || instance.cp_memory == 0 {
                return Err(ConfigError::ZeroMemory {
                    numa_id: instance.numa_id,
                });
            }
            if !numa_seen.insert(instance.numa_id) {
                return Err(ConfigError::DuplicateInstance {
                    numa_id: instance.numa_id,
                });
            }
        }

        let mut names = std::collections::HashSet::new();
        let mut cores_seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !names.insert(device.port_name.as_str()) {
                return Err(ConfigError::DuplicateDevice {
                    port_name: device.port_name.clone(),
                });
            }
            if device.workers.is_empty() {
                return Err(ConfigError::NoWorkers {
                    port_name: device.port_name.clone(),
                });
            }
            for worker in &device.workers {
                if !self
                    .instances
                    .iter()
                    .any(|i| i.numa_id == worker.instance_id)
                {
                    return Err(ConfigError::UnknownInstance {
                        port_name: device.port_name.clone(),
                        instance_id: worker.instance_id,
                    });
                }
                let in_range =
                    usize::try_from(worker.core_id).is_ok_and(|core| core < available_cores);
                if !in_range {
                    return Err(ConfigError::CoreOutOfRange {
                        port_name: device.port_name.clone(),
                        core_id: worker.core_id,
                        available: available_cores,
                    });
                }
                if !cores_seen.insert(worker.core_id) {
                    return Err(ConfigError::DuplicateCore {
                        core_id: worker.core_id,
                    });
                }
                for len in [worker.rx_queue_len, worker.tx_queue_len] {
                    if !len.is_power_of_two() {
                        return Err(ConfigError::QueueLenNotPowerOfTwo {
                            port_name: device.port_name.clone(),
                            len,
                        });
                    }
                }
            }
        }

        let device_count = self.devices.len();
        for conn in &self.connections {
            if usize::from(conn.src_device_id) >= device_count
                || usize::from(conn.dst_device_id) >= device_count
            {
                return Err(ConfigError::DanglingConnection {
                    src_device_id: conn.src_device_id,
                    dst_device_id: conn.dst_device_id,
                });
            }
            if conn.src_device_id == conn.dst_device_id {
                return Err(ConfigError::SelfConnection {
                    device_id: conn.src_device_id,
                });
            }
        }
        Ok(())
    }
}

fn host_core_count() -> usize {
    // a host that cannot report its core count gets no range check
    std::thread::available_parallelism().map_or(usize::MAX, |cores| cores.get())
}
