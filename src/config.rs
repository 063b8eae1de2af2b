use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Worker count used when a pool is created without an explicit size.
pub const DEFAULT_THREAD_COUNT: usize = 3;

/// Which logical CPUs belong to which core class.
///
/// The topology is configured, not discovered. The default matches a
/// Snapdragon 8 Gen 2 style layout: CPUs 0-3 are efficiency cores and
/// CPUs 4-7 are performance cores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreTopology {
    /// Logical CPU indices of the high-performance cores.
    pub performance: Vec<usize>,
    /// Logical CPU indices of the low-power cores.
    pub efficiency: Vec<usize>,
}

impl Default for CoreTopology {
    fn default() -> Self {
        Self {
            performance: (4..8).collect(),
            efficiency: (0..4).collect(),
        }
    }
}

impl CoreTopology {
    /// Logs a warning for every suspicious entry in the topology.
    ///
    /// Nothing here is fatal: pinning to a CPU the machine does not have
    /// simply fails later and the thread stays unconstrained.
    pub fn validate(&self) {
        let cpus = num_cpus::get();
        for &cpu in self.performance.iter().chain(&self.efficiency) {
            if cpu >= cpus {
                warn!("Configured CPU {} exceeds the {} logical CPUs available", cpu, cpus);
            }
        }
        if self.performance.is_empty() {
            warn!("No performance cores configured, workers will not be pinned");
        }
        for cpu in &self.performance {
            if self.efficiency.contains(cpu) {
                warn!("CPU {} is configured as both performance and efficiency core", cpu);
            }
        }
    }
}

/// Configuration of a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. Must be at least 1.
    pub threads: usize,
    /// Pin workers to the performance cores. When false the no-op
    /// affinity backend is selected.
    pub pin_workers: bool,
    /// Core layout of the target machine.
    pub topology: CoreTopology,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREAD_COUNT,
            pin_workers: true,
            topology: CoreTopology::default(),
        }
    }
}

impl PoolConfig {
    /// Default configuration with the given worker count.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
