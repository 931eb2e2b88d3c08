//! # Configuration Management
//!
//! Handles all configuration for Strata components. Durations are written as
//! integer milliseconds in configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lifecycle: LifecycleConfig,
    pub merge_budget: MergeBudgetConfig,
    pub solver: SolverConfig,
    pub orchestrator: OrchestratorConfig,
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Load configuration from a JSON file; missing sections take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Configuration {
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let solver = &self.solver;
        if solver.initial_solvers == 0 {
            return Err(Error::Configuration {
                message: "solver.initial_solvers must be at least 1".into(),
            });
        }
        if solver.max_number_of_solvers < solver.initial_solvers {
            return Err(Error::Configuration {
                message: format!(
                    "solver.max_number_of_solvers ({}) < solver.initial_solvers ({})",
                    solver.max_number_of_solvers, solver.initial_solvers
                ),
            });
        }
        if solver.max_concurrent_attempts == 0 {
            return Err(Error::Configuration {
                message: "solver.max_concurrent_attempts must be at least 1".into(),
            });
        }
        if self.lifecycle.rebuild_batch_size == 0 {
            return Err(Error::Configuration {
                message: "lifecycle.rebuild_batch_size must be at least 1".into(),
            });
        }
        for (name, pool) in [
            ("persistent", &self.merge_budget.persistent),
            ("transient", &self.merge_budget.transient),
        ] {
            if pool.cap <= 0 || pool.max_overage < 0 {
                return Err(Error::Configuration {
                    message: format!(
                        "merge_budget.{}: cap must be positive and max_overage non-negative",
                        name
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Partition lifecycle and maintenance task configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    #[serde(with = "duration_ms")]
    pub bootstrap_delay: Duration,
    #[serde(with = "duration_ms")]
    pub rebuild_delay: Duration,
    #[serde(with = "duration_ms")]
    pub sip_migrate_delay: Duration,
    /// Ingress older than this marks the partition inactive
    #[serde(with = "duration_ms")]
    pub topology_staleness: Duration,
    pub rebuild_batch_size: usize,
    /// Index size at which an online memory partition migrates to disk
    pub migration_threshold_bytes: u64,
    /// Let queries read partitions that are still rebuilding
    pub tolerate_rebuilding_reads: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            bootstrap_delay: Duration::from_secs(1),
            rebuild_delay: Duration::from_millis(250),
            sip_migrate_delay: Duration::from_secs(5),
            topology_staleness: Duration::from_secs(3600),
            rebuild_batch_size: 1000,
            migration_threshold_bytes: 64 * 1024 * 1024, // 64MB
            tolerate_rebuilding_reads: false,
        }
    }
}

/// Merge chit pools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeBudgetConfig {
    pub persistent: MergePoolConfig,
    pub transient: MergePoolConfig,
}

impl Default for MergeBudgetConfig {
    fn default() -> Self {
        Self {
            persistent: MergePoolConfig {
                cap: 10_000,
                max_overage: 1_000,
            },
            transient: MergePoolConfig {
                cap: 100_000,
                max_overage: 10_000,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MergePoolConfig {
    pub cap: i64,
    pub max_overage: i64,
}

/// Replica solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub initial_solvers: usize,
    pub max_number_of_solvers: usize,
    /// Escalation interval used when no latency history is available
    #[serde(with = "duration_ms")]
    pub default_escalation: Duration,
    /// Size of the shared worker pool for replica attempts
    pub max_concurrent_attempts: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            initial_solvers: 1,
            max_number_of_solvers: 3,
            default_escalation: Duration::from_millis(100),
            max_concurrent_attempts: 256,
        }
    }
}

/// Cross-partition orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(with = "duration_ms")]
    pub default_partition_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub global_timeout: Duration,
    /// Collect the per-query diagnostic log
    pub log_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_partition_timeout: Duration::from_millis(100),
            global_timeout: Duration::from_secs(10),
            log_enabled: true,
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
