//! Stress-test configuration document.
//!
//! Everything a worker needs to set up one test stage, as plain JSON:
//!
//! ```json
//! {
//!     "num_threads": 16,
//!     "duration_ms": 60000,
//!     "num_keys": 10000,
//!     "operations": {
//!         "GET": { "invocations": 8, "interval": 1 },
//!         "PUT": { "invocations": 2, "interval": 1 }
//!     },
//!     "statistics": {
//!         "type": "periodic",
//!         "period": 1000,
//!         "operation_stats": { "type": "histogram", "digits": 3 }
//!     }
//! }
//! ```
//!
//! Variant names are resolved while deserializing, so a bad document fails
//! before any stressor starts.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::histogram::{DEFAULT_DIGITS, DEFAULT_MAX_VALUE},
    conversation::Conversation,
    error::{ConfigError, StatsError},
    executor::StressorPoolExecutor,
    operation::{Operation, OperationRegistry},
    range::Range,
    selector::SchedulingSelector,
    stats::{BasicStatistics, OperationStats, PeriodicStatistics, Statistics},
};

/// Rate of one operation: `invocations` per `interval` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationSetting {
    #[serde(default)]
    pub invocations: i64,
    #[serde(default = "default_interval")]
    pub interval: i64,
}

impl Default for InvocationSetting {
    fn default() -> Self {
        Self {
            invocations: 0,
            interval: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationStatsConfig {
    #[default]
    Basic,
    Histogram {
        #[serde(default = "default_max_value")]
        max_value: u64,
        #[serde(default = "default_digits")]
        digits: u8,
    },
}

impl OperationStatsConfig {
    pub fn prototype(&self) -> Result<OperationStats, StatsError> {
        match *self {
            Self::Basic => Ok(OperationStats::basic()),
            Self::Histogram { max_value, digits } => OperationStats::histogram(max_value, digits),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatisticsConfig {
    Basic {
        #[serde(default)]
        operation_stats: OperationStatsConfig,
    },
    Periodic {
        /// Bucket length in milliseconds.
        period: u64,
        #[serde(default)]
        operation_stats: OperationStatsConfig,
    },
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self::Basic {
            operation_stats: OperationStatsConfig::default(),
        }
    }
}

impl StatisticsConfig {
    pub fn prototype(&self) -> Result<Statistics, StatsError> {
        Ok(match self {
            Self::Basic { operation_stats } => {
                BasicStatistics::new(operation_stats.prototype()?).into()
            }
            Self::Periodic {
                period,
                operation_stats,
            } => PeriodicStatistics::new(BasicStatistics::new(operation_stats.prototype()?), *period)
                .into(),
        })
    }
}

/// One test stage as seen by a single worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestConfig {
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    #[serde(default = "default_ramp_up_ms")]
    pub ramp_up_ms: u64,
    pub duration_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub thread_join_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub grace_period_ms: u64,
    /// Size of the whole key space, split between the workers.
    pub num_keys: i64,
    #[serde(default)]
    pub operations: BTreeMap<String, InvocationSetting>,
    #[serde(default)]
    pub statistics: StatisticsConfig,
}

impl StressTestConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks what the document's types alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_keys < 0 {
            return Err(ConfigError::NegativeKeys(self.num_keys));
        }
        Ok(())
    }

    pub fn executor(&self) -> StressorPoolExecutor {
        StressorPoolExecutor::builder()
            .num_threads(self.num_threads)
            .ramp_up(Duration::from_millis(self.ramp_up_ms))
            .duration(Duration::from_millis(self.duration_ms))
            .thread_join_timeout(Duration::from_millis(self.thread_join_timeout_ms))
            .grace_period(Duration::from_millis(self.grace_period_ms))
            .build()
    }

    /// Keys this worker loads, out of `cluster_size` workers.
    pub fn key_range(&self, worker_index: usize, cluster_size: usize) -> Result<Range, ConfigError> {
        self.validate()?;
        if cluster_size == 0 || worker_index >= cluster_size {
            return Err(ConfigError::InvalidPartition {
                worker_index,
                cluster_size,
            });
        }
        Ok(Range::divide_range(self.num_keys, cluster_size, worker_index))
    }

    pub fn prototype(&self) -> Result<Statistics, StatsError> {
        self.statistics.prototype()
    }

    /// Registers every configured operation and builds the selector from the
    /// conversations `factory` provides.
    ///
    /// Operations with no invocations are left out. A scheduled operation
    /// the factory doesn't know fails the whole stage.
    pub fn build_selector<F>(
        &self,
        registry: &OperationRegistry,
        factory: F,
    ) -> Result<SchedulingSelector<Arc<dyn Conversation>>, ConfigError>
    where
        F: Fn(&Operation) -> Option<Arc<dyn Conversation>>,
    {
        let mut builder = SchedulingSelector::builder();
        for (name, setting) in &self.operations {
            let operation = registry.register(name);
            if setting.invocations <= 0 {
                tracing::debug!("Operation {operation} is not scheduled");
                continue;
            }
            let conversation =
                factory(&operation).ok_or_else(|| ConfigError::UnsupportedOperation(name.clone()))?;
            builder = builder.add(conversation, setting.invocations, setting.interval)?;
        }
        builder.build()
    }
}

fn default_interval() -> i64 {
    1
}

fn default_max_value() -> u64 {
    DEFAULT_MAX_VALUE
}

fn default_digits() -> u8 {
    DEFAULT_DIGITS
}

fn default_num_threads() -> usize {
    8
}

fn default_ramp_up_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    1000
}
