//! src/loader/config.rs
//!
//! Configuration for MultiDatasetLoader behaviour
//!
//! The `LoaderConfig` struct stores the parameters that control how sampled
//! records are materialized.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .num_workers(4)
//!     .prefetch_factor(8)
//!     .timeout(Duration::from_secs(60))
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: More workers help when materialization does real I/O
//! - `prefetch_factor`: Higher values hide I/O latency but keep more items in memory

use crate::error::{Result, SamplingError};
use std::time::Duration;

/// Configuration for MultiDatasetLoader
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of parallel materialization workers (0 = materialize on the calling thread)
    pub num_workers: usize,
    /// Number of records in flight per worker (must be >0 when using workers)
    pub prefetch_factor: usize,
    /// Maximum time to wait for the next materialized record from workers.
    /// If exceeded, returns an error (assuming workers are stuck). Default: 30s
    pub timeout: Duration,
    /// How often idle workers check for shutdown signal.
    /// Not an error timeout - just a polling interval. Default: 100ms.
    pub worker_poll_interval: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            prefetch_factor: 2,
            timeout: Duration::from_secs(30),
            worker_poll_interval: Duration::from_millis(100),
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Maximum number of records sent to workers but not yet handed to the grouper.
    pub fn max_in_flight(&self) -> usize {
        self.num_workers * self.prefetch_factor
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_workers > 0 && self.prefetch_factor == 0 {
            return Err(SamplingError::invalid(
                "prefetch_factor",
                "must be > 0 when num_workers > 0",
            ));
        }
        if self.num_workers > 0 && self.timeout.is_zero() {
            return Err(SamplingError::invalid(
                "timeout",
                "must be non-zero when num_workers > 0",
            ));
        }
        if self.num_workers > 0 && self.worker_poll_interval.is_zero() {
            return Err(SamplingError::invalid(
                "worker_poll_interval",
                "must be non-zero when num_workers > 0",
            ));
        }
        Ok(())
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the number of workers
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Set the prefetch factor.
    /// Higher values help prevent starvation but use more memory.
    pub fn prefetch_factor(mut self, factor: usize) -> Self {
        self.config.prefetch_factor = factor;
        self
    }

    /// Set the timeout for receiving materialized records.
    ///
    /// - Too low: May fail during legitimately slow I/O
    /// - Too high: Delays detection of stuck workers.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the worker polling interval
    pub fn worker_poll_interval(mut self, interval: Duration) -> Self {
        self.config.worker_poll_interval = interval;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
