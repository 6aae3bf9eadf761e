//! src/config.rs
//!
//! Sampling and grouping configuration.
//!
//! Each dataset carries one [`DatasetPolicy`] that bundles its mixing ratio and
//! both rebalancing choices, so a dataset's settings are validated as a unit
//! instead of being spread over parallel lists that can drift out of alignment.
//!
//! Example:
//! ```ignore
//! let config = PipelineConfig::builder()
//!     .dataset(DatasetPolicy::new(1.0).with_repeat_factor(AnnotationKind::Box))
//!     .dataset(DatasetPolicy::new(1.0).with_class_balance(1.0))
//!     .repeat_threshold(0.001)
//!     .seed(42)
//!     .per_dataset_batch_sizes(vec![8, 32])
//!     .build();
//! ```
//!
//! The same configuration can be deserialized from JSON:
//! ```json
//! {
//!   "sampler": {
//!     "datasets": [
//!       { "ratio": 1.0, "repeat_factor": "categories" },
//!       { "ratio": 1.0, "class_balance": { "inverse_frequency": { "exponent": 1.0 } } }
//!     ],
//!     "repeat_threshold": 0.001,
//!     "seed": 42
//!   },
//!   "grouping": { "batch_size": [8, 32] }
//! }
//! ```

use crate::error::{Result, SamplingError};
use crate::rebalance::class_balance::DEFAULT_EXPONENT;
use crate::record::AnnotationKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default repeat threshold `t` used by repeat-factor sampling.
pub const DEFAULT_REPEAT_THRESHOLD: f64 = 0.001;

/// Whether, and from which identity space, repeat factors are computed for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatFactorPolicy {
    /// All repeat factors are 1.0.
    #[default]
    Disabled,
    /// Frequencies over box categories.
    Categories,
    /// Frequencies over free-text tags.
    Tags,
}

impl RepeatFactorPolicy {
    pub fn annotation_kind(self) -> Option<AnnotationKind> {
        match self {
            RepeatFactorPolicy::Disabled => None,
            RepeatFactorPolicy::Categories => Some(AnnotationKind::Box),
            RepeatFactorPolicy::Tags => Some(AnnotationKind::Tag),
        }
    }
}

impl From<AnnotationKind> for RepeatFactorPolicy {
    fn from(kind: AnnotationKind) -> Self {
        match kind {
            AnnotationKind::Box => RepeatFactorPolicy::Categories,
            AnnotationKind::Tag => RepeatFactorPolicy::Tags,
        }
    }
}

/// Whether class-balance weighting is applied to a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassBalancePolicy {
    #[default]
    Disabled,
    /// `w(img) = sum 1 / freq(c)^exponent`
    InverseFrequency { exponent: f64 },
}

/// Mixing and rebalancing settings for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPolicy {
    /// Relative share of draws this dataset receives (normalized over all datasets).
    #[serde(default = "default_ratio")]
    pub ratio: f64,
    #[serde(default)]
    pub repeat_factor: RepeatFactorPolicy,
    #[serde(default)]
    pub class_balance: ClassBalancePolicy,
}

fn default_ratio() -> f64 {
    1.0
}

impl Default for DatasetPolicy {
    fn default() -> Self {
        Self::new(default_ratio())
    }
}

impl DatasetPolicy {
    /// A policy with the given ratio and both rebalancing passes disabled.
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            repeat_factor: RepeatFactorPolicy::Disabled,
            class_balance: ClassBalancePolicy::Disabled,
        }
    }

    pub fn with_repeat_factor(mut self, kind: AnnotationKind) -> Self {
        self.repeat_factor = kind.into();
        self
    }

    pub fn with_class_balance(mut self, exponent: f64) -> Self {
        self.class_balance = ClassBalancePolicy::InverseFrequency { exponent };
        self
    }

    /// Builds per-dataset policies from the legacy parallel-list form
    /// (`dataset_ratio`, `use_rfs`, `use_cas`, `dataset_ann`).
    ///
    /// The number of datasets is taken from `ratios`; every other list must match it.
    pub fn from_parallel_lists(
        ratios: &[f64],
        use_rfs: &[bool],
        use_cas: &[bool],
        dataset_ann: &[AnnotationKind],
    ) -> Result<Vec<Self>> {
        let expected = ratios.len();
        for (parameter, actual) in [
            ("use_rfs", use_rfs.len()),
            ("use_cas", use_cas.len()),
            ("dataset_ann", dataset_ann.len()),
        ] {
            if actual != expected {
                return Err(SamplingError::ConfigMismatch {
                    parameter,
                    expected,
                    actual,
                });
            }
        }

        Ok(ratios
            .iter()
            .zip(use_rfs)
            .zip(use_cas)
            .zip(dataset_ann)
            .map(|(((&ratio, &rfs), &cas), &kind)| {
                let mut policy = DatasetPolicy::new(ratio);
                if rfs {
                    policy = policy.with_repeat_factor(kind);
                }
                if cas {
                    policy = policy.with_class_balance(DEFAULT_EXPONENT);
                }
                policy
            })
            .collect())
    }

    fn validate(&self) -> Result<()> {
        if !(self.ratio.is_finite() && self.ratio > 0.0) {
            return Err(SamplingError::invalid(
                "dataset_ratio",
                format!("ratios must be finite and > 0, got {}", self.ratio),
            ));
        }
        if let ClassBalancePolicy::InverseFrequency { exponent } = self.class_balance {
            if !(exponent.is_finite() && exponent >= 0.0) {
                return Err(SamplingError::invalid(
                    "class_balance.exponent",
                    format!("exponent must be finite and >= 0, got {}", exponent),
                ));
            }
        }
        Ok(())
    }
}

/// Which index sampler drives the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    /// Weighted multi-dataset sampling with replacement.
    #[default]
    MultiDataset,
    /// Per-round shuffled permutations of all records; policies are ignored.
    Uniform,
}

/// Configuration of the index sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default)]
    pub kind: SamplerKind,
    /// One policy per dataset, in dataset order.
    pub datasets: Vec<DatasetPolicy>,
    /// Target per-image frequency `t` for repeat-factor sampling, in `(0, 1]`.
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: f64,
    /// Seed shared by all ranks. When absent, the distributed context's shared seed is used.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_repeat_threshold() -> f64 {
    DEFAULT_REPEAT_THRESHOLD
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kind: SamplerKind::default(),
            datasets: Vec::new(),
            repeat_threshold: DEFAULT_REPEAT_THRESHOLD,
            seed: None,
        }
    }
}

impl SamplerConfig {
    /// Checks the configuration against the number of merged datasets.
    pub fn validate(&self, num_datasets: usize) -> Result<()> {
        if self.kind == SamplerKind::Uniform {
            return Ok(());
        }
        if self.datasets.len() != num_datasets {
            return Err(SamplingError::ConfigMismatch {
                parameter: "dataset_ratio",
                expected: num_datasets,
                actual: self.datasets.len(),
            });
        }
        self.datasets.iter().try_for_each(DatasetPolicy::validate)?;

        let uses_rfs = self
            .datasets
            .iter()
            .any(|p| p.repeat_factor != RepeatFactorPolicy::Disabled);
        if uses_rfs && !(self.repeat_threshold > 0.0 && self.repeat_threshold <= 1.0) {
            return Err(SamplingError::invalid(
                "repeat_threshold",
                format!("must lie in (0, 1], got {}", self.repeat_threshold),
            ));
        }
        Ok(())
    }
}

/// Target batch size(s) for the grouper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchSizes {
    /// Same batch size for every dataset.
    Uniform(usize),
    /// One batch size per dataset, in dataset order.
    PerDataset(Vec<usize>),
}

impl Default for BatchSizes {
    fn default() -> Self {
        BatchSizes::Uniform(1)
    }
}

impl BatchSizes {
    /// Resolves to one target size per dataset, rejecting zero sizes and misaligned lists.
    pub fn resolve(&self, num_datasets: usize) -> Result<Vec<usize>> {
        let sizes = match self {
            BatchSizes::Uniform(size) => vec![*size; num_datasets],
            BatchSizes::PerDataset(sizes) => {
                if sizes.len() != num_datasets {
                    return Err(SamplingError::ConfigMismatch {
                        parameter: "dataset_bs",
                        expected: num_datasets,
                        actual: sizes.len(),
                    });
                }
                sizes.clone()
            }
        };
        if let Some(position) = sizes.iter().position(|&s| s == 0) {
            return Err(SamplingError::InvalidBatchSize {
                size: 0,
                reason: format!("batch size for dataset {} must be > 0", position),
            });
        }
        Ok(sizes)
    }
}

/// Configuration of the aspect-ratio batch grouper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingConfig {
    pub batch_size: BatchSizes,
    /// Bucket by dataset source as well as aspect class. When `false`, only the
    /// aspect class is used and `batch_size` must be uniform.
    #[serde(default = "default_multi_dataset")]
    pub multi_dataset: bool,
}

fn default_multi_dataset() -> bool {
    true
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            batch_size: BatchSizes::default(),
            multi_dataset: true,
        }
    }
}

impl GroupingConfig {
    /// Splits a global batch size evenly across `world_size` ranks.
    pub fn from_total_batch_size(total_batch_size: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(SamplingError::invalid("world_size", "must be > 0"));
        }
        if total_batch_size == 0 || total_batch_size % world_size != 0 {
            return Err(SamplingError::InvalidBatchSize {
                size: total_batch_size,
                reason: format!(
                    "total batch size must be positive and divisible by the number of ranks ({})",
                    world_size
                ),
            });
        }
        Ok(Self {
            batch_size: BatchSizes::Uniform(total_batch_size / world_size),
            multi_dataset: true,
        })
    }
}

/// Top-level configuration for the sampling pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
    /// Drop records that have no identities in the space their repeat-factor policy reads.
    #[serde(default)]
    pub filter_empty: bool,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse pipeline config")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("Invalid pipeline config in {}", path.display()))
    }
}

/// Builder for PipelineConfig with method chaining
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Append the policy for the next dataset
    pub fn dataset(mut self, policy: DatasetPolicy) -> Self {
        self.config.sampler.datasets.push(policy);
        self
    }

    /// Replace all dataset policies
    pub fn datasets(mut self, policies: Vec<DatasetPolicy>) -> Self {
        self.config.sampler.datasets = policies;
        self
    }

    pub fn sampler_kind(mut self, kind: SamplerKind) -> Self {
        self.config.sampler.kind = kind;
        self
    }

    pub fn repeat_threshold(mut self, threshold: f64) -> Self {
        self.config.sampler.repeat_threshold = threshold;
        self
    }

    /// Set the seed shared by all ranks
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.sampler.seed = Some(seed);
        self
    }

    /// Use the same batch size for every dataset
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.grouping.batch_size = BatchSizes::Uniform(size);
        self
    }

    pub fn per_dataset_batch_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.config.grouping.batch_size = BatchSizes::PerDataset(sizes);
        self
    }

    pub fn multi_dataset_grouping(mut self, enabled: bool) -> Self {
        self.config.grouping.multi_dataset = enabled;
        self
    }

    pub fn filter_empty(mut self, enabled: bool) -> Self {
        self.config.filter_empty = enabled;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}



#[cfg(test)]
mod grouping_config_tests {
    use super::*;

    #[test]
    fn resolves_batch_sizes() -> Result<()> {
        assert_eq!(BatchSizes::Uniform(4).resolve(3)?, vec![4, 4, 4]);
        assert_eq!(BatchSizes::PerDataset(vec![8, 32]).resolve(2)?, vec![8, 32]);
        assert!(matches!(
            BatchSizes::PerDataset(vec![8]).resolve(2),
            Err(SamplingError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            BatchSizes::Uniform(0).resolve(2),
            Err(SamplingError::InvalidBatchSize { .. })
        ));
        assert!(matches!(
            BatchSizes::PerDataset(vec![8, 0]).resolve(2),
            Err(SamplingError::InvalidBatchSize { .. })
        ));
        Ok(())
    }

    #[test]
    fn splits_total_batch_size_across_ranks() -> Result<()> {
        let grouping = GroupingConfig::from_total_batch_size(64, 8)?;
        assert_eq!(grouping.batch_size, BatchSizes::Uniform(8));
        assert!(matches!(
            GroupingConfig::from_total_batch_size(63, 8),
            Err(SamplingError::InvalidBatchSize { size: 63, .. })
        ));
        assert!(GroupingConfig::from_total_batch_size(0, 1).is_err());
        assert!(GroupingConfig::from_total_batch_size(8, 0).is_err());
        Ok(())
    }
}
