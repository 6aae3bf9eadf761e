use crate::config::{ClassBalancePolicy, SamplerConfig, SamplerKind};
use crate::dataset::MergedRecords;
use crate::error::{Result, SamplingError};
use crate::rebalance::{normalized_class_balance_factors, normalized_repeat_factors};
use rand::distr::{weighted::WeightedIndex, Distribution};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// A `Sampler` defines the strategy for how to draw record indices from the
/// merged record list.
///
/// # Associated type
/// - `Item`: The handle yielded by the iterator. Every sampler in this crate
///   yields `usize` indices into [`MergedRecords`].
///
/// # Method
/// - `iter(epoch)`: returns the (possibly infinite) index sequence for that epoch.
///    - Epoch `0` is seeded with the sampler's seed exactly; epoch `e` with
///      `seed + e`. The same `(seed, epoch)` always restarts the same sequence
///      from its first element.
///
/// Implementations must be `Send + Sync` so the same sampler instance can be
/// safely shared across loader threads.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;
}

/// ============================================================================
/// Position of this process in a group of ranks that share one sampling stream.
///
/// # Arguments:
/// - `rank`: Unique ID of this rank. Must satisfy `0 <= rank < world_size`.
/// - `world_size`: Total number of ranks.
/// - `shared_seed`: Optional seed every rank agreed on at launch. Used when the
///                  sampler configuration does not carry an explicit seed.
///
/// # Stream partition
/// - All ranks generate the same global index stream; rank `r` keeps positions
///   `r, r + world_size, r + 2 * world_size, ...`:
/// ```text
/// Global:  [a, b, c, d, e, f, ...]
///
/// world_size = 3
///   Rank 0: [a, d, ...]
///   Rank 1: [b, e, ...]
///   Rank 2: [c, f, ...]
/// ```
/// - Positions never overlap between ranks. Records may still repeat, since
///   sampling is with replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedContext {
    rank: usize,
    world_size: usize,
    shared_seed: Option<u64>,
}

impl DistributedContext {
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(SamplingError::invalid("world_size", "must be > 0"));
        }
        if rank >= world_size {
            return Err(SamplingError::invalid(
                "rank",
                format!(
                    "invalid rank {}, rank should be in the interval [0, {}]",
                    rank,
                    world_size - 1
                ),
            ));
        }
        Ok(Self {
            rank,
            world_size,
            shared_seed: None,
        })
    }

    /// A single-process run: rank 0 of 1.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            shared_seed: None,
        }
    }

    pub fn with_shared_seed(mut self, seed: u64) -> Self {
        self.shared_seed = Some(seed);
        self
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn shared_seed(&self) -> Option<u64> {
        self.shared_seed
    }

    /// Picks the seed for this run: the configured seed, else the shared seed,
    /// else (single rank only) a locally drawn one.
    ///
    /// Multiple ranks without an agreed seed would draw unrelated streams and lose
    /// the position partition, so that case is rejected.
    pub fn resolve_seed(&self, configured: Option<u64>) -> Result<u64> {
        if let Some(seed) = configured.or(self.shared_seed) {
            return Ok(seed);
        }
        if self.world_size > 1 {
            return Err(SamplingError::invalid(
                "seed",
                format!(
                    "a seed shared by all {} ranks is required; none was configured",
                    self.world_size
                ),
            ));
        }
        let seed = rand::rng().random::<u64>();
        warn!(seed, "no sampling seed configured, generated one locally");
        Ok(seed)
    }

    /// Keeps this rank's positions of a global stream.
    fn shard<'a, I>(&self, stream: I) -> Box<dyn Iterator<Item = usize> + Send + 'a>
    where
        I: Iterator<Item = usize> + Send + 'a,
    {
        Box::new(stream.skip(self.rank).step_by(self.world_size))
    }
}

impl Default for DistributedContext {
    fn default() -> Self {
        Self::single()
    }
}

/// Per-dataset constant `max(sizes) / sizes[i] * ratio[i] / sum(ratio)`.
///
/// Every dataset is first scaled up to the size of the largest one, then weighted
/// by its ratio: ratios `[1, 1]` give a small and a large dataset the same expected
/// number of draws.
pub fn compute_dataset_weights(sizes: &[usize], ratios: &[f64]) -> Result<Vec<f64>> {
    if ratios.len() != sizes.len() {
        return Err(SamplingError::ConfigMismatch {
            parameter: "dataset_ratio",
            expected: sizes.len(),
            actual: ratios.len(),
        });
    }
    if let Some(&ratio) = ratios.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
        return Err(SamplingError::invalid(
            "dataset_ratio",
            format!("ratios must be finite and > 0, got {}", ratio),
        ));
    }
    if sizes.contains(&0) {
        return Err(SamplingError::invalid(
            "sizes",
            "every dataset must contain at least one record",
        ));
    }

    let max_size = sizes.iter().copied().max().unwrap_or_default() as f64;
    let ratio_sum: f64 = ratios.iter().sum();
    Ok(sizes
        .iter()
        .zip(ratios)
        .map(|(&size, &ratio)| max_size / size as f64 * ratio / ratio_sum)
        .collect())
}

/// Final per-record weights: `dataset_weight * repeat_factor * class_balance_factor`.
///
/// Both rebalancing factors are computed within their DatasetGroup and
/// renormalized to the group's size before the product is taken.
pub fn compute_record_weights(merged: &MergedRecords, config: &SamplerConfig) -> Result<Vec<f64>> {
    config.validate(merged.num_datasets())?;
    let ratios: Vec<f64> = config.datasets.iter().map(|p| p.ratio).collect();
    let dataset_weights = compute_dataset_weights(merged.sizes(), &ratios)?;

    let mut weights = Vec::with_capacity(merged.len());
    for (source, policy) in config.datasets.iter().enumerate() {
        let group = merged.group(source);

        let repeat = match policy.repeat_factor.annotation_kind() {
            Some(kind) => normalized_repeat_factors(group, kind, config.repeat_threshold),
            None => vec![1.0; group.len()],
        };
        let balance = match policy.class_balance {
            ClassBalancePolicy::InverseFrequency { exponent } => {
                normalized_class_balance_factors(group, exponent)?
            }
            ClassBalancePolicy::Disabled => vec![1.0; group.len()],
        };

        let start = weights.len();
        weights.extend(
            repeat
                .iter()
                .zip(&balance)
                .map(|(r, c)| dataset_weights[source] * r * c),
        );
        debug!(
            dataset = %merged.names()[source],
            dataset_weight = dataset_weights[source],
            mass = weights[start..].iter().sum::<f64>(),
            repeat_factor = ?policy.repeat_factor,
            class_balance = ?policy.class_balance,
            "computed record weights"
        );
    }
    Ok(weights)
}

/// ============================================================================
/// Weighted infinite sampler over several merged datasets.
///
/// Draws record indices with replacement, proportionally to a per-record weight
/// vector, forever. Draws are generated in rounds of `sample_epoch_size` (the
/// number of records); the generator state carries over between rounds, so a
/// fixed `(seed, epoch)` always reproduces the same stream. Each rank keeps a
/// strided slice of that stream (see [`DistributedContext`]).
///
/// # Arguments:
/// - `merged`: The merged record list the indices point into.
/// - `config`: Per-dataset policies, repeat threshold and optional seed.
/// - `context`: Rank, world size and optional shared seed.
///
/// # Example
/// ```ignore
/// let sampler = MultiDatasetSampler::new(&merged, &config.sampler, DistributedContext::new(rank, 8)?)?;
/// for index in sampler.iter(0).take(1_000) {
///     let record = &merged.records()[index];
///     // ...
/// }
/// ```
///
/// The stream cannot seek; to resume, restart from epoch start and skip.
#[derive(Debug, Clone)]
pub struct MultiDatasetSampler {
    weights: Arc<[f64]>,
    distribution: WeightedIndex<f64>,
    offsets: Vec<usize>,
    seed: u64,
    context: DistributedContext,
}

impl MultiDatasetSampler {
    pub fn new(
        merged: &MergedRecords,
        config: &SamplerConfig,
        context: DistributedContext,
    ) -> Result<Self> {
        let weights = compute_record_weights(merged, config)?;
        let seed = context.resolve_seed(config.seed)?;
        Self::from_weights(weights, merged.sizes(), seed, context)
    }

    /// Builds a sampler from a precomputed weight vector aligned with the merged
    /// record list described by `sizes`.
    pub fn from_weights(
        weights: Vec<f64>,
        sizes: &[usize],
        seed: u64,
        context: DistributedContext,
    ) -> Result<Self> {
        let expected: usize = sizes.iter().sum();
        if weights.len() != expected {
            return Err(SamplingError::ConfigMismatch {
                parameter: "weights",
                expected,
                actual: weights.len(),
            });
        }
        if let Some(position) = weights.iter().position(|w| !(w.is_finite() && *w > 0.0)) {
            return Err(SamplingError::invalid(
                "weights",
                format!(
                    "weights must be finite and > 0, got {} at index {}",
                    weights[position], position
                ),
            ));
        }
        let distribution = WeightedIndex::new(&weights)
            .map_err(|e| SamplingError::invalid("weights", e.to_string()))?;

        let offsets = sizes
            .iter()
            .scan(0, |start, &size| {
                let offset = *start;
                *start += size;
                Some(offset)
            })
            .collect();

        info!(
            seed,
            rank = context.rank(),
            world_size = context.world_size(),
            sample_epoch_size = weights.len(),
            datasets = sizes.len(),
            "built multi-dataset sampler"
        );
        Ok(Self {
            weights: weights.into(),
            distribution,
            offsets,
            seed,
            context,
        })
    }

    /// The immutable per-record weight vector.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of draws per internal round; equal to the number of records.
    pub fn sample_epoch_size(&self) -> usize {
        self.weights.len()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn context(&self) -> DistributedContext {
        self.context
    }

    /// Maps a record index back to the dataset it belongs to.
    pub fn source_of(&self, index: usize) -> Option<usize> {
        if index >= self.weights.len() {
            return None;
        }
        Some(self.offsets.partition_point(|&offset| offset <= index) - 1)
    }

    /// The first `n` indices this rank sees in `epoch`.
    pub fn prefix(&self, epoch: usize, n: usize) -> Vec<usize> {
        self.iter(epoch).take(n).collect()
    }

    #[inline]
    fn derive_rng_for_epoch(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64))
    }
}

impl Sampler for MultiDatasetSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let draws = WeightedDraws {
            sampler: self,
            rng: self.derive_rng_for_epoch(epoch),
            round: Vec::with_capacity(self.sample_epoch_size()),
            position: 0,
            rounds: 0,
        };
        self.context.shard(draws)
    }
}

/// The unsharded global stream: rounds of `sample_epoch_size` weighted draws.
struct WeightedDraws<'a> {
    sampler: &'a MultiDatasetSampler,
    rng: StdRng,
    round: Vec<usize>,
    position: usize,
    rounds: u64,
}

impl WeightedDraws<'_> {
    fn refill(&mut self) {
        let sampler = self.sampler;
        self.round.clear();
        self.round.extend(
            (0..sampler.sample_epoch_size()).map(|_| sampler.distribution.sample(&mut self.rng)),
        );
        self.position = 0;

        if tracing::enabled!(tracing::Level::TRACE) {
            let mut counts = vec![0usize; sampler.offsets.len()];
            for &index in &self.round {
                if let Some(source) = sampler.source_of(index) {
                    counts[source] += 1;
                }
            }
            trace!(round = self.rounds, counts = ?counts, "drew sampling round");
        }
        self.rounds += 1;
    }
}

impl Iterator for WeightedDraws<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.position == self.round.len() {
            self.refill();
        }
        let index = self.round[self.position];
        self.position += 1;
        Some(index)
    }
}

/// ============================================================================
/// Infinite uniform sampler: an endless sequence of shuffled permutations of
/// `0..num_records`, one permutation per round, strided across ranks.
///
/// Used when multi-dataset rebalancing is turned off. Over each round every
/// record appears exactly once in the global stream.
#[derive(Debug, Clone)]
pub struct UniformSampler {
    num_records: usize,
    seed: u64,
    context: DistributedContext,
}

impl UniformSampler {
    pub fn new(num_records: usize, seed: u64, context: DistributedContext) -> Result<Self> {
        if num_records == 0 {
            return Err(SamplingError::invalid(
                "num_records",
                "cannot sample from zero records",
            ));
        }
        info!(
            seed,
            rank = context.rank(),
            world_size = context.world_size(),
            num_records,
            "built uniform sampler"
        );
        Ok(Self {
            num_records,
            seed,
            context,
        })
    }

    #[inline]
    fn derive_rng_for_epoch(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64))
    }
}

impl Sampler for UniformSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = self.derive_rng_for_epoch(epoch);
        let num_records = self.num_records;
        let rounds = std::iter::repeat(()).flat_map(move |_| {
            let mut permutation: Vec<usize> = (0..num_records).collect();
            permutation.shuffle(&mut rng);
            permutation
        });
        self.context.shard(rounds)
    }
}

/// Builds the sampler selected by `config.kind`.
pub fn build_sampler(
    merged: &MergedRecords,
    config: &SamplerConfig,
    context: DistributedContext,
) -> Result<Box<dyn Sampler<Item = usize>>> {
    match config.kind {
        SamplerKind::MultiDataset => Ok(Box::new(MultiDatasetSampler::new(merged, config, context)?)),
        SamplerKind::Uniform => {
            let seed = context.resolve_seed(config.seed)?;
            Ok(Box::new(UniformSampler::new(merged.len(), seed, context)?))
        }
    }
}
