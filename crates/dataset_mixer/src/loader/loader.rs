//! src/loader/loader.rs
//!
//! The end-to-end pipeline: merge → weights → sampler → materialization → grouper.
//!
//! # Construction
//! All configuration is validated eagerly in [`MultiDatasetLoader::new`]: dataset
//! policies against the datasets, batch sizes against the grouping mode, and the
//! worker settings. Nothing fails for configuration reasons once iteration starts;
//! iteration errors are runtime failures of the materializer or the workers.
//!
//! # Epochs
//! Each call to `iter()` starts the next epoch: the sampler is re-seeded with
//! `seed + epoch` and a fresh grouper is created, so partial buckets never carry
//! over between epochs.

use crate::config::{GroupingConfig, PipelineConfig, SamplerKind};
use crate::dataset::{MergedRecords, RecordDataset};
use crate::error::Result;
use crate::grouper::AspectRatioGrouper;
use crate::record::{ImageMeta, Record};
use crate::sampler::{build_sampler, DistributedContext, Sampler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use super::config::LoaderConfig;
use super::iterator::LoaderIter;

/// Turns a sampled record into a training item.
///
/// This is the seam to the caller's I/O: reading and decoding the image,
/// applying augmentations, building the training dict. The output must still
/// expose the record's source and size so it can be grouped; an output whose
/// `dataset_source()` differs from the record's is yielded as an `Err` item.
///
/// Implemented for any `Fn(usize, &Record) -> anyhow::Result<T>`.
pub trait Materialize: Send + Sync + 'static {
    type Output: ImageMeta + Send + 'static;

    /// `index` is the record's position in the merged list.
    fn materialize(&self, index: usize, record: &Record) -> anyhow::Result<Self::Output>;
}

impl<F, T> Materialize for F
where
    F: Fn(usize, &Record) -> anyhow::Result<T> + Send + Sync + 'static,
    T: ImageMeta + Send + 'static,
{
    type Output = T;

    fn materialize(&self, index: usize, record: &Record) -> anyhow::Result<T> {
        self(index, record)
    }
}

/// Materializer that yields the sampled records themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneRecord;

impl Materialize for CloneRecord {
    type Output = Record;

    fn materialize(&self, _index: usize, record: &Record) -> anyhow::Result<Record> {
        Ok(record.clone())
    }
}

/// A loader that yields batches of the sampled records.
pub type RecordLoader = MultiDatasetLoader<CloneRecord>;

/// The multi-dataset data loader.
///
/// Owns the merged records, the index sampler for this rank and the materializer.
/// Iterating yields an endless stream of `anyhow::Result<Batch<M::Output>>`.
///
/// # Thread safety:
/// - `MultiDatasetLoader` is Send + Sync and can be shared across threads.
/// - Each iterator owns its grouper and (optionally) its worker pool.
///
/// # Example
/// ```ignore
/// let loader = MultiDatasetLoader::new(
///     datasets,
///     &pipeline,
///     DistributedContext::new(rank, world_size)?,
///     |index, record: &Record| decode(index, record),
///     LoaderConfig::builder().num_workers(4).build(),
/// )?;
/// for batch in loader.iter()?.take(steps) {
///     let batch = batch?;
///     // ...
/// }
/// ```
pub struct MultiDatasetLoader<M: Materialize> {
    merged: MergedRecords,
    sampler: Box<dyn Sampler<Item = usize>>,
    grouping: GroupingConfig,
    materializer: Arc<M>,
    config: LoaderConfig,
    current_epoch: AtomicUsize,
}

impl<M: Materialize> MultiDatasetLoader<M> {
    /// Builds the whole pipeline for one rank.
    ///
    /// # Errors
    /// Any configuration error of the merger, the sampler, the grouper or the
    /// loader settings.
    pub fn new(
        mut datasets: Vec<RecordDataset>,
        pipeline: &PipelineConfig,
        context: DistributedContext,
        materializer: M,
        config: LoaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        if pipeline.filter_empty && pipeline.sampler.kind == SamplerKind::MultiDataset {
            pipeline.sampler.validate(datasets.len())?;
            for (dataset, policy) in datasets.iter_mut().zip(&pipeline.sampler.datasets) {
                if let Some(kind) = policy.repeat_factor.annotation_kind() {
                    dataset.retain_annotated(kind);
                }
            }
        }

        let merged = MergedRecords::merge(datasets)?;
        let sampler = build_sampler(&merged, &pipeline.sampler, context)?;
        // Fail here rather than on the first iter() call.
        AspectRatioGrouper::<M::Output>::from_config(merged.num_datasets(), &pipeline.grouping)?;

        info!(
            num_workers = config.num_workers,
            prefetch_factor = config.prefetch_factor,
            batch_size = ?pipeline.grouping.batch_size,
            multi_dataset = pipeline.grouping.multi_dataset,
            "built multi-dataset loader"
        );
        Ok(Self {
            merged,
            sampler,
            grouping: pipeline.grouping.clone(),
            materializer: Arc::new(materializer),
            config,
            current_epoch: AtomicUsize::new(0),
        })
    }

    /// Starts the next epoch.
    pub fn iter(&self) -> anyhow::Result<LoaderIter<'_, M>> {
        let epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst);
        self.iter_epoch(epoch)
    }

    /// Starts (or restarts) a specific epoch. The same epoch always yields the
    /// same batches.
    pub fn iter_epoch(&self, epoch: usize) -> anyhow::Result<LoaderIter<'_, M>> {
        let grouper = AspectRatioGrouper::from_config(self.merged.num_datasets(), &self.grouping)?;
        let indices = self.sampler.iter(epoch);

        if self.config.num_workers == 0 {
            return Ok(LoaderIter::inline(
                indices,
                grouper,
                self.merged.records(),
                self.materializer.as_ref(),
            ));
        }
        LoaderIter::with_workers(
            indices,
            grouper,
            self.merged.shared_records(),
            Arc::clone(&self.materializer),
            &self.config,
        )
    }

    pub fn merged(&self) -> &MergedRecords {
        &self.merged
    }

    pub fn sampler(&self) -> &dyn Sampler<Item = usize> {
        self.sampler.as_ref()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Epoch the next `iter()` call will start.
    pub fn next_epoch(&self) -> usize {
        self.current_epoch.load(Ordering::SeqCst)
    }
}

impl RecordLoader {
    /// A loader that batches the sampled records without materializing them.
    pub fn for_records(
        datasets: Vec<RecordDataset>,
        pipeline: &PipelineConfig,
        context: DistributedContext,
        config: LoaderConfig,
    ) -> Result<Self> {
        Self::new(datasets, pipeline, context, CloneRecord, config)
    }
}

impl<M: Materialize> std::fmt::Debug for MultiDatasetLoader<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiDatasetLoader")
            .field("sizes", &self.merged.sizes())
            .field("grouping", &self.grouping)
            .field("config", &self.config)
            .field("next_epoch", &self.next_epoch())
            .finish()
    }
}
