//! src/grouper.rs
//!
//! Aspect-ratio / size batch grouping.
//!
//! Items arrive one at a time (already sampled, sharded and usually materialized)
//! and are appended to a bucket keyed by `(dataset_source, aspect class)`:
//! ```text
//! bucket = dataset_source * 2 + (0 if width > height else 1)
//! ```
//! A bucket that reaches its target size is emitted as one [`Batch`] and emptied;
//! other buckets keep their partial contents. Emission order across buckets is
//! simply the order in which they fill.
//!
//! Partial buckets are not flushed when the input ends. Callers that need every
//! item can call [`AspectRatioGrouper::drain_partial`] explicitly.

use crate::batch::Batch;
use crate::config::{BatchSizes, GroupingConfig};
use crate::error::{Result, SamplingError};
use crate::record::{AspectClass, ImageMeta};

const ASPECT_CLASSES: [AspectClass; 2] = [AspectClass::Wide, AspectClass::Tall];

/// Buckets items by dataset source and aspect class and emits full buckets.
///
/// Owned by a single consumer; the grouper holds mutable state and is not meant
/// to be shared.
#[derive(Debug)]
pub struct AspectRatioGrouper<T> {
    buckets: Vec<Vec<T>>,
    /// One target size per dataset, or a single entry when grouping by aspect only.
    target_sizes: Vec<usize>,
    per_dataset: bool,
}

impl<T: ImageMeta> AspectRatioGrouper<T> {
    /// Groups by dataset source and aspect class: `2 * num_datasets` buckets.
    pub fn new(num_datasets: usize, batch_sizes: &BatchSizes) -> Result<Self> {
        if num_datasets == 0 {
            return Err(SamplingError::invalid(
                "num_datasets",
                "at least one dataset is required",
            ));
        }
        let target_sizes = batch_sizes.resolve(num_datasets)?;
        Ok(Self::with_targets(target_sizes, true))
    }

    /// Groups by aspect class only: two buckets sharing one batch size.
    pub fn aspect_only(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(SamplingError::InvalidBatchSize {
                size: batch_size,
                reason: "batch size must be > 0".into(),
            });
        }
        Ok(Self::with_targets(vec![batch_size], false))
    }

    pub fn from_config(num_datasets: usize, config: &GroupingConfig) -> Result<Self> {
        if config.multi_dataset {
            return Self::new(num_datasets, &config.batch_size);
        }
        match config.batch_size {
            BatchSizes::Uniform(size) => Self::aspect_only(size),
            BatchSizes::PerDataset(_) => Err(SamplingError::invalid(
                "batch_size",
                "per-dataset batch sizes require multi-dataset grouping",
            )),
        }
    }

    fn with_targets(target_sizes: Vec<usize>, per_dataset: bool) -> Self {
        let buckets = target_sizes
            .iter()
            .flat_map(|&size| [Vec::with_capacity(size), Vec::with_capacity(size)])
            .collect();
        Self {
            buckets,
            target_sizes,
            per_dataset,
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Target batch size for items from `dataset_source`.
    pub fn target_size(&self, dataset_source: usize) -> usize {
        if self.per_dataset {
            self.target_sizes[dataset_source]
        } else {
            self.target_sizes[0]
        }
    }

    /// Bucket an item lands in.
    ///
    /// # Panics
    /// When grouping per dataset and the item's source is not one of the
    /// configured datasets.
    pub fn bucket_index(&self, item: &T) -> usize {
        let offset = item.aspect_class().bucket_offset();
        if !self.per_dataset {
            return offset;
        }
        let source = item.dataset_source();
        assert!(
            source < self.target_sizes.len(),
            "dataset source {} out of range for {} datasets",
            source,
            self.target_sizes.len()
        );
        source * 2 + offset
    }

    /// Appends `item` to its bucket and returns the bucket as a batch once it is full.
    pub fn push(&mut self, item: T) -> Option<Batch<T>> {
        let index = self.bucket_index(&item);
        let source = item.dataset_source();
        let target = self.target_size(source);

        let bucket = &mut self.buckets[index];
        bucket.push(item);
        if bucket.len() < target {
            return None;
        }

        Some(Batch {
            dataset_source: self.per_dataset.then_some(index / 2),
            aspect: ASPECT_CLASSES[index % 2],
            items: bucket.drain(..).collect(),
        })
    }

    /// Number of items currently waiting in partial buckets.
    pub fn pending(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Empties every non-empty bucket into a (short) batch, in bucket order.
    pub fn drain_partial(&mut self) -> Vec<Batch<T>> {
        let per_dataset = self.per_dataset;
        self.buckets
            .iter_mut()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(index, bucket)| Batch {
                dataset_source: per_dataset.then_some(index / 2),
                aspect: ASPECT_CLASSES[index % 2],
                items: bucket.drain(..).collect(),
            })
            .collect()
    }

    /// Wraps an item stream into a stream of full batches.
    pub fn group<I>(self, items: I) -> GroupedBatches<I::IntoIter, T>
    where
        I: IntoIterator<Item = T>,
    {
        GroupedBatches {
            items: items.into_iter(),
            grouper: self,
        }
    }
}

/// Iterator adapter returned by [`AspectRatioGrouper::group`].
///
/// Ends when the item stream ends; whatever is left in partial buckets stays in
/// the grouper.
#[derive(Debug)]
pub struct GroupedBatches<I, T> {
    items: I,
    grouper: AspectRatioGrouper<T>,
}

impl<I, T> GroupedBatches<I, T> {
    pub fn grouper(&self) -> &AspectRatioGrouper<T> {
        &self.grouper
    }

    pub fn grouper_mut(&mut self) -> &mut AspectRatioGrouper<T> {
        &mut self.grouper
    }
}

impl<I, T> Iterator for GroupedBatches<I, T>
where
    I: Iterator<Item = T>,
    T: ImageMeta,
{
    type Item = Batch<T>;

    fn next(&mut self) -> Option<Batch<T>> {
        loop {
            let item = self.items.next()?;
            if let Some(batch) = self.grouper.push(item) {
                return Some(batch);
            }
        }
    }
}
