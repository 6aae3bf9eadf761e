use crate::error::{Result, SamplingError};
use crate::record::{AnnotationKind, CategoryId, ImageMeta, Record};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One named input dataset, as handed over by the record provider.
///
/// Record order is preserved through merging; nothing in the pipeline reorders
/// records within a dataset.
#[derive(Debug, Clone)]
pub struct RecordDataset {
    name: String,
    records: Vec<Record>,
    metadata: HashMap<String, String>,
}

impl RecordDataset {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
            metadata: HashMap::new(),
        }
    }

    /// Adds/updates metadata and returns the modified dataset.
    /// Enables chaining: `dataset.with_metadata("split", "train")`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the value of a metadata field, if it exists.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops records that carry no identity of `kind`. Returns how many were removed.
    pub fn retain_annotated(&mut self, kind: AnnotationKind) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !r.identities(kind).is_empty());
        let removed = before - self.records.len();
        if removed > 0 {
            warn!(
                dataset = %self.name,
                removed,
                remaining = self.records.len(),
                "dropped records without {:?} annotations",
                kind
            );
        }
        removed
    }
}

/// The flat, source-tagged record list produced by the Record Source Merger.
///
/// All records of dataset `i` precede those of dataset `i + 1`, so each
/// DatasetGroup is a contiguous range of the merged list. The records sit behind
/// an `Arc<[Record]>`: cloning is cheap and the list can be shared read-only
/// across worker threads.
#[derive(Debug, Clone)]
pub struct MergedRecords {
    records: Arc<[Record]>,
    sizes: Vec<usize>,
    offsets: Vec<usize>,
    names: Vec<String>,
}

impl MergedRecords {
    /// Concatenates the datasets in order and tags each record with its dataset index.
    ///
    /// # Errors
    /// - `InvalidParameter` if no datasets are given or a record has a zero dimension.
    /// - `EmptyDataset` if any dataset has no records.
    pub fn merge(datasets: Vec<RecordDataset>) -> Result<Self> {
        if datasets.is_empty() {
            return Err(SamplingError::invalid(
                "datasets",
                "at least one dataset is required",
            ));
        }

        for (source_index, dataset) in datasets.iter().enumerate() {
            if dataset.is_empty() {
                return Err(SamplingError::EmptyDataset {
                    name: dataset.name.clone(),
                    source_index,
                });
            }
        }

        let total: usize = datasets.iter().map(RecordDataset::len).sum();
        let mut records = Vec::with_capacity(total);
        let mut sizes = Vec::with_capacity(datasets.len());
        let mut offsets = Vec::with_capacity(datasets.len());
        let mut names = Vec::with_capacity(datasets.len());

        for (source_index, dataset) in datasets.into_iter().enumerate() {
            if let Some(position) = dataset
                .records
                .iter()
                .position(|r| r.width == 0 || r.height == 0)
            {
                return Err(SamplingError::invalid(
                    "width/height",
                    format!(
                        "record {} of dataset '{}' has zero size",
                        position, dataset.name
                    ),
                ));
            }

            offsets.push(records.len());
            sizes.push(dataset.records.len());
            records.extend(dataset.records.into_iter().map(|mut record| {
                record.assign_source(source_index);
                record
            }));
            names.push(dataset.name);
        }

        let merged = Self {
            records: records.into(),
            sizes,
            offsets,
            names,
        };
        info!(
            datasets = merged.num_datasets(),
            records = merged.len(),
            sizes = ?merged.sizes,
            "merged dataset records"
        );
        for source in 0..merged.num_datasets() {
            merged.log_histogram(source);
        }
        Ok(merged)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Returns a cheap handle to the shared record list.
    pub fn shared_records(&self) -> Arc<[Record]> {
        Arc::clone(&self.records)
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Per-dataset record counts, aligned with dataset order.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_datasets(&self) -> usize {
        self.sizes.len()
    }

    /// Index range of one DatasetGroup inside the merged list.
    ///
    /// # Panics
    /// If `source >= self.num_datasets()`.
    pub fn group_range(&self, source: usize) -> Range<usize> {
        let start = self.offsets[source];
        start..start + self.sizes[source]
    }

    /// Records of one DatasetGroup, in input order.
    pub fn group(&self, source: usize) -> &[Record] {
        &self.records[self.group_range(source)]
    }

    /// Maps a merged index back to the dataset it came from.
    pub fn source_of(&self, index: usize) -> Option<usize> {
        if index >= self.records.len() {
            return None;
        }
        Some(self.records[index].dataset_source())
    }

    /// Number of images containing each category, for one DatasetGroup.
    pub fn category_histogram(&self, source: usize) -> BTreeMap<CategoryId, usize> {
        let mut histogram = BTreeMap::new();
        for record in self.group(source) {
            for &category in &record.category_ids {
                *histogram.entry(category).or_insert(0) += 1;
            }
        }
        histogram
    }

    fn log_histogram(&self, source: usize) {
        let histogram = self.category_histogram(source);
        if histogram.is_empty() {
            return;
        }
        let (top_category, top_count) = histogram
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(&c, &n)| (c, n))
            .unwrap_or_default();
        debug!(
            dataset = %self.names[source],
            categories = histogram.len(),
            top_category,
            top_count,
            "category histogram"
        );
    }
}


#[cfg(test)]
mod merge_tests {
    use super::*;

    fn dataset(name: &str, n: usize) -> RecordDataset {
        RecordDataset::new(
            name,
            (0..n).map(|i| Record::new(10 + i as u32, 20)).collect(),
        )
    }

    #[test]
    fn tags_records_and_keeps_order() -> Result<()> {
        let merged = MergedRecords::merge(vec![dataset("a", 3), dataset("b", 2)])?;

        assert_eq!(merged.len(), 5);
        assert_eq!(merged.sizes(), &[3, 2]);
        assert_eq!(merged.sizes().iter().sum::<usize>(), merged.len());
        assert_eq!(merged.names(), &["a".to_string(), "b".to_string()]);

        let sources: Vec<_> = merged.records().iter().map(|r| r.dataset_source()).collect();
        assert_eq!(sources, vec![0, 0, 0, 1, 1]);

        // Within-dataset order is preserved
        let widths: Vec<_> = merged.group(0).iter().map(|r| r.width).collect();
        assert_eq!(widths, vec![10, 11, 12]);
        assert_eq!(merged.group_range(1), 3..5);
        Ok(())
    }

    #[test]
    fn rejects_empty_dataset() {
        let err = MergedRecords::merge(vec![dataset("a", 3), dataset("empty", 0)]).unwrap_err();
        assert_eq!(
            err,
            SamplingError::EmptyDataset {
                name: "empty".into(),
                source_index: 1
            }
        );
    }

    #[test]
    fn rejects_no_datasets_and_zero_sizes() {
        assert!(matches!(
            MergedRecords::merge(vec![]),
            Err(SamplingError::InvalidParameter { .. })
        ));

        let bad = RecordDataset::new("bad", vec![Record::new(0, 10)]);
        assert!(matches!(
            MergedRecords::merge(vec![bad]),
            Err(SamplingError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn source_lookup_and_histogram() -> Result<()> {
        let first = RecordDataset::new(
            "boxes",
            vec![
                Record::new(10, 10).with_categories([1, 2]),
                Record::new(10, 10).with_categories([1]),
            ],
        );
        let merged = MergedRecords::merge(vec![first, dataset("plain", 1)])?;

        assert_eq!(merged.source_of(1), Some(0));
        assert_eq!(merged.source_of(2), Some(1));
        assert_eq!(merged.source_of(3), None);

        let histogram = merged.category_histogram(0);
        assert_eq!(histogram.get(&1), Some(&2));
        assert_eq!(histogram.get(&2), Some(&1));
        assert!(merged.category_histogram(1).is_empty());
        Ok(())
    }

    #[test]
    fn serialized_records_take_source_from_the_next_merge() -> anyhow::Result<()> {
        let merged = MergedRecords::merge(vec![dataset("a", 1), dataset("b", 2)])?;
        let written = serde_json::to_string(merged.group(1))?;
        assert!(!written.contains("dataset_source"));

        // the provider output can be merged again in any position
        let records: Vec<Record> = serde_json::from_str(&written)?;
        assert!(records.iter().all(|r| r.dataset_source() == 0));
        let remerged = MergedRecords::merge(vec![
            dataset("c", 1),
            dataset("d", 1),
            RecordDataset::new("b_again", records),
        ])?;
        assert!(remerged.group(2).iter().all(|r| r.dataset_source() == 2));
        assert_eq!(remerged.group(2)[1].width, merged.group(1)[1].width);
        Ok(())
    }

    #[test]
    fn shared_records_are_readable_across_threads() -> Result<()> {
        let merged = MergedRecords::merge(vec![dataset("a", 50), dataset("b", 50)])?;

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let records = merged.shared_records();
                std::thread::spawn(move || records.iter().map(|r| r.width as u64).sum::<u64>())
            })
            .collect();

        let sums: Vec<u64> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(sums.windows(2).all(|w| w[0] == w[1]));
        Ok(())
    }
}
