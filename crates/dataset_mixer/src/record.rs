use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a box-annotation category.
pub type CategoryId = u32;
/// Identifier of a free-text tag (e.g. a phrase from a region description).
pub type TagId = u32;

/// Which identity space of a [`Record`] a dataset is annotated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Box annotations, read from `category_ids`.
    Box,
    /// Free-text tags, read from `tag_ids`.
    Tag,
}

/// Coarse aspect-ratio class used to bucket images before batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectClass {
    /// `width > height`
    Wide,
    /// `width <= height` (square images fall here)
    Tall,
}

impl AspectClass {
    pub fn of(width: u32, height: u32) -> Self {
        if width > height {
            AspectClass::Wide
        } else {
            AspectClass::Tall
        }
    }

    /// Offset of this class inside a dataset's pair of buckets.
    pub fn bucket_offset(self) -> usize {
        match self {
            AspectClass::Wide => 0,
            AspectClass::Tall => 1,
        }
    }
}

/// The metadata the batch grouper needs from anything it groups.
///
/// Implemented by [`Record`] itself and by whatever the materialization step turns
/// records into (decoded images, mapped training dicts, ...), so grouping can run
/// either before or after materialization.
pub trait ImageMeta {
    fn dataset_source(&self) -> usize;
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn aspect_class(&self) -> AspectClass {
        AspectClass::of(self.width(), self.height())
    }
}

/// Per-example metadata consumed by the sampling pipeline.
///
/// Records are built by the record provider and handed over per dataset. The
/// `dataset_source` tag is assigned exactly once, when the datasets are merged
/// (see [`MergedRecords::merge`](crate::dataset::MergedRecords::merge)), and is
/// read-only afterwards.
///
/// Identity sets are ordered so every frequency and weight computation walks them
/// in the same order on every rank.
///
/// Serialization covers the provider-side fields only. `dataset_source` is never
/// written; a deserialized record gets its source from the merge it goes through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub category_ids: BTreeSet<CategoryId>,
    #[serde(default)]
    pub tag_ids: BTreeSet<TagId>,
    /// Optional handle the materialization step can use to locate the image.
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(skip)]
    dataset_source: usize,
}

impl Record {
    /// Creates a record with no annotations.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            category_ids: BTreeSet::new(),
            tag_ids: BTreeSet::new(),
            file_name: None,
            dataset_source: 0,
        }
    }

    /// Adds box-annotation categories. Duplicates collapse.
    pub fn with_categories(mut self, ids: impl IntoIterator<Item = CategoryId>) -> Self {
        self.category_ids.extend(ids);
        self
    }

    /// Adds free-text tags. Duplicates collapse.
    pub fn with_tags(mut self, ids: impl IntoIterator<Item = TagId>) -> Self {
        self.tag_ids.extend(ids);
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Returns the identity set of the given annotation kind.
    pub fn identities(&self, kind: AnnotationKind) -> &BTreeSet<u32> {
        match kind {
            AnnotationKind::Box => &self.category_ids,
            AnnotationKind::Tag => &self.tag_ids,
        }
    }

    pub(crate) fn assign_source(&mut self, source: usize) {
        self.dataset_source = source;
    }
}

impl ImageMeta for Record {
    fn dataset_source(&self) -> usize {
        self.dataset_source
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}
