use crate::record::AspectClass;

/// The `Batch` struct is one group of items emitted by the
/// [`AspectRatioGrouper`](crate::grouper::AspectRatioGrouper).
///
/// Every item in a batch shares the same aspect class and, when grouping per
/// dataset, the same `dataset_source`. Item order is arrival order.
///
/// # Examples
/// With `batch_size = 4`, four wide images from dataset 1 produce:
/// - `dataset_source` -> `Some(1)`
/// - `aspect` -> `AspectClass::Wide`
/// - `items` -> the four images, in the order they arrived
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    /// `None` when the grouper buckets by aspect class only.
    pub dataset_source: Option<usize>,
    pub aspect: AspectClass,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    /// Returns the number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Applies `f` to every item, keeping the batch's source and aspect.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Batch<U> {
        Batch {
            dataset_source: self.dataset_source,
            aspect: self.aspect,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}
