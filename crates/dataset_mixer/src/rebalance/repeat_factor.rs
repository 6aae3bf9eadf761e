//! Repeat-factor estimation from identity frequency.
//!
//! For a DatasetGroup of `N` images and a threshold `t`:
//! ```text
//! freq(c) = (#images containing c) / N
//! rep(c)  = max(1.0, sqrt(t / freq(c)))
//! r(img)  = max(rep(c) for c in img), or 1.0 for an image with no identities
//! ```
//! Identities at or above the threshold frequency are never oversampled; an
//! identity ten times rarer than `t` gets `sqrt(10)`.
//!
//! Box-annotated datasets read `category_ids`, tag-annotated datasets read
//! `tag_ids`; the computation is otherwise identical.

use super::{image_frequencies, renormalize};
use crate::record::{AnnotationKind, Record};
use std::collections::BTreeMap;

/// Per-identity repeat value `rep(c)` for one DatasetGroup.
pub fn identity_repeat_values(
    records: &[Record],
    kind: AnnotationKind,
    repeat_threshold: f64,
) -> BTreeMap<u32, f64> {
    image_frequencies(records, kind)
        .into_iter()
        .map(|(id, freq)| (id, f64::max(1.0, (repeat_threshold / freq).sqrt())))
        .collect()
}

/// Raw per-record repeat factors, aligned with `records`.
pub fn repeat_factors(records: &[Record], kind: AnnotationKind, repeat_threshold: f64) -> Vec<f64> {
    let identity_rep = identity_repeat_values(records, kind, repeat_threshold);
    records
        .iter()
        .map(|record| {
            record
                .identities(kind)
                .iter()
                .map(|id| identity_rep[id])
                .fold(1.0, f64::max)
        })
        .collect()
}

/// Repeat factors rescaled so they sum to `records.len()`.
pub fn normalized_repeat_factors(
    records: &[Record],
    kind: AnnotationKind,
    repeat_threshold: f64,
) -> Vec<f64> {
    let mut factors = repeat_factors(records, kind, repeat_threshold);
    renormalize(&mut factors, records.len() as f64);
    factors
}
