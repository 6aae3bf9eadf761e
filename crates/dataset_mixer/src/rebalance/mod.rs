//! src/rebalance/mod.rs
//!
//! Per-record rebalancing factors computed within one DatasetGroup.
//!
//! Two independent estimators live here:
//! - `repeat_factor`: oversamples images containing rare categories/tags until each
//!   identity reaches a target per-image frequency.
//! - `class_balance`: inverse-frequency weighting over box categories.
//!
//! Both return one factor per record, aligned with the group's record order, and are
//! renormalized so the factors of a group sum to the group's size. That keeps every
//! dataset's total sampling mass unchanged; only its distribution across records moves.

pub mod class_balance;
pub mod repeat_factor;

pub use class_balance::{class_balance_factors, normalized_class_balance_factors};
pub use repeat_factor::{identity_repeat_values, normalized_repeat_factors, repeat_factors};

use crate::record::{AnnotationKind, Record};
use std::collections::BTreeMap;

/// Fraction of images in `records` that contain each identity of `kind`.
pub(crate) fn image_frequencies(records: &[Record], kind: AnnotationKind) -> BTreeMap<u32, f64> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for record in records {
        for &id in record.identities(kind) {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    let num_images = records.len() as f64;
    counts
        .into_iter()
        .map(|(id, count)| (id, count as f64 / num_images))
        .collect()
}

/// Rescales `factors` in place so they sum to `target_sum`.
///
/// A vector that sums to zero (or is empty) is left as all ones, since there is no
/// mass to redistribute. Non-finite sums propagate into the factors; callers that
/// can overflow work in log space instead (see `class_balance`).
pub fn renormalize(factors: &mut [f64], target_sum: f64) {
    let total: f64 = factors.iter().sum();
    if total == 0.0 {
        factors.iter_mut().for_each(|f| *f = 1.0);
        return;
    }
    let scale = target_sum / total;
    factors.iter_mut().for_each(|f| *f *= scale);
}
