//! Class-balance factor estimation.
//!
//! A second rebalancing pass over box categories only, independent of repeat
//! factors:
//! ```text
//! w(img) = sum over c in img of 1 / freq(c)^l
//! ```
//! with `freq(c)` the fraction of images in the DatasetGroup containing `c`.
//! Images without categories get a raw weight of `1.0`, the weight an image would
//! get if its only category appeared in every image. Factors are renormalized to
//! sum to the group's size.
//!
//! Large exponents push `1 / freq^l` past `f64::MAX`, so the normalized factors are
//! computed from `ln w(img)` and never from the raw weights.

use super::image_frequencies;
use crate::error::{Result, SamplingError};
use crate::record::{AnnotationKind, Record};

/// Default inverse-frequency exponent `l`.
pub const DEFAULT_EXPONENT: f64 = 1.0;

/// Raw per-record class-balance weights, aligned with `records`.
///
/// Entries are `inf` when a weight exceeds the `f64` range; use
/// [`normalized_class_balance_factors`] for sampling weights.
pub fn class_balance_factors(records: &[Record], exponent: f64) -> Vec<f64> {
    log_class_balance_factors(records, exponent)
        .into_iter()
        .map(f64::exp)
        .collect()
}

/// `ln w(img)` per record, as a log-sum-exp over the record's categories.
fn log_class_balance_factors(records: &[Record], exponent: f64) -> Vec<f64> {
    let freq = image_frequencies(records, AnnotationKind::Box);
    records
        .iter()
        .map(|record| {
            let terms: Vec<f64> = record
                .category_ids
                .iter()
                .map(|category| -exponent * freq[category].ln())
                .collect();
            log_sum_exp(&terms)
        })
        .collect()
}

/// `ln(sum exp(x))`; `0.0` (i.e. `ln 1`) for an empty slice.
fn log_sum_exp(values: &[f64]) -> f64 {
    let Some(max) = values.iter().copied().reduce(f64::max) else {
        return 0.0;
    };
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Class-balance weights rescaled so they sum to `records.len()`.
///
/// # Errors
/// `InvalidParameter("class_balance.exponent")` when a normalized factor is too
/// small to be represented, i.e. the exponent spreads the weights over more than
/// the `f64` range.
pub fn normalized_class_balance_factors(records: &[Record], exponent: f64) -> Result<Vec<f64>> {
    let logs = log_class_balance_factors(records, exponent);
    let log_total = log_sum_exp(&logs);
    let log_size = (records.len() as f64).ln();

    let factors: Vec<f64> = logs
        .iter()
        .map(|log_w| (log_w - log_total + log_size).exp())
        .collect();
    if let Some(position) = factors.iter().position(|f| !(f.is_finite() && *f > 0.0)) {
        return Err(SamplingError::invalid(
            "class_balance.exponent",
            format!(
                "exponent {} underflows the class-balance factor of record {}",
                exponent, position
            ),
        ));
    }
    Ok(factors)
}
