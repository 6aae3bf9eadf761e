//! Worker management for parallel record materialization.
//!
//! - `pool`: Generic worker pool with per-worker channels
//! - `materialize`: The worker loop that turns sampled indices into items

pub(crate) mod materialize;
pub(crate) mod pool;
