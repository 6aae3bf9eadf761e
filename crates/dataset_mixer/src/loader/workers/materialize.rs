//! src/loader/workers/materialize.rs
//!
//! Worker loop for materializing sampled records.
//!
//! Workers share the merged record list and the materializer via `Arc`. Each task
//! carries the sequence number the main thread assigned to it, and every result
//! goes back tagged with that number so the main thread can restore sampling order.

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::pool::WorkerPool;
use crate::loader::common::thread::current_worker_id;
use crate::loader::loader::Materialize;
use crate::record::{ImageMeta, Record};

/// One sampled index to materialize.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MaterializeTask {
    pub(crate) seq: u64,
    pub(crate) index: usize,
}

/// A materialized item (or the failure) tagged with its task's sequence number.
pub(crate) type MaterializeOutput<T> = (u64, Result<T>);

/// Materializes one record, with the record index in the error context.
///
/// The item must report the same `dataset_source` as its record; anything else
/// would land in another dataset's bucket (or none), so it becomes an error here.
pub(crate) fn materialize_one<M: Materialize>(
    materializer: &M,
    records: &[Record],
    index: usize,
) -> Result<M::Output> {
    let record = records.get(index).ok_or_else(|| {
        anyhow!(
            "Record index {} out of range ({} records)",
            index,
            records.len()
        )
    })?;
    let item = materializer
        .materialize(index, record)
        .with_context(|| format!("Failed to materialize record {}", index))?;

    if item.dataset_source() != record.dataset_source() {
        bail!(
            "Materialized item for record {} reports source {} but the record belongs to dataset {}",
            index,
            item.dataset_source(),
            record.dataset_source()
        );
    }
    Ok(item)
}

/// Spawns `num_workers` materialization workers.
pub(crate) fn spawn_workers<M: Materialize>(
    num_workers: usize,
    prefetch_factor: usize,
    poll_interval: Duration,
    records: Arc<[Record]>,
    materializer: Arc<M>,
) -> Result<WorkerPool<MaterializeTask, MaterializeOutput<M::Output>>> {
    WorkerPool::new(
        num_workers,
        prefetch_factor,
        move |task_rx, output_tx, shutdown| {
            let worker_id = current_worker_id().unwrap_or_default();

            while !shutdown.load(Ordering::Relaxed) {
                match task_rx.recv_timeout(poll_interval) {
                    Ok(MaterializeTask { seq, index }) => {
                        let result = materialize_one(materializer.as_ref(), &records, index)
                            .with_context(|| format!("Worker {} failed", worker_id));
                        if output_tx.send((seq, result)).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        },
    )
    .context("Failed to create materialization worker pool")
}
