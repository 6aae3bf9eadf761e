//! src/loader/iterator.rs
//!
//! Iterator over grouped batches.
//!
//! Two variants, chosen by `num_workers`:
//! - `Inline`: indices are materialized on the calling thread, one at a time.
//! - `Workers`: indices are numbered in sampling order and routed to worker
//!   `seq % num_workers`. Results come back in any order and are re-sequenced
//!   before grouping, so both variants feed the grouper the exact same items in
//!   the exact same order.
//!
//! The number of records sent to workers but not yet handed to the grouper never
//! exceeds `num_workers * prefetch_factor`. That bound is also the capacity of the
//! output channel, so workers never block on send.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::config::LoaderConfig;
use super::loader::Materialize;
use super::workers::materialize::{
    materialize_one, spawn_workers, MaterializeOutput, MaterializeTask,
};
use super::workers::pool::WorkerPool;
use crate::batch::Batch;
use crate::grouper::AspectRatioGrouper;
use crate::record::Record;

type IndexStream<'a> = Box<dyn Iterator<Item = usize> + Send + 'a>;

/// Iterator over batches of materialized items.
///
/// Created by calling `loader.iter()`. The stream is infinite for the samplers in
/// this crate; stop by dropping the iterator, which also stops the workers.
/// Items still sitting in partial buckets are discarded at that point.
pub struct LoaderIter<'a, M: Materialize> {
    indices: IndexStream<'a>,
    grouper: AspectRatioGrouper<M::Output>,
    inner: ItemSource<'a, M>,
}

enum ItemSource<'a, M: Materialize> {
    Inline {
        records: &'a [Record],
        materializer: &'a M,
    },
    Workers(WorkerFeed<M::Output>),
}

/// Ordered view over a worker pool.
///
/// - `next_seq`: sequence number of the next task to send
/// - `next_expected`: sequence number of the next result to hand out
/// - `reorder`: results that arrived ahead of `next_expected`
struct WorkerFeed<T> {
    pool: WorkerPool<MaterializeTask, MaterializeOutput<T>>,
    max_in_flight: u64,
    next_seq: u64,
    next_expected: u64,
    reorder: BTreeMap<u64, Result<T>>,
    timeout: Duration,
}

impl<'a, M: Materialize> LoaderIter<'a, M> {
    pub(crate) fn inline(
        indices: IndexStream<'a>,
        grouper: AspectRatioGrouper<M::Output>,
        records: &'a [Record],
        materializer: &'a M,
    ) -> Self {
        Self {
            indices,
            grouper,
            inner: ItemSource::Inline {
                records,
                materializer,
            },
        }
    }

    pub(crate) fn with_workers(
        indices: IndexStream<'a>,
        grouper: AspectRatioGrouper<M::Output>,
        records: Arc<[Record]>,
        materializer: Arc<M>,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let pool = spawn_workers(
            config.num_workers,
            config.prefetch_factor,
            config.worker_poll_interval,
            records,
            materializer,
        )?;
        debug!(
            num_workers = config.num_workers,
            max_in_flight = config.max_in_flight(),
            "started materialization workers"
        );
        Ok(Self {
            indices,
            grouper,
            inner: ItemSource::Workers(WorkerFeed {
                pool,
                max_in_flight: config.max_in_flight() as u64,
                next_seq: 0,
                next_expected: 0,
                reorder: BTreeMap::new(),
                timeout: config.timeout,
            }),
        })
    }

    /// Items waiting in partial buckets.
    pub fn pending(&self) -> usize {
        self.grouper.pending()
    }

    /// Empties the partial buckets into short batches. Not called automatically.
    pub fn drain_partial(&mut self) -> Vec<Batch<M::Output>> {
        self.grouper.drain_partial()
    }

    fn next_item(&mut self) -> Option<Result<M::Output>> {
        match &mut self.inner {
            ItemSource::Inline {
                records,
                materializer,
            } => {
                let index = self.indices.next()?;
                Some(materialize_one(*materializer, *records, index))
            }
            ItemSource::Workers(feed) => feed.next(&mut self.indices),
        }
    }
}

impl<T: Send + 'static> WorkerFeed<T> {
    fn next(&mut self, indices: &mut IndexStream<'_>) -> Option<Result<T>> {
        // Keep the pipeline full up to `max_in_flight`
        while self.next_seq - self.next_expected < self.max_in_flight {
            let Some(index) = indices.next() else {
                break;
            };
            let worker = (self.next_seq % self.pool.num_workers() as u64) as usize;
            let task = MaterializeTask {
                seq: self.next_seq,
                index,
            };
            if let Err(e) = self.pool.send_to(worker, task) {
                return Some(Err(e.context(format!(
                    "Failed to send record {} to worker {}",
                    index, worker
                ))));
            }
            self.next_seq += 1;
        }

        if self.next_expected == self.next_seq {
            return None;
        }

        loop {
            if let Some(result) = self.reorder.remove(&self.next_expected) {
                self.next_expected += 1;
                return Some(result);
            }
            match self.pool.recv_timeout(self.timeout) {
                Ok((seq, result)) => {
                    self.reorder.insert(seq, result);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<M: Materialize> Iterator for LoaderIter<'_, M> {
    type Item = Result<Batch<M::Output>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_item()? {
                Ok(item) => {
                    if let Some(batch) = self.grouper.push(item) {
                        return Some(Ok(batch));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
