//! src/loader/mod.rs
//!
//! This module implements the `MultiDatasetLoader`.
//!
//! The loader wires every stage of the pipeline together for one rank and yields
//! an endless stream of shape-homogeneous batches.
//!
//! # Architecture Overview
//!
//! ```text
//!              ┌────────────────────┐
//!              │ Vec<RecordDataset> │ (from the record provider)
//!              └─────────┬──────────┘
//!                        │ filter_empty (optional), merge + tag sources
//!                        ↓
//!                ┌───────────────┐
//!                │ MergedRecords │ ──── Arc<[Record]>, shared read-only
//!                └───────┬───────┘
//!                        │ dataset ratio × repeat factor × class balance
//!                        ↓
//!                   ┌─────────┐
//!                   │ Sampler │ (infinite, seeded, strided by rank)
//!                   └────┬────┘
//!                        │ record indices
//!                        ↓
//!                 [Worker Threads] (optional; `Materialize` runs here)
//!                        │ items, re-sequenced into sampling order
//!                        ↓
//!             ┌─────────────────────┐
//!             │ AspectRatioGrouper  │ (dataset × aspect buckets)
//!             └──────────┬──────────┘
//!                        ↓
//!                    Batch<T>
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/loader/
//! ├── mod.rs             # Public API exports + architecture docs
//! ├── config.rs          # LoaderConfig and builder
//! ├── loader.rs          # MultiDatasetLoader, Materialize
//! ├── iterator.rs        # LoaderIter (inline and worker variants)
//! ├── workers/
//! │   ├── mod.rs
//! │   ├── pool.rs        # Generic `WorkerPool<Task, Output>`
//! │   └── materialize.rs # Worker loop and task types
//! └── common/
//!     ├── mod.rs
//!     └── thread.rs      # Thread-local worker ID
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let pipeline = PipelineConfig::from_json_file("mixer.json")?;
//! let loader = RecordLoader::for_records(
//!     datasets,
//!     &pipeline,
//!     DistributedContext::new(rank, world_size)?.with_shared_seed(seed),
//!     LoaderConfig::default(),
//! )?;
//!
//! for batch in loader.iter()?.take(1000) {
//!     let batch = batch?;
//!     // every record in `batch` shares dataset and aspect class
//! }
//! ```
//!
//! # Performance Guidelines
//! - `num_workers = 0`: Materialization on the calling thread, no extra memory
//! - `num_workers > 0`: At most `num_workers x prefetch_factor` items in flight
//!   besides what sits in partial buckets

mod common;
mod config;
mod iterator;
#[allow(clippy::module_inception)]
mod loader;
mod workers;

pub use common::thread::{current_worker_id, WORKER_ID};
pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use iterator::LoaderIter;
pub use loader::{CloneRecord, Materialize, MultiDatasetLoader, RecordLoader};
