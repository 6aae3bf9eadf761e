//! Worker and concurrency tests for MultiDatasetLoader.
//!
//! Tests cover:
//! - Multi-worker output identical to inline materialization
//! - Materializer failures surfacing as `Err` items
//! - Worker timeouts and shutdown on drop
//! - Worker identification and sharing the loader across threads

mod common;
use common::{decode, detection_and_captions, init_tracing, Decoded, TEST_SEED};
use dataset_mixer::{
    loader::current_worker_id, AnnotationKind, Batch, DatasetPolicy, DistributedContext,
    LoaderConfig, MultiDatasetLoader, PipelineConfig, Record,
};

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn pipeline() -> PipelineConfig {
    PipelineConfig::builder()
        .dataset(DatasetPolicy::new(1.0).with_repeat_factor(AnnotationKind::Box))
        .dataset(DatasetPolicy::new(2.0))
        .repeat_threshold(0.2)
        .seed(TEST_SEED)
        .per_dataset_batch_sizes(vec![4, 3])
        .build()
}

fn collect_indices(batches: impl Iterator<Item = Result<Batch<Decoded>>>) -> Result<Vec<Vec<usize>>> {
    batches
        .map(|batch| -> Result<Vec<usize>> {
            Ok(batch?.items().iter().map(|d| d.index).collect())
        })
        .collect()
}

#[test]
fn test_workers_match_inline_output() -> Result<()> {
    init_tracing();
    let inline = MultiDatasetLoader::new(
        detection_and_captions(),
        &pipeline(),
        DistributedContext::single(),
        decode,
        LoaderConfig::default(),
    )?;
    let expected = collect_indices(inline.iter()?.take(60))?;

    for (num_workers, prefetch_factor) in [(1, 1), (3, 2), (4, 8)] {
        let threaded = MultiDatasetLoader::new(
            detection_and_captions(),
            &pipeline(),
            DistributedContext::single(),
            decode,
            LoaderConfig::builder()
                .num_workers(num_workers)
                .prefetch_factor(prefetch_factor)
                .build(),
        )?;
        let actual = collect_indices(threaded.iter()?.take(60))?;
        assert_eq!(actual, expected, "{} workers, prefetch {}", num_workers, prefetch_factor);
    }
    Ok(())
}

#[test]
fn test_uneven_worker_latency_keeps_order() -> Result<()> {
    // Worker 0 is slow; results from the others arrive first and must be re-sequenced.
    let materialize = |index: usize, record: &Record| {
        if current_worker_id() == Some(0) {
            thread::sleep(Duration::from_millis(2));
        }
        decode(index, record)
    };
    let threaded = MultiDatasetLoader::new(
        detection_and_captions(),
        &pipeline(),
        DistributedContext::single(),
        materialize,
        LoaderConfig::builder().num_workers(3).prefetch_factor(4).build(),
    )?;
    let inline = MultiDatasetLoader::new(
        detection_and_captions(),
        &pipeline(),
        DistributedContext::single(),
        decode,
        LoaderConfig::default(),
    )?;

    assert_eq!(
        collect_indices(threaded.iter_epoch(3)?.take(20))?,
        collect_indices(inline.iter_epoch(3)?.take(20))?
    );
    Ok(())
}

#[test]
fn test_materializer_error_becomes_err_item() -> Result<()> {
    let failing = |index: usize, record: &Record| {
        if index % 7 == 3 {
            bail!("corrupt image {}", index);
        }
        decode(index, record)
    };

    for num_workers in [0, 2] {
        let loader = MultiDatasetLoader::new(
            detection_and_captions(),
            &pipeline(),
            DistributedContext::single(),
            failing,
            LoaderConfig::builder().num_workers(num_workers).build(),
        )?;

        let results: Vec<_> = loader.iter()?.take(200).collect();
        let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert!(!errors.is_empty(), "{} workers", num_workers);

        let message = format!("{:#}", errors[0]);
        assert!(message.contains("corrupt image"), "{}", message);
        assert!(message.contains("Failed to materialize record"), "{}", message);

        // successful batches never contain a failed index
        for batch in results.iter().filter_map(|r| r.as_ref().ok()) {
            assert!(batch.items().iter().all(|d| d.index % 7 != 3));
        }
    }
    Ok(())
}

#[test]
fn test_mislabeled_source_becomes_err_item() -> Result<()> {
    // every seventh item claims a dataset the loader does not have
    let mislabel = |index: usize, record: &Record| -> Result<Decoded> {
        let mut item = decode(index, record)?;
        if index % 7 == 3 {
            item.source = 7;
        }
        Ok(item)
    };

    for num_workers in [0, 2] {
        let loader = MultiDatasetLoader::new(
            detection_and_captions(),
            &pipeline(),
            DistributedContext::single(),
            mislabel,
            LoaderConfig::builder().num_workers(num_workers).build(),
        )?;

        let results: Vec<_> = loader.iter()?.take(200).collect();
        let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert!(!errors.is_empty(), "{} workers", num_workers);

        let message = format!("{:#}", errors[0]);
        assert!(message.contains("reports source 7"), "{}", message);

        for batch in results.iter().filter_map(|r| r.as_ref().ok()) {
            let source = batch.dataset_source.expect("per-dataset grouping");
            assert!(batch.items().iter().all(|d| d.source == source));
        }
    }
    Ok(())
}

#[test]
fn test_stuck_worker_times_out() -> Result<()> {
    let stuck = |index: usize, record: &Record| {
        thread::sleep(Duration::from_millis(300));
        decode(index, record)
    };
    let loader = MultiDatasetLoader::new(
        detection_and_captions(),
        &pipeline(),
        DistributedContext::single(),
        stuck,
        LoaderConfig::builder()
            .num_workers(1)
            .prefetch_factor(1)
            .timeout(Duration::from_millis(20))
            .worker_poll_interval(Duration::from_millis(5))
            .build(),
    )?;

    let mut iter = loader.iter()?;
    let err = iter.next().expect("infinite stream").unwrap_err();
    assert!(err.to_string().contains("Worker timeout"));

    // dropping the iterator joins the worker once its current record finishes
    let start = Instant::now();
    drop(iter);
    assert!(start.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[test]
fn test_workers_are_identified_and_bounded() -> Result<()> {
    let seen_workers = Arc::new(Mutex::new(HashSet::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let materialize = {
        let seen_workers = Arc::clone(&seen_workers);
        let calls = Arc::clone(&calls);
        move |index: usize, record: &Record| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = current_worker_id() {
                seen_workers.lock().unwrap().insert(id);
            }
            decode(index, record)
        }
    };
    let loader = MultiDatasetLoader::new(
        detection_and_captions(),
        &pipeline(),
        DistributedContext::single(),
        materialize,
        LoaderConfig::builder().num_workers(3).prefetch_factor(2).build(),
    )?;

    let mut iter = loader.iter()?;
    let batch = iter.next().expect("infinite stream")?;
    let handed_out = batch.len() + iter.pending();
    drop(iter);

    // tasks beyond what was handed to the grouper never exceed max_in_flight
    let materialized = calls.load(Ordering::SeqCst);
    assert!(materialized >= handed_out);
    assert!(materialized <= handed_out + loader.config().max_in_flight());

    let seen = seen_workers.lock().unwrap();
    assert!(seen.iter().all(|&id| id < 3));
    assert!(!seen.is_empty());
    Ok(())
}

#[test]
fn test_loader_is_shared_across_threads() -> Result<()> {
    let loader = Arc::new(MultiDatasetLoader::new(
        detection_and_captions(),
        &pipeline(),
        DistributedContext::single(),
        decode,
        LoaderConfig::builder().num_workers(2).build(),
    )?);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let loader = Arc::clone(&loader);
            thread::spawn(move || -> Result<Vec<Vec<usize>>> {
                collect_indices(loader.iter_epoch(5)?.take(10))
            })
        })
        .collect();

    let outputs = handles
        .into_iter()
        .map(|h| h.join().expect("loader thread panicked"))
        .collect::<Result<Vec<_>>>()?;
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    Ok(())
}

#[test]
fn test_iter_advances_epochs() -> Result<()> {
    let loader = MultiDatasetLoader::new(
        detection_and_captions(),
        &pipeline(),
        DistributedContext::single(),
        decode,
        LoaderConfig::default(),
    )?;
    assert_eq!(loader.next_epoch(), 0);

    let epoch0 = collect_indices(loader.iter()?.take(10))?;
    let epoch1 = collect_indices(loader.iter()?.take(10))?;
    assert_eq!(loader.next_epoch(), 2);

    assert_eq!(epoch0, collect_indices(loader.iter_epoch(0)?.take(10))?);
    assert_ne!(epoch0, epoch1);
    Ok(())
}
