use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dataset_mixer::{
    AnnotationKind, AspectRatioGrouper, BatchSizes, DatasetPolicy, DistributedContext,
    MergedRecords, MultiDatasetSampler, Record, RecordDataset, Sampler, SamplerConfig,
};

/// Benchmarks for the weighted sampler and the batch grouper.
///
/// This measures:
/// 1. Weight computation: merge + repeat factors + class balance for growing datasets
/// 2. Draw throughput: indices per second from the infinite stream
/// 3. Grouping throughput: records per second through the aspect-ratio grouper
///
/// To run these, use:
/// ```bash
/// cargo bench --bench sampler_bench
/// ```

const SIZES: [usize; 3] = [1_000, 10_000, 100_000];
const DRAWS: usize = 100_000;

fn make_datasets(size: usize) -> Vec<RecordDataset> {
    let detection = (0..size)
        .map(|i| {
            let (w, h) = if i % 3 == 0 { (480, 640) } else { (640, 480) };
            Record::new(w, h).with_categories([(i % 97) as u32, (i % 1_013) as u32])
        })
        .collect();
    let captions = (0..size / 10)
        .map(|i| Record::new(512, 512).with_tags([(i % 211) as u32]))
        .collect();
    vec![
        RecordDataset::new("detection", detection),
        RecordDataset::new("captions", captions),
    ]
}

fn config() -> SamplerConfig {
    SamplerConfig {
        datasets: vec![
            DatasetPolicy::new(1.0)
                .with_repeat_factor(AnnotationKind::Box)
                .with_class_balance(1.0),
            DatasetPolicy::new(1.0).with_repeat_factor(AnnotationKind::Tag),
        ],
        seed: Some(0),
        ..SamplerConfig::default()
    }
}

/// Measure sampler construction (weight vector + cumulative weight table)
fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sampler Construction");

    for &size in &SIZES {
        let merged = MergedRecords::merge(make_datasets(size)).unwrap();
        group.throughput(Throughput::Elements(merged.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &merged, |b, merged| {
            b.iter(|| {
                MultiDatasetSampler::new(black_box(merged), &config(), DistributedContext::single())
                    .unwrap()
            })
        });
    }
    group.finish();
}

/// Measure draw throughput for one rank of eight
fn bench_draws(c: &mut Criterion) {
    let mut group = c.benchmark_group("Weighted Draws");
    group.throughput(Throughput::Elements(DRAWS as u64));

    for &size in &SIZES {
        let merged = MergedRecords::merge(make_datasets(size)).unwrap();
        let context = DistributedContext::new(3, 8).unwrap();
        let sampler = MultiDatasetSampler::new(&merged, &config(), context).unwrap();
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| sampler.iter(0).take(DRAWS).fold(0usize, |acc, i| acc ^ black_box(i)))
        });
    }
    group.finish();
}

/// Measure grouping throughput on sampled records
fn bench_grouping(c: &mut Criterion) {
    let merged = MergedRecords::merge(make_datasets(10_000)).unwrap();
    let sampler = MultiDatasetSampler::new(&merged, &config(), DistributedContext::single()).unwrap();
    let sampled: Vec<Record> = sampler
        .iter(0)
        .take(DRAWS)
        .map(|i| merged.records()[i].clone())
        .collect();

    let mut group = c.benchmark_group("Aspect Grouping");
    group.throughput(Throughput::Elements(DRAWS as u64));
    for batch_size in [8, 32] {
        group.bench_function(BenchmarkId::from_parameter(batch_size), |b| {
            b.iter(|| {
                let grouper =
                    AspectRatioGrouper::new(2, &BatchSizes::Uniform(batch_size)).unwrap();
                grouper.group(sampled.iter().cloned()).count()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_construction, bench_draws, bench_grouping);
criterion_main!(benches);
