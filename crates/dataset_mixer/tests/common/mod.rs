#![allow(dead_code)]

use dataset_mixer::{ImageMeta, Record, RecordDataset};
use std::sync::Once;

pub const TEST_SEED: u64 = 42;

/// Installs a `tracing` subscriber once per test binary. Filter with `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `n` records alternating between wide and tall, with categories cycling over
/// `num_categories`. Every fifth record has no categories.
pub fn make_dataset(name: &str, n: usize, num_categories: u32) -> RecordDataset {
    let records = (0..n)
        .map(|i| {
            let (width, height) = if i % 2 == 0 { (640, 480) } else { (480, 640) };
            let record = Record::new(width, height).with_file_name(format!("{}/{:06}.jpg", name, i));
            if i % 5 == 4 {
                record
            } else {
                record.with_categories([i as u32 % num_categories])
            }
        })
        .collect();
    RecordDataset::new(name, records)
}

/// A detection-style dataset and a smaller caption-style dataset annotated with tags.
pub fn detection_and_captions() -> Vec<RecordDataset> {
    let captions = RecordDataset::new(
        "captions",
        (0..40)
            .map(|i| {
                let record = Record::new(500 + i % 7, 500);
                if i % 4 == 0 {
                    record
                } else {
                    record.with_tags([i % 6])
                }
            })
            .collect(),
    );
    vec![make_dataset("detection", 200, 10), captions]
}

/// An item produced by a test materializer: the record's grouping metadata plus
/// the merged index it was sampled from.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub index: usize,
    pub source: usize,
    pub width: u32,
    pub height: u32,
}

impl ImageMeta for Decoded {
    fn dataset_source(&self) -> usize {
        self.source
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

pub fn decode(index: usize, record: &Record) -> anyhow::Result<Decoded> {
    Ok(Decoded {
        index,
        source: record.dataset_source(),
        width: record.width,
        height: record.height,
    })
}
