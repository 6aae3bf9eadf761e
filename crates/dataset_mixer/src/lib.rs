pub mod batch;
pub mod config;
pub mod dataset;
pub mod error;
pub mod grouper;
pub mod loader;
pub mod rebalance;
pub mod record;
pub mod sampler;

pub use batch::Batch;
pub use config::{
    BatchSizes, ClassBalancePolicy, DatasetPolicy, GroupingConfig, PipelineConfig,
    RepeatFactorPolicy, SamplerConfig, SamplerKind,
};
pub use dataset::{MergedRecords, RecordDataset};
pub use error::SamplingError;
pub use grouper::AspectRatioGrouper;
pub use loader::{
    CloneRecord, LoaderConfig, LoaderIter, Materialize, MultiDatasetLoader, RecordLoader,
};
pub use record::{AnnotationKind, AspectClass, ImageMeta, Record};
pub use sampler::{DistributedContext, MultiDatasetSampler, Sampler, UniformSampler};
