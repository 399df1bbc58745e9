pub mod config;
pub mod db;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod store;
pub mod worker;

pub use config::{load_config, Config};
pub use error::{ConfigError, LeafscanError, Result, StorageError, WorkerError};
pub use inference::{CommandLoader, DispatchError, ModelRegistry};
pub use ingest::{enqueue_report, insert_model, EnqueueRequest, IngestError};
pub use model::{Model, ModelCategory, ModelId, ModelType, NewModel, ProcessingModelType, ReportId};
pub use store::Stores;
pub use worker::{PipelineWorker, RunMode, ShutdownSignal, WorkerPool};
