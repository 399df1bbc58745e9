//! Store abstractions used by ingestion and the pipeline worker.
//!
//! [`Database`] holds images, reports and models, [`Queue`] holds pending
//! jobs and [`Storage`] holds binary blobs. [`Stores`] bundles one of each
//! as selected by the configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, StorageConfig};
use crate::db::queue_repo::{NewJob, QueueCounts, QueueElement};
use crate::db::report_repo::Report;
use crate::db::{DatabaseError, SqliteHandle};
use crate::error::StorageError;
use crate::model::{ImageId, Model, ModelId, NewModel, ProcessingModelType, ReportId, UserId};

mod filesystem;
mod sqlite;

pub use filesystem::FileStorage;
pub use sqlite::{DatabaseStorage, SqliteDatabase, SqliteQueue};

pub trait Database: Send + Sync {
    fn insert_image(&self, user_id: UserId, filename: &str) -> Result<ImageId, DatabaseError>;

    fn insert_classification_report(
        &self,
        user_id: UserId,
        image_id: ImageId,
        model_id: ModelId,
    ) -> Result<ReportId, DatabaseError>;

    fn insert_segmentation_report(
        &self,
        user_id: UserId,
        image_id: ImageId,
        model_id: ModelId,
        has_mask: bool,
    ) -> Result<ReportId, DatabaseError>;

    fn update_classification_report(
        &self,
        report_id: ReportId,
        disease: u32,
        severity: u32,
    ) -> Result<(), DatabaseError>;

    fn update_segmentation_report(
        &self,
        report_id: ReportId,
        stress_ratio: f64,
        severity: u32,
    ) -> Result<(), DatabaseError>;

    fn update_report_validity(
        &self,
        report_id: ReportId,
        report_type: ProcessingModelType,
        valid: bool,
    ) -> Result<(), DatabaseError>;

    fn enabled_models(&self) -> Result<BTreeMap<ModelId, Model>, DatabaseError>;

    fn insert_model(&self, model: &NewModel) -> Result<ModelId, DatabaseError>;

    fn set_model_enabled(&self, model_id: ModelId, enabled: bool) -> Result<(), DatabaseError>;

    fn find_report(&self, report_id: ReportId) -> Result<Option<Report>, DatabaseError>;
}

/// Durable FIFO queues. Dequeues are exclusive across every handle on the
/// same store.
pub trait Queue: Send + Sync {
    fn enqueue_processing(&self, job: &NewJob) -> Result<(), DatabaseError>;

    fn enqueue_validation(
        &self,
        validation_model_id: ModelId,
        job: &NewJob,
    ) -> Result<(), DatabaseError>;

    fn dequeue_processing(&self) -> Result<Option<QueueElement>, DatabaseError>;

    /// Dequeues the oldest validation job and buffers it until
    /// [`Queue::apply_validation_result`] is called with its id.
    fn dequeue_validation(&self) -> Result<Option<QueueElement>, DatabaseError>;

    fn has_processing_elements(&self) -> Result<bool, DatabaseError>;

    fn has_validation_elements(&self) -> Result<bool, DatabaseError>;

    /// Promotes (`passed`) or drops the buffered job. Returns `false` when
    /// nothing was buffered under `job_id`.
    fn apply_validation_result(&self, job_id: i64, passed: bool) -> Result<bool, DatabaseError>;

    fn counts(&self) -> Result<QueueCounts, DatabaseError>;
}

/// Blob storage keyed by the owning entity's id.
pub trait Storage: Send + Sync {
    fn store_image(&self, image_id: ImageId, data: &[u8]) -> Result<(), StorageError>;

    fn store_weights(&self, model_id: ModelId, data: &[u8]) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] if no weights were stored.
    fn retrieve_weights(&self, model_id: ModelId) -> Result<Vec<u8>, StorageError>;

    /// Stores a report's mask, replacing any earlier one.
    fn store_mask(&self, report_id: ReportId, data: &[u8]) -> Result<(), StorageError>;

    fn retrieve_mask(&self, report_id: ReportId) -> Result<Option<Vec<u8>>, StorageError>;
}

/// One database, queue and blob store, shared by everything a worker or
/// ingestion call touches.
#[derive(Clone)]
pub struct Stores {
    pub database: Arc<dyn Database>,
    pub queue: Arc<dyn Queue>,
    pub storage: Arc<dyn Storage>,
}

impl Stores {
    /// Opens a fresh connection to the configured database and the
    /// configured blob backend.
    pub fn open(config: &Config) -> Result<Self, StorageError> {
        let handle = SqliteHandle::open(
            &config.database.path,
            config.database.connection_settings(),
        )?;
        let storage: Arc<dyn Storage> = match &config.storage {
            StorageConfig::Database => Arc::new(DatabaseStorage::new(handle.clone())),
            StorageConfig::Filesystem { root } => Arc::new(FileStorage::new(root)),
        };
        Ok(Self::with_storage(handle, storage))
    }

    /// Builds stores on an existing handle with the given blob backend.
    pub fn with_storage(handle: SqliteHandle, storage: Arc<dyn Storage>) -> Self {
        Self {
            database: Arc::new(SqliteDatabase::new(handle.clone())),
            queue: Arc::new(SqliteQueue::new(handle)),
            storage,
        }
    }

    /// Everything in one SQLite handle, blobs included.
    pub fn sqlite(handle: SqliteHandle) -> Self {
        let storage = Arc::new(DatabaseStorage::new(handle.clone()));
        Self::with_storage(handle, storage)
    }
}
