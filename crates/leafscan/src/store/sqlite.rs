//! SQLite-backed implementations of the store traits.

use std::collections::BTreeMap;

use super::{Database, Queue, Storage};
use crate::db::blob_repo::{self, BlobTable};
use crate::db::queue_repo::{self, NewJob, QueueCounts, QueueElement};
use crate::db::report_repo::{self, Report};
use crate::db::{image_repo, model_repo, DatabaseError, SqliteHandle};
use crate::error::StorageError;
use crate::model::{ImageId, Model, ModelId, NewModel, ProcessingModelType, ReportId, UserId};

pub struct SqliteDatabase {
    db: SqliteHandle,
}

impl SqliteDatabase {
    pub fn new(db: SqliteHandle) -> Self {
        Self { db }
    }
}

impl Database for SqliteDatabase {
    fn insert_image(&self, user_id: UserId, filename: &str) -> Result<ImageId, DatabaseError> {
        image_repo::insert(&self.db, user_id, filename)
    }

    fn insert_classification_report(
        &self,
        user_id: UserId,
        image_id: ImageId,
        model_id: ModelId,
    ) -> Result<ReportId, DatabaseError> {
        report_repo::insert_classification(&self.db, user_id, image_id, model_id)
    }

    fn insert_segmentation_report(
        &self,
        user_id: UserId,
        image_id: ImageId,
        model_id: ModelId,
        has_mask: bool,
    ) -> Result<ReportId, DatabaseError> {
        report_repo::insert_segmentation(&self.db, user_id, image_id, model_id, has_mask)
    }

    fn update_classification_report(
        &self,
        report_id: ReportId,
        disease: u32,
        severity: u32,
    ) -> Result<(), DatabaseError> {
        report_repo::update_classification(&self.db, report_id, disease, severity)
    }

    fn update_segmentation_report(
        &self,
        report_id: ReportId,
        stress_ratio: f64,
        severity: u32,
    ) -> Result<(), DatabaseError> {
        report_repo::update_segmentation(&self.db, report_id, stress_ratio, severity)
    }

    fn update_report_validity(
        &self,
        report_id: ReportId,
        report_type: ProcessingModelType,
        valid: bool,
    ) -> Result<(), DatabaseError> {
        report_repo::update_validity(&self.db, report_id, report_type, valid)
    }

    fn enabled_models(&self) -> Result<BTreeMap<ModelId, Model>, DatabaseError> {
        model_repo::enabled(&self.db)
    }

    fn insert_model(&self, model: &NewModel) -> Result<ModelId, DatabaseError> {
        model_repo::insert(&self.db, model)
    }

    fn set_model_enabled(&self, model_id: ModelId, enabled: bool) -> Result<(), DatabaseError> {
        model_repo::set_enabled(&self.db, model_id, enabled)
    }

    fn find_report(&self, report_id: ReportId) -> Result<Option<Report>, DatabaseError> {
        report_repo::find_by_id(&self.db, report_id)
    }
}

pub struct SqliteQueue {
    db: SqliteHandle,
}

impl SqliteQueue {
    pub fn new(db: SqliteHandle) -> Self {
        Self { db }
    }
}

impl Queue for SqliteQueue {
    fn enqueue_processing(&self, job: &NewJob) -> Result<(), DatabaseError> {
        let id = queue_repo::enqueue_processing(&self.db, job)?;
        log::debug!("Enqueued processing job {} for report {}", id, job.report_id);
        Ok(())
    }

    fn enqueue_validation(
        &self,
        validation_model_id: ModelId,
        job: &NewJob,
    ) -> Result<(), DatabaseError> {
        let id = queue_repo::enqueue_validation(&self.db, validation_model_id, job)?;
        log::debug!("Enqueued validation job {} for report {}", id, job.report_id);
        Ok(())
    }

    fn dequeue_processing(&self) -> Result<Option<QueueElement>, DatabaseError> {
        queue_repo::dequeue_processing(&self.db)
    }

    fn dequeue_validation(&self) -> Result<Option<QueueElement>, DatabaseError> {
        queue_repo::dequeue_validation(&self.db)
    }

    fn has_processing_elements(&self) -> Result<bool, DatabaseError> {
        queue_repo::has_processing_elements(&self.db)
    }

    fn has_validation_elements(&self) -> Result<bool, DatabaseError> {
        queue_repo::has_validation_elements(&self.db)
    }

    fn apply_validation_result(&self, job_id: i64, passed: bool) -> Result<bool, DatabaseError> {
        queue_repo::apply_validation_result(&self.db, job_id, passed)
    }

    fn counts(&self) -> Result<QueueCounts, DatabaseError> {
        queue_repo::counts(&self.db)
    }
}

/// Blob storage in the `image_data`, `weights` and `masks` tables.
pub struct DatabaseStorage {
    db: SqliteHandle,
}

impl DatabaseStorage {
    pub fn new(db: SqliteHandle) -> Self {
        Self { db }
    }
}

impl Storage for DatabaseStorage {
    fn store_image(&self, image_id: ImageId, data: &[u8]) -> Result<(), StorageError> {
        Ok(blob_repo::put(&self.db, BlobTable::Images, image_id, data)?)
    }

    fn store_weights(&self, model_id: ModelId, data: &[u8]) -> Result<(), StorageError> {
        Ok(blob_repo::put(&self.db, BlobTable::Weights, model_id, data)?)
    }

    fn retrieve_weights(&self, model_id: ModelId) -> Result<Vec<u8>, StorageError> {
        blob_repo::get(&self.db, BlobTable::Weights, model_id)?.ok_or(StorageError::NotFound {
            kind: "weights",
            id: model_id,
        })
    }

    fn store_mask(&self, report_id: ReportId, data: &[u8]) -> Result<(), StorageError> {
        Ok(blob_repo::put(&self.db, BlobTable::Masks, report_id, data)?)
    }

    fn retrieve_mask(&self, report_id: ReportId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(blob_repo::get(&self.db, BlobTable::Masks, report_id)?)
    }
}
