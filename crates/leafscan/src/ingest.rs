//! Ingestion: registering models and turning an uploaded image into a
//! pending report plus a queued job.

use thiserror::Error;

use crate::db::queue_repo::NewJob;
use crate::db::DatabaseError;
use crate::error::StorageError;
use crate::model::{ModelCategory, ModelId, NewModel, ProcessingModelType, ReportId, UserId};
use crate::store::Stores;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Model {model_id} is registered as {registered}, not {declared}")]
    ModelTypeMismatch {
        model_id: ModelId,
        declared: ProcessingModelType,
        registered: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// An image submitted for diagnosis.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub user_id: UserId,
    pub filename: String,
    pub image: Vec<u8>,
    pub processing_model_id: ModelId,
    /// The type the caller expects the processing model to have.
    pub processing_model_type: ProcessingModelType,
    /// Only meaningful for segmentation.
    pub generate_mask: bool,
    /// Gate the job behind this validation model first.
    pub validation_model_id: Option<ModelId>,
}

/// Creates the image and report rows for `request` and queues its job.
///
/// Every check runs before the first write, so a rejected request leaves
/// no rows behind.
pub fn enqueue_report(stores: &Stores, request: &EnqueueRequest) -> Result<ReportId, IngestError> {
    validate(stores, request)?;

    let database = &stores.database;
    let image_id = database.insert_image(request.user_id, &request.filename)?;
    stores.storage.store_image(image_id, &request.image)?;

    let (report_id, generate_mask) = match request.processing_model_type {
        ProcessingModelType::Classification => (
            database.insert_classification_report(
                request.user_id,
                image_id,
                request.processing_model_id,
            )?,
            None,
        ),
        ProcessingModelType::Segmentation => (
            database.insert_segmentation_report(
                request.user_id,
                image_id,
                request.processing_model_id,
                request.generate_mask,
            )?,
            Some(request.generate_mask),
        ),
    };

    let job = NewJob {
        image_id,
        model_id: request.processing_model_id,
        report_type: request.processing_model_type,
        report_id,
        image: request.image.clone(),
        generate_mask,
    };
    match request.validation_model_id {
        Some(validation_model_id) => stores.queue.enqueue_validation(validation_model_id, &job)?,
        None => stores.queue.enqueue_processing(&job)?,
    }

    log::info!(
        "Queued report {} for user {} ({}, validation: {})",
        report_id,
        request.user_id,
        request.processing_model_type,
        request
            .validation_model_id
            .map_or_else(|| "none".to_string(), |id| id.to_string())
    );
    Ok(report_id)
}

fn validate(stores: &Stores, request: &EnqueueRequest) -> Result<(), IngestError> {
    let models = stores.database.enabled_models()?;

    let model = models
        .get(&request.processing_model_id)
        .filter(|m| m.category() == ModelCategory::Processing)
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!(
                "model {} is not an enabled processing model",
                request.processing_model_id
            ))
        })?;

    if model.kind.as_processing() != Some(request.processing_model_type) {
        return Err(IngestError::ModelTypeMismatch {
            model_id: model.id,
            declared: request.processing_model_type,
            registered: model.kind.name().to_string(),
        });
    }

    if request.generate_mask && request.processing_model_type != ProcessingModelType::Segmentation {
        return Err(IngestError::InvalidArgument(
            "masks can only be generated by segmentation models".to_string(),
        ));
    }

    if let Some(validation_model_id) = request.validation_model_id {
        let is_validation = models
            .get(&validation_model_id)
            .is_some_and(|m| m.category() == ModelCategory::Validation);
        if !is_validation {
            return Err(IngestError::InvalidArgument(format!(
                "model {} is not an enabled validation model",
                validation_model_id
            )));
        }
    }

    Ok(())
}

/// Registers a model and stores its weights. Returns the new model id.
///
/// The row is inserted disabled and only enabled once its weights are
/// stored, so workers never load a model without weights.
pub fn insert_model(stores: &Stores, model: &NewModel, weights: &[u8]) -> Result<ModelId, IngestError> {
    let model_id = stores.database.insert_model(&NewModel {
        enabled: false,
        ..model.clone()
    })?;
    stores.storage.store_weights(model_id, weights)?;
    if model.enabled {
        stores.database.set_model_enabled(model_id, true)?;
    }
    log::info!("Registered model {} as {} v{}", model_id, model.kind, model.version);
    Ok(model_id)
}
