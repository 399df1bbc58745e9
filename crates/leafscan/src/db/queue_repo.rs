//! Queue repository: the processing queue, the validation queue and the
//! buffer that holds validation jobs while their verdict is pending.
//!
//! Every mutation that touches more than one row runs inside
//! [`SqliteHandle::atomic`], so a failure at any step leaves all three
//! tables exactly as they were.

use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{DatabaseError, SqliteHandle};
use crate::model::{ImageId, ModelId, ProcessingModelType, ReportId};

/// A job to append to one of the queues.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub image_id: ImageId,
    /// The processing model that will eventually produce the report.
    pub model_id: ModelId,
    pub report_type: ProcessingModelType,
    pub report_id: ReportId,
    pub image: Vec<u8>,
    /// Required for segmentation jobs, ignored for classification.
    pub generate_mask: Option<bool>,
}

/// A job removed from the head of a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueElement {
    /// Queue-local id; for validation jobs this is also the buffer key.
    pub id: i64,
    /// The model to dispatch to. For validation jobs this is the
    /// validation model, not the processing model carried in the buffer.
    pub model_id: ModelId,
    pub report_id: ReportId,
    pub report_type: ProcessingModelType,
    pub image: Vec<u8>,
    pub generate_mask: bool,
}

impl QueueElement {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            model_id: row.get("model_id")?,
            report_id: row.get("report_id")?,
            report_type: row.get("report_type")?,
            image: row.get("image")?,
            generate_mask: row.get::<_, Option<bool>>("generate_mask")?.unwrap_or(false),
        })
    }
}

/// Row counts of the three queue tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub processing: u64,
    pub validation: u64,
    pub buffer: u64,
}

fn check_mask_flag(job: &NewJob) -> Result<(), DatabaseError> {
    if job.report_type == ProcessingModelType::Segmentation && job.generate_mask.is_none() {
        return Err(DatabaseError::InvalidArgument(format!(
            "segmentation job for report {} needs a generate_mask flag",
            job.report_id
        )));
    }
    Ok(())
}

/// Appends a job to the processing queue.
pub fn enqueue_processing(db: &SqliteHandle, job: &NewJob) -> Result<i64, DatabaseError> {
    check_mask_flag(job)?;
    let enqueued_at = super::now();
    db.with_conn("enqueue processing job", |conn| {
        conn.execute(
            "INSERT INTO processing_queue
             (image_id, model_id, report_id, report_type, image, generate_mask, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.image_id,
                job.model_id,
                job.report_id,
                job.report_type,
                job.image,
                job.generate_mask,
                enqueued_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Appends a job to the validation queue. The row carries both the model
/// that judges the image and the processing model to run afterwards.
pub fn enqueue_validation(
    db: &SqliteHandle,
    validation_model_id: ModelId,
    job: &NewJob,
) -> Result<i64, DatabaseError> {
    check_mask_flag(job)?;
    let enqueued_at = super::now();
    db.with_conn("enqueue validation job", |conn| {
        conn.execute(
            "INSERT INTO validation_queue
             (image_id, validation_model_id, model_id, report_id, report_type, image,
              generate_mask, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.image_id,
                validation_model_id,
                job.model_id,
                job.report_id,
                job.report_type,
                job.image,
                job.generate_mask,
                enqueued_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Removes and returns the oldest processing job.
pub fn dequeue_processing(db: &SqliteHandle) -> Result<Option<QueueElement>, DatabaseError> {
    db.atomic("dequeue processing job", |tx| {
        let Some(element) = tx
            .query_row(
                "SELECT id, model_id, report_id, report_type, image, generate_mask
                 FROM processing_queue ORDER BY id LIMIT 1",
                [],
                QueueElement::from_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        tx.execute("DELETE FROM processing_queue WHERE id = ?1", params![element.id])?;
        Ok(Some(element))
    })
}

/// Removes the oldest validation job and parks it in the buffer, in one
/// transaction. The returned element targets the validation model.
pub fn dequeue_validation(db: &SqliteHandle) -> Result<Option<QueueElement>, DatabaseError> {
    db.atomic("dequeue validation job", |tx| {
        let Some(element) = tx
            .query_row(
                "SELECT id, validation_model_id AS model_id, report_id, report_type, image,
                 generate_mask
                 FROM validation_queue ORDER BY id LIMIT 1",
                [],
                QueueElement::from_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        copy_to_buffer(tx, element.id)?;
        tx.execute("DELETE FROM validation_queue WHERE id = ?1", params![element.id])?;
        Ok(Some(element))
    })
}

fn copy_to_buffer(tx: &Transaction<'_>, id: i64) -> Result<(), DatabaseError> {
    tx.execute(
        "INSERT INTO buffer
         (id, image_id, model_id, report_id, report_type, image, generate_mask, buffered_at)
         SELECT id, image_id, model_id, report_id, report_type, image, generate_mask, ?2
         FROM validation_queue WHERE id = ?1",
        params![id, super::now()],
    )?;
    Ok(())
}

pub fn has_processing_elements(db: &SqliteHandle) -> Result<bool, DatabaseError> {
    db.with_conn("check processing queue", |conn| {
        Ok(conn.query_row("SELECT EXISTS(SELECT 1 FROM processing_queue)", [], |r| r.get(0))?)
    })
}

pub fn has_validation_elements(db: &SqliteHandle) -> Result<bool, DatabaseError> {
    db.with_conn("check validation queue", |conn| {
        Ok(conn.query_row("SELECT EXISTS(SELECT 1 FROM validation_queue)", [], |r| r.get(0))?)
    })
}

/// Resolves a buffered validation job.
///
/// When `passed`, the buffered row is appended to the processing queue.
/// The buffer row is removed either way. Returns `false` if nothing was
/// buffered under `job_id`, which happens when a result is re-applied after
/// a restart.
pub fn apply_validation_result(
    db: &SqliteHandle,
    job_id: i64,
    passed: bool,
) -> Result<bool, DatabaseError> {
    let now = super::now();
    db.atomic("apply validation result", |tx| {
        if passed {
            tx.execute(
                "INSERT INTO processing_queue
                 (image_id, model_id, report_id, report_type, image, generate_mask, enqueued_at)
                 SELECT image_id, model_id, report_id, report_type, image, generate_mask, ?2
                 FROM buffer WHERE id = ?1",
                params![job_id, now],
            )?;
        }
        let removed = tx.execute("DELETE FROM buffer WHERE id = ?1", params![job_id])?;
        Ok(removed > 0)
    })
}

pub fn counts(db: &SqliteHandle) -> Result<QueueCounts, DatabaseError> {
    db.with_conn("count queue rows", |conn| {
        Ok(conn.query_row(
            "SELECT (SELECT COUNT(*) FROM processing_queue),
                    (SELECT COUNT(*) FROM validation_queue),
                    (SELECT COUNT(*) FROM buffer)",
            [],
            |r| {
                Ok(QueueCounts {
                    processing: r.get::<_, i64>(0)? as u64,
                    validation: r.get::<_, i64>(1)? as u64,
                    buffer: r.get::<_, i64>(2)? as u64,
                })
            },
        )?)
    })
}
