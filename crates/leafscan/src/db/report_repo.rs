//! Report repository.
//!
//! Both report variants share the `reports` table; `report_type` selects
//! the variant and CHECK constraints keep the other variant's columns
//! empty. Updates match on both id and type, so writing segmentation
//! results into a classification report fails with `NotFound`.

use rusqlite::{params, OptionalExtension, Row};

use super::{DatabaseError, SqliteHandle};
use crate::model::{ImageId, ModelId, ProcessingModelType, ReportId, UserId};

/// Variant-specific result fields. `None` until processing completes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportDetails {
    Classification {
        disease: Option<u32>,
        severity: Option<u32>,
    },
    Segmentation {
        stress_ratio: Option<f64>,
        severity: Option<u32>,
        has_mask: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: ReportId,
    pub user_id: UserId,
    pub image_id: ImageId,
    pub model_id: ModelId,
    pub details: ReportDetails,
    pub valid: Option<bool>,
    pub processed_at: Option<String>,
    pub created_at: String,
}

impl Report {
    pub fn report_type(&self) -> ProcessingModelType {
        match self.details {
            ReportDetails::Classification { .. } => ProcessingModelType::Classification,
            ReportDetails::Segmentation { .. } => ProcessingModelType::Segmentation,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let report_type: ProcessingModelType = row.get("report_type")?;
        let details = match report_type {
            ProcessingModelType::Classification => ReportDetails::Classification {
                disease: row.get("disease_id")?,
                severity: row.get("severity_id")?,
            },
            ProcessingModelType::Segmentation => ReportDetails::Segmentation {
                stress_ratio: row.get("stress_ratio")?,
                severity: row.get("severity_id")?,
                has_mask: row.get("has_mask")?,
            },
        };
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            image_id: row.get("image_id")?,
            model_id: row.get("model_id")?,
            details,
            valid: row.get("valid")?,
            processed_at: row.get("processed_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

fn insert(
    db: &SqliteHandle,
    user_id: UserId,
    image_id: ImageId,
    model_id: ModelId,
    report_type: ProcessingModelType,
    has_mask: bool,
) -> Result<ReportId, DatabaseError> {
    let created_at = super::now();
    db.with_conn("insert report", |conn| {
        conn.execute(
            "INSERT INTO reports (user_id, image_id, model_id, report_type, has_mask, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user_id, image_id, model_id, report_type, has_mask, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Creates an unprocessed classification report.
pub fn insert_classification(
    db: &SqliteHandle,
    user_id: UserId,
    image_id: ImageId,
    model_id: ModelId,
) -> Result<ReportId, DatabaseError> {
    insert(db, user_id, image_id, model_id, ProcessingModelType::Classification, false)
}

/// Creates an unprocessed segmentation report. `has_mask` records whether a
/// mask was requested for it.
pub fn insert_segmentation(
    db: &SqliteHandle,
    user_id: UserId,
    image_id: ImageId,
    model_id: ModelId,
    has_mask: bool,
) -> Result<ReportId, DatabaseError> {
    insert(db, user_id, image_id, model_id, ProcessingModelType::Segmentation, has_mask)
}

fn expect_updated(updated: usize, id: ReportId) -> Result<(), DatabaseError> {
    if updated == 0 {
        return Err(DatabaseError::NotFound { entity: "report", id });
    }
    Ok(())
}

/// Writes classification results and marks the report processed.
pub fn update_classification(
    db: &SqliteHandle,
    id: ReportId,
    disease: u32,
    severity: u32,
) -> Result<(), DatabaseError> {
    let processed_at = super::now();
    db.with_conn("update classification report", |conn| {
        let updated = conn.execute(
            "UPDATE reports SET disease_id = ?2, severity_id = ?3, processed_at = ?4
             WHERE id = ?1 AND report_type = 'CLASSIFICATION'",
            params![id, disease, severity, processed_at],
        )?;
        expect_updated(updated, id)
    })
}

/// Writes segmentation results and marks the report processed.
pub fn update_segmentation(
    db: &SqliteHandle,
    id: ReportId,
    stress_ratio: f64,
    severity: u32,
) -> Result<(), DatabaseError> {
    let processed_at = super::now();
    db.with_conn("update segmentation report", |conn| {
        let updated = conn.execute(
            "UPDATE reports SET stress_ratio = ?2, severity_id = ?3, processed_at = ?4
             WHERE id = ?1 AND report_type = 'SEGMENTATION'",
            params![id, stress_ratio, severity, processed_at],
        )?;
        expect_updated(updated, id)
    })
}

pub fn update_validity(
    db: &SqliteHandle,
    id: ReportId,
    report_type: ProcessingModelType,
    valid: bool,
) -> Result<(), DatabaseError> {
    db.with_conn("update report validity", |conn| {
        let updated = conn.execute(
            "UPDATE reports SET valid = ?3 WHERE id = ?1 AND report_type = ?2",
            params![id, report_type, valid],
        )?;
        expect_updated(updated, id)
    })
}

pub fn find_by_id(db: &SqliteHandle, id: ReportId) -> Result<Option<Report>, DatabaseError> {
    db.with_conn("find report", |conn| {
        Ok(conn
            .query_row(
                "SELECT id, user_id, image_id, model_id, report_type, disease_id, severity_id,
                 stress_ratio, has_mask, valid, processed_at, created_at
                 FROM reports WHERE id = ?1",
                params![id],
                Report::from_row,
            )
            .optional()?)
    })
}
