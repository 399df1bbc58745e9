//! Model repository: registered models and their category/type lookups.

use std::collections::BTreeMap;

use rusqlite::{params, Row};

use super::{DatabaseError, SqliteHandle};
use crate::model::{Model, ModelCategory, ModelId, ModelType, NewModel};

const SELECT_MODELS: &str = "SELECT m.id, c.name AS category, t.name AS type_name, m.subtype,
     m.module, m.class_name, m.version, m.enabled
     FROM models m
     JOIN model_category c ON m.category_id = c.id
     JOIN model_type t ON m.type_id = t.id";

fn model_from_row(row: &Row<'_>) -> Result<Result<Model, DatabaseError>, rusqlite::Error> {
    let category: String = row.get("category")?;
    let type_name: String = row.get("type_name")?;
    let kind = category
        .parse::<ModelCategory>()
        .and_then(|c| ModelType::from_parts(c, &type_name))
        .map_err(|e| DatabaseError::InvalidRow {
            table: "models",
            reason: e.to_string(),
        });

    Ok(match kind {
        Ok(kind) => Ok(Model {
            id: row.get("id")?,
            kind,
            subtype: row.get("subtype")?,
            module: row.get("module")?,
            class_name: row.get("class_name")?,
            version: row.get("version")?,
            enabled: row.get("enabled")?,
        }),
        Err(e) => Err(e),
    })
}

/// Inserts a model row and returns its id.
///
/// The category and type are resolved against the lookup tables together,
/// so a type registered under a different category is rejected.
pub fn insert(db: &SqliteHandle, model: &NewModel) -> Result<ModelId, DatabaseError> {
    let created_at = super::now();
    db.atomic("insert model", |tx| {
        let inserted = tx.execute(
            "INSERT INTO models (category_id, type_id, subtype, module, class_name, version, enabled, created_at)
             SELECT c.id, t.id, ?3, ?4, ?5, ?6, ?7, ?8
             FROM model_type t JOIN model_category c ON t.category_id = c.id
             WHERE c.name = ?1 AND t.name = ?2",
            params![
                model.kind.category().as_str(),
                model.kind.name(),
                model.subtype,
                model.module,
                model.class_name,
                model.version,
                model.enabled,
                created_at,
            ],
        )?;
        if inserted == 0 {
            return Err(DatabaseError::InvalidArgument(format!(
                "model type {} is not registered",
                model.kind
            )));
        }
        Ok(tx.last_insert_rowid())
    })
}

/// Returns all enabled models keyed by id.
pub fn enabled(db: &SqliteHandle) -> Result<BTreeMap<ModelId, Model>, DatabaseError> {
    db.with_conn("load enabled models", |conn| {
        let mut stmt = conn.prepare(&format!("{} WHERE m.enabled = 1 ORDER BY m.id", SELECT_MODELS))?;
        let rows = stmt
            .query_map([], model_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut models = BTreeMap::new();
        for row in rows {
            let model = row?;
            models.insert(model.id, model);
        }
        Ok(models)
    })
}

/// Toggles the `enabled` flag of a model.
pub fn set_enabled(db: &SqliteHandle, id: ModelId, enabled: bool) -> Result<(), DatabaseError> {
    db.with_conn("toggle model", |conn| {
        let updated = conn.execute(
            "UPDATE models SET enabled = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound { entity: "model", id });
        }
        Ok(())
    })
}
