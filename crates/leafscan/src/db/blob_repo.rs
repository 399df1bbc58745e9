//! Blob tables for the database storage backend.

use rusqlite::{params, OptionalExtension};

use super::{DatabaseError, SqliteHandle};

/// The blob tables, each keyed by the id of the entity it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobTable {
    Images,
    Weights,
    Masks,
}

impl BlobTable {
    fn name(&self) -> &'static str {
        match self {
            BlobTable::Images => "image_data",
            BlobTable::Weights => "weights",
            BlobTable::Masks => "masks",
        }
    }
}

/// Writes a blob, replacing any previous one stored under `id`.
pub fn put(db: &SqliteHandle, table: BlobTable, id: i64, data: &[u8]) -> Result<(), DatabaseError> {
    let sql = format!("INSERT OR REPLACE INTO {} (id, data) VALUES (?1, ?2)", table.name());
    db.with_conn("store blob", |conn| {
        conn.execute(&sql, params![id, data])?;
        Ok(())
    })
}

pub fn get(db: &SqliteHandle, table: BlobTable, id: i64) -> Result<Option<Vec<u8>>, DatabaseError> {
    let sql = format!("SELECT data FROM {} WHERE id = ?1", table.name());
    db.with_conn("load blob", |conn| {
        Ok(conn.query_row(&sql, params![id], |r| r.get(0)).optional()?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_replaces_and_tables_are_separate() {
        let db = SqliteHandle::open_in_memory().unwrap();
        put(&db, BlobTable::Masks, 1, b"first").unwrap();
        put(&db, BlobTable::Masks, 1, b"second").unwrap();

        assert_eq!(get(&db, BlobTable::Masks, 1).unwrap(), Some(b"second".to_vec()));
        assert_eq!(get(&db, BlobTable::Weights, 1).unwrap(), None);
    }
}
