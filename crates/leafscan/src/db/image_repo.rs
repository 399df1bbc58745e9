//! Image repository: image metadata rows. The bytes live in blob storage.

use rusqlite::params;

use super::{DatabaseError, SqliteHandle};
use crate::model::{ImageId, UserId};

pub fn insert(db: &SqliteHandle, user_id: UserId, filename: &str) -> Result<ImageId, DatabaseError> {
    let created_at = super::now();
    db.with_conn("insert image", |conn| {
        conn.execute(
            "INSERT INTO images (user_id, filename, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, filename, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}
