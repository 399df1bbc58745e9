//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies pending
//! ones in order. The whole run happens inside one IMMEDIATE transaction so
//! workers starting at the same time against one database file apply each
//! migration exactly once.

use rusqlite::{Connection, TransactionBehavior};

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_model_tables",
        sql: include_str!("sql/001_create_models.sql"),
    },
    Migration {
        version: 2,
        description: "create_images_and_reports",
        sql: include_str!("sql/002_create_images_and_reports.sql"),
    },
    Migration {
        version: 3,
        description: "create_queue_tables",
        sql: include_str!("sql/003_create_queues.sql"),
    },
    Migration {
        version: 4,
        description: "create_blob_tables",
        sql: include_str!("sql/004_create_blobs.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, table: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get::<_, u32>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&mut conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();
        // Running again should be a no-op.
        run_all(&mut conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_queue_and_buffer_tables_exist() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();

        for table in ["processing_queue", "validation_queue", "buffer", "reports", "models"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_model_types_are_seeded_per_category() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();

        let category: String = conn
            .query_row(
                "SELECT c.name FROM model_type t JOIN model_category c ON t.category_id = c.id
                 WHERE t.name = 'SEGMENTATION'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(category, "PROCESSING");
    }

    #[test]
    fn test_report_variant_constraint() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();

        conn.execute_batch(
            "INSERT INTO images (user_id, filename, created_at) VALUES (1, 'a.jpg', 'now');
             INSERT INTO models (category_id, type_id, subtype, module, class_name, version, created_at)
             VALUES (2, 2, 'resnet', 'resnet50', 'ResNet50', '1.0.0', 'now');",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO reports (user_id, image_id, model_id, report_type, stress_ratio, created_at)
             VALUES (1, 1, 1, 'CLASSIFICATION', 0.5, 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
