//! Database module for the durable queue, report and model tables.
//!
//! Uses rusqlite (SQLite) with a thread-safe `SqliteHandle`. Each worker
//! opens its own handle on the shared database file; SQLite's single-writer
//! lock is what serializes dequeuers across handles and processes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};

use crate::model::ProcessingModelType;

pub mod blob_repo;
pub mod error;
pub mod image_repo;
pub mod migrations;
pub mod model_repo;
pub mod queue_repo;
pub mod report_repo;

pub use error::DatabaseError;

/// Connection tuning shared by every handle opened from one configuration.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// How long SQLite itself waits on a held lock before reporting busy.
    pub busy_timeout: Duration,
    /// Retries of a whole atomic unit after a transient failure.
    pub max_retries: u32,
    /// Base delay between retries; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            max_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// How a failed attempt should be recovered.
enum Recovery {
    /// Another writer held the lock; wait and retry.
    Retry,
    /// The connection itself is broken; reopen it and retry.
    Reconnect,
}

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`) and clones share the connection. Every
/// operation goes through [`SqliteHandle::with_conn`] or
/// [`SqliteHandle::atomic`], which retry the whole unit on transient errors
/// and surface [`DatabaseError::StoreUnavailable`] once retries run out.
#[derive(Clone)]
pub struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    settings: ConnectionSettings,
}

impl SqliteHandle {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path, settings: ConnectionSettings) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = open_connection(path, &settings)?;
        migrations::run_all(&mut conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
            settings,
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
            settings: ConnectionSettings::default(),
        })
    }

    /// Provides locked access to the underlying connection for single
    /// statements that need no transaction.
    pub fn with_conn<F, T>(&self, operation: &'static str, mut f: F) -> Result<T, DatabaseError>
    where
        F: FnMut(&Connection) -> Result<T, DatabaseError>,
    {
        self.retrying(operation, |conn| f(conn))
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction and commits it.
    ///
    /// The write lock is taken when the transaction begins, so no other
    /// writer can interleave with `f`. If `f` fails the transaction rolls
    /// back and no partial state is visible. Transient failures re-run `f`
    /// from the start on a fresh transaction.
    pub fn atomic<F, T>(&self, operation: &'static str, mut f: F) -> Result<T, DatabaseError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        self.retrying(operation, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn retrying<F, T>(&self, operation: &'static str, mut attempt: F) -> Result<T, DatabaseError>
    where
        F: FnMut(&mut Connection) -> Result<T, DatabaseError>,
    {
        let mut failures: u32 = 0;
        loop {
            let result = {
                let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
                attempt(&mut conn)
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let Some(recovery) = classify(&err) else {
                return Err(err);
            };

            failures += 1;
            if failures > self.settings.max_retries {
                let DatabaseError::Sqlite(source) = err else {
                    return Err(err);
                };
                return Err(DatabaseError::StoreUnavailable {
                    operation,
                    attempts: failures,
                    source,
                });
            }

            log::warn!(
                "Transient store failure during {} (attempt {}/{}): {}",
                operation,
                failures,
                self.settings.max_retries,
                err
            );

            if let Recovery::Reconnect = recovery {
                if let Err(e) = self.reconnect() {
                    log::warn!("Reconnect failed during {}: {}", operation, e);
                }
            }

            thread::sleep(self.settings.retry_backoff * failures);
        }
    }

    fn reconnect(&self) -> Result<(), DatabaseError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fresh = open_connection(path, &self.settings)?;
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        *conn = fresh;
        log::info!("Reconnected to database at {}", path.display());
        Ok(())
    }
}

fn open_connection(path: &Path, settings: &ConnectionSettings) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(settings.busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn classify(err: &DatabaseError) -> Option<Recovery> {
    let DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) = err else {
        return None;
    };
    match failure.code {
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Some(Recovery::Retry),
        ErrorCode::CannotOpen | ErrorCode::SystemIoFailure => Some(Recovery::Reconnect),
        _ => None,
    }
}

// Report types are stored by name so rows stay readable from the sqlite shell.
impl ToSql for ProcessingModelType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ProcessingModelType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Current UTC time in the RFC 3339 form stored in timestamp columns.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy_error() -> DatabaseError {
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn fast_settings(max_retries: u32) -> ConnectionSettings {
        ConnectionSettings {
            busy_timeout: Duration::from_millis(10),
            max_retries,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let db = SqliteHandle::open_in_memory().unwrap();
        db.with_conn("count migrations", |conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = SqliteHandle::open(&path, ConnectionSettings::default()).unwrap();
        db.with_conn("count migrations", |conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_handle_is_clone() {
        let db = SqliteHandle::open_in_memory().unwrap();
        let db2 = db.clone();
        db.with_conn("insert image", |conn| {
            conn.execute(
                "INSERT INTO images (user_id, filename, created_at) VALUES (1, 'leaf.jpg', '2026-01-01')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db2.with_conn("count images", |conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_atomic_rolls_back_on_error() {
        let db = SqliteHandle::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.atomic("failing unit", |tx| {
            tx.execute(
                "INSERT INTO images (user_id, filename, created_at) VALUES (1, 'a.jpg', '2026-01-01')",
                [],
            )?;
            Err(DatabaseError::InvalidArgument("abort".to_string()))
        });
        assert!(matches!(result, Err(DatabaseError::InvalidArgument(_))));

        let count: u32 = db
            .with_conn("count images", |conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let db = SqliteHandle {
            settings: fast_settings(3),
            ..SqliteHandle::open_in_memory().unwrap()
        };
        let calls = AtomicU32::new(0);
        let value = db
            .with_conn("flaky", |_| {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy_error())
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_retries_surface_store_unavailable() {
        let db = SqliteHandle {
            settings: fast_settings(2),
            ..SqliteHandle::open_in_memory().unwrap()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), DatabaseError> = db.with_conn("always busy", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(busy_error())
        });
        match result {
            Err(DatabaseError::StoreUnavailable {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "always busy");
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected StoreUnavailable, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_non_transient_errors_are_not_retried() {
        let db = SqliteHandle::open_in_memory().unwrap();
        let calls = AtomicU32::new(0);
        let result: Result<(), DatabaseError> = db.with_conn("bad sql", |conn| {
            calls.fetch_add(1, Ordering::SeqCst);
            conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
            Ok(())
        });
        assert!(matches!(result, Err(DatabaseError::Sqlite(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
