use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeafscanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Model error: {0}")]
    Model(#[from] crate::model::ModelError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] crate::ingest::IngestError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::inference::DispatchError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("No configuration file found (pass --config or set LEAFSCAN_CONFIG)")]
    NotFound,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob store database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No {kind} stored for id {id}")]
    NotFound { kind: &'static str, id: i64 },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] crate::inference::DispatchError),

    #[error("Report store failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Blob storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker {0} panicked")]
    Panicked(usize),
}

pub type Result<T> = std::result::Result<T, LeafscanError>;
