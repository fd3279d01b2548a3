use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerdocError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Schema violation: {0}")]
    Schema(#[from] crate::pipeline::SchemaViolation),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No home directory available to derive the default database path")]
    NoHomeDirectory,
}

#[derive(Error, Debug)]
pub enum StorageError {
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

    #[error("Upload of '{name}' failed: {reason}")]
    Upload { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema violation: {0}")]
    Schema(#[from] crate::pipeline::SchemaViolation),
}

pub type Result<T> = std::result::Result<T, LedgerdocError>;
