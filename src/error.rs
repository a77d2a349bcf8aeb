//! Error types for the analysis pipeline.
//!
//! Client layers return [`StorageError`] and [`ServiceError`]; report reads
//! return [`StoreError`]. The
//! orchestrator folds everything into [`AnalysisError`], whose `Display`
//! becomes the `error` string of an [`AnalysisResult`](crate::models::AnalysisResult).

use std::path::PathBuf;

use thiserror::Error;

use crate::models::ParseStatus;

/// Failure talking to the object store.
#[derive(Debug, Error)]
#[error("{operation} failed: {cause}")]
pub struct StorageError {
    pub operation: String,
    pub cause: String,
}

impl StorageError {
    pub fn new(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Failure of any analysis-service call. Never retried within a run.
#[derive(Debug, Error)]
#[error("{operation} failed: {cause}")]
pub struct ServiceError {
    pub operation: String,
    pub cause: String,
}

impl ServiceError {
    pub fn new(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Failure reading reports back from the store.
///
/// `Connect` covers opening the database; anything after that, including
/// schema setup on a freshly opened connection, is a `Query` failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("database query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_connect(&self) -> bool {
        matches!(self, StoreError::Connect(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

/// Why a single analysis run ended without an answer.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("FileNotFound: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("StorageError: {0}")]
    Storage(#[from] StorageError),

    #[error("ServiceError: {0}")]
    Service(#[from] ServiceError),

    #[error("ParseFailed: document parse ended with status {0}")]
    ParseFailed(ParseStatus),

    #[error("ParseCancelled: document parse ended with status {0}")]
    ParseCancelled(ParseStatus),

    #[error("ParseTimeout: parse not finished after {attempts} status checks (last status {last})")]
    ParseTimeout { attempts: u64, last: ParseStatus },

    #[error("EmptyAnswer")]
    EmptyAnswer,
}

/// Non-fatal persistence failure. Logged by the orchestrator, never returned.
#[derive(Debug, Error)]
#[error("PersistenceError: {0}")]
pub struct PersistenceError(pub String);
