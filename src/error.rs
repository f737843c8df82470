//! Unified error hierarchy for velometrics
//!
//! Provides a structured error type system with context preservation and a
//! mapping onto the three error classes surfaced to HTTP callers.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all analytics operations
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Activity ingest errors (provider decode or binary recording)
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Database operation errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Metric calculation errors
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied an unknown key, zone type, or malformed parameter
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Ingest specific errors
#[derive(Debug, Error)]
pub enum IngestError {
    /// Recording file not found at specified path
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Binary recording is corrupted or not decodable
    #[error("Corrupted recording: {reason}")]
    Corrupted { reason: String },

    /// Provider returned a non-success response
    #[error("Provider request failed with status {status}: {message}")]
    ProviderStatus { status: u16, message: String },

    /// Provider payload is missing a required field
    #[error("Missing provider field: {field}")]
    MissingField { field: String },

    /// Stream decode error
    #[error("Invalid stream {stream}: {reason}")]
    InvalidStream { stream: String, reason: String },
}

/// Database operation errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLite error passthrough
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization of a stored value failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record not found
    #[error("Record not found: {table}.{id}")]
    NotFound { table: String, id: String },
}

/// Calculation errors
#[derive(Debug, Error)]
pub enum CalculationError {
    /// Insufficient data for calculation
    #[error("Insufficient data for {calculation}: {reason}")]
    InsufficientData { calculation: String, reason: String },

    /// Missing athlete profile data
    #[error("Missing athlete profile: {field}")]
    MissingProfile { field: String },

    /// Invalid parameter
    #[error("Invalid parameter for {calculation}: {parameter}={value}")]
    InvalidParameter {
        calculation: String,
        parameter: String,
        value: String,
    },
}

/// Result type alias for velometrics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Error classes surfaced on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing activity, absent cache file, no prior intervals
    NotFound,
    /// Unknown stream key, bad zone type, malformed date
    BadRequest,
    /// Everything else; underlying message goes to the log only
    Internal,
}

impl AnalyticsError {
    /// Map the error onto the class surfaced to callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyticsError::NotFound(_) => ErrorKind::NotFound,
            AnalyticsError::Database(DatabaseError::NotFound { .. }) => ErrorKind::NotFound,
            AnalyticsError::Ingest(IngestError::FileNotFound { .. }) => ErrorKind::NotFound,
            AnalyticsError::BadRequest(_) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::Io(_)
                | AnalyticsError::Ingest(IngestError::ProviderStatus { status: 500..=599, .. })
        )
    }

    /// Generic message safe to put on the wire
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::NotFound | ErrorKind::BadRequest => self.to_string(),
            ErrorKind::Internal => "Internal server error".to_string(),
        }
    }
}
