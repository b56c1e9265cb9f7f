//! Error types for RowGuard
//!
//! Provides a unified error type hierarchy for the entire system.

use thiserror::Error;

use crate::types::{Severity, TableId};

/// Result type alias using RowGuard's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RowGuard
#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // Per-row policy evaluation errors
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    // Sentinel detections (terminal run outcomes)
    #[error("{0}")]
    Sentinel(#[from] SentinelError),

    // Collaborator errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error carries a sentinel detection of either severity
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Error::Sentinel(_))
    }

    /// True when the session must be terminated
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Sentinel(SentinelError::DetectedFatal { .. }))
    }

    /// Identifiable reason code for client-facing reporting
    pub fn code(&self) -> &'static str {
        match self {
            Error::Sentinel(e) => e.severity().sqlstate(),
            Error::Config(_) => "F0000",
            Error::Policy(_) => "42804",
            Error::Pipeline(_) | Error::Io(_) => "58000",
            Error::Serialization(_) | Error::Internal(_) => "XX000",
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("relation_id must be between 0 and {max}, got {value}")]
    InvalidRelationId { value: i64, max: i64 },

    #[error("column_no must be between 0 and {max}, got {value}")]
    InvalidColumnNo { value: i64, max: i64 },

    #[error("column_no must be set when relation_id {0} is selected")]
    MissingColumn(TableId),

    #[error("abort mode requires an explicit sentinel value")]
    MissingSentinel,

    #[error("sentinel must be a scalar value, got {0}")]
    InvalidSentinel(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Errors raised while applying the policy to a single row
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Type mismatch at column {ordinal}: expected {expected}, got {actual}")]
    TypeMismatch {
        ordinal: usize,
        expected: String,
        actual: String,
    },

    #[error("Column {ordinal} out of range for row of width {width}")]
    ColumnOutOfRange { ordinal: usize, width: usize },
}

/// Sentinel value observed in query output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SentinelError {
    #[error("sentinel value detected in relation {table_id} column {ordinal}, statement aborted")]
    Detected { table_id: TableId, ordinal: usize },

    #[error("sentinel value detected in relation {table_id} column {ordinal}, terminating session")]
    DetectedFatal { table_id: TableId, ordinal: usize },
}

impl SentinelError {
    /// Build the detection error matching the configured severity
    pub fn new(severity: Severity, table_id: TableId, ordinal: usize) -> Self {
        match severity {
            Severity::Recoverable => SentinelError::Detected { table_id, ordinal },
            Severity::Fatal => SentinelError::DetectedFatal { table_id, ordinal },
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SentinelError::Detected { .. } => Severity::Recoverable,
            SentinelError::DetectedFatal { .. } => Severity::Fatal,
        }
    }
}

/// Collaborator errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Sink startup failed: {0}")]
    SinkStartup(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
