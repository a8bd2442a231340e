use thiserror::Error;
use crate::utils::types::EntityId;

/// Main error type for the POI engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Duplicate entity id: {0}")]
    DuplicateId(EntityId),

    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Execution cancelled after {partial_rows} rows")]
    Cancelled { partial_rows: usize },

    #[error("Point source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structural faults in a join or aggregate request, detected before any data is touched
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request defines no roles")]
    NoRoles,

    #[error("Role alias defined more than once: {0}")]
    DuplicateRole(String),

    #[error("Undefined role alias: {0}")]
    UndefinedRole(String),

    #[error("Constraint relates role '{0}' to itself")]
    SelfReference(String),

    #[error("Invalid radius {radius} between '{left}' and '{right}'")]
    InvalidRadius { left: String, right: String, radius: f64 },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Operator {operator} cannot be applied to {value}")]
    InvalidOperand { operator: String, value: String },

    #[error("Unknown output column: {0}")]
    UnknownColumn(String),

    #[error("Output column defined more than once: {0}")]
    DuplicateColumn(String),

    #[error("Request defines no aggregate functions")]
    NoAggregates,

    #[error("Invalid nearest-neighbour count: {0}")]
    InvalidNeighbourCount(usize),
}

/// Errors raised while bulk-loading entities from a point source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Malformed record in {path} at line {line}: {reason}")]
    MalformedRecord { path: String, line: u64, reason: String },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("No files matched pattern: {0}")]
    NoMatches(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
