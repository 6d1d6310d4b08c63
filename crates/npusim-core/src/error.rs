//! Error types for the operator compiler
//!
//! Every error aborts the whole compile pass: there is no partial-success
//! mode and nothing here is retryable.

use npusim_isa::TileError;
use std::path::PathBuf;

/// Result type for npusim-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Hardware configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An enumerated field names an unknown backend
    #[error("Not implemented {field} '{value}'")]
    UnknownVariant { field: &'static str, value: String },

    /// A required field is absent
    #[error("Missing configuration field '{0}'")]
    MissingField(&'static str),

    /// A field has the wrong JSON type or is out of range
    #[error("Invalid configuration field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The configuration document is not a JSON object
    #[error("Configuration root must be a JSON object")]
    NotAnObject,

    /// Reading the configuration file failed
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that can occur while compiling operators into tiles
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Hardware configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operator references a tensor the registry does not know
    #[error("Unknown tensor '{0}'")]
    UnknownTensor(String),

    /// An operator has fewer inputs than it needs
    #[error("Operator '{op}' has no input {index}")]
    MissingInput { op: String, index: usize },

    /// A required descriptor attribute is absent
    #[error("Operator '{op}' is missing attribute '{attribute}'")]
    MissingAttribute { op: String, attribute: String },

    /// An attribute has the wrong type or arity
    #[error("Operator '{op}': attribute '{attribute}' expects {expected}")]
    InvalidAttribute {
        op: String,
        attribute: String,
        expected: String,
    },

    /// A shape or capacity assumption of the operator does not hold
    #[error("Precondition violated in '{op}': {reason}")]
    Precondition { op: String, reason: String },

    /// No operator variant handles this op type
    #[error("Unsupported operator type '{0}'")]
    UnsupportedOperator(String),

    /// The DRAM address cursor would overflow
    #[error("Address space exhausted: cursor {cursor:#x} cannot fit {size} more bytes")]
    AddressSpaceExhausted { cursor: u64, size: u64 },

    /// An operator emitted a tile that breaks issue-order invariants
    #[error("Operator '{op}' emitted an invalid tile: {source}")]
    InvalidTile {
        op: String,
        #[source]
        source: TileError,
    },

    /// Reading a model descriptor failed
    #[error("Failed to read model descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A model descriptor is not valid JSON
    #[error("Failed to parse model descriptor: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a precondition violation for operator `op`
    pub fn precondition(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Precondition {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing-attribute error for operator `op`
    pub fn missing_attribute(op: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            op: op.into(),
            attribute: attribute.into(),
        }
    }
}
