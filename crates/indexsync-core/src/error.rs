//! Error types for indexsync.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for indexsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, planning, or executing indexing work.
///
/// All variants are marked `#[non_exhaustive]` to allow adding new error
/// kinds without breaking changes.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Setup defect: unknown type, invalid graph, invalid configuration value.
    #[error("Configuration error: {message}")]
    Config {
        /// What configuration is problematic
        message: String,
    },

    /// A type has no identifier mapping configured.
    #[error("Configuration error: no identifier mapping configured for type '{type_name}'")]
    UnmappedType {
        /// Name of the unmapped type
        type_name: String,
    },

    /// A lifecycle entry point was invoked out of order.
    #[error("Lifecycle error: cannot {operation} while {state}")]
    Lifecycle {
        /// Entry point that was invoked
        operation: String,
        /// State the component was in
        state: String,
    },

    /// The backend cannot perform the requested operation.
    #[error("Operation '{operation}' is not supported by backend '{backend}'")]
    Unsupported {
        /// Operation name (e.g. `merge_segments`)
        operation: String,
        /// Backend name
        backend: String,
    },

    /// A bounded submission queue is full.
    #[error("Submission queue is full (capacity {capacity})")]
    Backpressure {
        /// Capacity of the queue that rejected the submission
        capacity: usize,
    },

    /// A document write lost an optimistic-concurrency race.
    #[error("Version conflict on document '{document}': stored version {stored}, attempted {attempted}")]
    Conflict {
        /// Document key
        document: String,
        /// Version currently stored
        stored: u64,
        /// Version that was attempted
        attempted: u64,
    },

    /// The index backend rejected or failed an operation.
    #[error("Backend error: {message}")]
    Backend {
        /// Human-readable error message
        message: String,
        /// Source error if available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An indexing plan could not be built or did not complete.
    #[error("Indexing plan error: {message}")]
    Plan {
        /// What went wrong
        message: String,
    },

    /// New work was submitted after shutdown began.
    #[error("Automatic indexing is shutting down; no new work is accepted")]
    ShuttingDown,

    /// A named resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of resource (e.g. "type", "index")
        kind: String,
        /// Identifier that was looked up
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with the path that caused it.
    #[error("I/O error at {path}: {source}")]
    IoWithPath {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Returns whether retrying the failed operation may succeed.
    ///
    /// Setup defects (configuration, lifecycle misuse, missing capabilities)
    /// are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Backend { .. } => true,
            Error::Conflict { .. } => true,
            Error::Backpressure { .. } => true,
            Error::Io(_) | Error::IoWithPath { .. } => true,
            Error::Config { .. } => false,
            Error::UnmappedType { .. } => false,
            Error::Lifecycle { .. } => false,
            Error::Unsupported { .. } => false,
            Error::Plan { .. } => false,
            Error::ShuttingDown => false,
            Error::NotFound { .. } => false,
            Error::Serialization(_) => false,
            Error::Toml(_) => false,
        }
    }

    /// Returns `true` for errors that indicate a setup defect.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::UnmappedType { .. })
    }

    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Creates an unmapped-type configuration error.
    pub fn unmapped_type<S: Into<String>>(type_name: S) -> Self {
        Error::UnmappedType {
            type_name: type_name.into(),
        }
    }

    /// Creates a lifecycle misuse error.
    pub fn lifecycle(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Error::Lifecycle {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Creates an unsupported-capability error.
    pub fn unsupported(operation: impl Into<String>, backend: impl Into<String>) -> Self {
        Error::Unsupported {
            operation: operation.into(),
            backend: backend.into(),
        }
    }

    /// Creates a backend error without a source.
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Error::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a backend error with a source error.
    pub fn backend_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a plan error.
    pub fn plan<S: Into<String>>(message: S) -> Self {
        Error::Plan {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Wraps an I/O error with the path that caused it.
    pub fn io_with_path(source: std::io::Error, path: &Path) -> Self {
        Error::IoWithPath {
            path: path.to_path_buf(),
            source,
        }
    }
}
