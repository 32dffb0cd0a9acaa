use thiserror::Error;

/// Error kinds, used by the daemon to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    HashMismatch,
    UnsupportedCompression,
    ExtractionFailed,
    StorageBackend,
    MissingProfiles,
    IllegalCopy,
    Internal,
}

/// Depot error types
#[derive(Error, Debug)]
pub enum DepotError {
    /// Malformed body, missing required field, bad type string
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unknown fingerprint, alias, operation or container
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate fingerprint or alias
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Declared fingerprint differs from the computed digest
    #[error("Fingerprints don't match, got {actual} expected {expected}")]
    HashMismatch { expected: String, actual: String },

    /// Archive magic bytes not recognised
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Tar decoding failed
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// btrfs or LVM operation failed
    #[error("Storage backend error: {0}")]
    StorageBackend(String),

    /// Source profiles missing on the copy destination
    #[error("Not all the profiles from the source exist on the target: {}", .0.join(", "))]
    MissingProfiles(Vec<String>),

    /// Same remote, same container name
    #[error("Illegal copy: {0}")]
    IllegalCopy(String),

    /// Metadata store error
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A peer daemon rejected a request
    #[error("Remote error: {remote} - {message}")]
    Remote { remote: String, message: String },

    /// Primary failure plus the errors raised while cleaning up after it
    #[error("{source} (cleanup: {})", .errors.join("; "))]
    WithCleanup {
        source: Box<DepotError>,
        errors: Vec<String>,
    },

    /// Generic error
    #[error("{0}")]
    Internal(String),
}

impl DepotError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DepotError::BadRequest(_) => ErrorKind::BadRequest,
            DepotError::NotFound(_) => ErrorKind::NotFound,
            DepotError::Conflict(_) => ErrorKind::Conflict,
            DepotError::HashMismatch { .. } => ErrorKind::HashMismatch,
            DepotError::UnsupportedCompression(_) => ErrorKind::UnsupportedCompression,
            DepotError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            DepotError::StorageBackend(_) => ErrorKind::StorageBackend,
            DepotError::MissingProfiles(_) => ErrorKind::MissingProfiles,
            DepotError::IllegalCopy(_) => ErrorKind::IllegalCopy,
            DepotError::WithCleanup { source, .. } => source.kind(),
            DepotError::Database(_)
            | DepotError::Io(_)
            | DepotError::Serialization(_)
            | DepotError::Config(_)
            | DepotError::Remote { .. }
            | DepotError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Attach cleanup failures to this error without changing its kind.
    ///
    /// Returns `self` untouched when `errors` is empty.
    pub fn with_cleanup(self, errors: Vec<String>) -> Self {
        if errors.is_empty() {
            return self;
        }
        for error in &errors {
            tracing::warn!(primary = %self, cleanup = %error, "Cleanup failed after error");
        }
        DepotError::WithCleanup {
            source: Box::new(self),
            errors,
        }
    }
}

impl From<serde_json::Error> for DepotError {
    fn from(err: serde_json::Error) -> Self {
        DepotError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for DepotError {
    fn from(err: serde_yaml::Error) -> Self {
        DepotError::Serialization(err.to_string())
    }
}

/// Result type alias for depot operations
pub type Result<T> = std::result::Result<T, DepotError>;
