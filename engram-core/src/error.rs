//! Workspace error taxonomy.
//!
//! One enum shared by every layer so callers can match on failure class
//! without knowing which crate produced it. [`Error::kind`] collapses the
//! variants into the coarse [`ErrorKind`] classes the public contracts are
//! written against.

/// Convenience alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required dependency was not provided to a constructor.
    ConfigMissing,
    /// The requested entity is not present.
    NotFound,
    /// Input failed a domain rule.
    Validation,
    /// A persisted buffer failed to decode.
    Corrupt,
    /// Underlying storage or transport failure.
    Io,
    /// The backend detected a write conflict; the caller may retry.
    Conflict,
    /// The backend was used after close.
    Closed,
    /// An external provider returned a batch of the wrong length.
    ResultMismatch,
    /// An external embedder or extractor failed.
    ExternalFailure,
    /// An aggregation of per-item errors from a partial-success operation.
    Composite,
    /// The operation was cancelled.
    Canceled,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing dependency: {0}")]
    ConfigMissing(&'static str),

    #[error("not found")]
    NotFound,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("corrupt value: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Io(String),

    #[error("write conflict")]
    Conflict,

    #[error("backend is closed")]
    Closed,

    #[error("result length mismatch: expected {expected}, received {received}")]
    ResultMismatch { expected: usize, received: usize },

    #[error("external service failed: {0}")]
    External(String),

    #[error("{}", join_messages(.0))]
    Composite(Vec<Error>),

    #[error("operation canceled")]
    Canceled,
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// The coarse class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigMissing(_) => ErrorKind::ConfigMissing,
            Error::NotFound => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Corrupt(_) => ErrorKind::Corrupt,
            Error::Io(_) => ErrorKind::Io,
            Error::Conflict => ErrorKind::Conflict,
            Error::Closed => ErrorKind::Closed,
            Error::ResultMismatch { .. } => ErrorKind::ResultMismatch,
            Error::External(_) => ErrorKind::ExternalFailure,
            Error::Composite(_) => ErrorKind::Composite,
            Error::Canceled => ErrorKind::Canceled,
        }
    }

    /// Build a validation error from any displayable message.
    pub fn validation(message: impl std::fmt::Display) -> Self {
        Error::Validation(message.to_string())
    }

    /// Build a corruption error from any displayable message.
    pub fn corrupt(message: impl std::fmt::Display) -> Self {
        Error::Corrupt(message.to_string())
    }

    /// Map an underlying storage failure into the Io class.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Io(err.to_string())
    }

    /// Map an external-service failure into the ExternalFailure class.
    pub fn external(err: impl std::fmt::Display) -> Self {
        Error::External(err.to_string())
    }

    /// The constituent errors of a Composite, if this is one.
    pub fn constituents(&self) -> Option<&[Error]> {
        match self {
            Error::Composite(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
