use std::fmt;

use thiserror::Error;

/// What exactly is wrong with a rejected bundle document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleErrorKind {
    /// No document, a bare scalar, or an empty configuration object
    Empty,
    /// Structured, but not the services/relations shape
    Malformed,
    /// A service name that is not in the services mapping
    UnknownService,
    /// A service without its charm or unit count
    MissingField,
    /// A rename onto a name another service already uses
    DuplicateService,
}

impl BundleErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleErrorKind::Empty => "empty",
            BundleErrorKind::Malformed => "malformed",
            BundleErrorKind::UnknownService => "unknown-service",
            BundleErrorKind::MissingField => "missing-field",
            BundleErrorKind::DuplicateService => "duplicate-service",
        }
    }
}

impl fmt::Display for BundleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid bundle ({kind}): {message}")]
    InvalidBundle {
        kind: BundleErrorKind,
        message: String,
    },

    #[error("No bundle named ({0}) found")]
    NotFound(String),

    #[error("User ({user_id}) is not allowed to access the bundle ({bundle_id})")]
    Forbidden { user_id: String, bundle_id: String },

    #[error("Remote controller error: {message}")]
    RemoteController {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Remote controller status is inconsistent: {0}")]
    RemoteInconsistency(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn invalid_bundle(kind: BundleErrorKind, message: impl Into<String>) -> Self {
        Error::InvalidBundle {
            kind,
            message: message.into(),
        }
    }

    pub fn remote(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::RemoteController {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Short machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidBundle { .. } => "invalid_bundle",
            Error::NotFound(_) => "not_found",
            Error::Forbidden { .. } => "forbidden",
            Error::RemoteController { .. } => "remote_controller",
            Error::RemoteInconsistency(_) => "remote_inconsistency",
            Error::Storage(_) => "storage",
            Error::Json(_) => "json",
            Error::Other(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
