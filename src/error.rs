//! Error types for the NooBaa operator
//!
//! Two layers live here. [`Error`] names the underlying failure reason
//! (cluster API, management RPC, image validation, ...). [`ReconcileError`]
//! wraps an [`Error`] with the only piece of state the reconcile driver
//! cares about: whether retrying can ever help.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Conflict updating {kind}/{name}: object has been modified")]
    Conflict { kind: String, name: String },

    #[error("Not ready yet: {0}")]
    NotReady(String),

    // =========================================================================
    // Management API Errors
    // =========================================================================
    #[error("Management API connection error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Management API error: {method} - {code}: {message}")]
    Api {
        method: String,
        code: String,
        message: String,
    },

    // =========================================================================
    // Image Validation Errors
    // =========================================================================
    #[error("Invalid image {image:?}: {reason}")]
    InvalidImage { image: String, reason: String },

    #[error("Unsupported image version {image:?} not matching constraints {constraint:?}")]
    UnsupportedImageVersion { image: String, constraint: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error reports a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Reconcile Errors
// =============================================================================

/// An [`Error`] tagged with its retry classification.
///
/// Everything is transient unless the engine explicitly raises it as
/// persistent. Converting a plain [`Error`] with `?` always yields
/// [`ReconcileError::Transient`].
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Transient(Error),

    #[error(transparent)]
    Persistent(Error),
}

impl ReconcileError {
    /// Tag an error as persistent: retrying will not fix it
    pub fn persistent(err: Error) -> Self {
        ReconcileError::Persistent(err)
    }

    /// Check if this error must not be retried
    pub fn is_persistent(&self) -> bool {
        matches!(self, ReconcileError::Persistent(_))
    }

    /// The underlying failure reason
    pub fn inner(&self) -> &Error {
        match self {
            ReconcileError::Transient(e) | ReconcileError::Persistent(e) => e,
        }
    }

    /// Combine two errors into one.
    ///
    /// A persistent error displaces a transient one; between two errors of the
    /// same kind the first one wins.
    pub fn combine(self, other: ReconcileError) -> ReconcileError {
        if other.is_persistent() && !self.is_persistent() {
            other
        } else {
            self
        }
    }
}

impl From<Error> for ReconcileError {
    fn from(err: Error) -> Self {
        ReconcileError::Transient(err)
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        ReconcileError::Transient(Error::Kube(err))
    }
}

/// Result type alias for reconcile steps
pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

/// Combine a sequence of optional errors using [`ReconcileError::combine`]
pub fn combine_errors<I>(errs: I) -> Option<ReconcileError>
where
    I: IntoIterator<Item = Option<ReconcileError>>,
{
    errs.into_iter()
        .flatten()
        .fold(None, |combined, err| match combined {
            None => Some(err),
            Some(combined) => Some(combined.combine(err)),
        })
}

// =============================================================================
// Reconcile Outcome
// =============================================================================

/// What the hosting controller should do after a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged, no retry needed
    Done,
    /// Transient failure, retry after a fixed delay
    RequeueAfter(Duration),
    /// Persistent failure, wait for an external change
    AwaitChange,
}

impl ReconcileOutcome {
    /// Derive the outcome from the combined error of a pass
    pub fn from_error(err: Option<&ReconcileError>, retry_delay: Duration) -> Self {
        match err {
            None => ReconcileOutcome::Done,
            Some(e) if e.is_persistent() => ReconcileOutcome::AwaitChange,
            Some(_) => ReconcileOutcome::RequeueAfter(retry_delay),
        }
    }
}
