/*!
Defines the [Error] and [Result] types used throughout the crate.

Failures are grouped by remediation: not-found and already-exists surface to
the caller verbatim, commit conflicts are retried by the commit engine,
schema-evolution and metadata validation errors are raised before any write
is attempted.
*/

use thiserror::Error;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// A namespace in a catalog.
    Namespace(String),
    /// A table identified by its full name.
    Table(String),
    /// A view identified by its full name.
    View(String),
    /// A snapshot identified by its id.
    Snapshot(i64),
    /// Anything else.
    Other(String),
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Namespace(ns) => write!(f, "Namespace {}", ns),
            Entity::Table(id) => write!(f, "Table {}", id),
            Entity::View(id) => write!(f, "View {}", id),
            Entity::Snapshot(id) => write!(f, "Snapshot {}", id),
            Entity::Other(what) => write!(f, "{}", what),
        }
    }
}

/// Iceberg error type
#[derive(Error, Debug)]
pub enum Error {
    /// The referenced entity does not exist.
    #[error("{0} not found.")]
    NotFound(Entity),
    /// An entity with the same name already exists. Rename and create paths
    /// disambiguate across tables and views.
    #[error("{0} already exists.")]
    AlreadyExists(Entity),
    /// A namespace still holds tables or views and cannot be dropped.
    #[error("Namespace {0} is not empty.")]
    NamespaceNotEmpty(String),
    /// A concurrent writer won the commit race. Handled by the retry loop.
    #[error("Commit conflict: {0}")]
    CommitConflict(String),
    /// A commit requirement was not satisfied by the current table state.
    #[error("Commit failed: requirement {0} not satisfied: {1}")]
    CommitFailed(String, String),
    /// The commit retry loop gave up.
    #[error("Commit failed after {attempts} attempts: {source}")]
    CommitRetryExhausted {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: Box<Error>,
    },
    /// A queued schema evolution operation failed validation.
    #[error("Schema evolution error ({code}): {message}")]
    SchemaEvolution {
        /// Machine-readable sub-code, e.g. `invalid-type-promotion`.
        code: &'static str,
        /// Human readable detail.
        message: String,
    },
    /// Metadata that cannot be serialized or violates a structural invariant.
    #[error("Invalid metadata for field {field}: {message}")]
    InvalidMetadata {
        /// The metadata field at fault.
        field: &'static str,
        /// Human readable detail.
        message: String,
    },
    /// Invalid format
    #[error("{0} doesn't have the right format")]
    InvalidFormat(String),
    /// Feature not supported by this implementation or backend.
    #[error("Feature {0} is not supported.")]
    NotSupported(String),
    /// Avro error
    #[error("avro error")]
    Avro(#[from] apache_avro::Error),
    /// Serde json error
    #[error("serde json error")]
    JsonSerde(#[from] serde_json::Error),
    /// Uuid error
    #[error("uuid error")]
    Uuid(#[from] uuid::Error),
    /// Io error
    #[error("io error")]
    Io(#[from] std::io::Error),
    /// Objectstore error
    #[error("object store error")]
    ObjectStore(#[from] object_store::Error),
    /// Try from slice error
    #[error("try from slice error")]
    TryFromSlice(#[from] std::array::TryFromSliceError),
    /// Try from int error
    #[error("try from int error")]
    TryFromInt(#[from] std::num::TryFromIntError),
    /// From utf8 error
    #[error("from utf8 error")]
    FromUtf8(#[from] std::string::FromUtf8Error),
    /// Parse int error
    #[error("parse int error")]
    ParseInt(#[from] std::num::ParseIntError),
}

impl Error {
    /// The HTTP status a catalog route reports for this error: 404 for
    /// not-found, 409 for exists/not-empty/conflict, 400 for rejected
    /// input, 500 otherwise.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_)
            | Error::NamespaceNotEmpty(_)
            | Error::CommitConflict(_)
            | Error::CommitFailed(_, _)
            | Error::CommitRetryExhausted { .. } => 409,
            Error::SchemaEvolution { .. }
            | Error::InvalidMetadata { .. }
            | Error::InvalidFormat(_) => 400,
            _ => 500,
        }
    }

    /// The entity was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
    /// The entity already existed.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }
    /// The error is a commit conflict that a retry may resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::CommitConflict(_))
    }
    /// The error was raised by requirement or invariant validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::CommitFailed(_, _)
                | Error::SchemaEvolution { .. }
                | Error::InvalidMetadata { .. }
        )
    }
}

/// Iceberg result type
pub type Result<T> = std::result::Result<T, Error>;
