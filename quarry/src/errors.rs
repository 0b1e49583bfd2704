use backtrace::Backtrace;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

/// Error kinds for collection storage operations.
///
/// Every kind maps to a stable numeric code (see [`ErrorKind::code`]) so callers
/// and wire layers can match on failures without parsing messages.
///
/// # Examples
///
/// ```rust,ignore
/// use quarry::errors::{QuarryError, ErrorKind, QuarryResult};
///
/// fn example() -> QuarryResult<()> {
///     Err(QuarryError::new("cannot remove from a capped collection", ErrorKind::CannotRemoveFromCapped))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ErrorKind {
    // Validation
    /// A document did not satisfy the collection validator
    DocumentValidationFailure,
    /// A validator expression could not be compiled
    InvalidValidator,
    /// Collection options are inconsistent or not allowed for the namespace
    InvalidOptions,

    // Capped collections
    /// Explicit delete against a capped collection
    CannotRemoveFromCapped,
    /// An update tried to change a document's size in a capped collection
    CannotGrowDocumentInCappedNamespace,
    /// Multi-document insert into an indexed capped collection
    OperationCannotBeBatched,

    // Concurrency
    /// Another unit of work owns the record; retry the whole unit
    WriteConflict,
    /// The storage snapshot moved underneath an operation
    SnapshotMismatch,

    // Documents and keys
    /// An update would change the `_id` of a document
    IdMismatch,
    /// A document reached an `_id`-indexed path without `_id`
    MissingId,
    /// A unique index already holds the key
    DuplicateKey,
    /// The document or record does not exist
    NotFound,
    /// Bytes could not be decoded into a document or vice versa
    EncodingError,

    // Catalog
    /// The namespace does not support the operation
    InvalidNamespace,
    /// Index bookkeeping failed
    IndexingError,

    /// A test fail point forced the failure
    FailPointEnabled,
    /// The operation is not valid in the current state
    InvalidOperation,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl ErrorKind {
    /// Stable numeric code of the error kind.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::InternalError => 1,
            ErrorKind::InvalidValidator => 9,
            ErrorKind::InvalidOperation => 20,
            ErrorKind::NotFound => 47,
            ErrorKind::InvalidOptions => 72,
            ErrorKind::InvalidNamespace => 73,
            ErrorKind::IndexingError => 85,
            ErrorKind::WriteConflict => 112,
            ErrorKind::DocumentValidationFailure => 121,
            ErrorKind::OperationCannotBeBatched => 261,
            ErrorKind::SnapshotMismatch => 246,
            ErrorKind::EncodingError => 22,
            ErrorKind::FailPointEnabled => 292,
            ErrorKind::MissingId => 53,
            ErrorKind::CannotGrowDocumentInCappedNamespace => 10003,
            ErrorKind::CannotRemoveFromCapped => 10089,
            ErrorKind::DuplicateKey => 11000,
            ErrorKind::IdMismatch => 13596,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::DocumentValidationFailure => write!(f, "Document validation failure"),
            ErrorKind::InvalidValidator => write!(f, "Invalid validator"),
            ErrorKind::InvalidOptions => write!(f, "Invalid options"),
            ErrorKind::CannotRemoveFromCapped => write!(f, "Cannot remove from capped"),
            ErrorKind::CannotGrowDocumentInCappedNamespace => {
                write!(f, "Cannot grow document in capped namespace")
            }
            ErrorKind::OperationCannotBeBatched => write!(f, "Operation cannot be batched"),
            ErrorKind::WriteConflict => write!(f, "Write conflict"),
            ErrorKind::SnapshotMismatch => write!(f, "Snapshot mismatch"),
            ErrorKind::IdMismatch => write!(f, "Id mismatch"),
            ErrorKind::MissingId => write!(f, "Missing id"),
            ErrorKind::DuplicateKey => write!(f, "Duplicate key"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::InvalidNamespace => write!(f, "Invalid namespace"),
            ErrorKind::IndexingError => write!(f, "Indexing error"),
            ErrorKind::FailPointEnabled => write!(f, "Fail point enabled"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Error type of the storage layer.
///
/// `QuarryError` carries a message, an [`ErrorKind`], an optional cause and an
/// optional structured diagnostic (validation failures attach a description of
/// the clauses that did not match).
#[derive(Clone)]
pub struct QuarryError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<QuarryError>>,
    diagnostic: Option<Value>,
    backtrace: Atomic<Backtrace>,
}

impl QuarryError {
    /// Creates a new `QuarryError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        QuarryError {
            message: message.to_string(),
            error_kind,
            cause: None,
            diagnostic: None,
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `QuarryError` that wraps `cause`.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: QuarryError) -> Self {
        QuarryError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            diagnostic: None,
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    /// Attaches a structured diagnostic to the error.
    pub fn with_diagnostic(mut self, diagnostic: Value) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }

    /// Prefixes the message with `context`, keeping kind, cause and diagnostic.
    pub fn with_context(mut self, context: &str) -> Self {
        self.message = format!("{} :: caused by :: {}", context, self.message);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn code(&self) -> i32 {
        self.error_kind.code()
    }

    pub fn cause(&self) -> Option<&QuarryError> {
        self.cause.as_deref()
    }

    pub fn diagnostic(&self) -> Option<&Value> {
        self.diagnostic.as_ref()
    }

    /// Returns true when retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        self.error_kind == ErrorKind::WriteConflict
    }

    pub fn is_write_conflict(&self) -> bool {
        self.error_kind == ErrorKind::WriteConflict
    }
}

impl Display for QuarryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for QuarryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(
                f,
                "{} ({})\nCaused by: {:?}",
                self.message, self.error_kind, cause
            ),
            None => {
                let mut backtrace = self.backtrace.read().clone();
                backtrace.resolve();
                write!(f, "{} ({})\n{:?}", self.message, self.error_kind, backtrace)
            }
        }
    }
}

impl Error for QuarryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::new(&err.to_string(), ErrorKind::EncodingError)
    }
}

/// A result type alias for storage operations.
pub type QuarryResult<T> = Result<T, QuarryError>;
