//! Error types for Strata collections.
//!
//! Write requests against a collection either succeed or report why they were
//! refused. Refusals that depend on the request are [`Rejection`]s and never
//! mutate anything; faults raised by an external store are wrapped in
//! [`OperationError`].

use alloc::string::String;
use core::fmt;

/// Result type alias for Strata operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Standard rejection messages shared by every stage.
pub mod msg {
    /// The stage cannot perform the operation for any argument.
    pub const UNSUPPORTED_OPERATION: &str = "Unsupported operation";
    /// The value is not acceptable to the stage.
    pub const ILLEGAL_ELEMENT: &str = "Illegal element";
    /// The value is already present in a distinct view.
    pub const ELEMENT_EXISTS: &str = "Element already exists";
    /// The requested position conflicts with the stage's ordering.
    pub const ILLEGAL_ELEMENT_POSITION: &str = "Illegal element position";
    /// The value lies outside a bounded sub-range.
    pub const OUT_OF_RANGE: &str = "Value is out of range";
    /// The stage has no inverse mapping for the operation.
    pub const NOT_REVERSIBLE: &str = "Mapping is not reversible";
    /// The collection is read-only.
    pub const READ_ONLY: &str = "Collection is read-only";
    /// A referenced element is no longer present.
    pub const NOT_PRESENT: &str = "Element is not present";
    /// An element cannot be moved to the requested position.
    pub const ILLEGAL_MOVE: &str = "Element cannot be moved there";
}

/// Why a stage refused a write request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The stage is read-only or cannot reverse-map the request.
    Unsupported { reason: String },
    /// The value fails the stage's acceptance predicate.
    IllegalElement { reason: String },
    /// The requested position is inconsistent with the stage's ordering.
    IllegalPosition { reason: String },
}

impl Rejection {
    /// Creates an unsupported-operation rejection.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Rejection::Unsupported {
            reason: reason.into(),
        }
    }

    /// Creates an illegal-element rejection.
    pub fn illegal_element(reason: impl Into<String>) -> Self {
        Rejection::IllegalElement {
            reason: reason.into(),
        }
    }

    /// Creates an illegal-position rejection.
    pub fn illegal_position(reason: impl Into<String>) -> Self {
        Rejection::IllegalPosition {
            reason: reason.into(),
        }
    }

    /// Returns the human readable reason.
    pub fn reason(&self) -> &str {
        match self {
            Rejection::Unsupported { reason }
            | Rejection::IllegalElement { reason }
            | Rejection::IllegalPosition { reason } => reason,
        }
    }

    /// Returns true if the rejection does not depend on the argument.
    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Rejection::Unsupported { .. })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unsupported { reason } => write!(f, "Unsupported: {}", reason),
            Rejection::IllegalElement { reason } => write!(f, "Illegal element: {}", reason),
            Rejection::IllegalPosition { reason } => write!(f, "Illegal position: {}", reason),
        }
    }
}

/// A fault reported by an external store while performing a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationError {
    /// The operation that failed (e.g. "create", "fulfill").
    pub operation: String,
    /// The store's description of the fault.
    pub message: String,
}

impl OperationError {
    /// Creates a new operation error.
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

/// Error types for Strata operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A stage refused the write request.
    Rejected(Rejection),
    /// The element handle no longer refers to a present element.
    NotPresent,
    /// A non-blocking lock attempt would have blocked.
    WouldBlock,
    /// A thread holding only a read lock asked for a write lock.
    LockUpgrade,
    /// The external store failed.
    Operation(OperationError),
    /// Invalid operation.
    InvalidOperation { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Rejected(rejection) => write!(f, "Rejected: {}", rejection),
            Error::NotPresent => write!(f, "Element is not present"),
            Error::WouldBlock => write!(f, "Lock is held elsewhere"),
            Error::LockUpgrade => {
                write!(f, "Cannot upgrade a read lock to a write lock")
            }
            Error::Operation(err) => write!(f, "Operation error: {}", err),
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
        }
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        Error::Rejected(rejection)
    }
}

impl From<OperationError> for Error {
    fn from(err: OperationError) -> Self {
        Error::Operation(err)
    }
}

impl Error {
    /// Creates an unsupported-operation rejection error.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Error::Rejected(Rejection::unsupported(reason))
    }

    /// Creates an illegal-element rejection error.
    pub fn illegal_element(reason: impl Into<String>) -> Self {
        Error::Rejected(Rejection::illegal_element(reason))
    }

    /// Creates an illegal-position rejection error.
    pub fn illegal_position(reason: impl Into<String>) -> Self {
        Error::Rejected(Rejection::illegal_position(reason))
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns the rejection, if this error is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        let err = Error::unsupported(msg::NOT_REVERSIBLE);
        assert!(err.to_string().contains("Unsupported"));
        assert!(err.to_string().contains("reversible"));

        let err = Error::illegal_element(msg::ELEMENT_EXISTS);
        assert!(err.to_string().contains("already exists"));

        assert!(Error::NotPresent.to_string().contains("not present"));
    }

    #[test]
    fn test_rejection_constructors() {
        let rejection = Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION);
        assert_eq!(rejection.reason(), msg::ILLEGAL_ELEMENT_POSITION);
        assert!(!rejection.is_unsupported());
        assert!(Rejection::unsupported(msg::READ_ONLY).is_unsupported());
    }

    #[test]
    fn test_error_from_rejection() {
        let err: Error = Rejection::illegal_element(msg::OUT_OF_RANGE).into();
        match err.rejection() {
            Some(Rejection::IllegalElement { reason }) => assert_eq!(reason, msg::OUT_OF_RANGE),
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_operation_error_wrapping() {
        let err: Error = OperationError::new("create", "constraint violated").into();
        assert!(err.to_string().contains("create failed"));
        assert!(err.rejection().is_none());
    }
}
