//! Error types for the content repository
//!
//! `RepoError` is the domain taxonomy shared by the store, the transaction
//! layer and the migration engine. The transport layer (out of this crate)
//! maps errors to status codes through [`RepoError::status_class`].

use thiserror::Error;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Error types for the content repository
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    /// Malformed identifier, invalid version string or malformed payload
    #[error("bad request: {message}")]
    BadRequest {
        /// What was wrong with the request
        message: String,
    },

    /// A document exceeds its configured size limit
    #[error("{what} too large: {size} bytes exceeds limit of {limit} bytes")]
    Oversize {
        /// Name of the oversize document
        what: String,
        /// Actual size in bytes
        size: usize,
        /// Configured limit in bytes
        limit: usize,
    },

    /// Explicit-id creation collided with an existing item
    #[error("already exists: {id}")]
    AlreadyExists {
        /// Id of the existing item
        id: String,
    },

    /// Item or version does not exist
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing entity
        what: String,
    },

    /// Version number is not acceptable for the item's current version count
    #[error("version conflict on {id}: expected version {expected}, got {actual}")]
    VersionConflict {
        /// Item id
        id: String,
        /// Version number the store would accept
        expected: u32,
        /// Version number that was requested
        actual: u32,
    },

    /// Entity is not in the state required by a transition
    #[error("state mismatch on {id}: expected {expected}, found {actual}")]
    StateMismatch {
        /// Entity id
        id: String,
        /// Required state
        expected: String,
        /// Observed state
        actual: String,
    },

    /// Explicit id is not inside the reserved legacy range
    #[error("id {id} is outside the reserved range (first free id {first_free_id})")]
    OutOfRange {
        /// Requested id
        id: String,
        /// First id available to auto-assignment
        first_free_id: u64,
    },

    /// Optimistic validation failed at commit
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Conflict description
        reason: String,
    },

    /// Operation attempted on a transaction that already left the active state
    #[error("transaction not active: {state}")]
    TransactionNotActive {
        /// Current transaction state
        state: String,
    },

    /// Backend failure
    #[error("storage error: {message}")]
    Storage {
        /// Backend message
        message: String,
    },

    /// Invariant violation or undecodable stored record
    #[error("internal error: {message}")]
    Internal {
        /// Details
        message: String,
    },
}

/// Transport-level classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 409
    Conflict,
    /// 404
    NotFound,
    /// 412 class, including bad requests
    PreconditionFailed,
    /// 500
    ServerError,
}

impl StatusClass {
    /// HTTP status code conventionally used for this class
    pub fn http_status(&self) -> u16 {
        match self {
            StatusClass::Conflict => 409,
            StatusClass::NotFound => 404,
            StatusClass::PreconditionFailed => 412,
            StatusClass::ServerError => 500,
        }
    }
}

impl RepoError {
    /// Create a BadRequest error
    pub fn bad_request(message: impl Into<String>) -> Self {
        RepoError::BadRequest {
            message: message.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(what: impl Into<String>) -> Self {
        RepoError::NotFound { what: what.into() }
    }

    /// Create an AlreadyExists error
    pub fn already_exists(id: impl Into<String>) -> Self {
        RepoError::AlreadyExists { id: id.into() }
    }

    /// Create a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        RepoError::Storage {
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        RepoError::Internal {
            message: message.into(),
        }
    }

    /// Map this error to its transport status class
    pub fn status_class(&self) -> StatusClass {
        match self {
            RepoError::AlreadyExists { .. } | RepoError::VersionConflict { .. } => {
                StatusClass::Conflict
            }
            RepoError::NotFound { .. } => StatusClass::NotFound,
            RepoError::BadRequest { .. }
            | RepoError::Oversize { .. }
            | RepoError::StateMismatch { .. }
            | RepoError::OutOfRange { .. } => StatusClass::PreconditionFailed,
            RepoError::TransactionAborted { .. }
            | RepoError::TransactionNotActive { .. }
            | RepoError::Storage { .. }
            | RepoError::Internal { .. } => StatusClass::ServerError,
        }
    }

    /// Whether a caller may retry the same operation unchanged
    ///
    /// Only transient backend conditions qualify. Domain errors are
    /// deterministic and would fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepoError::TransactionAborted { .. }
                | RepoError::Storage { .. }
                | RepoError::Internal { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_bad_request() {
        let err = RepoError::bad_request("malformed id: x12");
        let msg = err.to_string();
        assert!(msg.contains("bad request"));
        assert!(msg.contains("x12"));
    }

    #[test]
    fn test_error_display_version_conflict() {
        let err = RepoError::VersionConflict {
            id: "m12".to_string(),
            expected: 3,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("m12"));
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("got 5"));
    }

    #[test]
    fn test_error_display_oversize() {
        let err = RepoError::Oversize {
            what: "cnxml".to_string(),
            size: 10,
            limit: 5,
        };
        assert!(err.to_string().contains("cnxml too large"));
    }

    #[test]
    fn test_status_class_mapping() {
        assert_eq!(
            RepoError::already_exists("m1").status_class(),
            StatusClass::Conflict
        );
        assert_eq!(
            RepoError::not_found("m1").status_class(),
            StatusClass::NotFound
        );
        assert_eq!(
            RepoError::VersionConflict {
                id: "m1".into(),
                expected: 1,
                actual: 2
            }
            .status_class(),
            StatusClass::Conflict
        );
        assert_eq!(
            RepoError::bad_request("x").status_class(),
            StatusClass::PreconditionFailed
        );
        assert_eq!(
            RepoError::StateMismatch {
                id: "r1".into(),
                expected: "UPLOAD_PENDING".into(),
                actual: "UPLOAD_COMPLETE".into()
            }
            .status_class(),
            StatusClass::PreconditionFailed
        );
        assert_eq!(
            RepoError::storage("down").status_class(),
            StatusClass::ServerError
        );
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(StatusClass::Conflict.http_status(), 409);
        assert_eq!(StatusClass::NotFound.http_status(), 404);
        assert_eq!(StatusClass::PreconditionFailed.http_status(), 412);
        assert_eq!(StatusClass::ServerError.http_status(), 500);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RepoError::storage("timeout").is_retryable());
        assert!(RepoError::TransactionAborted {
            reason: "conflict".into()
        }
        .is_retryable());
        assert!(!RepoError::bad_request("x").is_retryable());
        assert!(!RepoError::already_exists("m1").is_retryable());
        assert!(!RepoError::not_found("m1").is_retryable());
    }
}
