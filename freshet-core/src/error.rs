//! Error taxonomy for the Freshet client.
//!
//! Faults fall into five classes with distinct handling:
//!
//! - parameter and not-found faults surface immediately;
//! - sealed shards drive reader state, never caller errors;
//! - session faults are sticky: once observed, the owning component
//!   re-raises the same fault on every call until recreated;
//! - service faults are transient and retried with backoff up to a
//!   bounded budget before escalating;
//! - closed-resource faults are raised synchronously, never swallowed.
//!
//! Retryability is a predicate on the error value rather than a type
//! list, so call sites can classify without enumerating variants.

use thiserror::Error;

use crate::types::ShardId;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the streaming service or the client itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A request carried an invalid argument (bad seek, bad config).
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Why the parameter was rejected.
        message: String,
    },

    /// A named resource does not exist.
    #[error("{resource} not found: {name}")]
    NotFound {
        /// The kind of resource.
        resource: &'static str,
        /// The identifier that failed to resolve.
        name: String,
    },

    /// A sequence-based seek was rejected as out of range.
    #[error("seek out of range on shard {shard_id}")]
    SeekOutOfRange {
        /// The shard being positioned.
        shard_id: ShardId,
    },

    /// A read cursor expired and must be re-acquired.
    #[error("cursor expired on shard {shard_id}")]
    CursorExpired {
        /// The shard being read.
        shard_id: ShardId,
    },

    /// The shard is sealed; no further records will ever be appended.
    #[error("shard {shard_id} is sealed")]
    ShardSealed {
        /// The sealed shard.
        shard_id: ShardId,
    },

    /// The subscription session or its offsets were reset/invalidated.
    #[error("{message}")]
    SessionInvalid {
        /// Service-provided description.
        message: String,
    },

    /// A transient service-side failure.
    #[error("service error: {message}")]
    Service {
        /// Service-provided description.
        message: String,
    },

    /// An operation was attempted on a closed component.
    #[error("this {resource} has already been closed")]
    Closed {
        /// The component that was closed.
        resource: &'static str,
    },
}

impl ClientError {
    /// Creates a transient service fault.
    #[must_use]
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Creates an invalid-parameter fault.
    #[must_use]
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a session-invalidated fault.
    #[must_use]
    pub fn session_invalid(message: impl Into<String>) -> Self {
        Self::SessionInvalid {
            message: message.into(),
        }
    }

    /// Returns true if the retry primitive may try the request again.
    ///
    /// Only transient service faults qualify. Shard-not-found during a
    /// rebalance window is retried too, but by the fetch loop's own
    /// budget, not here.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Service { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_service_faults_retryable() {
        assert!(ClientError::service("internal error").is_retryable());
        assert!(!ClientError::invalid_parameter("bad seek").is_retryable());
        assert!(!ClientError::session_invalid("offset has been reset").is_retryable());
        assert!(!ClientError::NotFound {
            resource: "shard",
            name: "0".to_string(),
        }
        .is_retryable());
        assert!(!ClientError::ShardSealed {
            shard_id: ShardId::new("0"),
        }
        .is_retryable());
        assert!(!ClientError::Closed { resource: "consumer" }.is_retryable());
    }

    #[test]
    fn test_closed_message() {
        let err = ClientError::Closed {
            resource: "shard group reader",
        };
        assert_eq!(
            format!("{err}"),
            "this shard group reader has already been closed"
        );
    }
}
