//! Consumed-position offsets.

use std::fmt;

/// Sentinel for an unset sequence or timestamp field.
pub const INVALID_FIELD: i64 = -1;

/// A consumed position within one shard.
///
/// An offset records the last consumed record by sequence number and by
/// record timestamp (microseconds). Either field may be unset (`-1`); an
/// offset is only usable for seeking when at least one field is valid.
/// The optional `version_id` is assigned by the service when the offset
/// is opened through a subscription and echoed back on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    /// Sequence number of the last consumed record, `-1` if unset.
    pub sequence: i64,
    /// Timestamp of the last consumed record in microseconds, `-1` if unset.
    pub timestamp_us: i64,
    /// Service-assigned offset version, if the offset came from the service.
    pub version_id: Option<i64>,
}

impl Offset {
    /// Creates an offset from a sequence and timestamp.
    #[must_use]
    pub const fn new(sequence: i64, timestamp_us: i64) -> Self {
        Self {
            sequence,
            timestamp_us,
            version_id: None,
        }
    }

    /// Creates an offset carrying a service-assigned version.
    #[must_use]
    pub const fn with_version(sequence: i64, timestamp_us: i64, version_id: i64) -> Self {
        Self {
            sequence,
            timestamp_us,
            version_id: Some(version_id),
        }
    }

    /// Creates an offset with both fields unset.
    #[must_use]
    pub const fn invalid() -> Self {
        Self::new(INVALID_FIELD, INVALID_FIELD)
    }

    /// Returns true if the sequence field is set.
    #[must_use]
    pub const fn has_sequence(&self) -> bool {
        self.sequence >= 0
    }

    /// Returns true if the timestamp field is set.
    #[must_use]
    pub const fn has_timestamp(&self) -> bool {
        self.timestamp_us >= 0
    }

    /// Returns true if this offset can position a cursor.
    ///
    /// An all-invalid offset is a client error and must never reach the
    /// service.
    #[must_use]
    pub const fn is_seekable(&self) -> bool {
        self.has_sequence() || self.has_timestamp()
    }
}

impl Default for Offset {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq={} ts={}us", self.sequence, self.timestamp_us)
    }
}
