//! Record entries delivered by shard reads.

use bytes::Bytes;

use crate::types::ShardId;

/// One record pulled from a shard.
///
/// The service stamps every record with its sequence number, its system
/// timestamp, and the cursor pair locating it (`cursor` points at the
/// record, `next_cursor` at its successor). The payload is opaque bytes;
/// schema handling lives above this library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    /// Shard the record came from.
    pub shard_id: ShardId,
    /// Per-shard sequence number, monotonically increasing.
    pub sequence: i64,
    /// Service-side timestamp in microseconds.
    pub system_time_us: i64,
    /// Cursor pointing at this record.
    pub cursor: String,
    /// Cursor pointing at the record after this one.
    pub next_cursor: String,
    /// Opaque payload.
    pub data: Bytes,
}

impl RecordEntry {
    /// Creates a record entry.
    #[must_use]
    pub fn new(
        shard_id: impl Into<ShardId>,
        sequence: i64,
        system_time_us: i64,
        cursor: impl Into<String>,
        next_cursor: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence,
            system_time_us,
            cursor: cursor.into(),
            next_cursor: next_cursor.into(),
            data: data.into(),
        }
    }
}
