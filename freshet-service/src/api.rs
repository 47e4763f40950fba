//! The `StreamService` trait and its request/response models.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use freshet_core::{
    ClientResult, GroupMembership, HeartbeatPlan, Offset, RecordEntry, ShardDesc, ShardId,
    Subscription, TopicPath,
};

/// How a cursor request positions within a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    /// Position at the first record whose sequence is >= the value.
    Sequence,
    /// Position at the first record whose timestamp is >= the value
    /// (microseconds).
    SystemTime,
    /// Position at the oldest retained record; the value is ignored.
    Oldest,
}

/// A resolved cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorInfo {
    /// Opaque positional token to pass to record reads.
    pub cursor: String,
    /// Sequence of the record the cursor points at, `-1` at end of shard.
    pub sequence: i64,
    /// Timestamp of the record the cursor points at, `-1` at end of shard.
    pub record_time_us: i64,
}

/// One batch of records pulled from a shard.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    /// The records, in sequence order. Empty when caught up.
    pub records: Vec<RecordEntry>,
    /// Cursor to continue reading from.
    pub next_cursor: String,
}

/// Topic-level metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicMeta {
    /// Number of shards the topic currently has.
    pub shard_count: u32,
}

/// The streaming-service surface the client consumes.
///
/// Implementations must be `Send + Sync`; the engine shares one service
/// handle across the heartbeat task and every shard fetch loop.
#[async_trait]
pub trait StreamService: Send + Sync + 'static {
    /// Fetches topic metadata.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    async fn get_topic(&self, topic: &TopicPath) -> ClientResult<TopicMeta>;

    /// Lists all shards of a topic with their lifecycle states.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    async fn list_shards(&self, topic: &TopicPath) -> ClientResult<Vec<ShardDesc>>;

    /// Resolves a cursor within a shard.
    ///
    /// # Errors
    ///
    /// Returns `SeekOutOfRange` if the positioning value is rejected and
    /// `NotFound` if the shard does not exist.
    async fn get_cursor(
        &self,
        topic: &TopicPath,
        shard_id: &ShardId,
        kind: CursorKind,
        value: i64,
    ) -> ClientResult<CursorInfo>;

    /// Pulls up to `limit` records starting at a cursor.
    ///
    /// # Errors
    ///
    /// Returns `ShardSealed` once the cursor is past the final record of
    /// a sealed shard, `CursorExpired` if the cursor fell out of
    /// retention, and `NotFound` if the shard does not exist.
    async fn get_records(
        &self,
        topic: &TopicPath,
        shard_id: &ShardId,
        cursor: &str,
        limit: usize,
    ) -> ClientResult<RecordBatch>;

    /// Appends records to a shard.
    ///
    /// # Errors
    ///
    /// Returns `ShardSealed` if the shard no longer accepts writes and
    /// `NotFound` if it does not exist.
    async fn put_records(
        &self,
        topic: &TopicPath,
        shard_id: &ShardId,
        entries: Vec<Bytes>,
    ) -> ClientResult<()>;

    /// Joins the consumer group of a subscription, requesting a session
    /// timeout. The service may grant a different value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the subscription does not exist.
    async fn join_group(
        &self,
        sub: &Subscription,
        session_timeout_ms: u64,
    ) -> ClientResult<GroupMembership>;

    /// Reports liveness and fetches the current assignment plan.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the consumer was evicted from the group and
    /// `SessionInvalid` if the subscription session was reset.
    async fn heartbeat(
        &self,
        sub: &Subscription,
        consumer_id: &str,
        version_id: i64,
    ) -> ClientResult<HeartbeatPlan>;

    /// Commits a voluntary shard release and/or read-end notification.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the consumer was evicted and
    /// `SessionInvalid` if the subscription session was reset.
    async fn sync_group(
        &self,
        sub: &Subscription,
        consumer_id: &str,
        version_id: i64,
        release: &[ShardId],
        read_end: &[ShardId],
    ) -> ClientResult<()>;

    /// Opens a subscription session on shards, returning their committed
    /// offsets.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the subscription does not exist.
    async fn open_offsets(
        &self,
        sub: &Subscription,
        shard_ids: &[ShardId],
    ) -> ClientResult<HashMap<ShardId, Offset>>;

    /// Commits offsets for a subscription.
    ///
    /// # Errors
    ///
    /// Returns `SessionInvalid` if the offsets were reset or the session
    /// invalidated since they were opened.
    async fn commit_offsets(
        &self,
        sub: &Subscription,
        offsets: &HashMap<ShardId, Offset>,
    ) -> ClientResult<()>;

    /// Reads the committed offsets of shards without opening a session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the subscription does not exist.
    async fn get_offsets(
        &self,
        sub: &Subscription,
        shard_ids: &[ShardId],
    ) -> ClientResult<HashMap<ShardId, Offset>>;
}
