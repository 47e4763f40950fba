//! Simulated streaming service for deterministic tests.
//!
//! `SimulatedService` keeps per-shard record logs in memory, serves
//! cursors as `"{shard}:{index}"` tokens, and lets tests script the
//! responses the way a mock server would: per-endpoint fault injection
//! with a bounded application count, shard sealing, heartbeat plan
//! swaps, and call counters for verification.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use freshet_core::{
    ClientError, ClientResult, GroupMembership, HeartbeatPlan, Offset, RecordEntry, ShardDesc,
    ShardId, ShardState, Subscription, TopicPath,
};

use crate::api::{CursorInfo, CursorKind, RecordBatch, StreamService, TopicMeta};

/// An endpoint of the simulated service, for fault scripting and call
/// counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `get_topic`.
    GetTopic,
    /// `list_shards`.
    ListShards,
    /// `get_cursor` with the given positioning kind.
    GetCursor(CursorKind),
    /// `get_records`.
    GetRecords,
    /// `put_records`.
    PutRecords,
    /// `join_group`.
    JoinGroup,
    /// `heartbeat`.
    Heartbeat,
    /// `sync_group`.
    SyncGroup,
    /// `open_offsets`.
    OpenOffsets,
    /// `commit_offsets`.
    CommitOffsets,
    /// `get_offsets`.
    GetOffsets,
}

/// One recorded `sync_group` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCall {
    /// Consumer that issued the sync.
    pub consumer_id: String,
    /// Shards released back to the group.
    pub release: Vec<ShardId>,
    /// Shards reported as fully consumed.
    pub read_end: Vec<ShardId>,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    sequence: i64,
    system_time_us: i64,
    data: Bytes,
}

#[derive(Debug, Default)]
struct SimShard {
    records: Vec<StoredRecord>,
    sealed: bool,
    state: Option<ShardState>,
}

impl SimShard {
    fn state(&self) -> ShardState {
        self.state.unwrap_or(if self.sealed {
            ShardState::Closed
        } else {
            ShardState::Active
        })
    }
}

#[derive(Debug)]
struct ScriptedFault {
    error: ClientError,
    /// How many more calls the fault applies to; `None` means always.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    shards: BTreeMap<ShardId, SimShard>,
    plan: HeartbeatPlan,
    joined: u64,
    offsets: HashMap<ShardId, Offset>,
    faults: HashMap<Endpoint, ScriptedFault>,
    calls: HashMap<Endpoint, u64>,
    sync_calls: Vec<SyncCall>,
    clock_us: i64,
}

impl Inner {
    /// Counts the call and applies any scripted fault for the endpoint.
    fn begin(&mut self, endpoint: Endpoint) -> ClientResult<()> {
        *self.calls.entry(endpoint).or_insert(0) += 1;

        let Some(fault) = self.faults.get_mut(&endpoint) else {
            return Ok(());
        };
        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(&endpoint);
            }
        }
        Err(error)
    }

    fn shard(&self, shard_id: &ShardId) -> ClientResult<&SimShard> {
        self.shards.get(shard_id).ok_or_else(|| ClientError::NotFound {
            resource: "shard",
            name: shard_id.to_string(),
        })
    }
}

fn parse_cursor(shard_id: &ShardId, cursor: &str) -> ClientResult<usize> {
    let index = cursor
        .strip_prefix(shard_id.as_str())
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(|rest| rest.parse::<usize>().ok());
    index.ok_or_else(|| ClientError::invalid_parameter(format!("malformed cursor: {cursor}")))
}

fn format_cursor(shard_id: &ShardId, index: usize) -> String {
    format!("{shard_id}:{index}")
}

/// In-memory scriptable implementation of [`StreamService`].
///
/// Cloning shares the underlying state, so a clone can be handed to the
/// component under test while the original keeps scripting it.
#[derive(Debug, Clone)]
pub struct SimulatedService {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedService {
    /// Creates an empty simulated service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                clock_us: 1_000_000,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Creates an empty active shard.
    pub fn create_shard(&self, shard_id: impl Into<ShardId>) {
        self.lock().shards.entry(shard_id.into()).or_default();
    }

    /// Appends a record to a shard, creating the shard if needed.
    ///
    /// Returns the sequence assigned to the record.
    pub fn append_record(&self, shard_id: impl Into<ShardId>, data: impl Into<Bytes>) -> i64 {
        let mut inner = self.lock();
        let time = inner.clock_us;
        inner.clock_us += 1_000;
        let shard = inner.shards.entry(shard_id.into()).or_default();
        let sequence = shard.records.len() as i64;
        shard.records.push(StoredRecord {
            sequence,
            system_time_us: time,
            data: data.into(),
        });
        sequence
    }

    /// Returns how many records a shard holds.
    #[must_use]
    pub fn record_count(&self, shard_id: &ShardId) -> usize {
        self.lock()
            .shards
            .get(shard_id)
            .map_or(0, |shard| shard.records.len())
    }

    /// Seals a shard: reads past its final record fail with `ShardSealed`.
    pub fn seal_shard(&self, shard_id: &ShardId) {
        if let Some(shard) = self.lock().shards.get_mut(shard_id) {
            shard.sealed = true;
        }
    }

    /// Overrides the listed lifecycle state of a shard.
    pub fn set_shard_state(&self, shard_id: &ShardId, state: ShardState) {
        if let Some(shard) = self.lock().shards.get_mut(shard_id) {
            shard.state = Some(state);
        }
    }

    /// Replaces the heartbeat assignment plan.
    pub fn set_plan(&self, shard_ids: &[&str], plan_version: i64) {
        let mut inner = self.lock();
        inner.plan = HeartbeatPlan {
            shard_ids: shard_ids.iter().map(|id| ShardId::new(*id)).collect(),
            plan_version,
        };
    }

    /// Sets the committed offset stored for a shard.
    pub fn set_stored_offset(&self, shard_id: impl Into<ShardId>, offset: Offset) {
        self.lock().offsets.insert(shard_id.into(), offset);
    }

    /// Returns the committed offset stored for a shard.
    #[must_use]
    pub fn stored_offset(&self, shard_id: &ShardId) -> Option<Offset> {
        self.lock().offsets.get(shard_id).copied()
    }

    /// Scripts the next `times` calls to an endpoint to fail.
    pub fn fail(&self, endpoint: Endpoint, error: ClientError, times: u32) {
        assert!(times > 0, "scripted fault must apply at least once");
        self.lock().faults.insert(
            endpoint,
            ScriptedFault {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Scripts every call to an endpoint to fail until rescripted.
    pub fn fail_always(&self, endpoint: Endpoint, error: ClientError) {
        self.lock().faults.insert(
            endpoint,
            ScriptedFault {
                error,
                remaining: None,
            },
        );
    }

    /// Clears any scripted fault on an endpoint.
    pub fn clear_fault(&self, endpoint: Endpoint) {
        self.lock().faults.remove(&endpoint);
    }

    /// Returns how many times an endpoint was called, failures included.
    #[must_use]
    pub fn calls(&self, endpoint: Endpoint) -> u64 {
        self.lock().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Returns every recorded `sync_group` call.
    #[must_use]
    pub fn sync_calls(&self) -> Vec<SyncCall> {
        self.lock().sync_calls.clone()
    }
}

#[async_trait]
impl StreamService for SimulatedService {
    async fn get_topic(&self, _topic: &TopicPath) -> ClientResult<TopicMeta> {
        let mut inner = self.lock();
        inner.begin(Endpoint::GetTopic)?;
        #[allow(clippy::cast_possible_truncation)]
        let shard_count = inner.shards.len() as u32;
        Ok(TopicMeta { shard_count })
    }

    async fn list_shards(&self, _topic: &TopicPath) -> ClientResult<Vec<ShardDesc>> {
        let mut inner = self.lock();
        inner.begin(Endpoint::ListShards)?;
        Ok(inner
            .shards
            .iter()
            .map(|(id, shard)| {
                ShardDesc::new(id.clone(), shard.state(), format!("sim://{id}"))
            })
            .collect())
    }

    async fn get_cursor(
        &self,
        _topic: &TopicPath,
        shard_id: &ShardId,
        kind: CursorKind,
        value: i64,
    ) -> ClientResult<CursorInfo> {
        let mut inner = self.lock();
        inner.begin(Endpoint::GetCursor(kind))?;
        let shard = inner.shard(shard_id)?;

        let index = match kind {
            CursorKind::Oldest => 0,
            CursorKind::Sequence => shard
                .records
                .iter()
                .position(|r| r.sequence >= value)
                .unwrap_or(shard.records.len()),
            CursorKind::SystemTime => shard
                .records
                .iter()
                .position(|r| r.system_time_us >= value)
                .unwrap_or(shard.records.len()),
        };

        let (sequence, record_time_us) = shard
            .records
            .get(index)
            .map_or((-1, -1), |r| (r.sequence, r.system_time_us));

        Ok(CursorInfo {
            cursor: format_cursor(shard_id, index),
            sequence,
            record_time_us,
        })
    }

    async fn get_records(
        &self,
        _topic: &TopicPath,
        shard_id: &ShardId,
        cursor: &str,
        limit: usize,
    ) -> ClientResult<RecordBatch> {
        let mut inner = self.lock();
        inner.begin(Endpoint::GetRecords)?;
        let shard = inner.shard(shard_id)?;
        let index = parse_cursor(shard_id, cursor)?;

        if index >= shard.records.len() {
            if shard.sealed {
                return Err(ClientError::ShardSealed {
                    shard_id: shard_id.clone(),
                });
            }
            return Ok(RecordBatch {
                records: Vec::new(),
                next_cursor: cursor.to_string(),
            });
        }

        let end = (index + limit.max(1)).min(shard.records.len());
        let records = shard.records[index..end]
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let at = index + i;
                RecordEntry::new(
                    shard_id.clone(),
                    r.sequence,
                    r.system_time_us,
                    format_cursor(shard_id, at),
                    format_cursor(shard_id, at + 1),
                    r.data.clone(),
                )
            })
            .collect();

        Ok(RecordBatch {
            records,
            next_cursor: format_cursor(shard_id, end),
        })
    }

    async fn put_records(
        &self,
        _topic: &TopicPath,
        shard_id: &ShardId,
        entries: Vec<Bytes>,
    ) -> ClientResult<()> {
        let mut inner = self.lock();
        inner.begin(Endpoint::PutRecords)?;
        let time = inner.clock_us;
        inner.clock_us += 1_000;

        let Some(shard) = inner.shards.get_mut(shard_id) else {
            return Err(ClientError::NotFound {
                resource: "shard",
                name: shard_id.to_string(),
            });
        };
        if shard.sealed {
            return Err(ClientError::ShardSealed {
                shard_id: shard_id.clone(),
            });
        }
        for data in entries {
            let sequence = shard.records.len() as i64;
            shard.records.push(StoredRecord {
                sequence,
                system_time_us: time,
                data,
            });
        }
        Ok(())
    }

    async fn join_group(
        &self,
        _sub: &Subscription,
        session_timeout_ms: u64,
    ) -> ClientResult<GroupMembership> {
        let mut inner = self.lock();
        inner.begin(Endpoint::JoinGroup)?;
        inner.joined += 1;
        #[allow(clippy::cast_possible_wrap)]
        let version_id = inner.joined as i64;
        Ok(GroupMembership {
            consumer_id: format!("consumer-{}", inner.joined),
            version_id,
            session_timeout_ms,
        })
    }

    async fn heartbeat(
        &self,
        _sub: &Subscription,
        _consumer_id: &str,
        _version_id: i64,
    ) -> ClientResult<HeartbeatPlan> {
        let mut inner = self.lock();
        inner.begin(Endpoint::Heartbeat)?;
        Ok(inner.plan.clone())
    }

    async fn sync_group(
        &self,
        _sub: &Subscription,
        consumer_id: &str,
        _version_id: i64,
        release: &[ShardId],
        read_end: &[ShardId],
    ) -> ClientResult<()> {
        let mut inner = self.lock();
        inner.begin(Endpoint::SyncGroup)?;
        inner.sync_calls.push(SyncCall {
            consumer_id: consumer_id.to_string(),
            release: release.to_vec(),
            read_end: read_end.to_vec(),
        });
        Ok(())
    }

    async fn open_offsets(
        &self,
        _sub: &Subscription,
        shard_ids: &[ShardId],
    ) -> ClientResult<HashMap<ShardId, Offset>> {
        let mut inner = self.lock();
        inner.begin(Endpoint::OpenOffsets)?;
        let mut result = HashMap::new();
        for shard_id in shard_ids {
            let offset = inner
                .offsets
                .entry(shard_id.clone())
                .or_insert_with(|| Offset::with_version(-1, -1, 0));
            result.insert(shard_id.clone(), *offset);
        }
        Ok(result)
    }

    async fn commit_offsets(
        &self,
        _sub: &Subscription,
        offsets: &HashMap<ShardId, Offset>,
    ) -> ClientResult<()> {
        let mut inner = self.lock();
        inner.begin(Endpoint::CommitOffsets)?;
        for (shard_id, offset) in offsets {
            inner.offsets.insert(shard_id.clone(), *offset);
        }
        Ok(())
    }

    async fn get_offsets(
        &self,
        _sub: &Subscription,
        shard_ids: &[ShardId],
    ) -> ClientResult<HashMap<ShardId, Offset>> {
        let mut inner = self.lock();
        inner.begin(Endpoint::GetOffsets)?;
        Ok(shard_ids
            .iter()
            .filter_map(|id| inner.offsets.get(id).map(|offset| (id.clone(), *offset)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicPath {
        TopicPath::new("test_project", "test_topic")
    }

    fn load(service: &SimulatedService, shard: &str, count: usize) {
        for i in 0..count {
            service.append_record(shard, format!("record-{i}"));
        }
    }

    #[tokio::test]
    async fn test_cursor_positions_by_sequence() {
        let service = SimulatedService::new();
        load(&service, "0", 5);

        let info = service
            .get_cursor(&topic(), &ShardId::new("0"), CursorKind::Sequence, 2)
            .await
            .unwrap();
        assert_eq!(info.cursor, "0:2");
        assert_eq!(info.sequence, 2);
    }

    #[tokio::test]
    async fn test_records_served_in_order() {
        let service = SimulatedService::new();
        load(&service, "0", 5);

        let batch = service
            .get_records(&topic(), &ShardId::new("0"), "0:1", 2)
            .await
            .unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].sequence, 1);
        assert_eq!(batch.records[1].sequence, 2);
        assert_eq!(batch.next_cursor, "0:3");
    }

    #[tokio::test]
    async fn test_caught_up_returns_empty() {
        let service = SimulatedService::new();
        load(&service, "0", 2);

        let batch = service
            .get_records(&topic(), &ShardId::new("0"), "0:2", 10)
            .await
            .unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.next_cursor, "0:2");
    }

    #[tokio::test]
    async fn test_sealed_shard_past_end() {
        let service = SimulatedService::new();
        load(&service, "0", 2);
        service.seal_shard(&ShardId::new("0"));

        // Remaining records still readable.
        let batch = service
            .get_records(&topic(), &ShardId::new("0"), "0:0", 10)
            .await
            .unwrap();
        assert_eq!(batch.records.len(), 2);

        // Past the end, the seal surfaces.
        let err = service
            .get_records(&topic(), &ShardId::new("0"), "0:2", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ShardSealed { .. }));
    }

    #[tokio::test]
    async fn test_scripted_fault_depletes() {
        let service = SimulatedService::new();
        load(&service, "0", 1);
        service.fail(
            Endpoint::GetRecords,
            ClientError::service("internal error"),
            2,
        );

        let shard = ShardId::new("0");
        assert!(service.get_records(&topic(), &shard, "0:0", 1).await.is_err());
        assert!(service.get_records(&topic(), &shard, "0:0", 1).await.is_err());
        assert!(service.get_records(&topic(), &shard, "0:0", 1).await.is_ok());
        assert_eq!(service.calls(Endpoint::GetRecords), 3);
    }

    #[tokio::test]
    async fn test_join_assigns_fresh_membership() {
        let service = SimulatedService::new();
        let sub = Subscription::new("p", "t", "s");

        let first = service.join_group(&sub, 30_000).await.unwrap();
        let second = service.join_group(&sub, 30_000).await.unwrap();
        assert_ne!(first.consumer_id, second.consumer_id);
        assert!(second.version_id > first.version_id);
        assert_eq!(first.session_timeout_ms, 30_000);
    }

    #[tokio::test]
    async fn test_offsets_roundtrip() {
        let service = SimulatedService::new();
        let sub = Subscription::new("p", "t", "s");
        let shard = ShardId::new("0");
        service.set_stored_offset("0", Offset::with_version(4, 400, 1));

        let opened = service.open_offsets(&sub, &[shard.clone()]).await.unwrap();
        assert_eq!(opened[&shard].sequence, 4);

        let mut commit = HashMap::new();
        commit.insert(shard.clone(), Offset::with_version(9, 900, 1));
        service.commit_offsets(&sub, &commit).await.unwrap();
        assert_eq!(service.stored_offset(&shard).unwrap().sequence, 9);

        let fetched = service.get_offsets(&sub, &[shard.clone()]).await.unwrap();
        assert_eq!(fetched[&shard].sequence, 9);
    }
}
