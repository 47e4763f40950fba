//! Committed-offset tracking and interval-gated commits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use freshet_core::{
    limits, ClientError, ClientResult, ConsumerConfig, Offset, ShardId, Subscription,
};
use freshet_service::StreamService;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::retry::Retryer;

#[derive(Debug)]
struct OffsetState {
    committed: HashMap<ShardId, Offset>,
    dirty: bool,
    /// Bumped by every local update; guards against clearing progress that
    /// arrived while a commit was in flight.
    epoch: u64,
    last_commit: Instant,
    fault: Option<ClientError>,
}

/// Owns the committed read position per shard and drives commit requests.
///
/// Positions are updated locally after each delivered record and pushed to
/// the service at most once per commit interval. A session-invalidated
/// fault (or a spent transient-retry budget) is sticky: it is stored and
/// re-raised on every later call until the coordinator is recreated,
/// modelling the terminal state that requires the application to rejoin.
pub struct OffsetCoordinator {
    service: Arc<dyn StreamService>,
    subscription: Subscription,
    commit_interval: Duration,
    commit_timeout: Duration,
    retryer: Retryer,
    state: Mutex<OffsetState>,
    /// Commit requests must never overlap for one coordinator.
    commit_gate: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

fn lock(state: &Mutex<OffsetState>) -> std::sync::MutexGuard<'_, OffsetState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OffsetCoordinator {
    /// Creates a coordinator with nothing opened yet.
    #[must_use]
    pub fn new(
        service: Arc<dyn StreamService>,
        subscription: Subscription,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            service,
            subscription,
            commit_interval: Duration::from_millis(config.offset_commit_interval_ms),
            commit_timeout: Duration::from_millis(config.offset_commit_timeout_ms),
            retryer: Retryer::new(
                limits::COMMIT_RETRY_COUNT,
                Duration::from_millis(config.retry_interval_ms),
            ),
            state: Mutex::new(OffsetState {
                committed: HashMap::new(),
                dirty: false,
                epoch: 0,
                last_commit: Instant::now(),
                fault: None,
            }),
            commit_gate: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed {
                resource: "offset coordinator",
            });
        }
        Ok(())
    }

    fn check_fault(&self) -> ClientResult<()> {
        match &lock(&self.state).fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    /// Opens any not-yet-opened shards and returns the committed offsets
    /// for all requested shards.
    ///
    /// Opening marks the tracked set clean: a commit only happens once a
    /// local update dirties it again.
    ///
    /// # Errors
    ///
    /// Propagates open-request faults and the closed state.
    pub async fn open_and_get(
        &self,
        shard_ids: &[ShardId],
    ) -> ClientResult<HashMap<ShardId, Offset>> {
        self.ensure_open()?;

        let to_open: Vec<ShardId> = {
            let state = lock(&self.state);
            shard_ids
                .iter()
                .filter(|id| !state.committed.contains_key(*id))
                .cloned()
                .collect()
        };

        if !to_open.is_empty() {
            let opened = self
                .retryer
                .run("open offsets", || {
                    self.service.open_offsets(&self.subscription, &to_open)
                })
                .await?;
            debug!(count = opened.len(), "opened shard offsets");

            let mut state = lock(&self.state);
            state.committed.extend(opened);
            state.dirty = false;
        }

        let state = lock(&self.state);
        Ok(shard_ids
            .iter()
            .filter_map(|id| state.committed.get(id).map(|offset| (id.clone(), *offset)))
            .collect())
    }

    /// Records the position of a delivered record. Local and synchronous;
    /// the next commit reflects it.
    pub fn set_offset(&self, shard_id: &ShardId, sequence: i64, timestamp_us: i64) {
        let mut state = lock(&self.state);
        let entry = state
            .committed
            .entry(shard_id.clone())
            .or_insert_with(Offset::invalid);
        entry.sequence = sequence;
        entry.timestamp_us = timestamp_us;
        state.dirty = true;
        state.epoch += 1;
    }

    /// Returns the tracked offset for a shard, if opened or updated.
    #[must_use]
    pub fn offset(&self, shard_id: &ShardId) -> Option<Offset> {
        lock(&self.state).committed.get(shard_id).copied()
    }

    /// Commits the tracked set if it is dirty and the commit interval has
    /// elapsed; otherwise does nothing.
    ///
    /// # Errors
    ///
    /// Re-raises a sticky fault on every call once one is stored. A
    /// session-invalidated response or a spent retry budget becomes the
    /// sticky fault; a failed attempt never clears dirtiness.
    pub async fn commit_if_needed(&self) -> ClientResult<()> {
        self.ensure_open()?;
        self.check_fault()?;

        let _gate = self.commit_gate.lock().await;

        let (snapshot, epoch) = {
            let state = lock(&self.state);
            if let Some(fault) = &state.fault {
                return Err(fault.clone());
            }
            if !state.dirty || state.last_commit.elapsed() < self.commit_interval {
                return Ok(());
            }
            (state.committed.clone(), state.epoch)
        };

        debug!(count = snapshot.len(), "committing offsets");
        let result = self
            .retryer
            .run("commit offsets", || async {
                let request = self.service.commit_offsets(&self.subscription, &snapshot);
                match tokio::time::timeout(self.commit_timeout, request).await {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::service("offset commit request timed out")),
                }
            })
            .await;

        match result {
            Ok(()) => {
                let mut state = lock(&self.state);
                state.last_commit = Instant::now();
                if state.epoch == epoch {
                    state.dirty = false;
                }
                Ok(())
            }
            Err(err) => {
                // A retryable fault reaching here means the budget is spent.
                let sticky =
                    matches!(err, ClientError::SessionInvalid { .. }) || err.is_retryable();
                if sticky {
                    warn!(error = %err, "offset commit failed terminally");
                    lock(&self.state).fault = Some(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Returns the shards whose tracked sequence equals the supplied end
    /// sequence, i.e. shards fully consumed up to their close point.
    ///
    /// # Errors
    ///
    /// Re-raises a sticky fault and the closed state.
    pub fn get_read_end_shard_list(
        &self,
        end_sequences: &HashMap<ShardId, i64>,
    ) -> ClientResult<Vec<ShardId>> {
        self.ensure_open()?;
        self.check_fault()?;

        let state = lock(&self.state);
        Ok(end_sequences
            .iter()
            .filter(|(id, end)| {
                state
                    .committed
                    .get(*id)
                    .is_some_and(|offset| offset.sequence == **end)
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    /// Marks the coordinator closed. Idempotent; no flush is attempted.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
