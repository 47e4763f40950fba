//! Consumer-group coordination: join, rejoin, sync, assignment diffs.
//!
//! The coordinator drives the join -> heartbeat -> sync protocol. The
//! heartbeat task reports the assignment plan; whenever the plan version
//! moves, [`ShardCoordinator::sync_assignment`] diffs the plan against the
//! live reader set and releases before acquiring, so a shard is never
//! consumed under two owners. Fully consumed sealed shards are voluntarily
//! released through the same sync call.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use freshet_core::{
    limits, Assignment, ClientError, ClientResult, ConsumerConfig, GroupMembership, HeartbeatPlan,
    ShardId, Subscription,
};
use freshet_service::StreamService;
use tracing::{info, warn};

use crate::group_reader::ShardGroupReader;
use crate::heartbeat::Heartbeat;
use crate::offsets::OffsetCoordinator;
use crate::retry::Retryer;

/// Drives group membership and keeps the reader set matched to the plan.
pub struct ShardCoordinator {
    service: Arc<dyn StreamService>,
    subscription: Subscription,
    /// Session timeout requested on every join, clamped to the accepted
    /// range.
    session_timeout_ms: u64,
    heartbeat: Heartbeat,
    membership: Mutex<Option<GroupMembership>>,
    /// Last plan version applied to the reader set.
    applied_plan_version: AtomicI64,
    need_rejoin: AtomicBool,
    join_retryer: Retryer,
    sync_retryer: Retryer,
    closed: AtomicBool,
}

impl std::fmt::Debug for ShardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCoordinator").finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ShardCoordinator {
    /// Joins the consumer group and starts heartbeating.
    ///
    /// # Errors
    ///
    /// Propagates join faults; an invalid subscription is not retried.
    pub async fn new(
        service: Arc<dyn StreamService>,
        subscription: Subscription,
        config: &ConsumerConfig,
    ) -> ClientResult<Self> {
        let retry_interval = Duration::from_millis(config.retry_interval_ms);
        let heartbeat = Heartbeat::new(service.clone(), subscription.clone(), config.retry_count);
        let coordinator = Self {
            service,
            subscription,
            session_timeout_ms: limits::clamp_session_timeout_ms(config.session_timeout_ms),
            heartbeat,
            membership: Mutex::new(None),
            applied_plan_version: AtomicI64::new(limits::DEFAULT_PLAN_VERSION),
            need_rejoin: AtomicBool::new(false),
            join_retryer: Retryer::new(limits::JOIN_RETRY_COUNT, retry_interval),
            sync_retryer: Retryer::new(config.retry_count, retry_interval),
            closed: AtomicBool::new(false),
        };
        coordinator.join().await?;
        Ok(coordinator)
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed {
                resource: "shard coordinator",
            });
        }
        Ok(())
    }

    async fn join(&self) -> ClientResult<()> {
        let membership = self
            .join_retryer
            .run("join group", || {
                self.service
                    .join_group(&self.subscription, self.session_timeout_ms)
            })
            .await?;
        info!(
            subscription = %self.subscription,
            consumer_id = %membership.consumer_id,
            session_timeout_ms = membership.session_timeout_ms,
            "joined consumer group"
        );
        self.heartbeat.start(&membership);
        *lock(&self.membership) = Some(membership);
        self.applied_plan_version
            .store(limits::DEFAULT_PLAN_VERSION, Ordering::Release);
        self.need_rejoin.store(false, Ordering::Release);
        Ok(())
    }

    /// Rejoins the group if the membership was lost; returns whether a
    /// rejoin happened.
    ///
    /// # Errors
    ///
    /// A heartbeat fault other than membership loss propagates unchanged,
    /// on this call and every later one.
    pub async fn rejoin_if_needed(&self) -> ClientResult<bool> {
        self.ensure_open()?;
        let lost = match self.heartbeat.check_running() {
            Ok(_) => false,
            Err(ClientError::NotFound { .. }) => true,
            Err(err) => return Err(err),
        };
        if !lost && !self.need_rejoin.load(Ordering::Acquire) {
            return Ok(false);
        }

        warn!(subscription = %self.subscription, "group membership lost, rejoining");
        self.heartbeat.stop().await;
        self.join().await?;
        Ok(true)
    }

    /// Commits a voluntary release and/or read-end notification.
    ///
    /// A consumer evicted from the group is not an error here: the next
    /// [`Self::rejoin_if_needed`] call rejoins instead.
    ///
    /// # Errors
    ///
    /// A session fault propagates immediately without a rejoin attempt.
    pub async fn sync_group(
        &self,
        release: &[ShardId],
        read_end: &[ShardId],
    ) -> ClientResult<()> {
        self.ensure_open()?;
        if release.is_empty() && read_end.is_empty() {
            return Ok(());
        }
        let Some(membership) = lock(&self.membership).clone() else {
            return Err(ClientError::invalid_parameter("no group membership"));
        };

        let synced = self
            .sync_retryer
            .run("sync group", || {
                self.service.sync_group(
                    &self.subscription,
                    &membership.consumer_id,
                    membership.version_id,
                    release,
                    read_end,
                )
            })
            .await;
        match synced {
            Ok(()) => Ok(()),
            Err(ClientError::NotFound { .. }) => {
                warn!(consumer_id = %membership.consumer_id,
                    "consumer no longer in group, sync dropped, will rejoin");
                self.need_rejoin.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Returns a snapshot of the heartbeat's assignment plan.
    #[must_use]
    pub fn plan(&self) -> HeartbeatPlan {
        self.heartbeat.plan()
    }

    /// Applies the current assignment plan to the reader set, releasing
    /// before acquiring, and releases fully consumed sealed shards.
    ///
    /// # Errors
    ///
    /// Propagates sync, offset-open, and sticky offset faults.
    pub async fn sync_assignment(
        &self,
        group_reader: &ShardGroupReader,
        offsets: &OffsetCoordinator,
    ) -> ClientResult<()> {
        self.ensure_open()?;

        let plan = self.heartbeat.plan();
        let applied = self.applied_plan_version.load(Ordering::Acquire);
        if plan.plan_version > applied {
            let current = group_reader.shard_ids();
            let assignment = Assignment::diff(&current, &plan.shard_ids);
            info!(
                plan_version = plan.plan_version,
                release = assignment.release.len(),
                acquire = assignment.acquire.len(),
                "applying assignment plan"
            );

            if !assignment.release.is_empty() {
                let release: Vec<ShardId> = assignment.release.into_iter().collect();
                self.sync_group(&release, &[]).await?;
                group_reader.remove_shard_reader(&release).await?;
            }
            if !assignment.acquire.is_empty() {
                let acquire: Vec<ShardId> = assignment.acquire.into_iter().collect();
                let opened = offsets.open_and_get(&acquire).await?;
                group_reader.create_shard_reader(opened)?;
            }
            self.applied_plan_version
                .store(plan.plan_version, Ordering::Release);
        }

        // Sealed shards consumed up to their close point are handed back.
        let ends = group_reader.read_end_sequences();
        if !ends.is_empty() {
            let done = offsets.get_read_end_shard_list(&ends)?;
            if !done.is_empty() {
                self.sync_group(&[], &done).await?;
                group_reader.remove_shard_reader(&done).await?;
                info!(count = done.len(), "released fully consumed shards");
            }
        }
        Ok(())
    }

    /// Stops heartbeating. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.heartbeat.stop().await;
    }
}
