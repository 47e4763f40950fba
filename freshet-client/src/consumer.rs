//! The consumer facade.
//!
//! Wires the shard coordinator, the offset coordinator, and the group
//! reader behind one `read()`/`close()` surface. Three construction modes:
//!
//! - **auto-assign**: the group protocol assigns shards dynamically;
//! - **explicit shards**: the caller names the shards, offsets are still
//!   opened and committed through the subscription;
//! - **explicit offsets**: the caller supplies exact resume positions and
//!   manages offsets itself; nothing is opened or committed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use freshet_core::{
    ClientError, ClientResult, ConsumerConfig, Offset, RecordEntry, ShardId, Subscription,
};
use freshet_service::StreamService;
use tokio::time::Instant;
use tracing::info;

use crate::coordinator::ShardCoordinator;
use crate::group_reader::ShardGroupReader;
use crate::offsets::OffsetCoordinator;
use crate::retry::Retryer;

/// High-level record consumer for one subscription.
pub struct Consumer {
    config: ConsumerConfig,
    coordinator: Option<ShardCoordinator>,
    offsets: Option<OffsetCoordinator>,
    group_reader: ShardGroupReader,
    closed: AtomicBool,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer").finish_non_exhaustive()
    }
}

impl Consumer {
    /// Creates an auto-assign consumer driven by the group protocol.
    ///
    /// # Errors
    ///
    /// Fails if the topic does not exist or the group join fails.
    pub async fn new(
        service: Arc<dyn StreamService>,
        subscription: Subscription,
        config: ConsumerConfig,
    ) -> ClientResult<Self> {
        Self::validate_topic(&service, &subscription, &config).await?;
        let coordinator =
            ShardCoordinator::new(service.clone(), subscription.clone(), &config).await?;
        let offsets = OffsetCoordinator::new(service.clone(), subscription.clone(), &config);
        let group_reader =
            ShardGroupReader::new(service, subscription.topic.clone(), config.clone());
        info!(subscription = %subscription, "consumer created with auto assignment");
        Ok(Self {
            config,
            coordinator: Some(coordinator),
            offsets: Some(offsets),
            group_reader,
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a consumer over a fixed shard set, resuming from the
    /// subscription's committed offsets.
    ///
    /// # Errors
    ///
    /// Fails if the topic does not exist or opening the offsets fails.
    pub async fn with_shards(
        service: Arc<dyn StreamService>,
        subscription: Subscription,
        shard_ids: Vec<ShardId>,
        config: ConsumerConfig,
    ) -> ClientResult<Self> {
        Self::validate_topic(&service, &subscription, &config).await?;
        let offsets = OffsetCoordinator::new(service.clone(), subscription.clone(), &config);
        let opened = offsets.open_and_get(&shard_ids).await?;
        let group_reader =
            ShardGroupReader::new(service, subscription.topic.clone(), config.clone());
        group_reader.create_shard_reader(opened)?;
        info!(subscription = %subscription, shards = shard_ids.len(),
            "consumer created with fixed shard assignment");
        Ok(Self {
            config,
            coordinator: None,
            offsets: Some(offsets),
            group_reader,
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a consumer resuming from caller-supplied offsets; offsets
    /// are not opened or committed.
    ///
    /// # Errors
    ///
    /// Fails if the topic does not exist.
    pub async fn with_offsets(
        service: Arc<dyn StreamService>,
        subscription: Subscription,
        offset_map: HashMap<ShardId, Offset>,
        config: ConsumerConfig,
    ) -> ClientResult<Self> {
        Self::validate_topic(&service, &subscription, &config).await?;
        let group_reader =
            ShardGroupReader::new(service, subscription.topic.clone(), config.clone());
        group_reader.create_shard_reader(offset_map)?;
        info!(subscription = %subscription, "consumer created with explicit offsets");
        Ok(Self {
            config,
            coordinator: None,
            offsets: None,
            group_reader,
            closed: AtomicBool::new(false),
        })
    }

    async fn validate_topic(
        service: &Arc<dyn StreamService>,
        subscription: &Subscription,
        config: &ConsumerConfig,
    ) -> ClientResult<()> {
        let retryer = Retryer::new(
            config.retry_count,
            Duration::from_millis(config.retry_interval_ms),
        );
        retryer
            .run("get topic", || service.get_topic(&subscription.topic))
            .await?;
        Ok(())
    }

    /// Reads the next record, waiting up to `timeout`.
    ///
    /// One pass per poll interval: rejoin/assignment maintenance in auto
    /// mode, an offset commit when due, then a fair read across shards.
    /// Returns `Ok(None)` if the deadline passes with no data; "no data
    /// yet" and "all sealed shards drained" are both ordinary empties.
    ///
    /// # Errors
    ///
    /// Propagates sticky session faults, reader faults, and `Closed`.
    pub async fn read(&self, timeout: Duration) -> ClientResult<Option<RecordEntry>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(ClientError::Closed {
                    resource: "consumer",
                });
            }

            if let (Some(coordinator), Some(offsets)) = (&self.coordinator, &self.offsets) {
                coordinator.rejoin_if_needed().await?;
                coordinator.sync_assignment(&self.group_reader, offsets).await?;
            }
            if self.config.auto_commit {
                if let Some(offsets) = &self.offsets {
                    offsets.commit_if_needed().await?;
                }
            }

            if let Some(record) = self.group_reader.read()? {
                if let Some(offsets) = &self.offsets {
                    offsets.set_offset(&record.shard_id, record.sequence, record.system_time_us);
                }
                return Ok(Some(record));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(self.config.read_poll_interval_ms)).await;
        }
    }

    /// Stops coordination and every fetch loop. Idempotent; later reads
    /// fail with `Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.close().await;
        }
        self.group_reader.close().await;
        if let Some(offsets) = &self.offsets {
            offsets.close();
        }
    }
}
