//! Producer-side shard assignment and routing.
//!
//! The assigner keeps a producer's view of the active shard set in sync
//! with splits and merges: one set-diff per refresh, no group protocol.
//! The producer itself is a thin router that spreads batches round-robin
//! over the current set and re-routes once when a shard stops accepting
//! writes.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use freshet_core::{
    Assignment, ClientError, ClientResult, ProducerConfig, ShardId, ShardMeta, TopicPath,
};
use freshet_service::StreamService;
use tracing::{debug, info, warn};

use crate::retry::Retryer;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks the active shard set for a producer.
pub struct ShardAssigner {
    service: Arc<dyn StreamService>,
    topic: TopicPath,
    retryer: Retryer,
    current: Mutex<BTreeSet<ShardId>>,
    closed: AtomicBool,
}

impl ShardAssigner {
    /// Creates an assigner with an empty current set.
    #[must_use]
    pub fn new(
        service: Arc<dyn StreamService>,
        topic: TopicPath,
        config: &ProducerConfig,
    ) -> Self {
        Self {
            service,
            topic,
            retryer: Retryer::new(
                config.retry_count,
                Duration::from_millis(config.retry_interval_ms),
            ),
            current: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed {
                resource: "shard assigner",
            });
        }
        Ok(())
    }

    /// Fetches the live active set and returns the delta against the
    /// previously known set, replacing it.
    ///
    /// # Errors
    ///
    /// Propagates listing faults and the closed state.
    pub async fn get_new_assignment(&self) -> ClientResult<Assignment> {
        self.ensure_open()?;
        let shards = self
            .retryer
            .run("list shards", || self.service.list_shards(&self.topic))
            .await?;
        let live = ShardMeta::from_shards(&shards).active_shard_ids().clone();

        let mut current = lock(&self.current);
        let assignment = Assignment::diff(&current, &live);
        *current = live;
        Ok(assignment)
    }

    /// Returns true if every given shard is currently active.
    ///
    /// # Errors
    ///
    /// Propagates listing faults and the closed state.
    pub async fn check_all_active(&self, shard_ids: &[ShardId]) -> ClientResult<bool> {
        self.ensure_open()?;
        let shards = self
            .retryer
            .run("list shards", || self.service.list_shards(&self.topic))
            .await?;
        let meta = ShardMeta::from_shards(&shards);
        Ok(shard_ids
            .iter()
            .all(|id| meta.active_shard_ids().contains(id)))
    }

    /// Returns the currently tracked active set.
    #[must_use]
    pub fn current_assignment(&self) -> BTreeSet<ShardId> {
        lock(&self.current).clone()
    }

    /// Marks the assigner closed. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct RouteState {
    shards: Vec<ShardId>,
    next: usize,
}

/// Thin record producer routing batches across active shards.
pub struct Producer {
    service: Arc<dyn StreamService>,
    topic: TopicPath,
    retryer: Retryer,
    assigner: ShardAssigner,
    route: Mutex<RouteState>,
    closed: AtomicBool,
}

impl Producer {
    /// Creates a producer; the first send discovers the active shards.
    #[must_use]
    pub fn new(service: Arc<dyn StreamService>, topic: TopicPath, config: &ProducerConfig) -> Self {
        let assigner = ShardAssigner::new(service.clone(), topic.clone(), config);
        Self {
            service,
            topic,
            retryer: Retryer::new(
                config.retry_count,
                Duration::from_millis(config.retry_interval_ms),
            ),
            assigner,
            route: Mutex::new(RouteState::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed {
                resource: "producer",
            });
        }
        Ok(())
    }

    fn pick_shard(&self) -> Option<ShardId> {
        let mut route = lock(&self.route);
        if route.shards.is_empty() {
            return None;
        }
        let shard = route.shards[route.next % route.shards.len()].clone();
        route.next = route.next.wrapping_add(1);
        Some(shard)
    }

    async fn refresh_routes(&self) -> ClientResult<()> {
        let assignment = self.assigner.get_new_assignment().await?;
        if !assignment.is_empty() {
            info!(
                topic = %self.topic,
                release = assignment.release.len(),
                acquire = assignment.acquire.len(),
                "producer shard routes changed"
            );
        }
        let mut route = lock(&self.route);
        route.shards = self.assigner.current_assignment().into_iter().collect();
        Ok(())
    }

    /// Sends one batch to the next shard in round-robin order.
    ///
    /// A shard that went missing or sealed under the router triggers one
    /// route refresh and re-send. Returns the shard that took the batch.
    ///
    /// # Errors
    ///
    /// Propagates write faults, and `Closed` after `close`.
    pub async fn send(&self, entries: Vec<Bytes>) -> ClientResult<ShardId> {
        self.ensure_open()?;
        let shard = match self.pick_shard() {
            Some(shard) => shard,
            None => {
                self.refresh_routes().await?;
                self.pick_shard()
                    .ok_or_else(|| ClientError::service("no active shards to route to"))?
            }
        };

        let written = self
            .retryer
            .run("put records", || {
                self.service
                    .put_records(&self.topic, &shard, entries.clone())
            })
            .await;
        match written {
            Ok(()) => {
                debug!(shard_id = %shard, count = entries.len(), "batch written");
                Ok(shard)
            }
            Err(ClientError::ShardSealed { .. } | ClientError::NotFound { .. }) => {
                warn!(shard_id = %shard, "routed shard no longer writable, refreshing routes");
                self.refresh_routes().await?;
                let shard = self
                    .pick_shard()
                    .ok_or_else(|| ClientError::service("no active shards to route to"))?;
                self.retryer
                    .run("put records", || {
                        self.service
                            .put_records(&self.topic, &shard, entries.clone())
                    })
                    .await?;
                debug!(shard_id = %shard, count = entries.len(), "batch written after re-route");
                Ok(shard)
            }
            Err(err) => Err(err),
        }
    }

    /// Marks the producer closed. Idempotent; later sends fail with
    /// `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.assigner.close();
    }
}

#[cfg(test)]
mod tests {
    use freshet_service::SimulatedService;

    use super::*;

    fn topic() -> TopicPath {
        TopicPath::new("test_project", "test_topic")
    }

    fn set(ids: &[&str]) -> BTreeSet<ShardId> {
        ids.iter().map(|id| ShardId::new(*id)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_assignment_diff_tracks_splits() {
        let service = SimulatedService::new();
        service.create_shard("0");
        service.create_shard("1");

        let assigner = ShardAssigner::new(
            Arc::new(service.clone()),
            topic(),
            &ProducerConfig::default(),
        );

        let first = assigner.get_new_assignment().await.unwrap();
        assert!(first.release.is_empty());
        assert_eq!(first.acquire, set(&["0", "1"]));

        // Shard 0 merges away, shard 2 appears.
        service.seal_shard(&ShardId::new("0"));
        service.create_shard("2");

        let second = assigner.get_new_assignment().await.unwrap();
        assert_eq!(second.release, set(&["0"]));
        assert_eq!(second.acquire, set(&["2"]));
        assert_eq!(assigner.current_assignment(), set(&["1", "2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_all_active() {
        let service = SimulatedService::new();
        service.create_shard("0");
        service.create_shard("1");
        service.seal_shard(&ShardId::new("1"));

        let assigner = ShardAssigner::new(
            Arc::new(service.clone()),
            topic(),
            &ProducerConfig::default(),
        );

        assert!(assigner.check_all_active(&[ShardId::new("0")]).await.unwrap());
        assert!(!assigner
            .check_all_active(&[ShardId::new("0"), ShardId::new("1")])
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_round_robins_across_shards() {
        let service = SimulatedService::new();
        service.create_shard("0");
        service.create_shard("1");

        let producer = Producer::new(
            Arc::new(service.clone()),
            topic(),
            &ProducerConfig::default(),
        );

        for i in 0..4 {
            producer
                .send(vec![Bytes::from(format!("entry-{i}"))])
                .await
                .unwrap();
        }

        assert_eq!(service.record_count(&ShardId::new("0")), 2);
        assert_eq!(service.record_count(&ShardId::new("1")), 2);
        producer.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reroutes_around_sealed_shard() {
        let service = SimulatedService::new();
        service.create_shard("0");
        service.create_shard("1");

        let producer = Producer::new(
            Arc::new(service.clone()),
            topic(),
            &ProducerConfig::default(),
        );
        // Discover both shards, then seal one under the router.
        producer.send(vec![Bytes::from("warmup")]).await.unwrap();
        service.seal_shard(&ShardId::new("0"));

        for i in 0..3 {
            producer
                .send(vec![Bytes::from(format!("entry-{i}"))])
                .await
                .unwrap();
        }

        assert_eq!(service.record_count(&ShardId::new("0")), 1);
        assert_eq!(service.record_count(&ShardId::new("1")), 3);
        producer.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_close_fails_fast() {
        let service = SimulatedService::new();
        service.create_shard("0");

        let producer = Producer::new(
            Arc::new(service.clone()),
            topic(),
            &ProducerConfig::default(),
        );
        producer.close();
        producer.close();

        let err = producer.send(vec![Bytes::from("entry")]).await.unwrap_err();
        assert_eq!(err, ClientError::Closed { resource: "producer" });
    }
}
