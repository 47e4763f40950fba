//! Multiplexing reader over a dynamic set of shard readers.
//!
//! The group owns one [`ShardReader`] per assigned shard and fans a single
//! `read()` across them in round-robin order. Assignment changes add and
//! remove readers concurrently with in-progress reads; iteration snapshots
//! the reader set at pass start, so mutation never invalidates a pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use freshet_core::{
    ClientError, ClientResult, ConsumerConfig, Offset, RecordEntry, ShardId, TopicPath,
};
use freshet_service::StreamService;
use tracing::info;

use crate::reader::ShardReader;

/// Round-robin reader over all currently assigned shards.
pub struct ShardGroupReader {
    service: Arc<dyn StreamService>,
    topic: TopicPath,
    config: ConsumerConfig,
    readers: Mutex<BTreeMap<ShardId, Arc<ShardReader>>>,
    /// Where the next fair pass starts, advanced past whichever reader
    /// produced data so no shard starves.
    rotation: Mutex<usize>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ShardGroupReader {
    /// Creates an empty group reader.
    #[must_use]
    pub fn new(service: Arc<dyn StreamService>, topic: TopicPath, config: ConsumerConfig) -> Self {
        Self {
            service,
            topic,
            config,
            readers: Mutex::new(BTreeMap::new()),
            rotation: Mutex::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed {
                resource: "shard group reader",
            });
        }
        Ok(())
    }

    /// Starts one reader per entry, skipping shards already present.
    ///
    /// # Errors
    ///
    /// Fails with `Closed` after `close`.
    pub fn create_shard_reader(&self, offsets: HashMap<ShardId, Offset>) -> ClientResult<()> {
        self.ensure_open()?;
        let mut readers = lock(&self.readers);
        for (shard_id, offset) in offsets {
            if readers.contains_key(&shard_id) {
                continue;
            }
            info!(shard_id = %shard_id, %offset, "starting shard reader");
            let reader = ShardReader::new(
                self.service.clone(),
                self.topic.clone(),
                shard_id.clone(),
                offset,
                &self.config,
            );
            readers.insert(shard_id, Arc::new(reader));
        }
        Ok(())
    }

    /// Closes and discards the named readers. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Fails with `Closed` after `close`.
    pub async fn remove_shard_reader(&self, shard_ids: &[ShardId]) -> ClientResult<()> {
        self.ensure_open()?;
        let removed: Vec<Arc<ShardReader>> = {
            let mut readers = lock(&self.readers);
            shard_ids
                .iter()
                .filter_map(|shard_id| readers.remove(shard_id))
                .collect()
        };
        for reader in removed {
            info!(shard_id = %reader.shard_id(), "stopping shard reader");
            reader.close().await;
        }
        Ok(())
    }

    /// One fair pass over the shard set: returns the first buffered record
    /// found, rotating the starting shard so no shard starves.
    ///
    /// # Errors
    ///
    /// Propagates a reader's stored fault and fails with `Closed` after
    /// `close`.
    pub fn read(&self) -> ClientResult<Option<RecordEntry>> {
        self.ensure_open()?;
        let snapshot: Vec<Arc<ShardReader>> =
            lock(&self.readers).values().cloned().collect();
        if snapshot.is_empty() {
            return Ok(None);
        }

        let len = snapshot.len();
        let start = *lock(&self.rotation) % len;
        for step in 0..len {
            let index = (start + step) % len;
            match snapshot[index].read() {
                Ok(Some(record)) => {
                    *lock(&self.rotation) = (index + 1) % len;
                    return Ok(Some(record));
                }
                Ok(None) => {}
                // A reader closed by a concurrent removal is not a group
                // fault; skip it.
                Err(ClientError::Closed { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Returns the ids of all owned readers.
    #[must_use]
    pub fn shard_ids(&self) -> BTreeSet<ShardId> {
        lock(&self.readers).keys().cloned().collect()
    }

    /// End sequences of readers that sealed and drained, keyed by shard.
    #[must_use]
    pub fn read_end_sequences(&self) -> HashMap<ShardId, i64> {
        lock(&self.readers)
            .iter()
            .filter(|(_, reader)| reader.is_read_end())
            .map(|(shard_id, reader)| (shard_id.clone(), reader.end_sequence()))
            .collect()
    }

    /// Closes every owned reader. Idempotent; later operations fail with
    /// `Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let readers: Vec<Arc<ShardReader>> =
            std::mem::take(&mut *lock(&self.readers)).into_values().collect();
        for reader in readers {
            reader.close().await;
        }
    }
}
