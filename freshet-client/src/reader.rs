//! Per-shard background fetch loop.
//!
//! Each reader owns one shard: it resolves a cursor from the resume
//! offset, pulls batches into a bounded buffer, and keeps going until the
//! shard seals, the reader is closed, or a fault budget is spent. The
//! state machine is `Seek -> Streaming -> {Sealed | Faulted}`:
//!
//! - seeking positions by sequence first and falls back once to the
//!   offset's timestamp if the sequence is rejected as out of range;
//! - a cursor that expires mid-stream triggers a fresh timestamp seek at
//!   the current position and is not counted against any budget;
//! - a sealed shard stays readable until its buffer drains, then
//!   [`ShardReader::is_read_end`] turns true;
//! - transient faults retry within a bounded budget, with a materially
//!   longer window for shard-not-found, which during a rebalance only
//!   means metadata has not caught up yet. A spent budget is terminal:
//!   the stored fault is re-raised by every later `read()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use freshet_core::{
    limits, ClientError, ClientResult, ConsumerConfig, Offset, RecordEntry, ShardId, TopicPath,
};
use freshet_service::{CursorKind, StreamService};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::retry::Retryer;

#[derive(Debug)]
struct ReaderShared {
    buffer: VecDeque<RecordEntry>,
    sealed: bool,
    fault: Option<ClientError>,
    /// Sequence of the newest record pulled; drives read-end detection.
    end_sequence: i64,
}

struct FetchContext {
    service: Arc<dyn StreamService>,
    topic: TopicPath,
    shard_id: ShardId,
    offset: Offset,
    fetch_size: usize,
    buffer_bound: usize,
    empty_backoff: Duration,
    retry_interval: Duration,
    seek_retryer: Retryer,
    shared: Arc<Mutex<ReaderShared>>,
}

fn lock(shared: &Mutex<ReaderShared>) -> std::sync::MutexGuard<'_, ReaderShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-blocking reader over one shard, fed by a background fetch task.
pub struct ShardReader {
    shard_id: ShardId,
    shared: Arc<Mutex<ReaderShared>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ShardReader {
    /// Creates a reader resuming from `offset` and starts its fetch loop.
    #[must_use]
    pub fn new(
        service: Arc<dyn StreamService>,
        topic: TopicPath,
        shard_id: ShardId,
        offset: Offset,
        config: &ConsumerConfig,
    ) -> Self {
        let shared = Arc::new(Mutex::new(ReaderShared {
            buffer: VecDeque::new(),
            sealed: false,
            fault: None,
            end_sequence: offset.sequence,
        }));

        let retry_interval = Duration::from_millis(config.retry_interval_ms);
        let context = FetchContext {
            service,
            topic,
            shard_id: shard_id.clone(),
            offset,
            fetch_size: config.effective_fetch_size(),
            buffer_bound: config.effective_buffer_bound(),
            empty_backoff: Duration::from_millis(limits::EMPTY_FETCH_BACKOFF_MS),
            retry_interval,
            seek_retryer: Retryer::new(config.retry_count, retry_interval),
            shared: shared.clone(),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_fetch_loop(context, shutdown_rx));

        Self {
            shard_id,
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the shard this reader consumes.
    #[must_use]
    pub const fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Pops the next buffered record without blocking.
    ///
    /// Returns `None` when nothing is buffered yet, and forever once a
    /// sealed shard has drained.
    ///
    /// # Errors
    ///
    /// Re-raises the stored fault once the fetch loop has faulted, and
    /// `Closed` after `close`.
    pub fn read(&self) -> ClientResult<Option<RecordEntry>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed {
                resource: "shard reader",
            });
        }
        let mut shared = lock(&self.shared);
        if let Some(fault) = &shared.fault {
            return Err(fault.clone());
        }
        Ok(shared.buffer.pop_front())
    }

    /// True once the shard sealed and every buffered record was consumed.
    #[must_use]
    pub fn is_read_end(&self) -> bool {
        let shared = lock(&self.shared);
        shared.sealed && shared.buffer.is_empty()
    }

    /// Sequence of the newest record pulled from the shard.
    #[must_use]
    pub fn end_sequence(&self) -> i64 {
        lock(&self.shared).end_sequence
    }

    /// Stops the fetch loop and waits for it to finish. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
        let task = lock_task(&self.task);
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

fn lock_task(task: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    task.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Sleeps unless shutdown fires first; returns true on shutdown.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

enum LoopEnd {
    Shutdown,
    Sealed,
}

async fn run_fetch_loop(context: FetchContext, mut shutdown: watch::Receiver<bool>) {
    debug!(shard_id = %context.shard_id, "fetch loop started");
    match fetch_until_stopped(&context, &mut shutdown).await {
        Ok(LoopEnd::Shutdown) => {}
        Ok(LoopEnd::Sealed) => {
            info!(shard_id = %context.shard_id, "shard sealed, read end reached");
        }
        Err(err) => {
            warn!(shard_id = %context.shard_id, error = %err, "fetch loop faulted");
            lock(&context.shared).fault = Some(err);
        }
    }
}

async fn fetch_until_stopped(
    context: &FetchContext,
    shutdown: &mut watch::Receiver<bool>,
) -> ClientResult<LoopEnd> {
    let mut cursor = seek_initial(context).await?;
    let mut position_time_us = context.offset.timestamp_us;
    let mut transient_failures: u32 = 0;
    let mut missing_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return Ok(LoopEnd::Shutdown);
        }

        // Backpressure: stop fetching while the buffer is at its bound.
        if lock(&context.shared).buffer.len() >= context.buffer_bound {
            if pause(shutdown, context.empty_backoff).await {
                return Ok(LoopEnd::Shutdown);
            }
            continue;
        }

        let pulled = context
            .service
            .get_records(&context.topic, &context.shard_id, &cursor, context.fetch_size)
            .await;

        match pulled {
            Ok(batch) => {
                transient_failures = 0;
                missing_failures = 0;
                cursor = batch.next_cursor;
                if batch.records.is_empty() {
                    if pause(shutdown, context.empty_backoff).await {
                        return Ok(LoopEnd::Shutdown);
                    }
                    continue;
                }
                let mut shared = lock(&context.shared);
                for record in batch.records {
                    position_time_us = record.system_time_us;
                    shared.end_sequence = record.sequence;
                    shared.buffer.push_back(record);
                }
            }
            Err(ClientError::ShardSealed { .. }) => {
                lock(&context.shared).sealed = true;
                return Ok(LoopEnd::Sealed);
            }
            Err(ClientError::CursorExpired { .. }) => {
                debug!(shard_id = %context.shard_id, "cursor expired, re-seeking by timestamp");
                cursor = seek_by_time(context, position_time_us).await?;
            }
            Err(err @ ClientError::NotFound { .. }) => {
                missing_failures += 1;
                if missing_failures > limits::SHARD_NOT_FOUND_RETRY_COUNT {
                    return Err(err);
                }
                warn!(shard_id = %context.shard_id, error = %err, missing_failures,
                    "shard not visible, assuming rebalance window");
                if pause(shutdown, context.retry_interval).await {
                    return Ok(LoopEnd::Shutdown);
                }
            }
            Err(err) if err.is_retryable() => {
                transient_failures += 1;
                if transient_failures > limits::FETCH_RETRY_COUNT {
                    return Err(err);
                }
                warn!(shard_id = %context.shard_id, error = %err, transient_failures,
                    "fetch failed, will retry");
                if pause(shutdown, context.retry_interval).await {
                    return Ok(LoopEnd::Shutdown);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Resolves the starting cursor from the resume offset.
///
/// The offset records the last consumed record, so the sequence seek
/// targets the record after it. A rejected sequence falls back once to the
/// offset's timestamp; if neither field can position the shard the fault
/// is a parameter error, never sent past this point. The one exception is
/// a service-issued offset with nothing committed yet (both fields unset
/// but carrying a version): consumption starts at the oldest record.
async fn seek_initial(context: &FetchContext) -> ClientResult<String> {
    let offset = context.offset;
    if !offset.is_seekable() {
        if offset.version_id.is_some() {
            let info = context
                .seek_retryer
                .run("seek oldest", || {
                    context.service.get_cursor(
                        &context.topic,
                        &context.shard_id,
                        CursorKind::Oldest,
                        0,
                    )
                })
                .await?;
            debug!(shard_id = %context.shard_id, cursor = %info.cursor,
                "no committed position, starting from oldest");
            return Ok(info.cursor);
        }
        return Err(ClientError::invalid_parameter(format!(
            "offset {offset} cannot position shard {}",
            context.shard_id
        )));
    }

    if offset.has_sequence() {
        let sought = context
            .seek_retryer
            .run("seek by sequence", || {
                context.service.get_cursor(
                    &context.topic,
                    &context.shard_id,
                    CursorKind::Sequence,
                    offset.sequence + 1,
                )
            })
            .await;
        match sought {
            Ok(info) => {
                debug!(shard_id = %context.shard_id, cursor = %info.cursor, "positioned by sequence");
                return Ok(info.cursor);
            }
            Err(ClientError::SeekOutOfRange { .. }) if offset.has_timestamp() => {
                debug!(shard_id = %context.shard_id,
                    "sequence seek rejected, falling back to timestamp");
            }
            Err(ClientError::SeekOutOfRange { .. }) => {
                return Err(ClientError::invalid_parameter(format!(
                    "offset {offset} rejected by shard {}",
                    context.shard_id
                )));
            }
            Err(err) => return Err(err),
        }
    }

    match seek_by_time(context, offset.timestamp_us).await {
        Ok(cursor) => Ok(cursor),
        Err(ClientError::SeekOutOfRange { .. }) => Err(ClientError::invalid_parameter(format!(
            "offset {offset} rejected by shard {}",
            context.shard_id
        ))),
        Err(err) => Err(err),
    }
}

async fn seek_by_time(context: &FetchContext, timestamp_us: i64) -> ClientResult<String> {
    let info = context
        .seek_retryer
        .run("seek by timestamp", || {
            context.service.get_cursor(
                &context.topic,
                &context.shard_id,
                CursorKind::SystemTime,
                timestamp_us,
            )
        })
        .await?;
    debug!(shard_id = %context.shard_id, cursor = %info.cursor, "positioned by timestamp");
    Ok(info.cursor)
}
