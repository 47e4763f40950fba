//! End-to-end scenarios against the simulated service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use freshet_client::Consumer;
use freshet_core::{ClientError, ConsumerConfig, Offset, ShardId, Subscription};
use freshet_service::{Endpoint, SimulatedService};

fn config() -> ConsumerConfig {
    ConsumerConfig {
        // Clamped to the 10s floor: a ~3.3s heartbeat period.
        session_timeout_ms: 10_000,
        retry_interval_ms: 50,
        read_poll_interval_ms: 10,
        offset_commit_interval_ms: 1_000,
        fetch_size: 10,
        ..ConsumerConfig::default()
    }
}

fn subscription() -> Subscription {
    Subscription::new("test_project", "test_topic", "test_sub")
}

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Two shards pre-loaded with offset (sequence 1, timestamp 1): delivery
/// starts at sequence 2 and stays strictly increasing per shard.
#[tokio::test(start_paused = true)]
async fn test_per_shard_ordering_from_resume_offsets() {
    let service = SimulatedService::new();
    for shard in ["0", "1"] {
        for i in 0..6 {
            service.append_record(shard, format!("{shard}-record-{i}"));
        }
    }

    let mut offset_map = HashMap::new();
    offset_map.insert(ShardId::new("0"), Offset::new(1, 1));
    offset_map.insert(ShardId::new("1"), Offset::new(1, 1));

    let consumer = Consumer::with_offsets(
        Arc::new(service.clone()),
        subscription(),
        offset_map,
        config(),
    )
    .await
    .unwrap();

    let mut last_sequence: HashMap<ShardId, i64> = HashMap::new();
    let mut delivered = 0;
    while delivered < 8 {
        let record = consumer
            .read(READ_TIMEOUT)
            .await
            .unwrap()
            .expect("records remain");
        let previous = last_sequence.insert(record.shard_id.clone(), record.sequence);
        match previous {
            // Resuming after sequence 1: the first delivery is sequence 2.
            None => assert_eq!(record.sequence, 2, "shard {}", record.shard_id),
            Some(previous) => {
                assert!(
                    record.sequence > previous,
                    "shard {} went backwards: {} after {}",
                    record.shard_id,
                    record.sequence,
                    previous
                );
            }
        }
        delivered += 1;
    }

    assert_eq!(last_sequence[&ShardId::new("0")], 5);
    assert_eq!(last_sequence[&ShardId::new("1")], 5);
    consumer.close().await;
}

/// A commit failing with a session reset makes the next two reads raise
/// the identical fault without any further commit request.
#[tokio::test(start_paused = true)]
async fn test_session_reset_during_commit_is_sticky() {
    let service = SimulatedService::new();
    service.set_plan(&["0"], 1);
    for i in 0..4 {
        service.append_record("0", format!("record-{i}"));
    }
    service.fail(
        Endpoint::CommitOffsets,
        ClientError::SessionInvalid {
            message: "offset has been reset".to_string(),
        },
        1,
    );

    let consumer = Consumer::new(Arc::new(service.clone()), subscription(), config())
        .await
        .unwrap();

    // Reading delivers a record and dirties the tracked offsets.
    let record = consumer.read(READ_TIMEOUT).await.unwrap();
    assert!(record.is_some());

    // Past the commit interval, the next read drives the failing commit.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let expected = ClientError::SessionInvalid {
        message: "offset has been reset".to_string(),
    };
    let first = consumer.read(READ_TIMEOUT).await.unwrap_err();
    let second = consumer.read(READ_TIMEOUT).await.unwrap_err();
    let third = consumer.read(READ_TIMEOUT).await.unwrap_err();
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(third, expected);
    assert_eq!(service.calls(Endpoint::CommitOffsets), 1);

    consumer.close().await;
}

/// Auto-assign end to end: join, heartbeat plan, open offsets, read, and
/// commit progress back to the service.
#[tokio::test(start_paused = true)]
async fn test_auto_assign_reads_and_commits() {
    let service = SimulatedService::new();
    service.set_plan(&["0", "1"], 1);
    for shard in ["0", "1"] {
        for i in 0..3 {
            service.append_record(shard, format!("{shard}-record-{i}"));
        }
    }

    let consumer = Consumer::new(Arc::new(service.clone()), subscription(), config())
        .await
        .unwrap();
    assert_eq!(service.calls(Endpoint::JoinGroup), 1);

    let mut delivered = 0;
    while delivered < 6 {
        if consumer.read(READ_TIMEOUT).await.unwrap().is_some() {
            delivered += 1;
        }
    }
    assert_eq!(service.calls(Endpoint::OpenOffsets), 1);

    // The next read past the interval commits accumulated progress.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let _ = consumer.read(Duration::from_millis(100)).await.unwrap();
    assert!(service.calls(Endpoint::CommitOffsets) >= 1);
    assert_eq!(service.stored_offset(&ShardId::new("0")).unwrap().sequence, 2);
    assert_eq!(service.stored_offset(&ShardId::new("1")).unwrap().sequence, 2);

    consumer.close().await;
}

/// A rebalance while reading: the plan moves to a new version, the lost
/// shard is released through sync_group, and the gained shard is read.
#[tokio::test(start_paused = true)]
async fn test_rebalance_releases_and_acquires() {
    let service = SimulatedService::new();
    service.set_plan(&["0"], 1);
    for shard in ["0", "1"] {
        for i in 0..2 {
            service.append_record(shard, format!("{shard}-record-{i}"));
        }
    }

    let consumer = Consumer::new(Arc::new(service.clone()), subscription(), config())
        .await
        .unwrap();

    // Consume from the initial assignment.
    let record = consumer.read(READ_TIMEOUT).await.unwrap().unwrap();
    assert_eq!(record.shard_id, ShardId::new("0"));

    // The group moves this consumer to shard 1.
    service.set_plan(&["1"], 2);

    let mut from_new_shard = None;
    for _ in 0..500 {
        match consumer.read(Duration::from_millis(100)).await.unwrap() {
            Some(record) if record.shard_id == ShardId::new("1") => {
                from_new_shard = Some(record);
                break;
            }
            _ => {}
        }
    }
    assert!(from_new_shard.is_some(), "gained shard served records");

    let syncs = service.sync_calls();
    assert!(
        syncs
            .iter()
            .any(|sync| sync.release.contains(&ShardId::new("0"))),
        "lost shard released through sync_group"
    );

    consumer.close().await;
}

/// Heartbeat eviction mid-consumption: read() drives a rejoin and keeps
/// delivering records under the fresh membership.
#[tokio::test(start_paused = true)]
async fn test_read_rejoins_after_eviction() {
    let service = SimulatedService::new();
    service.set_plan(&["0"], 1);
    for i in 0..3 {
        service.append_record("0", format!("record-{i}"));
    }
    service.fail(
        Endpoint::Heartbeat,
        ClientError::NotFound {
            resource: "consumer",
            name: "consumer-1".to_string(),
        },
        1,
    );

    let consumer = Consumer::new(Arc::new(service.clone()), subscription(), config())
        .await
        .unwrap();

    let mut delivered = 0;
    while delivered < 3 {
        if consumer.read(READ_TIMEOUT).await.unwrap().is_some() {
            delivered += 1;
        }
    }
    assert!(service.calls(Endpoint::JoinGroup) >= 2, "read drove a rejoin");

    consumer.close().await;
}

/// A sealed shard drains, is reported as read-end, and gets released.
#[tokio::test(start_paused = true)]
async fn test_sealed_shard_released_after_drain() {
    let service = SimulatedService::new();
    service.set_plan(&["0"], 1);
    service.append_record("0", "a");
    service.append_record("0", "b");
    service.seal_shard(&ShardId::new("0"));

    let consumer = Consumer::new(Arc::new(service.clone()), subscription(), config())
        .await
        .unwrap();

    let mut delivered = 0;
    while delivered < 2 {
        if consumer.read(READ_TIMEOUT).await.unwrap().is_some() {
            delivered += 1;
        }
    }

    // Further reads stay empty while the read-end release happens.
    let mut released = false;
    for _ in 0..500 {
        assert!(consumer.read(Duration::from_millis(100)).await.unwrap().is_none());
        if service
            .sync_calls()
            .iter()
            .any(|sync| sync.read_end.contains(&ShardId::new("0")))
        {
            released = true;
            break;
        }
    }
    assert!(released, "drained sealed shard reported as read end");

    consumer.close().await;
}
