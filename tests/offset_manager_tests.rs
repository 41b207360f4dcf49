//! Offset manager behavior tests.
//!
//! These tests drive the manager against scripted broker connections and
//! paused tokio time, asserting on the exact frames it puts on the wire:
//! flush cadence, overflow flushes, last-write-wins buffering, the
//! earliest-offset fallback and generation fencing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use milena::error::{Error, KafkaCode, Result};
use milena::network::BrokerConnection;
use milena::offset_manager::{OffsetManager, OffsetManagerConfig, OffsetStorage};

// ============================================================================
// Scripted connection
// ============================================================================

#[derive(Default)]
struct ConnectionState {
    requests: Vec<Bytes>,
    responses: VecDeque<Result<Bytes>>,
    closed: bool,
}

/// A `BrokerConnection` that records request frames and replays canned
/// response frames.
#[derive(Clone, Default)]
struct ScriptedConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl ScriptedConnection {
    fn push_response(&self, frame: Bytes) {
        self.state.lock().unwrap().responses.push_back(Ok(frame));
    }

    fn push_transport_error(&self) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(Err(Error::IoError(std::io::ErrorKind::ConnectionReset)));
    }

    fn requests(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().requests.clone()
    }

    fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl BrokerConnection for ScriptedConnection {
    async fn request(&mut self, frame: Bytes) -> Result<Bytes> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(frame);
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(Error::MissingData("no scripted response".to_string())))
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

// ============================================================================
// Frame builders & inspectors
// ============================================================================

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i16(s.len() as i16);
    buf.put_slice(s.as_bytes());
}

fn commit_response(topic: &str, partitions: &[(i32, i16)]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32(0); // correlation id (matching is the connection's business)
    buf.put_i32(1);
    put_string(&mut buf, topic);
    buf.put_i32(partitions.len() as i32);
    for (partition, error) in partitions {
        buf.put_i32(*partition);
        buf.put_i16(*error);
    }
    buf.freeze()
}

fn fetch_response(topic: &str, entries: &[(i32, i64, Option<&str>, i16)]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32(0);
    buf.put_i32(1);
    put_string(&mut buf, topic);
    buf.put_i32(entries.len() as i32);
    for (partition, offset, metadata, error) in entries {
        buf.put_i32(*partition);
        buf.put_i64(*offset);
        match metadata {
            Some(m) => put_string(&mut buf, m),
            None => buf.put_i16(-1),
        }
        buf.put_i16(*error);
    }
    buf.freeze()
}

fn list_offsets_response(topic: &str, partition: i32, error: i16, offsets: &[i64]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32(0);
    buf.put_i32(1);
    put_string(&mut buf, topic);
    buf.put_i32(1);
    buf.put_i32(partition);
    buf.put_i16(error);
    buf.put_i32(offsets.len() as i32);
    for offset in offsets {
        buf.put_i64(*offset);
    }
    buf.freeze()
}

#[derive(Debug, PartialEq)]
struct CommitFrame {
    api_version: i16,
    group: String,
    generation_id: Option<i32>,
    member_id: Option<String>,
    topic: String,
    partitions: Vec<(i32, i64, String)>,
}

fn read_string(cursor: &mut Bytes) -> String {
    let len = cursor.get_i16();
    if len < 0 {
        return String::new();
    }
    let bytes = cursor.copy_to_bytes(len as usize);
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Pull an OffsetCommit request frame apart, header included.
fn parse_commit_frame(frame: &Bytes) -> CommitFrame {
    let mut cursor = frame.clone();
    assert_eq!(cursor.get_i16(), 8, "api_key");
    let api_version = cursor.get_i16();
    let _correlation_id = cursor.get_i32();
    let _client_id = read_string(&mut cursor);

    let group = read_string(&mut cursor);
    let (generation_id, member_id) = if api_version >= 1 {
        (Some(cursor.get_i32()), Some(read_string(&mut cursor)))
    } else {
        (None, None)
    };

    assert_eq!(cursor.get_i32(), 1, "topic count");
    let topic = read_string(&mut cursor);
    let count = cursor.get_i32();
    let mut partitions = Vec::new();
    for _ in 0..count {
        let partition = cursor.get_i32();
        let offset = cursor.get_i64();
        if api_version >= 1 {
            assert_eq!(cursor.get_i64(), -1, "timestamp is broker-assigned");
        }
        partitions.push((partition, offset, read_string(&mut cursor)));
    }
    assert!(!cursor.has_remaining(), "trailing bytes in commit frame");

    CommitFrame {
        api_version,
        group,
        generation_id,
        member_id,
        topic,
        partitions,
    }
}

fn api_key_of(frame: &Bytes) -> i16 {
    let mut cursor = frame.clone();
    cursor.get_i16()
}

// ============================================================================
// Harness
// ============================================================================

fn manager_with(config: OffsetManagerConfig) -> (OffsetManager, ScriptedConnection) {
    let coordinator = ScriptedConnection::default();
    let manager = OffsetManager::spawn(
        Box::new(coordinator.clone()),
        "reporting",
        "events",
        8,
        config,
    );
    (manager, coordinator)
}

fn buffered_config(max_buffers: usize) -> OffsetManagerConfig {
    OffsetManagerConfig {
        auto_commit: true,
        commit_interval: Duration::from_millis(500),
        max_buffers,
        ..OffsetManagerConfig::default()
    }
}

fn sync_config() -> OffsetManagerConfig {
    OffsetManagerConfig {
        auto_commit: false,
        ..OffsetManagerConfig::default()
    }
}

/// Wait until the actor has drained everything queued before this call.
///
/// update_generation is handled in-line by the actor, so once it answers,
/// every earlier command (including any inline flush) has completed.
async fn drain(manager: &OffsetManager) {
    manager.update_generation("", -1).await.unwrap();
}

// ============================================================================
// Buffered commits
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_buffered_commit_flushes_after_interval() {
    let (manager, coordinator) = manager_with(buffered_config(50));
    coordinator.push_response(commit_response("events", &[(0, 0)]));

    manager.offset_commit(0, 10).await.unwrap();
    assert!(coordinator.requests().is_empty(), "no flush before the timer");

    tokio::time::sleep(Duration::from_millis(600)).await;

    let requests = coordinator.requests();
    assert_eq!(requests.len(), 1);
    let frame = parse_commit_frame(&requests[0]);
    assert_eq!(frame.group, "reporting");
    assert_eq!(frame.topic, "events");
    assert_eq!(frame.partitions, vec![(0, 10, String::new())]);
}

#[tokio::test(start_paused = true)]
async fn test_commits_within_interval_coalesce_into_one_flush() {
    let (manager, coordinator) = manager_with(buffered_config(50));
    coordinator.push_response(commit_response("events", &[(0, 0), (1, 0), (2, 0)]));

    manager.offset_commit(0, 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.offset_commit(1, 20).await.unwrap();
    manager.offset_commit_with_metadata(2, 30, "checkpoint").await.unwrap();

    tokio::time::sleep(Duration::from_millis(450)).await;

    let requests = coordinator.requests();
    assert_eq!(requests.len(), 1, "one timer, one flush");
    let frame = parse_commit_frame(&requests[0]);
    assert_eq!(
        frame.partitions,
        vec![
            (0, 10, String::new()),
            (1, 20, String::new()),
            (2, 30, "checkpoint".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_last_write_wins_within_a_cycle() {
    let (manager, coordinator) = manager_with(buffered_config(50));
    coordinator.push_response(commit_response("events", &[(0, 0)]));

    manager.offset_commit(0, 10).await.unwrap();
    manager.offset_commit(0, 99).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let requests = coordinator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        parse_commit_frame(&requests[0]).partitions,
        vec![(0, 99, String::new())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_overflow_flush_is_immediate_and_disarms_timer() {
    let (manager, coordinator) = manager_with(OffsetManagerConfig {
        auto_commit: true,
        commit_interval: Duration::from_millis(500),
        max_buffers: 2,
        ..OffsetManagerConfig::default()
    });
    coordinator.push_response(commit_response("events", &[(0, 0), (1, 0)]));

    manager.offset_commit(0, 10).await.unwrap();
    manager.offset_commit(1, 20).await.unwrap();
    drain(&manager).await;

    let requests = coordinator.requests();
    assert_eq!(requests.len(), 1, "flush happens without a timer wait");
    assert_eq!(
        parse_commit_frame(&requests[0]).partitions,
        vec![(0, 10, String::new()), (1, 20, String::new())]
    );

    // The pending timer was cancelled; nothing else goes out.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(coordinator.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_commits_during_flush_accumulate_for_next_cycle() {
    let (manager, coordinator) = manager_with(buffered_config(50));
    coordinator.push_response(commit_response("events", &[(0, 0)]));
    coordinator.push_response(commit_response("events", &[(0, 0)]));

    manager.offset_commit(0, 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(coordinator.requests().len(), 1);

    manager.offset_commit(0, 11).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let requests = coordinator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        parse_commit_frame(&requests[1]).partitions,
        vec![(0, 11, String::new())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_flush_failure_keeps_actor_alive() {
    let (manager, coordinator) = manager_with(buffered_config(50));
    coordinator.push_transport_error();
    coordinator.push_response(commit_response("events", &[(0, 0)]));

    manager.offset_commit(0, 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(coordinator.requests().len(), 1);

    // The failed flush is not retried; the next commit flushes normally.
    manager.offset_commit(0, 12).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let requests = coordinator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        parse_commit_frame(&requests[1]).partitions,
        vec![(0, 12, String::new())]
    );
}

// ============================================================================
// Synchronous commits
// ============================================================================

#[tokio::test]
async fn test_sync_commit_success() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(commit_response("events", &[(3, 0)]));

    manager.offset_commit(3, 42).await.unwrap();

    let requests = coordinator.requests();
    assert_eq!(requests.len(), 1);
    let frame = parse_commit_frame(&requests[0]);
    assert_eq!(frame.api_version, 1);
    assert_eq!(frame.partitions, vec![(3, 42, String::new())]);
}

#[tokio::test]
async fn test_sync_commit_surfaces_broker_error() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(commit_response(
        "events",
        &[(0, KafkaCode::IllegalGeneration as i16)],
    ));

    let err = manager.offset_commit(0, 42).await.unwrap_err();
    assert_eq!(err, Error::KafkaError(KafkaCode::IllegalGeneration));
}

#[tokio::test]
async fn test_sync_commit_surfaces_transport_error_and_survives() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_transport_error();
    coordinator.push_response(commit_response("events", &[(0, 0)]));

    let err = manager.offset_commit(0, 42).await.unwrap_err();
    assert_eq!(err, Error::IoError(std::io::ErrorKind::ConnectionReset));

    // The actor survives the transport failure.
    manager.offset_commit(0, 43).await.unwrap();
}

#[tokio::test]
async fn test_unknown_partition_is_rejected_without_io() {
    let (manager, coordinator) = manager_with(sync_config());

    for partition in [-1, 8, 100] {
        let err = manager.offset_commit(partition, 1).await.unwrap_err();
        assert_eq!(err, Error::UnknownPartition(partition));
    }
    assert!(coordinator.requests().is_empty());
}

// ============================================================================
// Generation fencing
// ============================================================================

#[tokio::test]
async fn test_generation_tokens_are_stamped_into_v1_commits() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(commit_response("events", &[(0, 0)]));
    coordinator.push_response(commit_response("events", &[(0, 0)]));

    // Before joining a group, placeholders go out.
    manager.offset_commit(0, 1).await.unwrap();

    manager.update_generation("member-7", 3).await.unwrap();
    manager.offset_commit(0, 2).await.unwrap();

    let requests = coordinator.requests();
    let before = parse_commit_frame(&requests[0]);
    assert_eq!(before.generation_id, Some(-1));
    assert_eq!(before.member_id, Some(String::new()));

    let after = parse_commit_frame(&requests[1]);
    assert_eq!(after.generation_id, Some(3));
    assert_eq!(after.member_id, Some("member-7".to_string()));
}

#[tokio::test]
async fn test_zookeeper_storage_speaks_v0_without_tokens() {
    let (manager, coordinator) = manager_with(OffsetManagerConfig {
        auto_commit: false,
        storage: OffsetStorage::Zookeeper,
        ..OffsetManagerConfig::default()
    });
    coordinator.push_response(commit_response("events", &[(0, 0)]));

    manager.update_generation("member-7", 3).await.unwrap();
    manager.offset_commit(0, 5).await.unwrap();

    let frame = parse_commit_frame(&coordinator.requests()[0]);
    assert_eq!(frame.api_version, 0);
    assert_eq!(frame.generation_id, None);
    assert_eq!(frame.member_id, None);
    assert_eq!(frame.partitions, vec![(0, 5, String::new())]);
}

// ============================================================================
// Offset fetch
// ============================================================================

#[tokio::test]
async fn test_fetch_returns_committed_offset() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(fetch_response("events", &[(2, 42, Some("mark"), 0)]));
    let leader = ScriptedConnection::default();

    let (offset, metadata) = manager
        .offset_fetch(2, Box::new(leader.clone()))
        .await
        .unwrap();
    assert_eq!(offset, 42);
    assert_eq!(metadata, "mark");

    assert_eq!(api_key_of(&coordinator.requests()[0]), 9);
    assert!(leader.requests().is_empty(), "no fallback needed");
}

#[tokio::test]
async fn test_fetch_falls_back_to_earliest_offset() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(fetch_response("events", &[(0, -1, None, 0)]));
    let leader = ScriptedConnection::default();
    leader.push_response(list_offsets_response("events", 0, 0, &[7]));

    let (offset, metadata) = manager
        .offset_fetch(0, Box::new(leader.clone()))
        .await
        .unwrap();
    assert_eq!(offset, 7);
    assert_eq!(metadata, "");

    let leader_requests = leader.requests();
    assert_eq!(leader_requests.len(), 1);
    assert_eq!(api_key_of(&leader_requests[0]), 2);
}

#[tokio::test]
async fn test_fetch_fallback_on_empty_log_starts_at_zero() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(fetch_response("events", &[(0, -1, None, 0)]));
    let leader = ScriptedConnection::default();
    leader.push_response(list_offsets_response("events", 0, 0, &[]));

    let (offset, metadata) = manager.offset_fetch(0, Box::new(leader)).await.unwrap();
    assert_eq!((offset, metadata.as_str()), (0, ""));
}

#[tokio::test]
async fn test_fetch_falls_back_on_unknown_topic_or_partition() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(fetch_response(
        "events",
        &[(0, -1, None, KafkaCode::UnknownTopicOrPartition as i16)],
    ));
    let leader = ScriptedConnection::default();
    leader.push_response(list_offsets_response("events", 0, 0, &[55]));

    let (offset, _) = manager.offset_fetch(0, Box::new(leader)).await.unwrap();
    assert_eq!(offset, 55);
}

#[tokio::test]
async fn test_fetch_surfaces_other_broker_errors() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(fetch_response(
        "events",
        &[(0, -1, None, KafkaCode::GroupLoadInProgress as i16)],
    ));
    let leader = ScriptedConnection::default();

    let err = manager
        .offset_fetch(0, Box::new(leader.clone()))
        .await
        .unwrap_err();
    assert_eq!(err, Error::KafkaError(KafkaCode::GroupLoadInProgress));
    assert!(leader.requests().is_empty());
}

#[tokio::test]
async fn test_fetch_fallback_surfaces_leader_errors() {
    let (manager, coordinator) = manager_with(sync_config());
    coordinator.push_response(fetch_response("events", &[(0, -1, None, 0)]));
    let leader = ScriptedConnection::default();
    leader.push_response(list_offsets_response(
        "events",
        0,
        KafkaCode::NotLeaderForPartition as i16,
        &[],
    ));

    let err = manager.offset_fetch(0, Box::new(leader)).await.unwrap_err();
    assert_eq!(err, Error::KafkaError(KafkaCode::NotLeaderForPartition));
}

#[tokio::test]
async fn test_fetch_unknown_partition_is_rejected_without_io() {
    let (manager, coordinator) = manager_with(sync_config());
    let leader = ScriptedConnection::default();

    let err = manager
        .offset_fetch(8, Box::new(leader.clone()))
        .await
        .unwrap_err();
    assert_eq!(err, Error::UnknownPartition(8));
    assert!(coordinator.requests().is_empty());
    assert!(leader.requests().is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

async fn wait_until_closed(coordinator: &ScriptedConnection) {
    for _ in 0..100 {
        if coordinator.closed() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("coordinator connection was not closed");
}

#[tokio::test]
async fn test_stop_closes_coordinator_connection() {
    let (manager, coordinator) = manager_with(sync_config());

    manager.stop().await.unwrap();
    wait_until_closed(&coordinator).await;

    // stop is idempotent, and later calls report the shutdown.
    manager.stop().await.unwrap();
    let err = manager.offset_commit(0, 1).await.unwrap_err();
    assert_eq!(err, Error::Terminated);
}

#[tokio::test]
async fn test_dropping_every_handle_closes_the_connection() {
    let (manager, coordinator) = manager_with(sync_config());
    let clone = manager.clone();

    drop(manager);
    assert!(!coordinator.closed(), "live handles keep the task running");

    drop(clone);
    wait_until_closed(&coordinator).await;
}
