//! Consumer offset management.
//!
//! One [`OffsetManager`] exists per (group, topic). It owns the connection
//! to the group coordinator and runs as a single tokio task; the handle
//! talks to it over a command channel, so the pending-commit buffer, the
//! flush timer and the fencing tokens are only ever touched by one logical
//! thread.
//!
//! With `auto_commit` on (the default), commits are buffered per partition
//! and flushed either when `commit_interval` elapses or when `max_buffers`
//! distinct partitions have accumulated, whichever comes first. Within a
//! cycle the newest offset per partition wins. With `auto_commit` off, every
//! commit is its own round trip to the coordinator and the caller sees the
//! broker's verdict.

use std::collections::HashMap;
use std::mem;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, warn};

use crate::constants::{
    COMMAND_CHANNEL_SIZE, DEFAULT_CLIENT_ID, DEFAULT_COMMIT_INTERVAL_MS, DEFAULT_MAX_BUFFERS,
    NO_COMMITTED_OFFSET, NO_GENERATION_ID,
};
use crate::error::{Error, KafkaCode, Result};
use crate::network::BrokerConnection;
use crate::protocol::offset_commit::{OffsetCommitPartition, OffsetCommitTopic};
use crate::protocol::{
    self, ClientRequest, ListOffsetsRequest, OffsetCommitRequest, OffsetCommitResponse,
    OffsetFetchRequest, OffsetTime,
};

/// Where the broker keeps committed offsets.
///
/// This selects the OffsetCommit/OffsetFetch API version: ZooKeeper-backed
/// storage speaks v0, Kafka-backed storage speaks v1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetStorage {
    #[default]
    Kafka,
    Zookeeper,
}

impl OffsetStorage {
    fn api_version(self) -> i16 {
        match self {
            OffsetStorage::Kafka => 1,
            OffsetStorage::Zookeeper => 0,
        }
    }
}

/// Offset manager tuning knobs.
#[derive(Debug, Clone)]
pub struct OffsetManagerConfig {
    /// Client id stamped into request headers.
    pub client_id: String,
    /// Buffer commits and flush on a cadence instead of per call.
    pub auto_commit: bool,
    /// How long buffered offsets may wait before a flush.
    pub commit_interval: Duration,
    /// Buffered-partition count that forces an immediate flush.
    pub max_buffers: usize,
    /// Offset storage backend, which fixes the API versions used.
    pub storage: OffsetStorage,
}

impl Default for OffsetManagerConfig {
    fn default() -> Self {
        OffsetManagerConfig {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auto_commit: true,
            commit_interval: Duration::from_millis(DEFAULT_COMMIT_INTERVAL_MS),
            max_buffers: DEFAULT_MAX_BUFFERS,
            storage: OffsetStorage::Kafka,
        }
    }
}

enum Command {
    Commit {
        partition: i32,
        offset: i64,
        metadata: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Fetch {
        partition: i32,
        leader: Box<dyn BrokerConnection>,
        reply: oneshot::Sender<Result<(i64, String)>>,
    },
    UpdateGeneration {
        member_id: String,
        generation_id: i32,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running offset manager task.
///
/// Cloning is cheap; all clones address the same task. The task terminates
/// on [`stop`](OffsetManager::stop) or when the last handle is dropped, and
/// closes the coordinator connection on the way out in either case.
#[derive(Clone)]
pub struct OffsetManager {
    commands: mpsc::Sender<Command>,
}

impl OffsetManager {
    /// Spawn the manager task for one topic of one consumer group.
    ///
    /// `coordinator` must be a connection to the group's coordinator broker;
    /// the task takes ownership and closes it on termination. `partitions`
    /// is the topic's partition count.
    pub fn spawn(
        coordinator: Box<dyn BrokerConnection>,
        group: impl Into<String>,
        topic: impl Into<String>,
        partitions: i32,
        config: OffsetManagerConfig,
    ) -> Self {
        let (commands, inbox) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let actor = OffsetManagerTask {
            coordinator,
            group: group.into(),
            topic: topic.into(),
            partitions,
            config,
            member_id: None,
            generation_id: None,
            pending: HashMap::new(),
            flush_deadline: None,
            correlation_id: 0,
        };
        tokio::spawn(actor.run(inbox));
        OffsetManager { commands }
    }

    /// Commit `offset` for `partition`.
    ///
    /// In auto-commit mode this buffers the offset and returns immediately;
    /// otherwise it round-trips to the coordinator and returns the broker's
    /// verdict.
    pub async fn offset_commit(&self, partition: i32, offset: i64) -> Result<()> {
        self.offset_commit_with_metadata(partition, offset, "")
            .await
    }

    /// [`offset_commit`](Self::offset_commit) with commit metadata attached.
    pub async fn offset_commit_with_metadata(
        &self,
        partition: i32,
        offset: i64,
        metadata: impl Into<String>,
    ) -> Result<()> {
        self.roundtrip(|reply| Command::Commit {
            partition,
            offset,
            metadata: metadata.into(),
            reply,
        })
        .await?
    }

    /// Fetch the committed offset for `partition`.
    ///
    /// When the group has no committed offset yet (or the offsets topic does
    /// not know the partition), the partition `leader` connection is asked
    /// for the earliest log offset instead. The leader connection is used
    /// for at most that one exchange and dropped afterwards.
    pub async fn offset_fetch(
        &self,
        partition: i32,
        leader: Box<dyn BrokerConnection>,
    ) -> Result<(i64, String)> {
        self.roundtrip(|reply| Command::Fetch {
            partition,
            leader,
            reply,
        })
        .await?
    }

    /// Install new fencing tokens; subsequent commits carry them.
    pub async fn update_generation(
        &self,
        member_id: impl Into<String>,
        generation_id: i32,
    ) -> Result<()> {
        self.roundtrip(|reply| Command::UpdateGeneration {
            member_id: member_id.into(),
            generation_id,
            reply,
        })
        .await
    }

    /// Terminate the manager task and close the coordinator connection.
    pub async fn stop(&self) -> Result<()> {
        match self.roundtrip(|reply| Command::Stop { reply }).await {
            Ok(()) => Ok(()),
            // Already stopped; stop is idempotent.
            Err(Error::Terminated) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn roundtrip<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::Terminated)?;
        response.await.map_err(|_| Error::Terminated)
    }
}

struct OffsetManagerTask {
    coordinator: Box<dyn BrokerConnection>,
    group: String,
    topic: String,
    partitions: i32,
    config: OffsetManagerConfig,
    member_id: Option<String>,
    generation_id: Option<i32>,
    pending: HashMap<i32, OffsetCommitPartition>,
    flush_deadline: Option<Instant>,
    correlation_id: i32,
}

impl OffsetManagerTask {
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.flush_deadline;
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(command) => {
                        if self.handle(command).await {
                            break;
                        }
                    }
                    // Every handle is gone; shut down.
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_deadline = None;
                    self.flush().await;
                }
            }
        }
        self.coordinator.close().await;
        debug!(group = %self.group, topic = %self.topic, "offset manager stopped");
    }

    /// Process one command; returns true when the task should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Commit {
                partition,
                offset,
                metadata,
                reply,
            } => {
                if !self.valid_partition(partition) {
                    let _ = reply.send(Err(Error::UnknownPartition(partition)));
                } else if self.config.auto_commit {
                    // Reply before flushing: the caller only asked to buffer.
                    let _ = reply.send(Ok(()));
                    self.buffer_commit(partition, offset, metadata).await;
                } else {
                    let _ = reply.send(self.commit_now(partition, offset, metadata).await);
                }
                false
            }
            Command::Fetch {
                partition,
                leader,
                reply,
            } => {
                let result = if self.valid_partition(partition) {
                    self.fetch(partition, leader).await
                } else {
                    Err(Error::UnknownPartition(partition))
                };
                let _ = reply.send(result);
                false
            }
            Command::UpdateGeneration {
                member_id,
                generation_id,
                reply,
            } => {
                self.member_id = Some(member_id);
                self.generation_id = Some(generation_id);
                let _ = reply.send(());
                false
            }
            Command::Stop { reply } => {
                let _ = reply.send(());
                true
            }
        }
    }

    fn valid_partition(&self, partition: i32) -> bool {
        (0..self.partitions).contains(&partition)
    }

    /// Record a commit for later flushing; newest offset per partition wins.
    async fn buffer_commit(&mut self, partition: i32, offset: i64, metadata: String) {
        self.pending
            .insert(partition, OffsetCommitPartition::new(partition, offset, metadata));

        if self.pending.len() >= self.config.max_buffers {
            self.flush_deadline = None;
            self.flush().await;
        } else if self.flush_deadline.is_none() {
            self.flush_deadline = Some(Instant::now() + self.config.commit_interval);
        }
    }

    /// Commit everything buffered in one RPC.
    ///
    /// The buffer is swapped out before the request goes on the wire, so
    /// commits arriving while the RPC is in flight accumulate for the next
    /// cycle. Failures are logged, not retried: the next flush carries the
    /// newest offsets and subsumes this one.
    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut partitions: Vec<OffsetCommitPartition> =
            mem::take(&mut self.pending).into_values().collect();
        partitions.sort_by_key(|p| p.partition);
        let count = partitions.len();

        match self.send_commit(self.commit_request(partitions)).await {
            Ok(response) => {
                for (topic, entry) in response.failed_partitions() {
                    warn!(
                        topic,
                        partition = entry.partition,
                        code = ?entry.error_code,
                        "offset commit rejected",
                    );
                }
                debug!(group = %self.group, topic = %self.topic, count, "flushed offsets");
            }
            Err(e) => {
                error!(group = %self.group, topic = %self.topic, error = %e, "offset flush failed");
            }
        }
    }

    /// Synchronous single-partition commit for `auto_commit = false`.
    async fn commit_now(&mut self, partition: i32, offset: i64, metadata: String) -> Result<()> {
        let request =
            self.commit_request(vec![OffsetCommitPartition::new(partition, offset, metadata)]);
        let response = self.send_commit(request).await?;
        match response.partition_error(&self.topic, partition) {
            Some(KafkaCode::None) => Ok(()),
            Some(code) => Err(Error::KafkaError(code)),
            None => Err(Error::MissingData(format!(
                "partition {partition} missing from offset commit response"
            ))),
        }
    }

    fn commit_request(&self, partitions: Vec<OffsetCommitPartition>) -> OffsetCommitRequest {
        let topics = vec![OffsetCommitTopic {
            name: self.topic.clone(),
            partitions,
        }];
        match self.config.storage {
            OffsetStorage::Zookeeper => OffsetCommitRequest::v0(self.group.clone(), topics),
            OffsetStorage::Kafka => OffsetCommitRequest::v1(
                self.group.clone(),
                self.generation_id.unwrap_or(NO_GENERATION_ID),
                self.member_id.clone().unwrap_or_default(),
                topics,
            ),
        }
    }

    async fn send_commit(&mut self, request: OffsetCommitRequest) -> Result<OffsetCommitResponse> {
        let frame = self.send(&request).await?;
        let (_, response) =
            protocol::decode_response(frame, protocol::offset_commit::parse_offset_commit_response)?;
        Ok(response)
    }

    async fn fetch(
        &mut self,
        partition: i32,
        mut leader: Box<dyn BrokerConnection>,
    ) -> Result<(i64, String)> {
        let request = OffsetFetchRequest::single(
            self.group.clone(),
            self.topic.clone(),
            partition,
            self.config.storage.api_version(),
        );
        let frame = self.send(&request).await?;
        let (_, response) =
            protocol::decode_response(frame, protocol::offset_fetch::parse_offset_fetch_response)?;
        let entry = response.partition(&self.topic, partition).ok_or_else(|| {
            Error::MissingData(format!(
                "partition {partition} missing from offset fetch response"
            ))
        })?;

        match entry.error_code {
            KafkaCode::None if entry.offset != NO_COMMITTED_OFFSET => {
                Ok((entry.offset, entry.metadata.clone().unwrap_or_default()))
            }
            // Nothing committed yet (or the offsets topic has never seen the
            // partition): start from the log's earliest offset.
            KafkaCode::None | KafkaCode::UnknownTopicOrPartition => {
                self.earliest_offset(partition, leader.as_mut()).await
            }
            code => Err(Error::KafkaError(code)),
        }
    }

    async fn earliest_offset(
        &mut self,
        partition: i32,
        leader: &mut dyn BrokerConnection,
    ) -> Result<(i64, String)> {
        let request =
            ListOffsetsRequest::single(self.topic.clone(), partition, OffsetTime::Earliest, 1);
        let correlation_id = self.next_correlation_id();
        let frame = protocol::encode_request(&self.config.client_id, correlation_id, &request)?;
        let frame = leader.request(frame).await?;
        let (_, response) =
            protocol::decode_response(frame, protocol::list_offsets::parse_list_offsets_response)?;
        let entry = response.partition(&self.topic, partition).ok_or_else(|| {
            Error::MissingData(format!(
                "partition {partition} missing from list offsets response"
            ))
        })?;

        match entry.error_code {
            // An empty log reports no offsets; consumption starts at 0.
            KafkaCode::None => Ok((entry.offsets.first().copied().unwrap_or(0), String::new())),
            code => Err(Error::KafkaError(code)),
        }
    }

    async fn send<R: ClientRequest>(&mut self, request: &R) -> Result<bytes::Bytes> {
        let correlation_id = self.next_correlation_id();
        let frame = protocol::encode_request(&self.config.client_id, correlation_id, request)?;
        self.coordinator.request(frame).await
    }

    fn next_correlation_id(&mut self) -> i32 {
        self.correlation_id = self.correlation_id.wrapping_add(1);
        self.correlation_id
    }
}
