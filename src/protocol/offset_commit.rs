//! OffsetCommit request & response (api_key = 8, v0/v1).
//!
//! v0 commits into ZooKeeper-backed storage. v1 commits into the
//! `__consumer_offsets` topic and carries the group generation id and member
//! id so the coordinator can fence commits from stale group members; it also
//! adds a per-partition timestamp, which this client leaves broker-assigned.

use bytes::BufMut;
use nom::{
    IResult,
    number::complete::{be_i16, be_i32},
};
use nombytes::NomBytes;

use crate::constants::{BROKER_ASSIGNED_TIMESTAMP, NO_GENERATION_ID};
use crate::encode::{ToByte, encode_as_array};
use crate::error::KafkaCode;
use crate::parser::{bytes_to_string, parse_array, parse_string};

use super::{ApiKey, ClientRequest};

#[derive(Debug, Clone)]
pub struct OffsetCommitRequest {
    pub group: String,
    /// Group epoch used by the coordinator to fence stale members (v1 only).
    pub generation_id: i32,
    /// Broker-assigned member identity within the generation (v1 only).
    pub member_id: String,
    pub topics: Vec<OffsetCommitTopic>,
    version: i16,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitTopic {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartition>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitPartition {
    pub partition: i32,
    pub offset: i64,
    /// Commit time (v1 only); `-1` lets the broker assign it.
    pub timestamp: i64,
    pub metadata: String,
}

impl OffsetCommitPartition {
    pub fn new(partition: i32, offset: i64, metadata: impl Into<String>) -> Self {
        OffsetCommitPartition {
            partition,
            offset,
            timestamp: BROKER_ASSIGNED_TIMESTAMP,
            metadata: metadata.into(),
        }
    }
}

impl OffsetCommitRequest {
    /// v0 request, for ZooKeeper-backed offset storage.
    pub fn v0(group: impl Into<String>, topics: Vec<OffsetCommitTopic>) -> Self {
        OffsetCommitRequest {
            group: group.into(),
            generation_id: NO_GENERATION_ID,
            member_id: String::new(),
            topics,
            version: 0,
        }
    }

    /// v1 request, for Kafka-backed offset storage with generation fencing.
    pub fn v1(
        group: impl Into<String>,
        generation_id: i32,
        member_id: impl Into<String>,
        topics: Vec<OffsetCommitTopic>,
    ) -> Self {
        OffsetCommitRequest {
            group: group.into(),
            generation_id,
            member_id: member_id.into(),
            topics,
            version: 1,
        }
    }
}

impl ClientRequest for OffsetCommitRequest {
    fn api_key(&self) -> ApiKey {
        ApiKey::OffsetCommit
    }

    fn api_version(&self) -> i16 {
        self.version
    }

    fn encode_payload<W: BufMut>(&self, buffer: &mut W) -> crate::error::Result<()> {
        self.group.encode(buffer)?;
        if self.version >= 1 {
            self.generation_id.encode(buffer)?;
            self.member_id.encode(buffer)?;
        }
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            topic.name.encode(buffer)?;
            encode_as_array(buffer, &topic.partitions, |buffer, partition| {
                partition.partition.encode(buffer)?;
                partition.offset.encode(buffer)?;
                if self.version >= 1 {
                    partition.timestamp.encode(buffer)?;
                }
                partition.metadata.encode(buffer)
            })
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct OffsetCommitResponse {
    pub topics: Vec<OffsetCommitTopicResponse>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartitionResponse>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitPartitionResponse {
    pub partition: i32,
    pub error_code: KafkaCode,
}

impl OffsetCommitResponse {
    /// The error code the broker reported for one partition of one topic.
    pub fn partition_error(&self, topic: &str, partition: i32) -> Option<KafkaCode> {
        self.topics
            .iter()
            .find(|t| t.name == topic)?
            .partitions
            .iter()
            .find(|p| p.partition == partition)
            .map(|p| p.error_code)
    }

    /// Iterate every partition entry the broker rejected.
    pub fn failed_partitions(
        &self,
    ) -> impl Iterator<Item = (&str, &OffsetCommitPartitionResponse)> {
        self.topics.iter().flat_map(|topic| {
            topic
                .partitions
                .iter()
                .filter(|p| !p.error_code.is_none())
                .map(move |p| (topic.name.as_str(), p))
        })
    }
}

/// Response layout is identical for v0 and v1.
pub fn parse_offset_commit_response(s: NomBytes) -> IResult<NomBytes, OffsetCommitResponse> {
    let (s, topics) = parse_array(parse_topic)(s)?;
    Ok((s, OffsetCommitResponse { topics }))
}

fn parse_topic(s: NomBytes) -> IResult<NomBytes, OffsetCommitTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_partition)(s)?;
    Ok((
        s,
        OffsetCommitTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_partition(s: NomBytes) -> IResult<NomBytes, OffsetCommitPartitionResponse> {
    let (s, partition) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    Ok((
        s,
        OffsetCommitPartitionResponse {
            partition,
            error_code: KafkaCode::from_wire(error_code),
        },
    ))
}
