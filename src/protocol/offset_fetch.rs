//! OffsetFetch request & response (api_key = 9, v0/v1).
//!
//! v0 reads offsets out of ZooKeeper-backed storage, v1 out of the
//! `__consumer_offsets` topic; the payload layout is the same. A partition
//! that has never had a commit comes back as offset `-1` with no error.

use bytes::BufMut;
use nom::{
    IResult,
    number::complete::{be_i16, be_i32, be_i64},
};
use nombytes::NomBytes;

use crate::encode::{ToByte, encode_as_array};
use crate::error::KafkaCode;
use crate::parser::{
    bytes_to_string, bytes_to_string_opt, parse_array, parse_nullable_string, parse_string,
};

use super::{ApiKey, ClientRequest};

#[derive(Debug, Clone)]
pub struct OffsetFetchRequest {
    pub group: String,
    pub topics: Vec<OffsetFetchTopic>,
    version: i16,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchTopic {
    pub name: String,
    pub partitions: Vec<i32>,
}

impl OffsetFetchRequest {
    pub fn new(group: impl Into<String>, topics: Vec<OffsetFetchTopic>, version: i16) -> Self {
        OffsetFetchRequest {
            group: group.into(),
            topics,
            version,
        }
    }

    /// Request covering a single partition of a single topic.
    pub fn single(
        group: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
        version: i16,
    ) -> Self {
        OffsetFetchRequest::new(
            group,
            vec![OffsetFetchTopic {
                name: topic.into(),
                partitions: vec![partition],
            }],
            version,
        )
    }
}

impl ClientRequest for OffsetFetchRequest {
    fn api_key(&self) -> ApiKey {
        ApiKey::OffsetFetch
    }

    fn api_version(&self) -> i16 {
        self.version
    }

    fn encode_payload<W: BufMut>(&self, buffer: &mut W) -> crate::error::Result<()> {
        self.group.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            topic.name.encode(buffer)?;
            encode_as_array(buffer, &topic.partitions, |buffer, partition| {
                partition.encode(buffer)
            })
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct OffsetFetchResponse {
    pub topics: Vec<OffsetFetchTopicResponse>,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetFetchPartitionResponse>,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchPartitionResponse {
    pub partition: i32,
    pub offset: i64,
    pub metadata: Option<String>,
    pub error_code: KafkaCode,
}

impl OffsetFetchResponse {
    /// Look up the entry for one partition of one topic.
    pub fn partition(&self, topic: &str, partition: i32) -> Option<&OffsetFetchPartitionResponse> {
        self.topics
            .iter()
            .find(|t| t.name == topic)?
            .partitions
            .iter()
            .find(|p| p.partition == partition)
    }
}

/// Response layout is identical for v0 and v1.
pub fn parse_offset_fetch_response(s: NomBytes) -> IResult<NomBytes, OffsetFetchResponse> {
    let (s, topics) = parse_array(parse_topic)(s)?;
    Ok((s, OffsetFetchResponse { topics }))
}

fn parse_topic(s: NomBytes) -> IResult<NomBytes, OffsetFetchTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_partition)(s)?;
    Ok((
        s,
        OffsetFetchTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_partition(s: NomBytes) -> IResult<NomBytes, OffsetFetchPartitionResponse> {
    let (s, partition) = be_i32(s)?;
    let (s, offset) = be_i64(s)?;
    let (s, metadata) = parse_nullable_string(s)?;
    let (s, error_code) = be_i16(s)?;
    Ok((
        s,
        OffsetFetchPartitionResponse {
            partition,
            offset,
            metadata: bytes_to_string_opt(metadata)?,
            error_code: KafkaCode::from_wire(error_code),
        },
    ))
}
