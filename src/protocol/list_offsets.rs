//! ListOffsets request & response (api_key = 2, v0).
//!
//! Asks a partition leader for offsets around a point in time. The timestamp
//! field doubles as a sentinel carrier: `-2` and `-1` select the log's low
//! and high water marks. The offset manager only ever asks for the earliest
//! offset with `max_offsets = 1`, but the full shape is encoded here.

use bytes::BufMut;
use nom::{
    IResult,
    number::complete::{be_i16, be_i32, be_i64},
};
use nombytes::NomBytes;

use crate::constants::{CONSUMER_REPLICA_ID, EARLIEST_TIMESTAMP, LATEST_TIMESTAMP};
use crate::encode::{ToByte, encode_array};
use crate::error::KafkaCode;
use crate::parser::{bytes_to_string, parse_array, parse_string};

use super::{ApiKey, ClientRequest};

/// The point in the log a ListOffsets request asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetTime {
    /// The log's first available offset.
    Earliest,
    /// The log's next offset (high water mark).
    Latest,
    /// Offsets of segments no newer than a Unix-ms timestamp.
    At(i64),
}

impl From<OffsetTime> for i64 {
    fn from(time: OffsetTime) -> Self {
        match time {
            OffsetTime::Earliest => EARLIEST_TIMESTAMP,
            OffsetTime::Latest => LATEST_TIMESTAMP,
            OffsetTime::At(timestamp) => timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListOffsetsRequest {
    pub replica_id: i32,
    pub topics: Vec<ListOffsetsTopic>,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsTopic {
    pub name: String,
    pub partitions: Vec<ListOffsetsPartition>,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsPartition {
    pub partition: i32,
    pub time: OffsetTime,
    pub max_offsets: i32,
}

impl ListOffsetsRequest {
    /// Request covering a single partition of a single topic.
    pub fn single(
        topic: impl Into<String>,
        partition: i32,
        time: OffsetTime,
        max_offsets: i32,
    ) -> Self {
        ListOffsetsRequest {
            replica_id: CONSUMER_REPLICA_ID,
            topics: vec![ListOffsetsTopic {
                name: topic.into(),
                partitions: vec![ListOffsetsPartition {
                    partition,
                    time,
                    max_offsets,
                }],
            }],
        }
    }
}

impl ClientRequest for ListOffsetsRequest {
    fn api_key(&self) -> ApiKey {
        ApiKey::ListOffsets
    }

    fn encode_payload<W: BufMut>(&self, buffer: &mut W) -> crate::error::Result<()> {
        self.replica_id.encode(buffer)?;
        encode_array(buffer, &self.topics)
    }
}

impl ToByte for ListOffsetsTopic {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> crate::error::Result<()> {
        self.name.encode(buffer)?;
        encode_array(buffer, &self.partitions)
    }
}

impl ToByte for ListOffsetsPartition {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> crate::error::Result<()> {
        self.partition.encode(buffer)?;
        i64::from(self.time).encode(buffer)?;
        self.max_offsets.encode(buffer)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOffsetsResponse {
    pub topics: Vec<ListOffsetsTopicResponse>,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsTopicResponse {
    pub name: String,
    pub partitions: Vec<ListOffsetsPartitionResponse>,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsPartitionResponse {
    pub partition: i32,
    pub error_code: KafkaCode,
    pub offsets: Vec<i64>,
}

impl ListOffsetsResponse {
    /// Look up the entry for one partition of one topic.
    pub fn partition(&self, topic: &str, partition: i32) -> Option<&ListOffsetsPartitionResponse> {
        self.topics
            .iter()
            .find(|t| t.name == topic)?
            .partitions
            .iter()
            .find(|p| p.partition == partition)
    }
}

pub fn parse_list_offsets_response(s: NomBytes) -> IResult<NomBytes, ListOffsetsResponse> {
    let (s, topics) = parse_array(parse_topic)(s)?;
    Ok((s, ListOffsetsResponse { topics }))
}

fn parse_topic(s: NomBytes) -> IResult<NomBytes, ListOffsetsTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_partition)(s)?;
    Ok((
        s,
        ListOffsetsTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_partition(s: NomBytes) -> IResult<NomBytes, ListOffsetsPartitionResponse> {
    let (s, partition) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, offsets) = parse_array(be_i64)(s)?;
    Ok((
        s,
        ListOffsetsPartitionResponse {
            partition,
            error_code: KafkaCode::from_wire(error_code),
            offsets,
        },
    ))
}
