//! Centralized protocol and configuration constants.
//!
//! This module consolidates the magic numbers of the Kafka wire protocol as
//! spoken by this client, plus the defaults for the offset manager.
//!
//! # Categories
//!
//! - **Message format**: the v0 record layout handled by [`crate::message`]
//! - **Sentinels**: special negative values with protocol-assigned meaning
//! - **Limits**: bounds applied while parsing untrusted broker responses
//! - **Defaults**: client identity and offset-manager tuning knobs

// =============================================================================
// Message Format (v0 records)
// =============================================================================

/// Size of the per-record header preceding the record body.
///
/// - offset (8 bytes, i64)
/// - size (4 bytes, i32): length of everything after this field
pub const MSG_HEADER_SIZE: usize = 12;

/// Minimum legal value of a record's `size` field.
///
/// The body always carries at least:
/// - crc (4 bytes)
/// - magic (1 byte)
/// - attributes (1 byte)
/// - key length prefix (4 bytes)
/// - value length prefix (4 bytes)
pub const MSG_MIN_BODY_SIZE: usize = 14;

/// Number of body bytes preceding the CRC-covered region (the crc itself).
pub const MSG_CRC_SIZE: usize = 4;

/// Magic byte of the message format this client produces.
pub const DEFAULT_MAGIC_BYTE: i8 = 0;

// =============================================================================
// Protocol Sentinels
// =============================================================================

/// Timestamp sentinel in a ListOffsets request meaning "the log's first offset".
pub const EARLIEST_TIMESTAMP: i64 = -2;

/// Timestamp sentinel in a ListOffsets request meaning "the log's next offset".
pub const LATEST_TIMESTAMP: i64 = -1;

/// Committed-offset value returned by the broker when a group has never
/// committed an offset for a partition.
pub const NO_COMMITTED_OFFSET: i64 = -1;

/// Per-partition commit timestamp meaning "let the broker assign the time".
pub const BROKER_ASSIGNED_TIMESTAMP: i64 = -1;

/// The `replica_id` a normal (non-replica) client sends in a ListOffsets
/// request.
pub const CONSUMER_REPLICA_ID: i32 = -1;

/// Generation id sent while the consumer has not yet joined a group.
pub const NO_GENERATION_ID: i32 = -1;

// =============================================================================
// Parse Limits
// =============================================================================

/// Maximum number of elements accepted in a protocol array.
///
/// Broker responses are untrusted input; a corrupt length prefix must not
/// drive an allocation of gigabytes.
pub const MAX_PROTOCOL_ARRAY_SIZE: i32 = 100_000;

/// Maximum length accepted for a BYTES field.
pub const MAX_PROTOCOL_BYTES_SIZE: i32 = 100 * 1024 * 1024;

// =============================================================================
// Client Defaults
// =============================================================================

/// Client id stamped into request headers unless overridden.
pub const DEFAULT_CLIENT_ID: &str = "milena";

/// How long buffered offsets may wait before an automatic commit.
pub const DEFAULT_COMMIT_INTERVAL_MS: u64 = 500;

/// How many distinct partitions may buffer before a commit is forced.
pub const DEFAULT_MAX_BUFFERS: usize = 50;

/// Depth of the offset-manager command channel.
pub const COMMAND_CHANNEL_SIZE: usize = 64;
