//! # Milena
//! Rust-native Kafka client protocol codec and consumer offset management.
//!
//! This crate provides the byte-level machinery a Kafka consumer needs to
//! track its position: the classic wire-protocol primitives (length-prefixed
//! strings, bytes and arrays with the `-1` NULL sentinel), the v0
//! Message/MessageSet record format with CRC32 integrity, the
//! ListOffsets/OffsetCommit/OffsetFetch request/response pairs, and an
//! [`OffsetManager`](offset_manager::OffsetManager) that batches offset
//! commits to the group coordinator on behalf of a consumer.
//!
//! # Goals
//! - Bit-exact compatibility with the Kafka wire protocol
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/), [Nom](https://docs.rs/nom/latest/nom/)
//! - Be a building block for Kafka consumers
//!
//! # Architecture
//!
//! Cluster discovery, group membership and connection management are the
//! caller's business. This crate asks only for connections implementing
//! [`BrokerConnection`](network::BrokerConnection): the offset manager owns
//! one to the group coordinator, and borrows one to a partition leader when
//! it has to fall back to the log's earliest offset.
//!
//! ```rust,ignore
//! use milena::prelude::*;
//!
//! // `coordinator` is any BrokerConnection to the group's coordinator.
//! let manager = OffsetManager::spawn(
//!     coordinator,
//!     "reporting",
//!     "events",
//!     8,
//!     OffsetManagerConfig::default(),
//! );
//!
//! manager.offset_commit(0, 4211).await?;
//! let (offset, _metadata) = manager.offset_fetch(0, leader).await?;
//! manager.stop().await?;
//! ```
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [Confluence Docs](https://cwiki.apache.org/confluence/display/KAFKA/A+Guide+To+The+Kafka+Protocol)

#![forbid(unsafe_code)]

pub mod constants;
mod encode;
pub mod error;
pub mod message;
pub mod network;
pub mod offset_manager;
mod parser;
pub mod protocol;
pub mod telemetry;

pub mod prelude {
    //! Main exports, plus the encoding/parsing toolkits for callers that
    //! assemble their own requests.
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::message::{
        Message, decode_message, decode_message_set, decode_message_set_strict, encode_message_set,
    };
    pub use crate::network::BrokerConnection;
    pub use crate::offset_manager::{OffsetManager, OffsetManagerConfig, OffsetStorage};
    pub use crate::telemetry::{LogFormat, init_logging};

    pub use bytes;

    pub mod encode {
        pub use crate::encode::*;
    }

    pub mod parser {
        pub use crate::parser::*;
    }

    pub mod protocol {
        pub use crate::protocol::*;
    }
}
