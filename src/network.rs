//! Broker connection capability.
//!
//! The offset manager never opens sockets itself; whoever assembles the
//! consumer hands it connections that satisfy this trait. Length framing,
//! correlation-id matching and timeouts all live behind the implementation.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// One synchronous request/response exchange with a Kafka broker.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Send an encoded request frame and wait for the matching response
    /// frame (without the outer length prefix).
    ///
    /// Timeouts surface as [`crate::error::Error::IoError`]; the caller
    /// treats any error as a transport failure.
    async fn request(&mut self, frame: Bytes) -> Result<Bytes>;

    /// Release the connection. Idempotent.
    async fn close(&mut self);
}
