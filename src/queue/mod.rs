//! Work queues
//!
//! Each endpoint owns one queue. A queue hands out messages with a
//! visibility timeout, tracks an approximate receive count, and parks a
//! message in its dead-letter partition once the count reaches the
//! configured `max_receive_count`. Workers never count retries themselves.

mod record;
pub mod router;
pub mod store;

use async_trait::async_trait;
use thiserror::Error;

pub use router::QueueRouter;
pub use store::{DeadLetter, FjallQueue, QueueOptions};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("Message not found: id={0}")]
    MessageNotFound(u64),

    #[error("Stale receipt handle for message {0}")]
    StaleReceipt(u64),

    #[error("Invalid queue name: {0}")]
    InvalidName(String),

    #[error("No queue configured for endpoint: {0}")]
    NoRoute(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A delivered message plus its delivery metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: u64,
    pub receipt_handle: String,
    /// Approximate number of deliveries, including this one
    pub receive_count: u32,
    pub body: Vec<u8>,
}

/// How a consumer gives a message back without acknowledging it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nack {
    /// Make the message visible again for redelivery
    Retry,
    /// Permanent failure: park the message in the dead-letter queue
    Reject(String),
}

/// Queueing service interface
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Append a message body, returning its id
    async fn publish(&self, body: Vec<u8>) -> Result<u64>;

    /// Take the next visible message, if any
    async fn receive(&self) -> Result<Option<QueueMessage>>;

    /// Delete a delivered message
    async fn acknowledge(&self, message: &QueueMessage) -> Result<()>;

    async fn nack(&self, message: &QueueMessage, nack: Nack) -> Result<()>;

    /// Messages waiting or in flight
    async fn depth(&self) -> Result<usize>;

    async fn dead_letter_depth(&self) -> Result<usize>;
}
