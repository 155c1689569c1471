//! Durable record layouts for queue partitions

/// A message as persisted in the `messages` partition
#[derive(Clone, PartialEq, prost::Message)]
pub struct StoredMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub receive_count: u32,
    /// Unix ms before which the message is hidden from `receive`
    #[prost(uint64, tag = "3")]
    pub visible_at_ms: u64,
    /// Empty until first delivery
    #[prost(string, tag = "4")]
    pub receipt_handle: String,
    #[prost(uint64, tag = "5")]
    pub enqueued_at_ms: u64,
}

/// A message parked in the `dlq` partition
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeadLetterRecord {
    #[prost(message, optional, tag = "1")]
    pub message: Option<StoredMessage>,
    #[prost(string, tag = "2")]
    pub reason: String,
    #[prost(uint64, tag = "3")]
    pub dead_lettered_at_ms: u64,
}
