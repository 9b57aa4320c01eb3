//! Broker connection lifecycle.
//!
//! A connector opens a connection; the connection is the only way to publish
//! or consume, and `disconnect` takes it by value so it can be released once.

use async_trait::async_trait;
use thiserror::Error;

mod kafka;
pub mod memory;

pub use kafka::{
    KafkaConsumerConnection, KafkaConsumerConnector, KafkaProducerConnection,
    KafkaProducerConnector,
};
pub use memory::MemoryBroker;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("could not create broker client: {0}")]
    Client(#[source] rdkafka::error::KafkaError),
    #[error("brokers unreachable or authentication rejected: {0}")]
    Unreachable(String),
    #[error("subscription to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

#[derive(Error, Debug)]
#[error("broker did not accept message for '{topic}': {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("receive called before subscribing")]
    NotSubscribed,
    #[error("broker error while receiving: {0}")]
    Broker(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// Where the broker placed a published message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// A message as handed out by the broker. Read-only for the consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(String, Option<Vec<u8>>)>,
}

#[async_trait]
pub trait ProducerConnector: Send + Sync {
    type Connection: ProducerConnection;

    async fn connect(&self) -> Result<Self::Connection, ConnectionError>;
}

#[async_trait]
pub trait ProducerConnection: Send {
    async fn publish(&mut self, message: OutgoingMessage) -> Result<Delivery, PublishError>;

    async fn disconnect(self);
}

#[async_trait]
pub trait ConsumerConnector: Send + Sync {
    type Connection: ConsumerConnection;

    async fn connect(&self) -> Result<Self::Connection, ConnectionError>;
}

#[async_trait]
pub trait ConsumerConnection: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<(), ConnectionError>;

    /// Waits for the next message. Dropping the returned future before it
    /// completes must not consume a message.
    async fn recv(&mut self) -> Result<IncomingMessage, ReceiveError>;

    async fn disconnect(self);
}
