use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use rdkafka::client::ClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::stream_consumer::StreamConsumer;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::metadata::Metadata;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::util::Timeout;
use stream_config::consumer::ConsumerConfig;
use stream_config::ConnectionConfig;

use crate::{
    ConnectionError, ConsumerConnection, ConsumerConnector, Delivery, IncomingMessage,
    OutgoingMessage, ProducerConnection, ProducerConnector, PublishError, ReceiveError,
};

// librdkafka connects lazily, so a metadata round trip is what tells us the
// brokers are reachable and the credentials are accepted.
fn probe(fetch: impl FnOnce() -> KafkaResult<Metadata>) -> Result<(), ConnectionError> {
    let metadata = tokio::task::block_in_place(fetch)
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
    info!(
        "cluster reachable: {} broker(s), {} topic(s) visible",
        metadata.brokers().len(),
        metadata.topics().len()
    );
    Ok(())
}

/// Publishes through an rdkafka `FutureProducer`.
///
/// Needs the multi-threaded tokio runtime: the connect probe and the flush on
/// disconnect are blocking librdkafka calls run under `block_in_place`.
pub struct KafkaProducerConnector {
    client: ClientConfig,
    timeout: Duration,
}

impl KafkaProducerConnector {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            client: config.into(),
            timeout: config.connect_timeout,
        }
    }
}

pub struct KafkaProducerConnection {
    producer: FutureProducer,
    flush_timeout: Duration,
}

#[async_trait]
impl ProducerConnector for KafkaProducerConnector {
    type Connection = KafkaProducerConnection;

    async fn connect(&self) -> Result<KafkaProducerConnection, ConnectionError> {
        info!("Connecting producer...");
        let producer: FutureProducer = self.client.create().map_err(ConnectionError::Client)?;
        probe(|| producer.client().fetch_metadata(None, self.timeout))?;
        info!("Producer connected");

        Ok(KafkaProducerConnection {
            producer,
            flush_timeout: self.timeout,
        })
    }
}

#[async_trait]
impl ProducerConnection for KafkaProducerConnection {
    async fn publish(&mut self, message: OutgoingMessage) -> Result<Delivery, PublishError> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let mut record: FutureRecord<'_, Vec<u8>, Vec<u8>> = FutureRecord::to(&message.topic)
            .payload(&message.value)
            .headers(headers);
        if let Some(key) = &message.key {
            record = record.key(key);
        }

        match self.producer.send(record, Timeout::Never).await {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((e, _)) => Err(PublishError {
                topic: message.topic.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn disconnect(self) {
        info!("Disconnecting producer...");
        let flushed = tokio::task::block_in_place(|| self.producer.flush(self.flush_timeout));
        if let Err(e) = flushed {
            warn!("not all messages were flushed before disconnect: {e}");
        }
        drop(self.producer);
        info!("Producer disconnected");
    }
}

/// Consumes through an rdkafka `StreamConsumer` joined to one group.
///
/// A group without committed offsets starts at the earliest offset. Like the
/// producer connector this needs the multi-threaded tokio runtime.
pub struct KafkaConsumerConnector {
    client: ClientConfig,
    timeout: Duration,
}

impl KafkaConsumerConnector {
    pub fn new(config: &ConnectionConfig, consumer_config: &ConsumerConfig) -> Self {
        let mut client: ClientConfig = config.into();
        client
            .set("group.id", &consumer_config.consumer_group_id)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set_log_level(RDKafkaLogLevel::Info);

        Self {
            client,
            timeout: config.connect_timeout,
        }
    }
}

pub struct KafkaConsumerConnection {
    consumer: LoggingConsumer,
}

#[async_trait]
impl ConsumerConnector for KafkaConsumerConnector {
    type Connection = KafkaConsumerConnection;

    async fn connect(&self) -> Result<KafkaConsumerConnection, ConnectionError> {
        info!("Connecting consumer...");
        let consumer: LoggingConsumer = self
            .client
            .create_with_context(LoggingContext)
            .map_err(ConnectionError::Client)?;
        probe(|| consumer.fetch_metadata(None, self.timeout))?;
        info!("Consumer connected");

        Ok(KafkaConsumerConnection { consumer })
    }
}

#[async_trait]
impl ConsumerConnection for KafkaConsumerConnection {
    async fn subscribe(&mut self, topic: &str) -> Result<(), ConnectionError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| ConnectionError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        info!("Subscribed to topic: {topic}");
        Ok(())
    }

    async fn recv(&mut self) -> Result<IncomingMessage, ReceiveError> {
        let m = self
            .consumer
            .recv()
            .await
            .map_err(|e| ReceiveError::Broker(e.to_string()))?;

        let headers: Vec<(String, Option<Vec<u8>>)> = m
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|header| (header.key.to_string(), header.value.map(<[u8]>::to_vec)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(IncomingMessage {
            topic: m.topic().to_string(),
            partition: m.partition(),
            offset: m.offset(),
            key: m.key().map(<[u8]>::to_vec),
            value: m.payload().map(<[u8]>::to_vec),
            headers,
        })
    }

    async fn disconnect(self) {
        info!("Disconnecting consumer...");
        self.consumer.unsubscribe();
        drop(self.consumer);
        info!("Consumer disconnected");
    }
}

struct LoggingContext;

impl ClientContext for LoggingContext {}

impl ConsumerContext for LoggingContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        info!("Pre rebalance {:?}", rebalance);
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        info!("Post rebalance {:?}", rebalance);
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        info!("Committing offsets: {:?}", result);
    }
}

type LoggingConsumer = StreamConsumer<LoggingContext>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use stream_config::consumer::ConsumerConfig;
    use stream_config::{ConnectionConfig, SchemaRegistryConfig};

    use crate::kafka::{KafkaConsumerConnector, KafkaProducerConnector};
    use crate::{ConnectionError, ConsumerConnector, ProducerConnector};

    fn connection(brokers: &str) -> ConnectionConfig {
        ConnectionConfig {
            client_id: "schema-stream-test".to_string(),
            brokers: vec![brokers.to_string()],
            ssl: false,
            sasl: None,
            topic: "sample-records".to_string(),
            consumer_group: "schema-stream-consumer-group".to_string(),
            connect_timeout: Duration::from_millis(500),
            schema_registry: SchemaRegistryConfig {
                auth: None,
                endpoint: "http://localhost:8081".parse().unwrap(),
            },
        }
    }

    #[test]
    fn test_consumer_config_replays_from_earliest() {
        let connection = connection("localhost:9092");
        let consumer_config = ConsumerConfig::new(&connection, None, None, None);

        let connector = KafkaConsumerConnector::new(&connection, &consumer_config);

        assert_eq!(connector.client.get("group.id"), Some("schema-stream-consumer-group"));
        assert_eq!(connector.client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(connector.client.get("enable.auto.commit"), Some("true"));
        assert_eq!(connector.client.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(connector.client.get("client.id"), Some("schema-stream-test"));
    }

    #[test]
    fn test_fresh_group_suffix_reaches_the_client() {
        let connection = connection("localhost:9092");
        let consumer_config =
            ConsumerConfig::new(&connection, None, Some("demo".to_string()), Some("abc".to_string()));

        let connector = KafkaConsumerConnector::new(&connection, &consumer_config);

        assert_eq!(connector.client.get("group.id"), Some("demo-abc"));
        assert_eq!(connector.client.get("auto.offset.reset"), Some("earliest"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_cluster_fails_connect_within_timeout() {
        // nothing listens on port 1
        let connection = connection("127.0.0.1:1");
        let consumer_config = ConsumerConfig::new(&connection, None, None, None);

        let producer = KafkaProducerConnector::new(&connection).connect().await;
        let consumer = KafkaConsumerConnector::new(&connection, &consumer_config)
            .connect()
            .await;

        assert!(matches!(producer, Err(ConnectionError::Unreachable(_))));
        assert!(matches!(consumer, Err(ConnectionError::Unreachable(_))));
    }
}
