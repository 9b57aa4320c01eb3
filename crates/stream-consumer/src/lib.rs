use log::{error, info, warn};
use schema_codec::{to_json, AvroSerde, DecodingError, SchemaRegistry};
use stream_client::{ConnectionError, ConsumerConnection, ConsumerConnector, IncomingMessage};
use stream_config::consumer::ConsumerConfig;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ConsumeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A message after its value went through the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: serde_json::Value,
}

pub trait RecordHandler: Send {
    fn handle(&mut self, record: &ConsumedRecord);
}

/// Prints every record to the log.
pub struct LogHandler;

impl RecordHandler for LogHandler {
    fn handle(&mut self, record: &ConsumedRecord) {
        info!(
            "Received message from topic {}, partition {}: key: {}, value: {}, offset: {}",
            record.topic,
            record.partition,
            record.key.as_deref().unwrap_or("null"),
            record.value,
            record.offset
        );
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub handled: u64,
    pub failed: u64,
}

/// Consumes one topic until the shutdown token is cancelled.
///
/// Messages are handled one at a time. The token is only looked at between
/// messages, so a message that is being decoded is always finished. A message
/// that cannot be decoded is logged and skipped.
pub struct ConsumerSession<C, R, H> {
    connector: C,
    serde: AvroSerde<R>,
    topic: String,
    handler: H,
}

impl<C, R, H> ConsumerSession<C, R, H>
where
    C: ConsumerConnector,
    R: SchemaRegistry,
    H: RecordHandler,
{
    pub fn new(connector: C, registry: R, config: &ConsumerConfig, handler: H) -> Self {
        Self {
            connector,
            serde: AvroSerde::new(registry),
            topic: config.topic.clone(),
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<ConsumeReport, ConsumeError> {
        let mut connection = self.connector.connect().await?;

        let outcome = match connection.subscribe(&self.topic).await {
            Ok(()) => Ok(self.consume(&mut connection, &shutdown).await),
            Err(e) => {
                error!("Error in consumer: {e}");
                Err(e.into())
            }
        };

        connection.disconnect().await;
        outcome
    }

    async fn consume(
        &mut self,
        connection: &mut C::Connection,
        shutdown: &CancellationToken,
    ) -> ConsumeReport {
        let mut report = ConsumeReport::default();
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = connection.recv() => received,
            };

            match received {
                Ok(message) => {
                    let position = format!(
                        "{}/{}@{}",
                        message.topic, message.partition, message.offset
                    );
                    match self.handle(message).await {
                        Ok(()) => report.handled += 1,
                        Err(e) => {
                            report.failed += 1;
                            error!("Error processing message {position}: {e}");
                        }
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }

        info!(
            "Shutting down consumer... ({} handled, {} failed)",
            report.handled, report.failed
        );
        report
    }

    async fn handle(&mut self, message: IncomingMessage) -> Result<(), DecodingError> {
        let value = self.serde.decode(message.value.as_deref()).await?;
        let record = ConsumedRecord {
            topic: message.topic,
            partition: message.partition,
            offset: message.offset,
            key: message
                .key
                .map(|key| String::from_utf8_lossy(&key).into_owned()),
            value: to_json(value)?,
        };
        self.handler.handle(&record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use schema_codec::MemoryRegistry;
    use stream_client::memory::ConnectionStats;
    use stream_client::{
        ConsumerConnector, MemoryBroker, OutgoingMessage, ProducerConnection, ProducerConnector,
    };
    use stream_config::consumer::ConsumerConfig;
    use stream_config::producer::{ProducerConfig, SubjectStrategy};
    use stream_producer::{sample_records, ProducerSession, SAMPLE_SCHEMA};
    use tokio_util::sync::CancellationToken;

    use crate::{ConsumeError, ConsumeReport, ConsumedRecord, ConsumerSession, RecordHandler};

    const TOPIC: &str = "sample-records";

    /// Collects records and cancels the token once `stop_after` have arrived.
    struct Collect {
        records: Vec<ConsumedRecord>,
        stop_after: usize,
        shutdown: CancellationToken,
    }

    impl RecordHandler for Collect {
        fn handle(&mut self, record: &ConsumedRecord) {
            self.records.push(record.clone());
            if self.records.len() == self.stop_after {
                self.shutdown.cancel();
            }
        }
    }

    fn consumer_config(group: &str) -> ConsumerConfig {
        ConsumerConfig {
            topic: TOPIC.to_string(),
            consumer_group_id: group.to_string(),
        }
    }

    async fn produce_samples(broker: &MemoryBroker, registry: &MemoryRegistry) {
        let config = ProducerConfig {
            topic: TOPIC.to_string(),
            subject_strategy: SubjectStrategy::RecordName,
        };
        ProducerSession::new(broker.producer_connector(), registry.clone(), config)
            .run(SAMPLE_SCHEMA, &sample_records())
            .await
            .unwrap();
    }

    #[tokio::test]
    #[allow(clippy::approx_constant)]
    async fn fresh_group_replays_all_prior_messages() {
        let broker = MemoryBroker::new(3);
        let registry = MemoryRegistry::new();
        produce_samples(&broker, &registry).await;

        let shutdown = CancellationToken::new();
        let handler = Collect {
            records: vec![],
            stop_after: 5,
            shutdown: shutdown.clone(),
        };
        let mut session = ConsumerSession::new(
            broker.consumer_connector("fresh-group", true),
            registry,
            &consumer_config("fresh-group"),
            handler,
        );

        let report = session.run(shutdown).await.unwrap();

        assert_eq!(report, ConsumeReport { handled: 5, failed: 0 });
        let mut records = session.handler().records.clone();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            records.iter().map(|r| r.key.clone().unwrap()).collect::<Vec<_>>(),
            vec!["record-0", "record-1", "record-2", "record-3", "record-4"]
        );
        assert_eq!(
            records[0].value,
            serde_json::json!({"my_field1": 11111, "my_field2": 3.14159, "my_field3": "Hello, World!"})
        );
        assert_eq!(
            broker.stats(),
            ConnectionStats {
                connects: 2,
                disconnects: 2
            }
        );
    }

    #[tokio::test]
    async fn unknown_schema_id_is_skipped_and_consumption_continues() {
        let broker = MemoryBroker::new(1);
        let registry = MemoryRegistry::new();

        let mut producer = broker.producer_connector().connect().await.unwrap();
        producer
            .publish(OutgoingMessage {
                topic: TOPIC.to_string(),
                key: Some(b"poison".to_vec()),
                value: vec![0, 0, 0, 0, 99, 6],
                headers: vec![],
            })
            .await
            .unwrap();
        producer.disconnect().await;
        produce_samples(&broker, &registry).await;

        let shutdown = CancellationToken::new();
        let handler = Collect {
            records: vec![],
            stop_after: 5,
            shutdown: shutdown.clone(),
        };
        let mut session =
            ConsumerSession::new(broker.consumer_connector("g", true), registry, &consumer_config("g"), handler);

        let report = session.run(shutdown).await.unwrap();

        assert_eq!(report, ConsumeReport { handled: 5, failed: 1 });
        assert_eq!(session.handler().records[0].key.as_deref(), Some("record-0"));
    }

    #[tokio::test]
    async fn shutdown_lets_the_in_flight_message_finish_then_stops() {
        let broker = MemoryBroker::new(1);
        let registry = MemoryRegistry::new();
        produce_samples(&broker, &registry).await;

        let shutdown = CancellationToken::new();
        // the second handler call cancels, as a signal arriving mid-message would
        let handler = Collect {
            records: vec![],
            stop_after: 2,
            shutdown: shutdown.clone(),
        };
        let mut session =
            ConsumerSession::new(broker.consumer_connector("g", true), registry, &consumer_config("g"), handler);

        let report = session.run(shutdown).await.unwrap();

        assert_eq!(report, ConsumeReport { handled: 2, failed: 0 });
        assert_eq!(session.handler().records.len(), 2);
        assert_eq!(
            broker.stats(),
            ConnectionStats {
                connects: 2,
                disconnects: 2
            }
        );
    }

    #[tokio::test]
    async fn shutdown_while_idle_disconnects() {
        let broker = MemoryBroker::new(1);
        let shutdown = CancellationToken::new();
        let handler = Collect {
            records: vec![],
            stop_after: usize::MAX,
            shutdown: shutdown.clone(),
        };
        let mut session = ConsumerSession::new(
            broker.consumer_connector("g", true),
            MemoryRegistry::new(),
            &consumer_config("g"),
            handler,
        );

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });
        let report = session.run(shutdown).await.unwrap();

        assert_eq!(report, ConsumeReport::default());
        assert_eq!(
            broker.stats(),
            ConnectionStats {
                connects: 1,
                disconnects: 1
            }
        );
    }

    #[tokio::test]
    async fn unreachable_broker_fails_without_consuming() {
        let broker = MemoryBroker::new(1);
        broker.set_reachable(false);
        let shutdown = CancellationToken::new();
        let handler = Collect {
            records: vec![],
            stop_after: 1,
            shutdown: shutdown.clone(),
        };
        let connector = broker.consumer_connector("g", true);
        assert!(connector.connect().await.is_err());

        let mut session =
            ConsumerSession::new(connector, MemoryRegistry::new(), &consumer_config("g"), handler);
        let err = session.run(shutdown).await.unwrap_err();

        assert!(matches!(err, ConsumeError::Connection(_)));
        assert!(session.handler().records.is_empty());
        assert_eq!(
            broker.stats(),
            ConnectionStats {
                connects: 0,
                disconnects: 0
            }
        );
    }
}
