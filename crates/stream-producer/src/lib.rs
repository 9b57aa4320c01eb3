use apache_avro::to_value;
use opentelemetry::propagation::Injector;
use opentelemetry::trace::{Span, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use schema_codec::{AvroSerde, EncodingError, SchemaRegistrationError, SchemaRegistry};
use serde::Serialize;
use stream_client::{
    ConnectionError, OutgoingMessage, ProducerConnection, ProducerConnector, PublishError,
};
use stream_config::producer::ProducerConfig;
use thiserror::Error;
use tracing::{error, info};

mod sample;

pub use sample::{sample_records, SampleRecord, SAMPLE_SCHEMA};

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    SchemaRegistration(#[from] SchemaRegistrationError),
    #[error("could not encode record '{key}': {source}")]
    Encoding {
        key: String,
        #[source]
        source: EncodingError,
    },
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeliveredRecord {
    pub key: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProduceReport {
    pub schema_id: u32,
    pub subject: String,
    pub deliveries: Vec<DeliveredRecord>,
}

/// Writes an OpenTelemetry context into message headers.
pub struct HeaderInjector<'a>(pub &'a mut Vec<(String, String)>);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.push((key.to_string(), value));
    }
}

/// One producing run: connect, register the schema, publish the records in
/// order, disconnect.
///
/// There is no retry. The first failure stops the run; whatever was already
/// published stays published. The connection is released exactly once on
/// every path that opened it.
pub struct ProducerSession<C, R> {
    connector: C,
    serde: AvroSerde<R>,
    config: ProducerConfig,
}

impl<C: ProducerConnector, R: SchemaRegistry> ProducerSession<C, R> {
    pub fn new(connector: C, registry: R, config: ProducerConfig) -> Self {
        Self {
            connector,
            serde: AvroSerde::new(registry),
            config,
        }
    }

    pub async fn run<T: Serialize>(
        &mut self,
        schema: &str,
        records: &[(String, T)],
    ) -> Result<ProduceReport, ProduceError> {
        let mut connection = self.connector.connect().await?;

        let outcome = self.publish_all(&mut connection, schema, records).await;
        if let Err(e) = &outcome {
            error!("Error in producer: {e}");
        }

        connection.disconnect().await;
        outcome
    }

    async fn publish_all<T: Serialize>(
        &mut self,
        connection: &mut C::Connection,
        schema: &str,
        records: &[(String, T)],
    ) -> Result<ProduceReport, ProduceError> {
        info!("Registering schema...");
        let descriptor = self
            .serde
            .register(schema, self.config.subject_strategy, &self.config.topic)
            .await?;
        info!("Schema registered with id: {}", descriptor.id);

        info!("Producing messages to topic: {}", self.config.topic);
        let mut deliveries = Vec::with_capacity(records.len());
        for (key, record) in records {
            let value = to_value(record).map_err(|e| ProduceError::Encoding {
                key: key.clone(),
                source: EncodingError::Avro(e),
            })?;
            let encoded = self
                .serde
                .encode(descriptor.id, &value)
                .await
                .map_err(|source| ProduceError::Encoding {
                    key: key.clone(),
                    source,
                })?;

            let delivered = self.send(connection, key, encoded).await?;
            info!(
                "Message sent: {key} => {}",
                serde_json::to_string(record).unwrap_or_default()
            );
            deliveries.push(delivered);
        }
        info!("All messages sent successfully");

        Ok(ProduceReport {
            schema_id: descriptor.id,
            subject: descriptor.subject,
            deliveries,
        })
    }

    async fn send(
        &self,
        connection: &mut C::Connection,
        key: &str,
        value: Vec<u8>,
    ) -> Result<DeliveredRecord, PublishError> {
        let mut span = global::tracer("producer").start("produce_to_kafka");
        span.set_attribute(KeyValue::new("topic", self.config.topic.clone()));
        span.set_attribute(KeyValue::new("key", key.to_string()));
        // Values might be sensitive, so they never go into the span.

        let context = Context::current_with_span(span);
        let mut headers = Vec::new();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&context, &mut HeaderInjector(&mut headers))
        });

        let delivery = connection
            .publish(OutgoingMessage {
                topic: self.config.topic.clone(),
                key: Some(key.as_bytes().to_vec()),
                value,
                headers,
            })
            .await;

        let span = context.span();
        match &delivery {
            Ok(delivery) => {
                span.set_attribute(KeyValue::new("partition", i64::from(delivery.partition)));
                span.set_attribute(KeyValue::new("offset", delivery.offset));
            }
            Err(e) => span.set_attribute(KeyValue::new("error", e.to_string())),
        }
        span.end();

        let delivery = delivery?;
        Ok(DeliveredRecord {
            key: key.to_string(),
            partition: delivery.partition,
            offset: delivery.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use apache_avro::from_value;
    use opentelemetry::propagation::Injector;
    use pretty_assertions::assert_eq;
    use schema_codec::{AvroSerde, MemoryRegistry};
    use stream_client::memory::ConnectionStats;
    use stream_client::MemoryBroker;
    use stream_config::producer::{ProducerConfig, SubjectStrategy};

    use crate::{sample_records, HeaderInjector, ProduceError, ProducerSession, SampleRecord, SAMPLE_SCHEMA};

    const TOPIC: &str = "sample-records";

    fn config() -> ProducerConfig {
        ProducerConfig {
            topic: TOPIC.to_string(),
            subject_strategy: SubjectStrategy::RecordName,
        }
    }

    #[tokio::test]
    async fn publishes_the_five_sample_records_in_key_order() {
        let broker = MemoryBroker::new(1);
        let registry = MemoryRegistry::new();
        let mut session = ProducerSession::new(broker.producer_connector(), registry.clone(), config());

        let report = session.run(SAMPLE_SCHEMA, &sample_records()).await.unwrap();

        assert_eq!(report.subject, "com.mycorp.mynamespace.sampleRecord");
        assert_eq!(
            report.deliveries.iter().map(|d| d.key.as_str()).collect::<Vec<_>>(),
            vec!["record-0", "record-1", "record-2", "record-3", "record-4"]
        );

        let published = broker.messages(TOPIC);
        assert_eq!(published.len(), 5);
        let mut serde = AvroSerde::new(registry);
        for ((key, record), message) in sample_records().iter().zip(&published) {
            assert_eq!(message.key.as_deref(), Some(key.as_bytes()));
            let decoded = serde.decode(message.value.as_deref()).await.unwrap();
            assert_eq!(&from_value::<SampleRecord>(&decoded).unwrap(), record);
        }

        assert_eq!(broker.stats(), ConnectionStats { connects: 1, disconnects: 1 });
    }

    #[tokio::test]
    async fn running_twice_reuses_the_schema_id() {
        let broker = MemoryBroker::new(3);
        let registry = MemoryRegistry::new();

        let mut first = ProducerSession::new(broker.producer_connector(), registry.clone(), config());
        let mut second = ProducerSession::new(broker.producer_connector(), registry.clone(), config());
        let first = first.run(SAMPLE_SCHEMA, &sample_records()).await.unwrap();
        let second = second.run(SAMPLE_SCHEMA, &sample_records()).await.unwrap();

        assert_eq!(first.schema_id, second.schema_id);
        assert_eq!(registry.versions(&first.subject), vec![first.schema_id]);
        assert_eq!(broker.messages(TOPIC).len(), 10);
    }

    #[tokio::test]
    async fn unreachable_broker_publishes_nothing() {
        let broker = MemoryBroker::new(1);
        broker.set_reachable(false);
        let mut session = ProducerSession::new(broker.producer_connector(), MemoryRegistry::new(), config());

        let err = session.run(SAMPLE_SCHEMA, &sample_records()).await.unwrap_err();

        assert!(matches!(err, ProduceError::Connection(_)));
        assert!(broker.messages(TOPIC).is_empty());
        assert_eq!(broker.stats(), ConnectionStats { connects: 0, disconnects: 0 });
    }

    #[tokio::test]
    async fn registration_failure_still_disconnects() {
        let broker = MemoryBroker::new(1);
        let registry = MemoryRegistry::new();
        registry.set_unreachable(true);
        let mut session = ProducerSession::new(broker.producer_connector(), registry, config());

        let err = session.run(SAMPLE_SCHEMA, &sample_records()).await.unwrap_err();

        assert!(matches!(err, ProduceError::SchemaRegistration(_)));
        assert!(broker.messages(TOPIC).is_empty());
        assert_eq!(broker.stats(), ConnectionStats { connects: 1, disconnects: 1 });
    }

    #[tokio::test]
    async fn non_conforming_record_stops_the_batch_after_earlier_records() {
        #[derive(serde::Serialize)]
        #[serde(untagged)]
        enum Loose {
            Valid(SampleRecord),
            Invalid { my_field1: String },
        }

        let broker = MemoryBroker::new(1);
        let mut session = ProducerSession::new(broker.producer_connector(), MemoryRegistry::new(), config());
        let records = vec![
            ("record-0".to_string(), Loose::Valid(sample_records()[0].1.clone())),
            ("record-1".to_string(), Loose::Invalid { my_field1: "nope".into() }),
            ("record-2".to_string(), Loose::Valid(sample_records()[2].1.clone())),
        ];

        let err = session.run(SAMPLE_SCHEMA, &records).await.unwrap_err();

        assert!(matches!(err, ProduceError::Encoding { ref key, .. } if key == "record-1"));
        assert_eq!(broker.messages(TOPIC).len(), 1);
        assert_eq!(broker.stats(), ConnectionStats { connects: 1, disconnects: 1 });
    }

    #[tokio::test]
    async fn malformed_schema_is_rejected_before_publishing() {
        let broker = MemoryBroker::new(1);
        let mut session = ProducerSession::new(broker.producer_connector(), MemoryRegistry::new(), config());

        let err = session
            .run(r#"{"type": "record"}"#, &sample_records())
            .await
            .unwrap_err();

        assert!(matches!(err, ProduceError::SchemaRegistration(_)));
        assert!(broker.messages(TOPIC).is_empty());
    }

    #[test]
    fn header_injector_appends_headers() {
        let mut headers = Vec::new();
        HeaderInjector(&mut headers).set("traceparent", "00-abc-def-01".to_string());

        assert_eq!(
            headers,
            vec![("traceparent".to_string(), "00-abc-def-01".to_string())]
        );
    }
}
