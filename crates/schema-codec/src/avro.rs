use std::collections::HashMap;

use apache_avro::types::Value;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use schema_registry_converter::schema_registry_common::SchemaType;
use stream_config::producer::SubjectStrategy;

use crate::{
    subject_name, wire, DecodingError, EncodingError, RegistryError, SchemaRegistrationError,
    SchemaRegistry,
};

/// A registered schema together with the subject it was registered under.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDescriptor {
    pub id: u32,
    pub subject: String,
    pub schema: Schema,
}

/// Encodes records into framed Avro and back, resolving schemas through the
/// registry. Schemas are cached by id for the lifetime of the value; failed
/// lookups are not cached.
pub struct AvroSerde<R> {
    registry: R,
    schemas: HashMap<u32, Schema>,
}

enum Unresolved {
    Registry(RegistryError),
    NotAvro,
    Unparsable(apache_avro::Error),
}

impl<R: SchemaRegistry> AvroSerde<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            schemas: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub async fn register(
        &mut self,
        definition: &str,
        strategy: SubjectStrategy,
        topic: &str,
    ) -> Result<SchemaDescriptor, SchemaRegistrationError> {
        let schema = Schema::parse_str(definition).map_err(SchemaRegistrationError::InvalidSchema)?;
        let subject = subject_name(&schema, strategy, topic)?;

        let id = self
            .registry
            .register(&subject, definition)
            .await
            .map_err(|source| SchemaRegistrationError::Registry {
                subject: subject.clone(),
                source,
            })?;
        log::info!("schema registered under subject '{subject}' with id: {id}");

        self.schemas.insert(id, schema.clone());
        Ok(SchemaDescriptor {
            id,
            subject,
            schema,
        })
    }

    pub async fn encode(&mut self, schema_id: u32, record: &Value) -> Result<Vec<u8>, EncodingError> {
        let schema = self.resolve(schema_id).await.map_err(|e| match e {
            Unresolved::Registry(source) => EncodingError::UnknownSchema(schema_id, source),
            Unresolved::NotAvro => EncodingError::NotAvro(schema_id),
            Unresolved::Unparsable(source) => EncodingError::UnparsableSchema(schema_id, source),
        })?;

        if !record.validate(schema) {
            return Err(EncodingError::NonConforming(schema_id));
        }
        let payload = to_avro_datum(schema, record.clone())?;
        Ok(wire::frame(schema_id, &payload))
    }

    /// `None` is how a broker hands over a message without a value.
    pub async fn decode(&mut self, bytes: Option<&[u8]>) -> Result<Value, DecodingError> {
        let bytes = bytes.ok_or(DecodingError::MissingPayload)?;
        let (id, mut payload) = wire::unframe(bytes)?;

        let schema = self.resolve(id).await.map_err(|e| match e {
            Unresolved::Registry(source) => DecodingError::UnknownSchema { id, source },
            Unresolved::NotAvro => DecodingError::NotAvro(id),
            Unresolved::Unparsable(source) => DecodingError::UnparsableSchema(id, source),
        })?;

        let value = from_avro_datum(schema, &mut payload, None)
            .map_err(|source| DecodingError::Corrupt { id, source })?;
        if !payload.is_empty() {
            return Err(DecodingError::TrailingData {
                id,
                remaining: payload.len(),
            });
        }
        Ok(value)
    }

    async fn resolve(&mut self, id: u32) -> Result<&Schema, Unresolved> {
        if !self.schemas.contains_key(&id) {
            let registered = self
                .registry
                .schema_by_id(id)
                .await
                .map_err(Unresolved::Registry)?;
            if registered.schema_type != SchemaType::Avro {
                return Err(Unresolved::NotAvro);
            }
            let schema = Schema::parse_str(&registered.definition).map_err(Unresolved::Unparsable)?;
            log::debug!("caching schema {id}");
            self.schemas.insert(id, schema);
        }
        Ok(&self.schemas[&id])
    }
}

pub fn to_json(value: Value) -> Result<serde_json::Value, DecodingError> {
    serde_json::Value::try_from(value).map_err(DecodingError::Json)
}
