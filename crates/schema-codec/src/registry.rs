use async_trait::async_trait;
use schema_registry_converter::async_impl::schema_registry::{
    get_schema_by_id, post_schema, SrSettings, SrSettingsBuilder,
};
use schema_registry_converter::error::SRCError;
use schema_registry_converter::schema_registry_common::{SchemaType, SuppliedSchema};
use stream_config::SchemaRegistryConfig;

use crate::RegistryError;

/// A schema as stored by the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisteredSchema {
    pub id: u32,
    pub schema_type: SchemaType,
    pub definition: String,
}

/// The narrow view of a schema registry the codec depends on.
///
/// Registering identical content under the same subject must hand back the
/// identifier assigned the first time; implementations rely on the registry
/// for that and do not deduplicate on their own.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError>;

    async fn schema_by_id(&self, id: u32) -> Result<RegisteredSchema, RegistryError>;
}

/// Confluent-compatible registry reached over HTTP.
pub struct ConfluentRegistry {
    sr_settings: SrSettings,
}

impl ConfluentRegistry {
    pub fn new(config: &SchemaRegistryConfig) -> Result<Self, RegistryError> {
        let sr_settings = SrSettingsBuilder::from(config)
            .build()
            .map_err(|e| RegistryError::Rejected(e.to_string()))?;
        Ok(Self { sr_settings })
    }
}

fn registry_error(error: SRCError) -> RegistryError {
    if error.retriable {
        RegistryError::Unreachable(error.to_string())
    } else {
        RegistryError::Rejected(error.to_string())
    }
}

fn avro_schema(definition: &str) -> SuppliedSchema {
    SuppliedSchema {
        name: None,
        schema_type: SchemaType::Avro,
        schema: definition.to_string(),
        references: vec![],
        properties: None,
        tags: None,
    }
}

#[async_trait]
impl SchemaRegistry for ConfluentRegistry {
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError> {
        let registered = post_schema(&self.sr_settings, subject.to_string(), avro_schema(definition))
            .await
            .map_err(registry_error)?;
        Ok(registered.id)
    }

    async fn schema_by_id(&self, id: u32) -> Result<RegisteredSchema, RegistryError> {
        let registered = get_schema_by_id(id, &self.sr_settings)
            .await
            .map_err(registry_error)?;
        log::debug!("schema {id} loaded from schema registry");
        Ok(RegisteredSchema {
            id: registered.id,
            schema_type: registered.schema_type,
            definition: registered.schema,
        })
    }
}
