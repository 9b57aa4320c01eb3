use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("schema with id {0} not found in registry")]
    NotFound(u32),
    #[error("schema registry unreachable: {0}")]
    Unreachable(String),
    #[error("schema registry rejected the request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum SchemaRegistrationError {
    #[error("malformed schema definition: {0}")]
    InvalidSchema(#[source] apache_avro::Error),
    #[error("schema has no name, cannot derive a record-name subject")]
    Unnamed,
    #[error("could not register schema under subject '{subject}': {source}")]
    Registry {
        subject: String,
        #[source]
        source: RegistryError,
    },
}

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("schema {0} is not known locally and could not be resolved: {1}")]
    UnknownSchema(u32, #[source] RegistryError),
    #[error("schema {0} is not an Avro schema")]
    NotAvro(u32),
    #[error("registered schema {0} could not be parsed: {1}")]
    UnparsableSchema(u32, #[source] apache_avro::Error),
    #[error("record does not conform to schema {0}")]
    NonConforming(u32),
    #[error("avro serialization failed: {0}")]
    Avro(#[from] apache_avro::Error),
}

#[derive(Error, Debug)]
pub enum DecodingError {
    #[error("message has no payload")]
    MissingPayload,
    #[error("payload too short for the wire header: {0} bytes")]
    Truncated(usize),
    #[error("unknown magic byte {0:#04x}")]
    UnknownMagicByte(u8),
    #[error("could not resolve schema {id}: {source}")]
    UnknownSchema {
        id: u32,
        #[source]
        source: RegistryError,
    },
    #[error("schema {0} is not an Avro schema")]
    NotAvro(u32),
    #[error("registered schema {0} could not be parsed: {1}")]
    UnparsableSchema(u32, #[source] apache_avro::Error),
    #[error("corrupt payload for schema {id}: {source}")]
    Corrupt {
        id: u32,
        #[source]
        source: apache_avro::Error,
    },
    #[error("payload for schema {id} has {remaining} trailing byte(s) after the datum")]
    TrailingData { id: u32, remaining: usize },
    #[error("decoded value cannot be rendered as json: {0}")]
    Json(#[source] apache_avro::Error),
}
