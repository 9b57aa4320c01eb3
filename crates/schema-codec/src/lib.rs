//! Schema registration, Confluent wire framing and Avro encoding of records.
//!
//! [`AvroSerde`] sits between application records and the bytes that travel
//! over the broker. It talks to a registry through the [`SchemaRegistry`]
//! trait, which is implemented for a real Confluent-compatible registry
//! ([`ConfluentRegistry`]) and for an in-process one ([`MemoryRegistry`]).

mod avro;
mod error;
pub mod memory;
mod registry;
mod subject;
pub mod wire;

pub use avro::{to_json, AvroSerde, SchemaDescriptor};
pub use error::{DecodingError, EncodingError, RegistryError, SchemaRegistrationError};
pub use memory::MemoryRegistry;
pub use registry::{ConfluentRegistry, RegisteredSchema, SchemaRegistry};
pub use subject::subject_name;
