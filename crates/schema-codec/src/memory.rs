//! In-process registry with the same id semantics as a Confluent registry.
//!
//! Clones share state, so a producer-side and a consumer-side codec can be
//! pointed at one registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use schema_registry_converter::schema_registry_common::SchemaType;

use crate::{RegisteredSchema, RegistryError, SchemaRegistry};

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    unreachable: bool,
    schemas: BTreeMap<u32, RegisteredSchema>,
    subjects: HashMap<String, Vec<u32>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every following call fail as if the registry were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Ids registered under `subject`, oldest version first.
    pub fn versions(&self, subject: &str) -> Vec<u32> {
        self.state().subjects.get(subject).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SchemaRegistry for MemoryRegistry {
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(RegistryError::Unreachable("memory registry offline".into()));
        }

        let existing = state
            .schemas
            .values()
            .find(|schema| schema.definition == definition)
            .map(|schema| schema.id);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = state.schemas.keys().next_back().map_or(1, |last| last + 1);
                state.schemas.insert(
                    id,
                    RegisteredSchema {
                        id,
                        schema_type: SchemaType::Avro,
                        definition: definition.to_string(),
                    },
                );
                id
            }
        };

        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }
        Ok(id)
    }

    async fn schema_by_id(&self, id: u32) -> Result<RegisteredSchema, RegistryError> {
        let state = self.state();
        if state.unreachable {
            return Err(RegistryError::Unreachable("memory registry offline".into()));
        }
        state
            .schemas
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }
}
