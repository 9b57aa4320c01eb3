use schema_registry_converter::async_impl::schema_registry::{SrSettings, SrSettingsBuilder};

use crate::{
    SchemaRegistryAuth, SchemaRegistryBasicAuth, SchemaRegistryBearerAuth, SchemaRegistryConfig,
};

impl From<&SchemaRegistryConfig> for SrSettingsBuilder {
    fn from(config: &SchemaRegistryConfig) -> Self {
        let endpoint = config.endpoint.as_str().trim_end_matches('/').to_string();
        let mut builder = SrSettings::new_builder(endpoint);
        match &config.auth {
            Some(SchemaRegistryAuth::Basic(SchemaRegistryBasicAuth { username, password })) => {
                builder.set_basic_authorization(username, Some(password.as_str()));
            }
            Some(SchemaRegistryAuth::Bearer(SchemaRegistryBearerAuth { token })) => {
                builder.set_token_authorization(token);
            }
            None => {}
        }
        builder
    }
}
