use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use rdkafka::ClientConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub mod consumer;
mod into;
pub mod producer;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("could not read .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

/// Loads a `.env` file from the working directory or one of its parents into
/// the process environment. Variables that are already set keep their value.
///
/// Returns the path of the file that was read, `None` when there is none.
pub fn load_dotenv() -> Result<Option<PathBuf>, ConfigurationError> {
    dotenv_outcome(dotenvy::dotenv())
}

/// Same as [`load_dotenv`] for an explicit file.
pub fn load_dotenv_from(path: &Path) -> Result<Option<PathBuf>, ConfigurationError> {
    dotenv_outcome(dotenvy::from_path(path).map(|()| path.to_path_buf()))
}

fn dotenv_outcome(
    result: Result<PathBuf, dotenvy::Error>,
) -> Result<Option<PathBuf>, ConfigurationError> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Sasl {
    pub username: String,
    pub password: String,
    pub mechanisms: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SchemaRegistryConfig {
    pub auth: Option<SchemaRegistryAuth>,
    pub endpoint: Url,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum SchemaRegistryAuth {
    Basic(SchemaRegistryBasicAuth),
    Bearer(SchemaRegistryBearerAuth),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SchemaRegistryBasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SchemaRegistryBearerAuth {
    pub token: String,
}

/// Everything a producer or consumer process needs to reach the broker and
/// the schema registry. Read once at startup and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    pub client_id: String,
    pub brokers: Vec<String>,
    pub ssl: bool,
    pub sasl: Option<Sasl>,
    pub topic: String,
    pub consumer_group: String,
    pub connect_timeout: Duration,
    pub schema_registry: SchemaRegistryConfig,
}

// Flat shape of the `KAFKA_*` environment variables (and the optional file
// named by `KAFKA_CONFIG_PATH`).
#[derive(Deserialize, Debug)]
struct BrokerSettings {
    client_id: Option<String>,
    bootstrap_servers: Option<String>,
    ssl: bool,
    sasl_enabled: bool,
    sasl_mechanism: String,
    sasl_username: Option<String>,
    sasl_password: Option<String>,
    topic: Option<String>,
    consumer_group: String,
    connect_timeout_ms: i64,
}

#[derive(Deserialize, Debug)]
struct RegistrySettings {
    url: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    token: Option<String>,
}

impl ConnectionConfig {
    pub fn from_env() -> Result<ConnectionConfig, ConfigurationError> {
        let broker_defaults = Config::builder()
            .set_default("ssl", true)?
            .set_default("sasl_enabled", true)?
            .set_default("sasl_mechanism", "PLAIN")?
            .set_default("consumer_group", "schema-stream-consumer-group")?
            .set_default("connect_timeout_ms", 10_000_i64)?;
        let broker: BrokerSettings = load(
            broker_defaults,
            ".kafka.config.yaml",
            "KAFKA_CONFIG_PATH",
            "KAFKA",
        )?;
        let registry: RegistrySettings = load(
            Config::builder(),
            ".schema-registry.config.yaml",
            "SCHEMA_REGISTRY_CONFIG_PATH",
            "SCHEMA_REGISTRY",
        )?;

        Self::from_settings(broker, registry)
    }

    fn from_settings(
        broker: BrokerSettings,
        registry: RegistrySettings,
    ) -> Result<ConnectionConfig, ConfigurationError> {
        let client_id = required(broker.client_id, "KAFKA_CLIENT_ID")?;
        let brokers: Vec<String> = required(broker.bootstrap_servers, "KAFKA_BOOTSTRAP_SERVERS")?
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(String::from)
            .collect();
        if brokers.is_empty() {
            return Err(ConfigurationError::Missing("KAFKA_BOOTSTRAP_SERVERS"));
        }
        let topic = required(broker.topic, "KAFKA_TOPIC")?;

        let sasl = if broker.sasl_enabled {
            Some(Sasl {
                username: required(broker.sasl_username, "KAFKA_SASL_USERNAME")?,
                password: required(broker.sasl_password, "KAFKA_SASL_PASSWORD")?,
                mechanisms: broker.sasl_mechanism,
            })
        } else {
            None
        };

        let url = required(registry.url, "SCHEMA_REGISTRY_URL")?;
        let endpoint = Url::parse(&url).map_err(|e| ConfigurationError::Invalid {
            key: "SCHEMA_REGISTRY_URL",
            reason: e.to_string(),
        })?;
        let auth = match (
            non_blank(registry.api_key),
            non_blank(registry.api_secret),
            non_blank(registry.token),
        ) {
            (Some(username), Some(password), _) => Some(SchemaRegistryAuth::Basic(
                SchemaRegistryBasicAuth { username, password },
            )),
            (Some(_), None, _) => {
                return Err(ConfigurationError::Missing("SCHEMA_REGISTRY_API_SECRET"))
            }
            (None, Some(_), _) => {
                return Err(ConfigurationError::Missing("SCHEMA_REGISTRY_API_KEY"))
            }
            (None, None, Some(token)) => {
                Some(SchemaRegistryAuth::Bearer(SchemaRegistryBearerAuth { token }))
            }
            (None, None, None) => None,
        };

        if broker.connect_timeout_ms <= 0 {
            return Err(ConfigurationError::Invalid {
                key: "KAFKA_CONNECT_TIMEOUT_MS",
                reason: format!("{} is not a positive number of milliseconds", broker.connect_timeout_ms),
            });
        }

        Ok(ConnectionConfig {
            client_id,
            brokers,
            ssl: broker.ssl,
            sasl,
            topic,
            consumer_group: broker.consumer_group,
            connect_timeout: Duration::from_millis(broker.connect_timeout_ms.unsigned_abs()),
            schema_registry: SchemaRegistryConfig { auth, endpoint },
        })
    }

    pub fn security_protocol(&self) -> &'static str {
        match (self.sasl.is_some(), self.ssl) {
            (true, true) => "SASL_SSL",
            (true, false) => "SASL_PLAINTEXT",
            (false, true) => "SSL",
            (false, false) => "PLAINTEXT",
        }
    }

    #[cfg(test)]
    pub fn unsecure(endpoint: &str, registry: &str) -> Self {
        Self {
            client_id: "schema-stream-test".to_string(),
            brokers: vec![endpoint.to_string()],
            ssl: false,
            sasl: None,
            topic: "sample-records".to_string(),
            consumer_group: "schema-stream-consumer-group".to_string(),
            connect_timeout: Duration::from_secs(1),
            schema_registry: SchemaRegistryConfig {
                auth: None,
                endpoint: Url::parse(registry).unwrap(),
            },
        }
    }
}

fn load<T: DeserializeOwned>(
    mut builder: ConfigBuilder<DefaultState>,
    default_file: &str,
    path_var: &str,
    env_prefix: &str,
) -> Result<T, ConfigurationError> {
    builder = builder.add_source(File::new(default_file, FileFormat::Yaml).required(false));

    if let Ok(path_from_env) = std::env::var(path_var) {
        log::info!("Loading config from: {path_from_env}");
        builder = if path_from_env.ends_with("yaml") || path_from_env.ends_with("yml") {
            builder.add_source(File::new(&path_from_env, FileFormat::Yaml).required(true))
        } else if path_from_env.ends_with("json") {
            builder.add_source(File::new(&path_from_env, FileFormat::Json).required(true))
        } else {
            log::warn!("File type not supported. Ignore file: {path_from_env}");
            builder
        };
    }

    builder = builder.add_source(Environment::with_prefix(env_prefix));
    Ok(builder.build()?.try_deserialize()?)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigurationError> {
    non_blank(value).ok_or(ConfigurationError::Missing(name))
}

impl From<&ConnectionConfig> for ClientConfig {
    fn from(config: &ConnectionConfig) -> Self {
        let mut client_config = ClientConfig::new();

        client_config.set("bootstrap.servers", config.brokers.join(","));
        client_config.set("client.id", &config.client_id);
        client_config.set("security.protocol", config.security_protocol());
        if let Some(sasl) = &config.sasl {
            client_config.set("sasl.mechanisms", &sasl.mechanisms);
            client_config.set("sasl.username", &sasl.username);
            client_config.set("sasl.password", &sasl.password);
        }

        client_config
    }
}
