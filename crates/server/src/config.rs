use crate::client::{Client, validate_clients};
use crate::connector::{Connector, ConnectorError, UpstreamOidcConfig, UpstreamOidcConnector};
use crate::session::SessionConfig;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "FEDERATED_OIDC_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// An upstream identity source, selected by `type`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorConfig {
    Oidc(UpstreamOidcConfig),
}

impl ConnectorConfig {
    pub fn id(&self) -> &str {
        match self {
            ConnectorConfig::Oidc(c) => &c.id,
        }
    }

    pub fn build(&self) -> Result<Arc<dyn Connector>, ConnectorError> {
        match self {
            ConnectorConfig::Oidc(c) => Ok(Arc::new(UpstreamOidcConnector::new(c.clone())?)),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5556))
}
fn default_session_ttl() -> u64 {
    900
}
fn default_code_ttl() -> u64 {
    600
}
fn default_id_token_ttl() -> u64 {
    3600
}
fn default_key_rotation() -> u64 {
    86400
}
fn default_keep_previous_keys() -> usize {
    1
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Issuer identifier; every endpoint URL is derived from it.
    pub issuer_url: Url,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
    #[serde(default = "default_id_token_ttl")]
    pub id_token_ttl_secs: u64,
    #[serde(default = "default_key_rotation")]
    pub key_rotation_secs: u64,
    /// Earlier public keys kept published after a rotation.
    #[serde(default = "default_keep_previous_keys")]
    pub keep_previous_keys: usize,
    #[serde(default)]
    pub enable_registration: bool,
    /// Clients are read from this database when set, otherwise kept in memory.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.issuer_url.scheme(), "http" | "https") || self.issuer_url.cannot_be_a_base()
        {
            return Err(ConfigError::Validation(
                "issuer_url must be an absolute http(s) URL".into(),
            ));
        }
        for (name, value) in [
            ("session_ttl_secs", self.session_ttl_secs),
            ("code_ttl_secs", self.code_ttl_secs),
            ("id_token_ttl_secs", self.id_token_ttl_secs),
            ("key_rotation_secs", self.key_rotation_secs),
        ] {
            if value == 0 || value > MAX_TTL_SECS {
                return Err(ConfigError::Validation(format!(
                    "{name} must be between 1 and {MAX_TTL_SECS}"
                )));
            }
        }

        let mut ids = HashSet::new();
        for connector in &self.connectors {
            let id = connector.id();
            if id.is_empty() {
                return Err(ConfigError::Validation("connector id must not be empty".into()));
            }
            if !ids.insert(id) {
                return Err(ConfigError::Validation(format!("duplicate connector id {id}")));
            }
        }

        validate_clients(&self.clients).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            session_ttl: secs(self.session_ttl_secs),
            code_ttl: secs(self.code_ttl_secs),
        }
    }

    pub fn id_token_ttl(&self) -> time::Duration {
        secs(self.id_token_ttl_secs)
    }

    pub fn key_rotation(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.key_rotation_secs)
    }
}

/// Upper bound for every configured lifetime, one year. Larger values would
/// overflow when added to the current time.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

fn secs(value: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Load application configuration from the file named by `FEDERATED_OIDC_CONFIG`
/// (default `config.yaml`) with environment overrides.
///
/// Any variable matching a key path separated by double underscores (e.g.
/// `CODE_TTL_SECS`, `LISTEN_ADDR`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let file = config::File::with_name(&path);
    build(file, None)
}

/// Parses YAML text, with optional explicit environment overrides.
pub fn load_config_from_str(
    yaml: &str,
    env: Option<HashMap<String, String>>,
) -> Result<AppConfig, ConfigError> {
    build(config::File::from_str(yaml, config::FileFormat::Yaml), env)
}

fn build<S>(file: S, env: Option<HashMap<String, String>>) -> Result<AppConfig, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    use config::{Config, Environment};
    let cfg = Config::builder()
        .add_source(file)
        .add_source(
            Environment::default()
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
