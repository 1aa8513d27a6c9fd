//! Runtime configuration.
//!
//! Read once at start-up from a TOML file (`$CLASSROOM_CONFIG`, or `classroom.toml` in the working
//! directory), then overridden by environment variables. The result is stored globally so the
//! error layer can ask whether it is running in development.

use std::env::var;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use thiserror::Error;

static CONFIG: OnceLock<Config> = OnceLock::new();

const DEFAULT_PATH: &str = "classroom.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} is not configured")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("Configuration was already initialized")]
    AlreadySet,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub client: ClientConfig,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:9090".into(),
            tls_cert: None,
            tls_key: None,
            cors_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub schema: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            user: String::new(),
            password: String::new(),
            database: None,
            schema: "classroom".into(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: 24,
        }
    }
}

/// Settings for the embedded session layer (see [`crate::client`]).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub token_key: String,
    pub role_key: String,
    pub credentials_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_key: "token".into(),
            role_key: "role".into(),
            credentials_path: PathBuf::from("credentials.toml"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Config {
    /// Reads the config file and applies environment overrides.
    ///
    /// A missing file is only an error when `$CLASSROOM_CONFIG` points at it explicitly.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match var("CLASSROOM_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_PATH).exists() => Self::from_file(Path::new(DEFAULT_PATH))?,
            Err(_) => Config::default(),
        };

        let config = config.with_overrides(|key| var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Applies the environment variable overrides, reading them through `lookup`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = lookup("PSQL_HOST") {
            self.database.host = host;
        }
        if let Some(user) = lookup("PSQL_NAME") {
            self.database.user = user;
        }
        if let Some(pass) = lookup("PSQL_PASS") {
            self.database.password = pass;
        }
        if let Some(db) = lookup("PSQL_DB") {
            self.database.database = Some(db);
        }
        if let Some(secret) = lookup("JWT_SECRET_KEY") {
            self.auth.jwt_secret = secret;
        }
        if let Some(address) = lookup("BIND_ADDRESS") {
            self.server.address = address;
        }
        if let Some(cert) = lookup("TLS_CERT") {
            self.server.tls_cert = Some(cert.into());
        }
        if let Some(key) = lookup("TLS_KEY") {
            self.server.tls_key = Some(key.into());
        }
        if let Some(env) = lookup("APP_ENV") {
            self.environment = match env.as_str() {
                "development" => Environment::Development,
                "production" => Environment::Production,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "APP_ENV",
                        value: env,
                    });
                }
            };
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET_KEY"));
        }
        if self.database.user.is_empty() {
            return Err(ConfigError::Missing("PSQL_NAME"));
        }
        if self.database.password.is_empty() {
            return Err(ConfigError::Missing("PSQL_PASS"));
        }
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(ConfigError::Missing("TLS_CERT and TLS_KEY together"));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "token_ttl_hours",
                value: self.auth.token_ttl_hours.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

/// Stores the configuration for the lifetime of the process.
pub fn init(config: Config) -> Result<&'static Config, ConfigError> {
    CONFIG.set(config).map_err(|_| ConfigError::AlreadySet)?;
    CONFIG.get().ok_or(ConfigError::AlreadySet)
}

pub fn get() -> Option<&'static Config> {
    CONFIG.get()
}

/// False until a configuration has been stored.
pub fn is_development() -> bool {
    CONFIG.get().is_some_and(Config::is_development)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_partial_file_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            environment = "development"

            [database]
            user = "school"
            password = "secret"

            [auth]
            jwt_secret = "abc"
            "#,
        )
        .unwrap();

        assert!(config.is_development());
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert_eq!(config.client.token_key, "token");
        assert_eq!(config.client.role_key, "role");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file() {
        let config = Config::default()
            .with_overrides(env(&[
                ("PSQL_NAME", "u"),
                ("PSQL_PASS", "p"),
                ("PSQL_HOST", "db"),
                ("PSQL_DB", "school"),
                ("JWT_SECRET_KEY", "k"),
                ("APP_ENV", "development"),
            ]))
            .unwrap();

        assert_eq!(config.database.host, "db");
        assert_eq!(config.database.database.as_deref(), Some("school"));
        assert_eq!(config.auth.jwt_secret, "k");
        assert!(config.is_development());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_secret_is_rejected() {
        let config = Config::default()
            .with_overrides(env(&[("PSQL_NAME", "u"), ("PSQL_PASS", "p")]))
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("JWT_SECRET_KEY"))
        ));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        assert!(matches!(
            Config::default().with_overrides(env(&[("APP_ENV", "staging")])),
            Err(ConfigError::Invalid { key: "APP_ENV", .. })
        ));
    }

    #[test]
    fn tls_needs_both_files() {
        let config = Config::default()
            .with_overrides(env(&[
                ("PSQL_NAME", "u"),
                ("PSQL_PASS", "p"),
                ("JWT_SECRET_KEY", "k"),
                ("TLS_CERT", "cert.pem"),
            ]))
            .unwrap();
        assert!(config.validate().is_err());
    }
}
