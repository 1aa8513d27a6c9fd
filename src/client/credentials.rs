use std::fs::{read_to_string, remove_file, write};
use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

use crate::{config::ClientConfig, model::role::Role};

/// What a signed-in client keeps between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Could not access credential file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse credential file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not write credential file: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The single place a session's token and role are kept.
pub trait CredentialStore {
    fn load(&self) -> Result<Option<Credential>, CredentialError>;
    fn save(&mut self, credential: &Credential) -> Result<(), CredentialError>;
    fn clear(&mut self) -> Result<(), CredentialError>;
}

/// Keeps the credential as a two-key TOML table in one file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    token_key: String,
    role_key: String,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, token_key: &str, role_key: &str) -> Self {
        Self {
            path: path.into(),
            token_key: token_key.to_owned(),
            role_key: role_key.to_owned(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.credentials_path, &config.token_key, &config.role_key)
    }
}

impl CredentialStore for FileCredentialStore {
    /// A missing file, a missing key, or an unknown role all read as "no credential".
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        let text = match read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let table = toml::from_str::<toml::Table>(&text)?;

        let token = table.get(&self.token_key).and_then(|v| v.as_str());
        let role = table.get(&self.role_key).and_then(|v| v.as_str());
        let (Some(token), Some(role)) = (token, role) else {
            return Ok(None);
        };
        if token.is_empty() {
            return Ok(None);
        }

        Ok(role.parse::<Role>().ok().map(|role| Credential {
            token: token.to_owned(),
            role,
        }))
    }

    fn save(&mut self, credential: &Credential) -> Result<(), CredentialError> {
        let mut table = toml::Table::new();
        table.insert(
            self.token_key.clone(),
            toml::Value::String(credential.token.clone()),
        );
        table.insert(
            self.role_key.clone(),
            toml::Value::String(credential.role.as_str().to_owned()),
        );

        write(&self.path, toml::to_string(&table)?)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CredentialError> {
        match remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    credential: Option<Credential>,
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        Ok(self.credential.clone())
    }

    fn save(&mut self, credential: &Credential) -> Result<(), CredentialError> {
        self.credential = Some(credential.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CredentialError> {
        self.credential = None;
        Ok(())
    }
}
