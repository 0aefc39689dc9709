//! Client configuration and local state directory

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ClientError;

pub const DEFAULT_HOST: &str = "127.0.0.1:3000";

/// Keys accepted by `holehub config get|set`
pub const CONFIG_KEYS: [&str; 4] = ["host", "username", "password", "session_token"];

/// Layout of the client state directory (`~/.holehub` by default)
#[derive(Debug, Clone)]
pub struct ClientPaths {
    base: PathBuf,
}

impl ClientPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `~/.holehub`, falling back to the working directory without a home
    pub fn default_location() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".holehub"))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn holes_dir(&self) -> PathBuf {
        self.base.join("holes")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: None,
            password: None,
            session_token: None,
        }
    }
}

impl ClientConfig {
    /// Load the config file; a missing file yields the defaults
    pub fn load(paths: &ClientPaths) -> Result<Self, ClientError> {
        let path = paths.config_file();
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist with owner-only permissions, it may carry a password
    pub fn save(&self, paths: &ClientPaths) -> Result<(), ClientError> {
        std::fs::create_dir_all(paths.base())?;
        let path = paths.config_file();
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        let value = match key {
            "host" => Some(self.host.clone()),
            "username" => self.username.clone(),
            "password" => self.password.clone(),
            "session_token" => self.session_token.clone(),
            other => return Err(unknown_key(other)),
        };
        Ok(value)
    }

    /// Set a key; an empty value clears optional keys
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ClientError> {
        let optional = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };

        match key {
            "host" => {
                if value.is_empty() {
                    return Err(ClientError::Config("host must not be empty".into()));
                }
                self.host = value.to_string();
            }
            "username" => {
                // A token belongs to whoever obtained it
                if self.username.as_deref() != optional.as_deref() {
                    self.session_token = None;
                }
                self.username = optional;
            }
            "password" => self.password = optional,
            "session_token" => self.session_token = optional,
            other => return Err(unknown_key(other)),
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> ClientError {
    ClientError::Config(format!(
        "unknown key '{}', expected one of {}",
        key,
        CONFIG_KEYS.join(", ")
    ))
}
