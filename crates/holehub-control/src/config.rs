use std::path::PathBuf;
use std::time::Duration;

use holehub_cert::DEFAULT_VALIDITY;

/// Control plane settings
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Directory for activation artifacts; certificates go in its `certs/` child
    pub config_dir: PathBuf,
    /// Public host clients connect to for rendezvous ports
    pub hole_host: String,
    /// Lowest port the allocator hands out
    pub min_port: u16,
    /// Tunnel server binary to spawn directly. Without it only artifacts are
    /// written, for an external supervisor to act on.
    pub server_command: Option<PathBuf>,
    pub cert_validity: Duration,
}

impl ControlConfig {
    pub fn new(config_dir: impl Into<PathBuf>, hole_host: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            hole_host: hole_host.into(),
            min_port: 10000,
            server_command: None,
            cert_validity: DEFAULT_VALIDITY,
        }
    }

    pub fn with_min_port(mut self, min_port: u16) -> Self {
        self.min_port = min_port;
        self
    }

    pub fn with_server_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.server_command = Some(command.into());
        self
    }

    pub fn with_cert_validity(mut self, validity: Duration) -> Self {
        self.cert_validity = validity;
        self
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.config_dir.join("certs")
    }
}
