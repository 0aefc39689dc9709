//! Activation artifacts
//!
//! `{config_dir}/{hole-id}.json` tells an external supervisor (or the directly
//! spawned tunnel server) to listen on the hole's rendezvous port with the
//! owner's CA material. It is derived from the hole record and regenerated on
//! every start, so it can always be deleted and rebuilt.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ControlConfig;
use crate::registry::HoleRecord;

/// Binary named in artifacts when no server command is configured
pub const DEFAULT_SERVER_BINARY: &str = "hole-server";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationArtifact {
    /// Working directory (the certificate directory)
    pub cwd: PathBuf,
    pub binary: PathBuf,
    pub args: Vec<String>,
}

impl ActivationArtifact {
    pub fn for_hole(hole: &HoleRecord, config: &ControlConfig) -> Self {
        let binary = config
            .server_command
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVER_BINARY));

        Self {
            cwd: config.certs_dir(),
            binary,
            args: vec![
                "--addr".to_string(),
                format!("{}://{}:{}", hole.scheme, config.hole_host, hole.port),
                "--ca".to_string(),
                hole.ca_ref.clone(),
                "--key".to_string(),
                hole.cakey_ref.clone(),
                "--use-tls".to_string(),
            ],
        }
    }
}

pub fn artifact_path(config_dir: &Path, hole_id: &str) -> PathBuf {
    config_dir.join(format!("{}.json", hole_id))
}

/// Artifacts live directly in the config directory; an id that could
/// escape it is refused before any filesystem call.
fn check_file_stem(hole_id: &str) -> io::Result<()> {
    if hole_id.is_empty()
        || hole_id.starts_with('.')
        || hole_id.contains(['/', '\\'])
        || hole_id.chars().any(char::is_control)
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' is not a valid artifact name", hole_id),
        ));
    }
    Ok(())
}

pub async fn write_artifact(
    config_dir: &Path,
    hole_id: &str,
    artifact: &ActivationArtifact,
) -> io::Result<PathBuf> {
    check_file_stem(hole_id)?;
    tokio::fs::create_dir_all(config_dir).await?;

    let path = artifact_path(config_dir, hole_id);
    let json = serde_json::to_vec_pretty(artifact)?;

    let tmp = config_dir.join(format!(".{}.json.tmp", hole_id));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;

    debug!(hole_id = %hole_id, path = %path.display(), "Wrote activation artifact");
    Ok(path)
}

/// Returns whether an artifact existed
pub async fn remove_artifact(config_dir: &Path, hole_id: &str) -> io::Result<bool> {
    check_file_stem(hole_id)?;
    match tokio::fs::remove_file(artifact_path(config_dir, hole_id)).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
