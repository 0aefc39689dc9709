//! Advisory per-hole cache under `~/.holehub/holes`
//!
//! Lets `stop`, `rm` and `ls` act without re-deriving local details from the
//! control plane. The server stays authoritative: every descriptor it returns
//! is folded back in with [`HoleCache::refresh`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use holehub_proto::{HoleDescriptor, HoleStatus, Scheme};

use crate::{ClientError, ClientPaths};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHole {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub scheme: Scheme,
    pub host: String,
    /// Only known to the process that created the hole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub local_host: String,
    pub local_port: u16,
    pub local_scheme: String,
    pub status: HoleStatus,
    /// Agent process currently driving this hole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl CachedHole {
    pub fn from_descriptor(hole: &HoleDescriptor, local_host: &str, local_port: u16) -> Self {
        Self {
            id: hole.id.clone(),
            name: hole.name.clone(),
            scheme: hole.scheme,
            host: hole.host.clone(),
            port: hole.port,
            local_host: local_host.to_string(),
            local_port,
            local_scheme: hole.scheme.to_string(),
            status: hole.status,
            pid: None,
        }
    }

    pub fn matches(&self, id_or_name: &str) -> bool {
        self.id == id_or_name || self.name.as_deref() == Some(id_or_name)
    }
}

pub struct HoleCache {
    dir: PathBuf,
}

impl HoleCache {
    pub fn new(paths: &ClientPaths) -> Self {
        Self {
            dir: paths.holes_dir(),
        }
    }

    fn entry_path(&self, id: &str) -> Result<PathBuf, ClientError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(ClientError::UnknownHole(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    pub fn load(&self, id: &str) -> Result<Option<CachedHole>, ClientError> {
        match std::fs::read(self.entry_path(id)?) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, hole: &CachedHole) -> Result<(), ClientError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.entry_path(&hole.id)?, serde_json::to_vec_pretty(hole)?)?;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<bool, ClientError> {
        match std::fs::remove_file(self.entry_path(id)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable entries; unreadable files are skipped
    pub fn list(&self) -> Result<Vec<CachedHole>, ClientError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut holes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(ClientError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<CachedHole>(&bytes)?))
            {
                Ok(hole) => holes.push(hole),
                Err(e) => debug!("Skipping cache entry {}: {}", path.display(), e),
            }
        }
        holes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(holes)
    }

    /// Find an entry by id or by name
    pub fn resolve(&self, id_or_name: &str) -> Result<Option<CachedHole>, ClientError> {
        if let Ok(Some(hole)) = self.load(id_or_name) {
            return Ok(Some(hole));
        }
        Ok(self
            .list()?
            .into_iter()
            .find(|hole| hole.matches(id_or_name)))
    }

    /// Fold a server descriptor into the cached entry, if there is one
    pub fn refresh(&self, hole: &HoleDescriptor) -> Result<Option<CachedHole>, ClientError> {
        let Some(mut cached) = self.load(&hole.id)? else {
            return Ok(None);
        };
        cached.name = hole.name.clone();
        cached.scheme = hole.scheme;
        cached.host = hole.host.clone();
        cached.status = hole.status;
        if hole.port.is_some() {
            cached.port = hole.port;
        }
        self.save(&cached)?;
        Ok(Some(cached))
    }

    pub fn set_status(&self, id: &str, status: HoleStatus) -> Result<(), ClientError> {
        if let Some(mut cached) = self.load(id)? {
            cached.status = status;
            if status != HoleStatus::Started {
                cached.pid = None;
            }
            self.save(&cached)?;
        }
        Ok(())
    }
}
