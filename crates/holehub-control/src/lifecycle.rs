//! Hole lifecycle
//!
//! ```text
//! Unstarted -> Started -> Stopped -> Started | Removed
//! ```
//!
//! The persisted status is the source of truth. Activation artifacts and
//! spawned tunnel servers are side effects derived from it. Operations on the
//! same hole id are serialized by a per-id lock; different holes proceed in
//! parallel and rely on the store for atomicity.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use holehub_proto::{HoleDescriptor, HoleStatus, Scheme};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::activation::{remove_artifact, write_artifact, ActivationArtifact};
use crate::config::ControlConfig;
use crate::error::ControlError;
use crate::port::PortAllocator;
use crate::process::ProcessSupervisor;
use crate::registry::{is_hole_id, new_hole_id, HoleRecord, HoleRegistry};
use crate::users::UserDirectory;

const MAX_NAME_LEN: usize = 64;

/// Owner-checked hole operations with their side effects on disk and in
/// spawned processes
pub struct HoleLifecycleManager {
    config: ControlConfig,
    registry: Arc<HoleRegistry>,
    users: Arc<UserDirectory>,
    ports: Arc<dyn PortAllocator>,
    processes: ProcessSupervisor,
    locks: HoleLocks,
}

type HoleLocks = DashMap<String, Arc<Mutex<()>>>;

impl HoleLifecycleManager {
    pub fn new(
        config: ControlConfig,
        registry: Arc<HoleRegistry>,
        users: Arc<UserDirectory>,
        ports: Arc<dyn PortAllocator>,
    ) -> Self {
        Self {
            config,
            registry,
            users,
            ports,
            processes: ProcessSupervisor::new(),
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HoleRegistry> {
        &self.registry
    }

    /// Create a hole for `owner`. The returned descriptor is the only one that
    /// carries the allocated port.
    pub async fn create(
        &self,
        owner: &str,
        name: Option<&str>,
        scheme: Option<&str>,
    ) -> Result<HoleDescriptor, ControlError> {
        let scheme = match scheme.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<Scheme>()
                .map_err(|e| ControlError::Validation(e.to_string()))?,
            None => Scheme::default(),
        };
        let name = normalize_name(name)?;

        // No port is consumed for unknown users
        if !self.users.exists(owner).await? {
            return Err(ControlError::UserNotFound(owner.to_string()));
        }

        if let Some(name) = &name {
            if self.registry.resolve_name(name).await?.is_some() {
                return Err(ControlError::NameConflict(name.clone()));
            }
        }

        let port = self.ports.next().await?;
        let now = Utc::now();
        let hole = HoleRecord {
            id: new_hole_id(),
            owner: owner.to_string(),
            name,
            scheme,
            port,
            ca_ref: format!("{}-ca.pem", owner),
            cakey_ref: format!("{}-ca.key", owner),
            status: HoleStatus::Unstarted,
            created_at: now,
            updated_at: now,
        };

        self.registry.insert(&hole).await?;

        info!(hole_id = %hole.id, owner = %owner, port, scheme = %scheme, "Created hole");
        Ok(hole.descriptor(&self.config.hole_host, true))
    }

    /// Activate a hole. Calling it again re-emits the artifact without
    /// spawning a second server.
    pub async fn start(&self, caller: &str, id: &str) -> Result<HoleDescriptor, ControlError> {
        check_id(id)?;
        let _guard = self.lock(id).await;
        let mut hole = self.owned(caller, id).await?;

        self.activate(&hole).await?;

        if hole.status != HoleStatus::Started {
            hole.status = HoleStatus::Started;
            hole.updated_at = Utc::now();
            self.registry.record(&hole).await?;
        }

        info!(hole_id = %id, port = hole.port, "Started hole");
        Ok(hole.descriptor(&self.config.hole_host, false))
    }

    /// Deactivate a hole. Always succeeds for holes the caller owns or that no
    /// longer exist. Artifacts are only touched for records the caller owns.
    pub async fn kill(&self, caller: &str, id: &str) -> Result<HoleStatus, ControlError> {
        check_id(id)?;
        let _guard = self.lock(id).await;

        let Some(mut hole) = self.registry.lookup(id).await? else {
            debug!(hole_id = %id, "Kill for unknown hole acknowledged");
            return Ok(HoleStatus::Stopped);
        };
        ensure_owner(caller, &hole)?;

        self.deactivate(id).await;

        if hole.status != HoleStatus::Stopped {
            hole.status = HoleStatus::Stopped;
            hole.updated_at = Utc::now();
            self.registry.record(&hole).await?;
        }

        info!(hole_id = %id, "Killed hole");
        Ok(HoleStatus::Stopped)
    }

    /// Delete a hole, killing it first if it is running, and release its name
    pub async fn remove(&self, caller: &str, id: &str) -> Result<HoleStatus, ControlError> {
        check_id(id)?;
        let _guard = self.lock(id).await;
        let hole = self.owned(caller, id).await?;

        // The record is deleted below, so no Stopped status is written
        if hole.status == HoleStatus::Started {
            info!(hole_id = %id, "Stopping started hole before removal");
        }
        self.deactivate(id).await;

        self.registry.delete(&hole).await?;
        info!(hole_id = %id, "Removed hole");
        Ok(HoleStatus::Removed)
    }

    pub async fn get(&self, caller: &str, id: &str) -> Result<HoleDescriptor, ControlError> {
        check_id(id)?;
        let hole = self.owned(caller, id).await?;
        Ok(hole.descriptor(&self.config.hole_host, false))
    }

    /// All live holes of `caller`, oldest first. Dangling owner entries are pruned.
    pub async fn list(&self, caller: &str) -> Result<Vec<HoleDescriptor>, ControlError> {
        let mut holes = Vec::new();

        for id in self.registry.holes_of(caller).await? {
            match self.registry.lookup(&id).await? {
                Some(hole) if hole.owner == caller => {
                    holes.push(hole.descriptor(&self.config.hole_host, false));
                }
                _ => {
                    if let Err(e) = self.registry.prune_owner_entry(caller, &id).await {
                        warn!(hole_id = %id, "Failed to prune owner entry: {}", e);
                    }
                }
            }
        }

        Ok(holes)
    }

    /// Re-activate every hole persisted as started, e.g. after a restart
    pub async fn reconcile(&self) -> Result<usize, ControlError> {
        let mut activated = 0;

        for hole in self.registry.all().await? {
            if hole.status != HoleStatus::Started {
                continue;
            }

            let _guard = self.lock(&hole.id).await;
            match self.activate(&hole).await {
                Ok(()) => activated += 1,
                Err(e) => warn!(hole_id = %hole.id, "Failed to re-activate hole: {}", e),
            }
        }

        info!("Reconciled {} started holes", activated);
        Ok(activated)
    }

    /// Stop every tunnel server this manager spawned
    pub async fn shutdown(&self) {
        self.processes.shutdown().await;
    }

    pub async fn is_process_running(&self, id: &str) -> bool {
        self.processes.is_running(id).await
    }

    /// Number of ids with a live lock entry
    pub fn locked_ids(&self) -> usize {
        self.locks.len()
    }

    async fn lock(&self, id: &str) -> HoleLock<'_> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Declared before the acquire future so a cancelled wait still
        // releases the entry
        let mut held = HoleLock {
            locks: &self.locks,
            id: id.to_string(),
            guard: None,
        };
        let acquire = lock.lock_owned();
        held.guard = Some(acquire.await);
        held
    }

    async fn owned(&self, caller: &str, id: &str) -> Result<HoleRecord, ControlError> {
        let hole = self
            .registry
            .lookup(id)
            .await?
            .ok_or_else(|| ControlError::HoleNotFound(id.to_string()))?;
        ensure_owner(caller, &hole)?;
        if hole.status.is_terminal() {
            return Err(ControlError::InvalidState(format!("hole '{}' was removed", id)));
        }
        Ok(hole)
    }

    async fn activate(&self, hole: &HoleRecord) -> Result<(), ControlError> {
        let artifact = ActivationArtifact::for_hole(hole, &self.config);

        write_artifact(&self.config.config_dir, &hole.id, &artifact)
            .await
            .map_err(|e| ControlError::Process(format!("failed to write activation artifact: {}", e)))?;

        if self.config.server_command.is_some() {
            if let Err(e) = self.processes.ensure_running(&hole.id, &artifact).await {
                // Leave no artifact claiming the hole is live
                let _ = remove_artifact(&self.config.config_dir, &hole.id).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Best effort; failures are logged
    async fn deactivate(&self, id: &str) {
        match remove_artifact(&self.config.config_dir, id).await {
            Ok(true) => debug!(hole_id = %id, "Removed activation artifact"),
            Ok(false) => {}
            Err(e) => warn!(hole_id = %id, "Failed to remove activation artifact: {}", e),
        }
        self.processes.stop(id).await;
    }
}

/// Holds the per-id mutex. The map entry goes away with its last holder, so
/// only ids with an operation in flight occupy the map.
struct HoleLock<'a> {
    locks: &'a HoleLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for HoleLock<'_> {
    fn drop(&mut self) {
        // Waiters hold a clone of the Arc, so a count of one means the map
        // holds the only reference
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn check_id(id: &str) -> Result<(), ControlError> {
    if is_hole_id(id) {
        Ok(())
    } else {
        Err(ControlError::Validation(format!("'{}' is not a hole id", id)))
    }
}

fn ensure_owner(caller: &str, hole: &HoleRecord) -> Result<(), ControlError> {
    if hole.owner == caller {
        Ok(())
    } else {
        Err(ControlError::Forbidden {
            user: caller.to_string(),
            id: hole.id.clone(),
        })
    }
}

fn normalize_name(name: Option<&str>) -> Result<Option<String>, ControlError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.len() > MAX_NAME_LEN || name.contains('/') || name.chars().any(char::is_control) {
        return Err(ControlError::Validation(format!(
            "hole name '{}' must be at most {} characters without '/'",
            name, MAX_NAME_LEN
        )));
    }
    Ok(Some(name.to_string()))
}
