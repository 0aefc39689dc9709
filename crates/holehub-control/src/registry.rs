//! Persisted hole records
//!
//! Three buckets:
//! - `holes`: hole id -> JSON [`HoleRecord`]
//! - `owner_holes`: `{owner}/{id}` -> creation timestamp, one entry per live hole
//! - `hole_names`: name -> hole id
//!
//! A hole record is a single value, so readers see either the old or the new
//! version, never a mix. Multi-key changes go through one store batch.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use holehub_proto::{HoleDescriptor, HoleStatus, Scheme};
use holehub_store::{Store, StoreError, WriteBatch};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ControlError;

pub const HOLES_BUCKET: &str = "holes";
pub const OWNER_HOLES_BUCKET: &str = "owner_holes";
pub const HOLE_NAMES_BUCKET: &str = "hole_names";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoleRecord {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub name: Option<String>,
    pub scheme: Scheme,
    pub port: u16,
    /// CA certificate file name, relative to the certs directory
    pub ca_ref: String,
    /// CA key file name, relative to the certs directory
    pub cakey_ref: String,
    pub status: HoleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HoleRecord {
    /// Client-facing view; the port is only included when `reveal_port` is set
    pub fn descriptor(&self, host: &str, reveal_port: bool) -> HoleDescriptor {
        HoleDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            scheme: self.scheme,
            host: host.to_string(),
            port: reveal_port.then_some(self.port),
            status: self.status,
        }
    }
}

/// Length of a hole id: a UUID in simple (undashed) form
pub const HOLE_ID_LEN: usize = 32;

/// Generate a fresh hole id
pub fn new_hole_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Whether `id` is shaped like an id from [`new_hole_id`]. Anything else can
/// never name a hole and must not reach a file path.
pub fn is_hole_id(id: &str) -> bool {
    id.len() == HOLE_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn owner_key(owner: &str, id: &str) -> String {
    format!("{}/{}", owner, id)
}

/// Hole records and their two indexes, kept in one [`Store`]
///
/// The registry does no authorization. [`HoleLifecycleManager`] checks the
/// owner before it reads or writes anything here.
///
/// Index entries are never trusted on their own. An owner entry or name
/// binding whose record is missing (or carries another name) reads as absent
/// and gets pruned; see [`HoleRegistry::resolve_name`].
///
/// [`HoleLifecycleManager`]: crate::lifecycle::HoleLifecycleManager
pub struct HoleRegistry {
    store: Arc<dyn Store>,
}

impl HoleRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist a brand new hole together with its owner entry and name binding
    pub async fn insert(&self, hole: &HoleRecord) -> Result<(), ControlError> {
        let mut batch = WriteBatch::new()
            .insert(HOLES_BUCKET, &hole.id, encode(hole)?)
            .put(
                OWNER_HOLES_BUCKET,
                &owner_key(&hole.owner, &hole.id),
                hole.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            );
        if let Some(name) = &hole.name {
            batch = batch.insert(HOLE_NAMES_BUCKET, name, hole.id.clone());
        }

        match self.store.commit(batch).await {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict { bucket, key }) if bucket == HOLE_NAMES_BUCKET => {
                Err(ControlError::NameConflict(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the record of an existing hole
    pub async fn record(&self, hole: &HoleRecord) -> Result<(), ControlError> {
        self.store
            .set(HOLES_BUCKET, &hole.id, &encode(hole)?)
            .await?;
        Ok(())
    }

    /// Load a record by id. Removed holes have no record.
    pub async fn lookup(&self, id: &str) -> Result<Option<HoleRecord>, ControlError> {
        match self.store.get(HOLES_BUCKET, id).await? {
            Some(raw) => Ok(Some(decode(id, &raw)?)),
            None => Ok(None),
        }
    }

    /// Hole ids of an owner in creation order
    ///
    /// Ids whose record is gone are returned as-is; callers treat them as not found.
    pub async fn holes_of(&self, owner: &str) -> Result<Vec<String>, ControlError> {
        let prefix = format!("{}/", owner);
        let mut entries: Vec<(String, String)> = self
            .store
            .scan(OWNER_HOLES_BUCKET, &prefix)
            .await?
            .into_iter()
            .filter_map(|(key, created_at)| {
                key.strip_prefix(&prefix)
                    .map(|id| (created_at, id.to_string()))
            })
            .collect();
        entries.sort();
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }

    /// Drop one owner entry without touching the hole record
    pub async fn prune_owner_entry(&self, owner: &str, id: &str) -> Result<(), ControlError> {
        debug!(owner = %owner, hole_id = %id, "Pruning dangling owner entry");
        self.store
            .delete(OWNER_HOLES_BUCKET, &owner_key(owner, id))
            .await?;
        Ok(())
    }

    /// Resolve a hole name, pruning the binding if it no longer matches a live hole
    pub async fn resolve_name(&self, name: &str) -> Result<Option<String>, ControlError> {
        let Some(id) = self.store.get(HOLE_NAMES_BUCKET, name).await? else {
            return Ok(None);
        };

        let live = match self.lookup(&id).await? {
            Some(hole) => hole.name.as_deref() == Some(name),
            None => false,
        };
        if live {
            return Ok(Some(id));
        }

        warn!(name = %name, hole_id = %id, "Pruning stale name binding");
        self.store
            .commit(WriteBatch::new().delete_if(HOLE_NAMES_BUCKET, name, id))
            .await?;
        Ok(None)
    }

    /// Delete the record, its name binding and its owner entry
    pub async fn delete(&self, hole: &HoleRecord) -> Result<(), ControlError> {
        let mut batch = WriteBatch::new()
            .delete(HOLES_BUCKET, &hole.id)
            .delete(OWNER_HOLES_BUCKET, &owner_key(&hole.owner, &hole.id));
        if let Some(name) = &hole.name {
            // Only release the name if it still points at this hole
            batch = batch.delete_if(HOLE_NAMES_BUCKET, name, hole.id.clone());
        }
        self.store.commit(batch).await?;
        Ok(())
    }

    /// Every persisted record, in id order
    pub async fn all(&self) -> Result<Vec<HoleRecord>, ControlError> {
        self.store
            .scan(HOLES_BUCKET, "")
            .await?
            .into_iter()
            .map(|(id, raw)| decode(&id, &raw))
            .collect()
    }
}

fn encode(hole: &HoleRecord) -> Result<String, ControlError> {
    serde_json::to_string(hole)
        .map_err(|e| StoreError::corrupt(HOLES_BUCKET, &hole.id, e).into())
}

fn decode(id: &str, raw: &str) -> Result<HoleRecord, ControlError> {
    serde_json::from_str(raw).map_err(|e| StoreError::corrupt(HOLES_BUCKET, id, e).into())
}
