//! Control plane context

use std::sync::Arc;

use holehub_cert::CertificateAuthority;
use holehub_store::Store;
use tracing::info;

use crate::config::ControlConfig;
use crate::error::ControlError;
use crate::lifecycle::HoleLifecycleManager;
use crate::port::{PortAllocator, SequencePortAllocator};
use crate::registry::HoleRegistry;
use crate::users::UserDirectory;

/// Every control plane component, built once at startup and shared by handlers
#[derive(Clone)]
pub struct ControlPlane {
    pub config: ControlConfig,
    pub store: Arc<dyn Store>,
    pub ca: Arc<CertificateAuthority>,
    pub users: Arc<UserDirectory>,
    pub holes: Arc<HoleLifecycleManager>,
}

impl ControlPlane {
    pub fn new(config: ControlConfig, store: Arc<dyn Store>) -> Self {
        let ca = Arc::new(
            CertificateAuthority::new(config.certs_dir()).with_validity(config.cert_validity),
        );
        let users = Arc::new(UserDirectory::new(store.clone(), ca.clone()));
        let registry = Arc::new(HoleRegistry::new(store.clone()));
        let ports: Arc<dyn PortAllocator> =
            Arc::new(SequencePortAllocator::new(store.clone(), config.min_port));
        let holes = Arc::new(HoleLifecycleManager::new(
            config.clone(),
            registry,
            users.clone(),
            ports,
        ));

        Self {
            config,
            store,
            ca,
            users,
            holes,
        }
    }

    /// Open the database at `database_url`, run migrations and build the plane
    pub async fn open(config: ControlConfig, database_url: &str) -> Result<Self, ControlError> {
        let store = holehub_store::open(database_url).await?;
        info!(
            config_dir = %config.config_dir.display(),
            min_port = config.min_port,
            "Control plane ready"
        );
        Ok(Self::new(config, Arc::new(store)))
    }
}
