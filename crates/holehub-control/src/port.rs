//! Rendezvous port allocation

use std::sync::Arc;

use async_trait::async_trait;
use holehub_store::Store;
use tracing::debug;

use crate::error::ControlError;

pub const SEQ_BUCKET: &str = "seq";

/// Counter key, shared with existing HoleHub deployments
pub const PORT_COUNTER_KEY: &str = "holeserverport";

/// Source of rendezvous ports
#[async_trait]
pub trait PortAllocator: Send + Sync {
    /// Allocate a port no other caller has been or will be given
    async fn next(&self) -> Result<u16, ControlError>;
}

/// Persisted, monotonically increasing port counter with a floor
pub struct SequencePortAllocator {
    store: Arc<dyn Store>,
    floor: u16,
}

impl SequencePortAllocator {
    pub fn new(store: Arc<dyn Store>, floor: u16) -> Self {
        Self { store, floor }
    }

    pub fn floor(&self) -> u16 {
        self.floor
    }
}

#[async_trait]
impl PortAllocator for SequencePortAllocator {
    async fn next(&self) -> Result<u16, ControlError> {
        let floor = i64::from(self.floor);

        loop {
            let value = self.store.increment(SEQ_BUCKET, PORT_COUNTER_KEY).await?;
            if value >= floor {
                return u16::try_from(value).map_err(|_| ControlError::PortsExhausted);
            }

            // Below the floor: lift the counter to it. Only the caller whose
            // increment is still the stored value wins; everyone else retries.
            let lifted = self
                .store
                .compare_and_swap(
                    SEQ_BUCKET,
                    PORT_COUNTER_KEY,
                    Some(&value.to_string()),
                    &floor.to_string(),
                )
                .await?;
            if lifted {
                debug!(from = value, to = floor, "Clamped port counter to floor");
                return Ok(self.floor);
            }
        }
    }
}
