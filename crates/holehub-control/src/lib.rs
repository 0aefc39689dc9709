//! HoleHub control plane
//!
//! Provisions and supervises holes (public tunnel endpoints) for registered users:
//! - [`SequencePortAllocator`] hands out rendezvous ports from a persisted counter
//! - [`HoleRegistry`] stores hole records, per-owner hole lists and the name index
//! - [`UserDirectory`] owns accounts and issues each user's certificate authority
//! - [`HoleLifecycleManager`] drives create/start/kill/remove and the tunnel-server
//!   activation side effects
//!
//! [`ControlPlane`] wires them together once at startup.

pub mod activation;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod plane;
pub mod port;
pub mod process;
pub mod registry;
pub mod users;

pub use activation::ActivationArtifact;
pub use config::ControlConfig;
pub use error::ControlError;
pub use lifecycle::HoleLifecycleManager;
pub use plane::ControlPlane;
pub use port::{PortAllocator, SequencePortAllocator, PORT_COUNTER_KEY};
pub use process::ProcessSupervisor;
pub use registry::{HoleRecord, HoleRegistry};
pub use users::{UserDirectory, UserRecord};
