//! HoleHub client library
//!
//! Talks to the control plane over HTTP, keeps a small local cache, and runs
//! the [`ClientAgent`] that keeps a tunnel engine connected to a hole.

pub mod agent;
pub mod cache;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod retry;

pub use agent::{AgentExit, AgentOptions, AgentReport, AgentState, ClientAgent};
pub use cache::{CachedHole, HoleCache};
pub use config::{ClientConfig, ClientPaths, CONFIG_KEYS, DEFAULT_HOST};
pub use control::{ControlClient, TunnelMaterial};
pub use engine::{TlsTunnelEngine, TunnelEngine, TunnelLink, TunnelTarget};
pub use error::ClientError;
pub use retry::{retry, RetryError, RetryPolicy, DEFAULT_RETRY_BUDGET, DEFAULT_RETRY_INTERVAL};
