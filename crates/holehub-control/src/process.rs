//! Directly spawned tunnel server processes

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::activation::ActivationArtifact;
use crate::error::ControlError;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Owns the tunnel server children started by one lifecycle manager
///
/// Children are killed when the supervisor is dropped.
#[derive(Default)]
pub struct ProcessSupervisor {
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the server for a hole unless one is already running.
    /// Returns whether a new process was started.
    pub async fn ensure_running(
        &self,
        hole_id: &str,
        artifact: &ActivationArtifact,
    ) -> Result<bool, ControlError> {
        let mut children = self.children.lock().await;

        if let Some(child) = children.get_mut(hole_id) {
            match child.try_wait() {
                Ok(None) => {
                    debug!(hole_id = %hole_id, pid = ?child.id(), "Tunnel server already running");
                    return Ok(false);
                }
                Ok(Some(status)) => {
                    warn!(hole_id = %hole_id, %status, "Tunnel server exited, respawning");
                }
                Err(e) => {
                    warn!(hole_id = %hole_id, "Failed to poll tunnel server: {}", e);
                }
            }
            children.remove(hole_id);
        }

        let child = Command::new(&artifact.binary)
            .args(&artifact.args)
            .current_dir(&artifact.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ControlError::Process(format!(
                    "failed to spawn {}: {}",
                    artifact.binary.display(),
                    e
                ))
            })?;

        info!(hole_id = %hole_id, pid = ?child.id(), "Spawned tunnel server");
        children.insert(hole_id.to_string(), child);
        Ok(true)
    }

    /// Stop the server for a hole. Returns whether a process was tracked.
    pub async fn stop(&self, hole_id: &str) -> bool {
        let child = self.children.lock().await.remove(hole_id);
        match child {
            Some(child) => {
                terminate(hole_id, child).await;
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, hole_id: &str) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(hole_id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let children: Vec<_> = self.children.lock().await.drain().collect();
        for (hole_id, child) in children {
            terminate(&hole_id, child).await;
        }
    }
}

/// SIGTERM first, SIGKILL after a grace period
async fn terminate(hole_id: &str, mut child: Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) on a pid we own
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if let Ok(Ok(status)) = tokio::time::timeout(STOP_GRACE, child.wait()).await {
                info!(hole_id = %hole_id, %status, "Tunnel server stopped");
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!(hole_id = %hole_id, "Failed to kill tunnel server: {}", e);
    } else {
        info!(hole_id = %hole_id, "Tunnel server killed");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sleeper() -> ActivationArtifact {
        ActivationArtifact {
            cwd: std::env::temp_dir(),
            binary: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
        }
    }

    #[tokio::test]
    async fn test_no_duplicate_spawn() {
        let supervisor = ProcessSupervisor::new();

        assert!(supervisor.ensure_running("h1", &sleeper()).await.unwrap());
        assert!(!supervisor.ensure_running("h1", &sleeper()).await.unwrap());
        assert!(supervisor.is_running("h1").await);

        assert!(supervisor.stop("h1").await);
        assert!(!supervisor.is_running("h1").await);
        assert!(!supervisor.stop("h1").await);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_process_error() {
        let supervisor = ProcessSupervisor::new();
        let artifact = ActivationArtifact {
            cwd: std::env::temp_dir(),
            binary: PathBuf::from("/nonexistent/hole-server"),
            args: vec![],
        };

        assert!(matches!(
            supervisor.ensure_running("h1", &artifact).await,
            Err(ControlError::Process(_))
        ));
    }
}
