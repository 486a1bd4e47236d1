//! Container launcher trait and launch types.
//!
//! Launchers start grading containers in isolated environments. A launched
//! container connects back to the rendezvous server from its reserved
//! address; the launcher itself never talks to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::{JobId, Result};

/// What to launch for one grading job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Grading image to run.
    pub image: String,
    /// Address the container must connect from.
    pub address: IpAddr,
    /// Environment variables.
    pub env: HashMap<String, String>,
}

/// Handle to a launched container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: JobId,
    /// Launcher-specific identifier (e.g., container ID).
    pub container_id: String,
    pub launcher_name: String,
}

#[async_trait]
pub trait ContainerLauncher: Send + Sync {
    /// Name of this launcher.
    fn name(&self) -> &'static str;

    /// Create and start a container.
    async fn launch(&self, spec: LaunchSpec) -> Result<ContainerHandle>;

    /// Stop and remove a container, whether or not it is still running.
    async fn remove(&self, handle: &ContainerHandle) -> Result<()>;
}
