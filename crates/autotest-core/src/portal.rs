//! Class portal capability.
//!
//! The portal owns course administration (people, roles, deliverables). The
//! scheduler only reads from it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Grading configuration for one deliverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverableConfig {
    /// Grading image to launch.
    pub image: String,
    /// Minimum seconds between two feedback grants to the same student.
    pub student_delay: u64,
    /// Seconds a container may run before it is considered timed out.
    pub max_exec_time: u64,
}

#[async_trait]
pub trait ClassPortal: Send + Sync {
    /// Whether the person is course staff (staff bypass the feedback quota).
    async fn is_staff(&self, person_id: &str) -> Result<bool>;

    /// The deliverable pushes are graded against, if one is active.
    async fn default_deliverable(&self) -> Result<Option<String>>;

    /// Container configuration for a deliverable, `None` if it is unknown.
    async fn container_details(&self, deliv_id: &str) -> Result<Option<DeliverableConfig>>;
}
