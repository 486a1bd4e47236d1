//! Feedback quota.
//!
//! Students may receive grading feedback for a deliverable at most once per
//! `student_delay` seconds. Staff are never restricted.

use autotest_core::portal::ClassPortal;
use autotest_core::{Error, Result};
use autotest_db::PersistenceStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

pub struct FeedbackQuotaEngine {
    portal: Arc<dyn ClassPortal>,
    store: Arc<dyn PersistenceStore>,
}

impl FeedbackQuotaEngine {
    pub fn new(portal: Arc<dyn ClassPortal>, store: Arc<dyn PersistenceStore>) -> Self {
        Self { portal, store }
    }

    /// How long the person must still wait before feedback on `deliv_id`,
    /// or `None` if feedback may be given now.
    pub async fn request_feedback_delay(
        &self,
        deliv_id: &str,
        person_id: &str,
        request_timestamp: DateTime<Utc>,
    ) -> Result<Option<String>> {
        if self.portal.is_staff(person_id).await? {
            return Ok(None);
        }

        let Some(last) = self.store.latest_feedback(deliv_id, person_id).await? else {
            return Ok(None);
        };

        let config = self
            .portal
            .container_details(deliv_id)
            .await?
            .ok_or_else(|| Error::UnknownDeliverable(deliv_id.to_string()))?;

        let wait = remaining_wait(config.student_delay, last.timestamp, request_timestamp);
        debug!(
            person = %person_id,
            deliv = %deliv_id,
            last = %last.timestamp,
            remaining = ?wait,
            "Feedback quota checked"
        );
        Ok(wait.map(format_wait))
    }
}

/// Seconds left until `delay_secs` have elapsed since `last`, if any.
pub fn remaining_wait(delay_secs: u64, last: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
    let delta = (now - last).num_milliseconds() as f64 / 1000.0;
    let delay = delay_secs as f64;
    if delta >= delay {
        None
    } else {
        Some(delay - delta)
    }
}

/// Human readable wait. Under a minute the raw seconds are shown unrounded.
pub fn format_wait(remaining: f64) -> String {
    let hours = (remaining / 3600.0).floor() as u64;
    let minutes = ((remaining % 3600.0) / 60.0).floor() as u64;

    if hours > 0 {
        format!("{} hours and {} minutes", hours, minutes)
    } else if minutes > 0 {
        format!("{} minutes", minutes)
    } else {
        format!("{} seconds", remaining)
    }
}
