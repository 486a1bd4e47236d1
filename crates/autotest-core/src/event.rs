//! Canonical webhook events.
//!
//! Events are produced by the GitHub normalizer and are immutable once
//! created. Field names serialize in camelCase because the same shapes travel
//! to grading containers inside the job input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single commit pushed to a tracked branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub repo_id: String,
    pub branch: String,
    #[serde(rename = "cloneURL")]
    pub clone_url: String,
    #[serde(rename = "commitSHA")]
    pub commit_sha: String,
    #[serde(rename = "commitURL")]
    pub commit_url: String,
    #[serde(rename = "projectURL")]
    pub project_url: String,
    #[serde(rename = "postbackURL")]
    pub postback_url: String,
    pub timestamp: DateTime<Utc>,
}

/// A mention-triggered feedback request on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEvent {
    pub person_id: String,
    pub repo_id: String,
    pub deliv_id: Option<String>,
    #[serde(rename = "commitSHA")]
    pub commit_sha: String,
    #[serde(rename = "commitURL")]
    pub commit_url: String,
    pub bot_mentioned: bool,
    #[serde(rename = "postbackURL")]
    pub postback_url: String,
    /// Last update time of the comment, so an edit re-arms the request.
    pub timestamp: DateTime<Utc>,
}

impl CommentEvent {
    /// The job this comment refers to, if it names a deliverable.
    pub fn job_key(&self) -> Option<JobKey> {
        self.deliv_id
            .as_ref()
            .map(|deliv| JobKey::new(self.commit_url.clone(), deliv.clone()))
    }
}

/// Unique identity of a grading job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKey {
    #[serde(rename = "commitURL")]
    pub commit_url: String,
    pub deliv_id: String,
}

impl JobKey {
    pub fn new(commit_url: impl Into<String>, deliv_id: impl Into<String>) -> Self {
        Self {
            commit_url: commit_url.into(),
            deliv_id: deliv_id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.commit_url, self.deliv_id)
    }
}
