//! Grading job payloads and persisted grading records.
//!
//! `ContainerInput` is written to the grading container over the rendezvous
//! channel and `ContainerOutput` is what the container writes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::{CommentEvent, JobKey, PushEvent};
use crate::portal::DeliverableConfig;

/// Job payload sent to a grading container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInput {
    pub deliv_id: String,
    pub target: PushEvent,
    pub container_config: DeliverableConfig,
}

impl ContainerInput {
    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.target.commit_url.clone(), self.deliv_id.clone())
    }
}

/// Terminal state of a grading execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    Success,
    Fail,
    Timeout,
    InvalidReport,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Success => write!(f, "SUCCESS"),
            ContainerState::Fail => write!(f, "FAIL"),
            ContainerState::Timeout => write!(f, "TIMEOUT"),
            ContainerState::InvalidReport => write!(f, "INVALID_REPORT"),
        }
    }
}

/// Scores, test outcomes and the feedback shown to students.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    #[serde(default)]
    pub score_overall: f64,
    #[serde(default)]
    pub score_test: Option<f64>,
    #[serde(default)]
    pub score_cover: Option<f64>,
    #[serde(default)]
    pub pass_names: Vec<String>,
    #[serde(default)]
    pub fail_names: Vec<String>,
    #[serde(default)]
    pub error_names: Vec<String>,
    #[serde(default)]
    pub skip_names: Vec<String>,
    /// Markdown posted back to the commit.
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub custom: serde_json::Value,
}

/// Report returned by a grading container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOutput {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub report: GradeReport,
    /// Post the feedback as soon as grading finishes, without charging quota.
    #[serde(default)]
    pub postback_on_complete: bool,
    pub state: ContainerState,
    #[serde(default)]
    pub custom: serde_json::Value,
}

impl ContainerOutput {
    /// An output synthesized by the scheduler when the container did not
    /// produce a usable report.
    pub fn synthesized(state: ContainerState, feedback: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            report: GradeReport {
                feedback: feedback.into(),
                ..Default::default()
            },
            postback_on_complete: false,
            state,
            custom: serde_json::Value::Null,
        }
    }
}

/// A completed execution, looked up by job key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub key: JobKey,
    pub repo_id: String,
    #[serde(rename = "commitSHA")]
    pub commit_sha: String,
    pub input: ContainerInput,
    pub output: ContainerOutput,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// Feedback delivered to a person for a deliverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub person_id: String,
    pub deliv_id: String,
    #[serde(rename = "commitURL")]
    pub commit_url: String,
    pub timestamp: DateTime<Utc>,
}

/// A persisted comment.
///
/// `feedback_requested` is only set when the requester was entitled to see
/// the result at the time of the request; completion-time postback honors
/// only those records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub comment: CommentEvent,
    pub feedback_requested: bool,
}
