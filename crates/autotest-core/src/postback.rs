//! Feedback postback capability.

use async_trait::async_trait;

/// Posts markdown feedback on a commit.
#[async_trait]
pub trait CommentPoster: Send + Sync {
    /// Post `message` on the commit at `commit_url`.
    ///
    /// Failures are reported as `false`, never as errors.
    async fn post(&self, commit_url: &str, message: &str) -> bool;
}
