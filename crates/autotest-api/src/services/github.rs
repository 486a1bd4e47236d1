//! GitHub commit comment poster.

use async_trait::async_trait;
use autotest_config::SystemConfig;
use autotest_core::postback::CommentPoster;
use std::sync::Mutex;
use tracing::{info, warn};
use url::Url;

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Not a commit URL on {host}: {url}")]
    InvalidUrl { host: String, url: String },
}

/// Posts feedback as commit comments.
///
/// With postback disabled nothing is sent; messages are only recorded.
pub struct GitHubCommentPoster {
    client: reqwest::Client,
    host: String,
    api: String,
    token: Option<String>,
    postback: bool,
    posted: Mutex<Vec<(String, String)>>,
}

impl GitHubCommentPoster {
    pub fn new(
        host: impl Into<String>,
        api: impl Into<String>,
        token: Option<String>,
        postback: bool,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            api: api.into().trim_end_matches('/').to_string(),
            token,
            postback,
            posted: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(
            config.github_host.clone(),
            config.github_api.clone(),
            config.github_token.clone(),
            config.postback,
        )
    }

    /// Comments endpoint for a commit page URL.
    ///
    /// `https://github.com/o/r/commit/<sha>` maps to
    /// `https://api.github.com/repos/o/r/commits/<sha>/comments`.
    pub fn comments_url(&self, commit_url: &str) -> Result<Url, GitHubError> {
        let invalid = || GitHubError::InvalidUrl {
            host: self.host.clone(),
            url: commit_url.to_string(),
        };

        let path = commit_url.strip_prefix(&self.host).ok_or_else(invalid)?;
        if !path.contains("/commit/") {
            return Err(invalid());
        }
        let path = path.replacen("/commit/", "/commits/", 1);

        Url::parse(&format!("{}/repos{}/comments", self.api, path)).map_err(|_| invalid())
    }

    /// Messages successfully posted (or recorded, when postback is off).
    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, commit_url: &str, message: &str) {
        self.posted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((commit_url.to_string(), message.to_string()));
    }

    async fn send(&self, url: Url, message: &str) -> Result<(), GitHubError> {
        let mut request = self
            .client
            .post(url)
            .header("User-Agent", "AutoTest")
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "body": message }));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!("{}: {}", status, text)));
        }
        Ok(())
    }
}

#[async_trait]
impl CommentPoster for GitHubCommentPoster {
    async fn post(&self, commit_url: &str, message: &str) -> bool {
        if commit_url.is_empty() || message.is_empty() {
            return false;
        }

        if !self.postback {
            info!(commit = %commit_url, "Postback disabled; recording feedback");
            self.record(commit_url, message);
            return true;
        }

        let result = match self.comments_url(commit_url) {
            Ok(url) => self.send(url, message).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(commit = %commit_url, "Posted feedback");
                self.record(commit_url, message);
                true
            }
            Err(e) => {
                warn!(commit = %commit_url, error = %e, "Failed to post feedback");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poster(postback: bool) -> GitHubCommentPoster {
        GitHubCommentPoster::new(
            "https://github.com/",
            "https://api.github.com",
            None,
            postback,
        )
    }

    #[test]
    fn test_comments_url() {
        let url = poster(false)
            .comments_url("https://github.com/cs310/project_team1/commit/abc123")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/cs310/project_team1/commits/abc123/comments"
        );
    }

    #[test]
    fn test_comments_url_enterprise_host() {
        let poster = GitHubCommentPoster::new(
            "https://github.example.edu",
            "https://github.example.edu/api/v3",
            None,
            false,
        );
        let url = poster
            .comments_url("https://github.example.edu/cs310/p1/commit/abc")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://github.example.edu/api/v3/repos/cs310/p1/commits/abc/comments"
        );
    }

    #[test]
    fn test_comments_url_rejects_foreign_urls() {
        let poster = poster(false);
        assert!(poster.comments_url("https://gitlab.com/o/r/commit/abc").is_err());
        assert!(poster.comments_url("https://github.com/o/r/tree/main").is_err());
    }

    #[tokio::test]
    async fn test_dry_run_records_without_sending() {
        let poster = poster(false);
        let url = "https://github.com/cs310/project_team1/commit/abc123";

        assert!(poster.post(url, "## Score: 90").await);
        assert_eq!(
            poster.posted(),
            vec![(url.to_string(), "## Score: 90".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_url_or_message() {
        let poster = poster(false);
        assert!(!poster.post("", "message").await);
        assert!(!poster.post("https://github.com/o/r/commit/a", "").await);
        assert!(poster.posted().is_empty());
    }

    #[tokio::test]
    async fn test_unmappable_url_fails_without_network() {
        let poster = poster(true);
        assert!(!poster.post("https://gitlab.com/o/r/commit/abc", "hi").await);
        assert!(poster.posted().is_empty());
    }
}
