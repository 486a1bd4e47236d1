//! GitHub webhook payload normalization.
//!
//! Raw payloads are turned into canonical events. A payload missing any
//! required field yields `None`; the caller logs and drops it.

use autotest_core::event::{CommentEvent, PushEvent};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static DELIVERABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S*d\d+\S*").expect("deliverable pattern is valid"));

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn postback_url(commits_url: &str, sha: &str) -> String {
    format!("{}/comments", commits_url.replace("{/sha}", &format!("/{}", sha)))
}

/// Normalize a `push` payload.
///
/// Branch deletions yield `None`. A push that creates a branch without new
/// commits is graded at the branch head.
pub fn parse_push(raw: &Value) -> Option<PushEvent> {
    let head_commit = raw.get("head_commit").filter(|head| !head.is_null());
    let deleted = raw.get("deleted").and_then(Value::as_bool).unwrap_or(false);
    if deleted && head_commit.is_none() {
        return None;
    }

    let repository = raw.get("repository")?;
    let repo_id = str_field(repository, "name")?;
    let project_url = str_field(repository, "html_url")?;
    let clone_url = str_field(repository, "clone_url")?;
    let commits_url = str_field(repository, "commits_url")?;

    let git_ref = str_field(raw, "ref")?;
    let branch = git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref);

    let commits = raw
        .get("commits")
        .and_then(Value::as_array)
        .filter(|commits| !commits.is_empty());

    let (commit, commit_sha, commit_url) = match commits {
        Some(commits) => {
            let first = &commits[0];
            (
                first,
                str_field(first, "id")?.to_string(),
                str_field(first, "url")?.to_string(),
            )
        }
        None => {
            let head = head_commit?;
            (
                head,
                str_field(head, "id")?.to_string(),
                format!("{}/tree/{}", project_url, branch),
            )
        }
    };

    let timestamp = str_field(commit, "timestamp")
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    Some(PushEvent {
        repo_id: repo_id.to_string(),
        branch: branch.to_string(),
        clone_url: clone_url.to_string(),
        postback_url: postback_url(commits_url, &commit_sha),
        commit_sha,
        commit_url,
        project_url: project_url.to_string(),
        timestamp,
    })
}

/// The deliverable named in a comment body: the last token containing
/// `d<digits>`, with punctuation stripped.
pub fn extract_deliverable(body: &str) -> Option<String> {
    DELIVERABLE
        .find_iter(body)
        .last()
        .map(|m| {
            m.as_str()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|deliv| !deliv.is_empty())
}

/// Normalize a `commit_comment` payload.
pub fn parse_comment(raw: &Value, bot_name: &str) -> Option<CommentEvent> {
    let comment = raw.get("comment")?;
    let html_url = str_field(comment, "html_url")?;
    let commit_url = html_url.split('#').next().unwrap_or(html_url);
    let person_id = str_field(comment.get("user")?, "login")?.to_lowercase();
    let body = str_field(comment, "body")?;
    let commit_sha = str_field(comment, "commit_id")?;

    let repository = raw.get("repository")?;
    let repo_id = str_field(repository, "name")?;
    let commits_url = str_field(repository, "commits_url")?;

    let timestamp = str_field(comment, "updated_at")
        .or_else(|| str_field(comment, "created_at"))
        .and_then(parse_timestamp)?;

    let mention = format!("@{}", bot_name.to_lowercase());
    let bot_mentioned = body.to_lowercase().contains(&mention);

    Some(CommentEvent {
        person_id,
        repo_id: repo_id.to_string(),
        deliv_id: extract_deliverable(body),
        commit_sha: commit_sha.to_string(),
        commit_url: commit_url.to_string(),
        bot_mentioned,
        postback_url: postback_url(commits_url, commit_sha),
        timestamp,
    })
}
