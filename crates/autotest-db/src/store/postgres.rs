//! PostgreSQL record store.

use async_trait::async_trait;
use autotest_core::JobKey;
use autotest_core::event::{CommentEvent, PushEvent};
use autotest_core::grading::{
    CommentRecord, ContainerInput, ContainerOutput, ExecutionResult, FeedbackRecord,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use super::PersistenceStore;
use crate::DbResult;

#[derive(Debug, sqlx::FromRow)]
struct PushRow {
    commit_url: String,
    repo_id: String,
    branch: String,
    clone_url: String,
    commit_sha: String,
    project_url: String,
    postback_url: String,
    timestamp: DateTime<Utc>,
}

impl From<PushRow> for PushEvent {
    fn from(row: PushRow) -> Self {
        PushEvent {
            repo_id: row.repo_id,
            branch: row.branch,
            clone_url: row.clone_url,
            commit_sha: row.commit_sha,
            commit_url: row.commit_url,
            project_url: row.project_url,
            postback_url: row.postback_url,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CommentRow {
    commit_url: String,
    deliv_id: Option<String>,
    person_id: String,
    repo_id: String,
    commit_sha: String,
    bot_mentioned: bool,
    postback_url: String,
    timestamp: DateTime<Utc>,
    feedback_requested: bool,
}

impl From<CommentRow> for CommentRecord {
    fn from(row: CommentRow) -> Self {
        CommentRecord {
            comment: CommentEvent {
                person_id: row.person_id,
                repo_id: row.repo_id,
                deliv_id: row.deliv_id,
                commit_sha: row.commit_sha,
                commit_url: row.commit_url,
                bot_mentioned: row.bot_mentioned,
                postback_url: row.postback_url,
                timestamp: row.timestamp,
            },
            feedback_requested: row.feedback_requested,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FeedbackRow {
    person_id: String,
    deliv_id: String,
    commit_url: String,
    timestamp: DateTime<Utc>,
}

impl From<FeedbackRow> for FeedbackRecord {
    fn from(row: FeedbackRow) -> Self {
        FeedbackRecord {
            person_id: row.person_id,
            deliv_id: row.deliv_id,
            commit_url: row.commit_url,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRow {
    commit_url: String,
    deliv_id: String,
    repo_id: String,
    commit_sha: String,
    input: Json<ContainerInput>,
    output: Json<ContainerOutput>,
    started: DateTime<Utc>,
    finished: DateTime<Utc>,
}

impl From<ResultRow> for ExecutionResult {
    fn from(row: ResultRow) -> Self {
        ExecutionResult {
            key: JobKey::new(row.commit_url, row.deliv_id),
            repo_id: row.repo_id,
            commit_sha: row.commit_sha,
            input: row.input.0,
            output: row.output.0,
            started: row.started,
            finished: row.finished,
        }
    }
}

/// PostgreSQL implementation of PersistenceStore.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceStore for PgStore {
    async fn save_push(&self, push: &PushEvent) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO push_records
                (id, commit_url, repo_id, branch, clone_url, commit_sha, project_url, postback_url, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&push.commit_url)
        .bind(&push.repo_id)
        .bind(&push.branch)
        .bind(&push.clone_url)
        .bind(&push.commit_sha)
        .bind(&push.project_url)
        .bind(&push.postback_url)
        .bind(push.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_push(&self, commit_url: &str) -> DbResult<Option<PushEvent>> {
        let row = sqlx::query_as::<_, PushRow>(
            r#"
            SELECT commit_url, repo_id, branch, clone_url, commit_sha, project_url, postback_url, timestamp
            FROM push_records
            WHERE commit_url = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(commit_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn save_comment(&self, record: &CommentRecord) -> DbResult<()> {
        let comment = &record.comment;
        sqlx::query(
            r#"
            INSERT INTO comment_records
                (id, commit_url, deliv_id, person_id, repo_id, commit_sha, bot_mentioned,
                 postback_url, timestamp, feedback_requested)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&comment.commit_url)
        .bind(&comment.deliv_id)
        .bind(&comment.person_id)
        .bind(&comment.repo_id)
        .bind(&comment.commit_sha)
        .bind(comment.bot_mentioned)
        .bind(&comment.postback_url)
        .bind(comment.timestamp)
        .bind(record.feedback_requested)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_feedback_request(&self, key: &JobKey) -> DbResult<Option<CommentRecord>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            UPDATE comment_records
            SET feedback_requested = FALSE
            WHERE commit_url = $1 AND deliv_id = $2 AND feedback_requested
            RETURNING commit_url, deliv_id, person_id, repo_id, commit_sha, bot_mentioned,
                      postback_url, timestamp, feedback_requested
            "#,
        )
        .bind(&key.commit_url)
        .bind(&key.deliv_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .max_by_key(|row| row.timestamp)
            .map(Into::into))
    }

    async fn save_feedback(&self, record: &FeedbackRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback_records (id, person_id, deliv_id, commit_url, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&record.person_id)
        .bind(&record.deliv_id)
        .bind(&record.commit_url)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_feedback(
        &self,
        deliv_id: &str,
        person_id: &str,
    ) -> DbResult<Option<FeedbackRecord>> {
        let row = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT person_id, deliv_id, commit_url, timestamp
            FROM feedback_records
            WHERE deliv_id = $1 AND person_id = $2
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(deliv_id)
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn feedback_for_job(
        &self,
        key: &JobKey,
        person_id: &str,
    ) -> DbResult<Option<FeedbackRecord>> {
        let row = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT person_id, deliv_id, commit_url, timestamp
            FROM feedback_records
            WHERE commit_url = $1 AND deliv_id = $2 AND person_id = $3
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(&key.commit_url)
        .bind(&key.deliv_id)
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn save_result(&self, result: &ExecutionResult) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_results
                (commit_url, deliv_id, repo_id, commit_sha, state, input, output, started, finished)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (commit_url, deliv_id) DO UPDATE SET
                repo_id = EXCLUDED.repo_id,
                commit_sha = EXCLUDED.commit_sha,
                state = EXCLUDED.state,
                input = EXCLUDED.input,
                output = EXCLUDED.output,
                started = EXCLUDED.started,
                finished = EXCLUDED.finished
            "#,
        )
        .bind(&result.key.commit_url)
        .bind(&result.key.deliv_id)
        .bind(&result.repo_id)
        .bind(&result.commit_sha)
        .bind(result.output.state.to_string())
        .bind(Json(&result.input))
        .bind(Json(&result.output))
        .bind(result.started)
        .bind(result.finished)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_result(&self, key: &JobKey) -> DbResult<Option<ExecutionResult>> {
        let row = sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT commit_url, deliv_id, repo_id, commit_sha, input, output, started, finished
            FROM execution_results
            WHERE commit_url = $1 AND deliv_id = $2
            "#,
        )
        .bind(&key.commit_url)
        .bind(&key.deliv_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}
