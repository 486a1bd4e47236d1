//! In-memory record store.
//!
//! Used when no database is configured and by tests.

use async_trait::async_trait;
use autotest_core::JobKey;
use autotest_core::event::PushEvent;
use autotest_core::grading::{CommentRecord, ExecutionResult, FeedbackRecord};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::PersistenceStore;
use crate::DbResult;

#[derive(Debug, Default)]
struct Records {
    pushes: Vec<PushEvent>,
    comments: Vec<CommentRecord>,
    feedback: Vec<FeedbackRecord>,
    results: HashMap<JobKey, ExecutionResult>,
}

/// Record store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pushes(&self) -> Vec<PushEvent> {
        self.records.read().await.pushes.clone()
    }

    pub async fn comments(&self) -> Vec<CommentRecord> {
        self.records.read().await.comments.clone()
    }

    pub async fn feedback(&self) -> Vec<FeedbackRecord> {
        self.records.read().await.feedback.clone()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn save_push(&self, push: &PushEvent) -> DbResult<()> {
        self.records.write().await.pushes.push(push.clone());
        Ok(())
    }

    async fn get_push(&self, commit_url: &str) -> DbResult<Option<PushEvent>> {
        let records = self.records.read().await;
        Ok(records
            .pushes
            .iter()
            .rev()
            .find(|p| p.commit_url == commit_url)
            .cloned())
    }

    async fn save_comment(&self, record: &CommentRecord) -> DbResult<()> {
        self.records.write().await.comments.push(record.clone());
        Ok(())
    }

    async fn take_feedback_request(&self, key: &JobKey) -> DbResult<Option<CommentRecord>> {
        let mut records = self.records.write().await;
        let mut latest: Option<CommentRecord> = None;
        for record in records.comments.iter_mut().filter(|r| {
            r.feedback_requested
                && r.comment.commit_url == key.commit_url
                && r.comment.deliv_id.as_deref() == Some(key.deliv_id.as_str())
        }) {
            record.feedback_requested = false;
            if latest
                .as_ref()
                .is_none_or(|l| l.comment.timestamp <= record.comment.timestamp)
            {
                latest = Some(record.clone());
            }
        }
        Ok(latest)
    }

    async fn save_feedback(&self, record: &FeedbackRecord) -> DbResult<()> {
        self.records.write().await.feedback.push(record.clone());
        Ok(())
    }

    async fn latest_feedback(
        &self,
        deliv_id: &str,
        person_id: &str,
    ) -> DbResult<Option<FeedbackRecord>> {
        let records = self.records.read().await;
        Ok(records
            .feedback
            .iter()
            .filter(|r| r.deliv_id == deliv_id && r.person_id == person_id)
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn feedback_for_job(
        &self,
        key: &JobKey,
        person_id: &str,
    ) -> DbResult<Option<FeedbackRecord>> {
        let records = self.records.read().await;
        Ok(records
            .feedback
            .iter()
            .rev()
            .find(|r| {
                r.commit_url == key.commit_url
                    && r.deliv_id == key.deliv_id
                    && r.person_id == person_id
            })
            .cloned())
    }

    async fn save_result(&self, result: &ExecutionResult) -> DbResult<()> {
        self.records
            .write()
            .await
            .results
            .insert(result.key.clone(), result.clone());
        Ok(())
    }

    async fn get_result(&self, key: &JobKey) -> DbResult<Option<ExecutionResult>> {
        Ok(self.records.read().await.results.get(key).cloned())
    }
}
