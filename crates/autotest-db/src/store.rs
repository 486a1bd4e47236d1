//! Record store trait and implementations.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use autotest_core::JobKey;
use autotest_core::event::PushEvent;
use autotest_core::grading::{CommentRecord, ExecutionResult, FeedbackRecord};

use crate::DbResult;

/// Records written by the scheduler. Records are only read back by key.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_push(&self, push: &PushEvent) -> DbResult<()>;

    /// Most recent push for a commit.
    async fn get_push(&self, commit_url: &str) -> DbResult<Option<PushEvent>>;

    async fn save_comment(&self, record: &CommentRecord) -> DbResult<()>;

    /// Clear every pending feedback request on the job and return the most
    /// recent one. A request is served at most once.
    async fn take_feedback_request(&self, key: &JobKey) -> DbResult<Option<CommentRecord>>;

    async fn save_feedback(&self, record: &FeedbackRecord) -> DbResult<()>;

    /// Most recent feedback grant for a person on a deliverable.
    async fn latest_feedback(
        &self,
        deliv_id: &str,
        person_id: &str,
    ) -> DbResult<Option<FeedbackRecord>>;

    /// Feedback already granted to a person for this exact job.
    async fn feedback_for_job(
        &self,
        key: &JobKey,
        person_id: &str,
    ) -> DbResult<Option<FeedbackRecord>>;

    /// Store a completed execution, replacing any earlier result for the key.
    async fn save_result(&self, result: &ExecutionResult) -> DbResult<()>;

    async fn get_result(&self, key: &JobKey) -> DbResult<Option<ExecutionResult>>;
}
