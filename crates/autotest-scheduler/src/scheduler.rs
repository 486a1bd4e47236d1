//! Commit scheduler.
//!
//! Owns the job lanes, the set of executing jobs and the container address
//! pool. State lives behind a synchronous mutex that is never held across an
//! await point; every state change is followed by `tick()`.

use crate::queue::{JobQueue, QueueEntry};
use crate::quota::FeedbackQuotaEngine;
use crate::rendezvous::RendezvousServer;
use crate::runner::{Dispatch, JobRunner};
use autotest_config::SystemConfig;
use autotest_core::event::{CommentEvent, PushEvent};
use autotest_core::grading::{CommentRecord, ContainerInput, ExecutionResult, FeedbackRecord};
use autotest_core::launcher::ContainerLauncher;
use autotest_core::portal::ClassPortal;
use autotest_core::postback::CommentPoster;
use autotest_core::{JobId, JobKey};
use autotest_db::PersistenceStore;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Scheduler settings derived from the system configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub bot_name: String,
    /// Maximum concurrently executing jobs.
    pub max_jobs: usize,
    /// Address pool for grading containers.
    pub addresses: Vec<IpAddr>,
    /// Host and port containers dial to reach the rendezvous server.
    pub rendezvous_host: String,
    pub rendezvous_port: u16,
}

impl SchedulerConfig {
    pub fn from_system(config: &SystemConfig, rendezvous_port: u16) -> Self {
        Self {
            bot_name: config.bot_name.clone(),
            max_jobs: config.max_jobs,
            addresses: config.container_addresses.clone(),
            rendezvous_host: config.rendezvous_host.clone(),
            rendezvous_port,
        }
    }
}

/// Collaborators injected into the scheduler.
pub struct SchedulerServices {
    pub portal: Arc<dyn ClassPortal>,
    pub store: Arc<dyn PersistenceStore>,
    pub poster: Arc<dyn CommentPoster>,
    pub launcher: Arc<dyn ContainerLauncher>,
    pub rendezvous: Arc<RendezvousServer>,
}

/// A job that has been dispatched and not yet completed.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub job_id: JobId,
    pub key: JobKey,
    pub address: IpAddr,
    pub started: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Snapshot of the scheduler for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub express: Vec<JobKey>,
    pub standard: Vec<JobKey>,
    pub executing: Vec<ExecutionRecord>,
}

#[derive(Debug, Default)]
struct State {
    queue: JobQueue,
    executing: HashMap<JobKey, ExecutionRecord>,
    free_addresses: VecDeque<IpAddr>,
}

struct Inner {
    config: SchedulerConfig,
    portal: Arc<dyn ClassPortal>,
    store: Arc<dyn PersistenceStore>,
    poster: Arc<dyn CommentPoster>,
    quota: FeedbackQuotaEngine,
    runner: JobRunner,
    state: Mutex<State>,
}

/// Turns push and comment events into grading jobs and decides when their
/// feedback is posted.
#[derive(Clone)]
pub struct CommitScheduler {
    inner: Arc<Inner>,
}

impl CommitScheduler {
    pub fn new(config: SchedulerConfig, services: SchedulerServices) -> Self {
        let runner = JobRunner::new(
            services.launcher,
            services.rendezvous,
            config.rendezvous_host.clone(),
            config.rendezvous_port,
        );
        let quota = FeedbackQuotaEngine::new(services.portal.clone(), services.store.clone());
        let state = State {
            free_addresses: config.addresses.iter().copied().collect(),
            ..Default::default()
        };

        Self {
            inner: Arc::new(Inner {
                config,
                portal: services.portal,
                store: services.store,
                poster: services.poster,
                quota,
                runner,
                state: Mutex::new(state),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a pushed commit for grading against `deliv_id`, or the course
    /// default deliverable. Returns whether a new job was queued.
    pub async fn handle_push(&self, push: PushEvent, deliv_id: Option<&str>) -> bool {
        let deliv_id = match deliv_id {
            Some(deliv) => deliv.to_string(),
            None => match self.inner.portal.default_deliverable().await {
                Ok(Some(deliv)) => deliv,
                Ok(None) => {
                    info!(commit = %push.commit_url, "No default deliverable; push ignored");
                    return false;
                }
                Err(e) => {
                    warn!(commit = %push.commit_url, error = %e, "Failed to look up default deliverable");
                    return false;
                }
            },
        };

        let container_config = match self.inner.portal.container_details(&deliv_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                warn!(deliv = %deliv_id, "Unknown deliverable; push ignored");
                return false;
            }
            Err(e) => {
                warn!(deliv = %deliv_id, error = %e, "Failed to look up deliverable");
                return false;
            }
        };

        if let Err(e) = self.inner.store.save_push(&push).await {
            warn!(commit = %push.commit_url, error = %e, "Failed to save push record");
        }

        let input = ContainerInput {
            deliv_id,
            target: push,
            container_config,
        };
        let key = input.job_key();

        let queued = {
            let mut state = self.state();
            !state.executing.contains_key(&key) && state.queue.enqueue(QueueEntry::new(input))
        };

        if queued {
            info!(job = %key, "Job queued");
        } else {
            debug!(job = %key, "Job already queued or executing");
        }

        self.tick();
        queued
    }

    /// Answer a feedback request made in a commit comment.
    pub async fn handle_comment(&self, comment: CommentEvent) {
        let inner = &self.inner;

        if comment
            .person_id
            .eq_ignore_ascii_case(&inner.config.bot_name)
        {
            debug!(commit = %comment.commit_url, "Ignoring comment by the bot");
            return;
        }
        if !comment.bot_mentioned {
            debug!(commit = %comment.commit_url, "Bot not mentioned; comment ignored");
            return;
        }

        let Some(deliv_id) = comment.deliv_id.clone() else {
            let message = format!(
                "Please specify a deliverable so I know what to grade (e.g. `@{} #d1`).",
                inner.config.bot_name
            );
            inner.poster.post(&comment.commit_url, &message).await;
            return;
        };

        match inner.portal.container_details(&deliv_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let message = format!("`{}` is not a deliverable of this course.", deliv_id);
                inner.poster.post(&comment.commit_url, &message).await;
                return;
            }
            Err(e) => {
                warn!(deliv = %deliv_id, error = %e, "Failed to look up deliverable");
                return;
            }
        }

        let Some(key) = comment.job_key() else {
            return;
        };
        let person = comment.person_id.as_str();

        let (staff, delay, served, result) = tokio::join!(
            inner.portal.is_staff(person),
            inner
                .quota
                .request_feedback_delay(&deliv_id, person, comment.timestamp),
            inner.store.feedback_for_job(&key, person),
            inner.store.get_result(&key),
        );

        let staff = staff.unwrap_or_else(|e| {
            warn!(person = %person, error = %e, "Failed to check staff status");
            false
        });
        let delay = match delay {
            Ok(delay) => delay,
            Err(e) => {
                warn!(job = %key, person = %person, error = %e, "Failed to check feedback quota");
                return;
            }
        };
        let served = served
            .inspect_err(|e| warn!(job = %key, error = %e, "Failed to look up feedback records"))
            .ok()
            .flatten();
        let result = result
            .inspect_err(|e| warn!(job = %key, error = %e, "Failed to look up result"))
            .ok()
            .flatten();

        let should_post = staff || delay.is_none() || served.is_some();
        if let Some(wait) = delay.as_ref().filter(|_| !should_post) {
            let message = format!(
                "You must wait {} before requesting feedback on {} again.",
                wait, deliv_id
            );
            inner.poster.post(&comment.commit_url, &message).await;
        }

        info!(
            job = %key,
            person = %person,
            staff,
            should_post,
            completed = result.is_some(),
            "Feedback requested"
        );

        match result {
            Some(result) => {
                if should_post {
                    let posted = inner
                        .poster
                        .post(&comment.commit_url, &result.output.report.feedback)
                        .await;
                    if posted && served.is_none() {
                        self.record_feedback(person, &key, comment.timestamp).await;
                    }
                }
                self.save_comment(comment.clone(), false).await;
            }
            None => {
                let queued = self.is_queued(&key);
                let executing = self.is_executing(&key);
                let replay = if should_post && !queued && !executing {
                    self.stored_push(&comment.commit_url).await
                } else {
                    None
                };

                if should_post {
                    let message = if executing {
                        format!(
                            "Grading of {} for this commit is in progress; feedback will be posted when it finishes.",
                            deliv_id
                        )
                    } else if queued || replay.is_some() {
                        format!(
                            "This commit is queued for grading on {}; feedback will be posted when it finishes.",
                            deliv_id
                        )
                    } else {
                        format!(
                            "No push has been recorded for this commit, so it cannot be graded on {} yet.",
                            deliv_id
                        )
                    };
                    inner.poster.post(&comment.commit_url, &message).await;
                }
                self.save_comment(comment.clone(), should_post).await;

                if let Some(push) = replay {
                    info!(commit = %comment.commit_url, deliv = %deliv_id, "Replaying stored push");
                    self.handle_push(push, Some(&deliv_id)).await;
                }
            }
        }

        if staff || should_post {
            self.promote(&key);
        }
        self.tick();
    }

    async fn stored_push(&self, commit_url: &str) -> Option<PushEvent> {
        match self.inner.store.get_push(commit_url).await {
            Ok(Some(push)) => Some(push),
            Ok(None) => {
                warn!(commit = %commit_url, "No stored push to replay");
                None
            }
            Err(e) => {
                warn!(commit = %commit_url, error = %e, "Failed to load stored push");
                None
            }
        }
    }

    fn promote(&self, key: &JobKey) {
        if self.state().queue.promote(key) {
            info!(job = %key, "Job promoted to express lane");
        }
    }

    async fn save_comment(&self, comment: CommentEvent, feedback_requested: bool) {
        let record = CommentRecord {
            comment,
            feedback_requested,
        };
        if let Err(e) = self.inner.store.save_comment(&record).await {
            warn!(commit = %record.comment.commit_url, error = %e, "Failed to save comment record");
        }
    }

    async fn record_feedback(&self, person_id: &str, key: &JobKey, timestamp: DateTime<Utc>) {
        let record = FeedbackRecord {
            person_id: person_id.to_string(),
            deliv_id: key.deliv_id.clone(),
            commit_url: key.commit_url.clone(),
            timestamp,
        };
        if let Err(e) = self.inner.store.save_feedback(&record).await {
            warn!(job = %key, person = %person_id, error = %e, "Failed to save feedback record");
        }
    }

    /// Dispatch queued jobs while capacity and addresses remain.
    pub fn tick(&self) {
        let dispatches = {
            let mut state = self.state();
            let mut dispatches = Vec::new();

            while state.executing.len() < self.inner.config.max_jobs {
                let Some(&address) = state.free_addresses.front() else {
                    break;
                };
                let Some(entry) = state.queue.pop() else {
                    break;
                };
                state.free_addresses.pop_front();

                let started = Utc::now();
                let deadline = TimeDelta::try_seconds(
                    i64::try_from(entry.input.container_config.max_exec_time).unwrap_or(i64::MAX),
                )
                .and_then(|limit| started.checked_add_signed(limit))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

                let record = ExecutionRecord {
                    job_id: JobId::new(),
                    key: entry.key.clone(),
                    address,
                    started,
                    deadline,
                };
                state.executing.insert(entry.key.clone(), record.clone());

                dispatches.push(Dispatch {
                    job_id: record.job_id,
                    key: entry.key,
                    input: entry.input,
                    address,
                    started,
                });
            }
            dispatches
        };

        for dispatch in dispatches {
            info!(
                job = %dispatch.key,
                job_id = %dispatch.job_id,
                address = %dispatch.address,
                "Dispatching job"
            );
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.execute(dispatch).await });
        }
    }

    async fn execute(&self, dispatch: Dispatch) {
        let output = self.inner.runner.run(&dispatch).await;
        let result = ExecutionResult {
            key: dispatch.key.clone(),
            repo_id: dispatch.input.target.repo_id.clone(),
            commit_sha: dispatch.input.target.commit_sha.clone(),
            input: dispatch.input,
            output,
            started: dispatch.started,
            finished: Utc::now(),
        };

        self.process_execution(&result).await;

        {
            let mut state = self.state();
            state.executing.remove(&dispatch.key);
            state.free_addresses.push_back(dispatch.address);
        }
        self.tick();
    }

    /// Persist a finished execution and post its feedback if it was asked
    /// for. Errors are logged, never returned.
    pub async fn process_execution(&self, result: &ExecutionResult) {
        let inner = &self.inner;
        let key = &result.key;

        if let Err(e) = inner.store.save_result(result).await {
            warn!(job = %key, error = %e, "Failed to save execution result");
        }

        let feedback = &result.output.report.feedback;

        if result.output.postback_on_complete {
            if !inner.poster.post(&key.commit_url, feedback).await {
                warn!(job = %key, "Failed to post feedback on completion");
            }
            return;
        }

        match inner.store.take_feedback_request(key).await {
            Ok(Some(request)) => {
                if inner.poster.post(&key.commit_url, feedback).await {
                    self.record_feedback(
                        &request.comment.person_id,
                        key,
                        request.comment.timestamp,
                    )
                    .await;
                } else {
                    warn!(job = %key, "Failed to post requested feedback");
                    // Leave the request pending for the next completion.
                    self.save_comment(request.comment, true).await;
                }
            }
            Ok(None) => {
                debug!(job = %key, "No pending feedback request");
            }
            Err(e) => {
                warn!(job = %key, error = %e, "Failed to look up feedback request");
            }
        }
    }

    pub fn is_queued(&self, key: &JobKey) -> bool {
        self.state().queue.contains(key)
    }

    pub fn is_executing(&self, key: &JobKey) -> bool {
        self.state().executing.contains_key(key)
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state();
        let mut executing: Vec<ExecutionRecord> = state.executing.values().cloned().collect();
        executing.sort_by(|a, b| a.started.cmp(&b.started));

        SchedulerStatus {
            express: state.queue.express_keys(),
            standard: state.queue.standard_keys(),
            executing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use autotest_core::grading::ContainerState;
    use autotest_db::MemoryStore;
    use chrono::Duration;
    use std::net::Ipv4Addr;
    use tokio::sync::Semaphore;

    struct Harness {
        scheduler: CommitScheduler,
        store: Arc<MemoryStore>,
        poster: Arc<RecordingPoster>,
        launcher: Arc<FakeLauncher>,
        _rendezvous: Arc<RendezvousServer>,
    }

    async fn harness(launcher: FakeLauncher, with_default: bool) -> Harness {
        let rendezvous = Arc::new(RendezvousServer::new("127.0.0.1:0".parse().unwrap()));
        let addr = rendezvous.start().await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let poster = Arc::new(RecordingPoster::default());
        let launcher = Arc::new(launcher);

        let config = SchedulerConfig {
            bot_name: BOT.to_string(),
            max_jobs: 1,
            addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            rendezvous_host: "127.0.0.1".to_string(),
            rendezvous_port: addr.port(),
        };
        let scheduler = CommitScheduler::new(
            config,
            SchedulerServices {
                portal: Arc::new(course_portal(with_default)),
                store: store.clone(),
                poster: poster.clone(),
                launcher: launcher.clone(),
                rendezvous: rendezvous.clone(),
            },
        );

        Harness {
            scheduler,
            store,
            poster,
            launcher,
            _rendezvous: rendezvous,
        }
    }

    fn replying(feedback: &str) -> FakeLauncher {
        FakeLauncher::new(ContainerScript::Reply(success_output(feedback)))
    }

    async fn settle(scheduler: &CommitScheduler) {
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                let status = scheduler.status();
                if status.express.is_empty()
                    && status.standard.is_empty()
                    && status.executing.is_empty()
                {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler did not settle");
    }

    fn key(sha: &str) -> JobKey {
        JobKey::new(commit_url(sha), "d0")
    }

    #[tokio::test]
    async fn test_duplicate_push_enqueued_once() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            FakeLauncher::gated(ContainerScript::Reply(success_output("ok")), gate.clone()),
            true,
        )
        .await;

        assert!(h.scheduler.handle_push(push_event("a"), None).await);
        assert!(!h.scheduler.handle_push(push_event("a"), None).await);
        assert!(h.scheduler.handle_push(push_event("b"), None).await);
        assert!(!h.scheduler.handle_push(push_event("b"), None).await);

        let status = h.scheduler.status();
        assert_eq!(status.executing.len(), 1);
        assert_eq!(status.executing[0].key, key("a"));
        assert_eq!(status.standard, vec![key("b")]);
        assert!(status.express.is_empty());

        gate.add_permits(2);
        settle(&h.scheduler).await;
        assert_eq!(h.launcher.launched().len(), 2);
    }

    #[tokio::test]
    async fn test_push_ignored_without_default_deliverable() {
        let h = harness(replying("ok"), false).await;

        assert!(!h.scheduler.handle_push(push_event("a"), None).await);
        assert!(h.store.pushes().await.is_empty());
        assert!(h.launcher.launched().is_empty());

        assert!(!h.scheduler.handle_push(push_event("a"), Some("d9")).await);
        assert!(h.launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn test_express_lane_drained_first() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            FakeLauncher::gated(ContainerScript::Reply(success_output("ok")), gate.clone()),
            true,
        )
        .await;

        h.scheduler.handle_push(push_event("a"), None).await;
        h.scheduler.handle_push(push_event("b"), None).await;
        h.scheduler.handle_push(push_event("c"), None).await;

        h.scheduler
            .handle_comment(comment_event("c", "prof", Some("d0"), Utc::now()))
            .await;

        let status = h.scheduler.status();
        assert_eq!(status.express, vec![key("c")]);
        assert_eq!(status.standard, vec![key("b")]);

        gate.add_permits(3);
        settle(&h.scheduler).await;

        let order: Vec<String> = h
            .launcher
            .received()
            .into_iter()
            .map(|input| input.target.commit_sha)
            .collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_feedback_posted_on_request_after_completion() {
        let h = harness(replying("## Score: 100"), true).await;

        h.scheduler.handle_push(push_event("a"), None).await;
        settle(&h.scheduler).await;

        let result = h.store.get_result(&key("a")).await.unwrap().unwrap();
        assert_eq!(result.output.state, ContainerState::Success);
        assert!(h.poster.posts().is_empty());

        let requested_at = Utc::now();
        h.scheduler
            .handle_comment(comment_event("a", "student", Some("d0"), requested_at))
            .await;

        assert_eq!(
            h.poster.posts(),
            vec![(commit_url("a"), "## Score: 100".to_string())]
        );
        let feedback = h.store.feedback().await;
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].person_id, "student");
        assert_eq!(feedback[0].deliv_id, "d0");
        assert_eq!(feedback[0].timestamp, requested_at);

        // Asking again on the same commit is served without charging quota.
        h.scheduler
            .handle_comment(comment_event(
                "a",
                "student",
                Some("d0"),
                requested_at + Duration::minutes(1),
            ))
            .await;
        assert_eq!(h.poster.messages(), vec!["## Score: 100", "## Score: 100"]);
        assert_eq!(h.store.feedback().await.len(), 1);
    }

    #[tokio::test]
    async fn test_postback_on_complete() {
        let mut output = success_output("posted right away");
        output.postback_on_complete = true;
        let h = harness(FakeLauncher::new(ContainerScript::Reply(output)), true).await;

        h.scheduler.handle_push(push_event("a"), None).await;
        settle(&h.scheduler).await;

        assert_eq!(h.poster.messages(), vec!["posted right away"]);
        assert!(h.store.feedback().await.is_empty());
    }

    #[tokio::test]
    async fn test_request_before_completion_posts_when_done() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            FakeLauncher::gated(ContainerScript::Reply(success_output("done")), gate.clone()),
            true,
        )
        .await;

        h.scheduler.handle_push(push_event("a"), None).await;
        let requested_at = Utc::now();
        h.scheduler
            .handle_comment(comment_event("a", "student", Some("d0"), requested_at))
            .await;

        let messages = h.poster.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("in progress"));
        let comments = h.store.comments().await;
        assert_eq!(comments.len(), 1);
        assert!(comments[0].feedback_requested);

        gate.add_permits(1);
        settle(&h.scheduler).await;

        assert_eq!(h.poster.messages().last().map(String::as_str), Some("done"));
        let feedback = h.store.feedback().await;
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].timestamp, requested_at);
    }

    #[tokio::test]
    async fn test_redelivered_push_does_not_repost_feedback() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            FakeLauncher::gated(ContainerScript::Reply(success_output("done")), gate.clone()),
            true,
        )
        .await;

        h.scheduler.handle_push(push_event("a"), None).await;
        h.scheduler
            .handle_comment(comment_event("a", "student", Some("d0"), Utc::now()))
            .await;
        gate.add_permits(1);
        settle(&h.scheduler).await;
        assert_eq!(h.poster.messages().len(), 2);

        // GitHub delivers the same push again after grading finished.
        assert!(h.scheduler.handle_push(push_event("a"), None).await);
        gate.add_permits(1);
        settle(&h.scheduler).await;

        assert_eq!(h.launcher.launched().len(), 2);
        let done = h.poster.messages().iter().filter(|m| *m == "done").count();
        assert_eq!(done, 1);
        assert_eq!(h.store.feedback().await.len(), 1);
        assert!(h.store.comments().await.iter().all(|r| !r.feedback_requested));
    }

    #[tokio::test]
    async fn test_throttled_student_gets_wait_message() {
        let h = harness(replying("secret"), true).await;
        let last = Utc::now();
        h.store
            .save_feedback(&FeedbackRecord {
                person_id: "student".to_string(),
                deliv_id: "d0".to_string(),
                commit_url: commit_url("older"),
                timestamp: last,
            })
            .await
            .unwrap();

        h.scheduler.handle_push(push_event("a"), None).await;
        settle(&h.scheduler).await;

        h.scheduler
            .handle_comment(comment_event(
                "a",
                "student",
                Some("d0"),
                last + Duration::minutes(30),
            ))
            .await;

        let messages = h.poster.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("30 minutes"));
        assert!(!messages.iter().any(|m| m == "secret"));
        assert_eq!(h.store.feedback().await.len(), 1);
        assert!(!h.store.comments().await[0].feedback_requested);
    }

    #[tokio::test]
    async fn test_throttled_request_not_posted_on_completion() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            FakeLauncher::gated(ContainerScript::Reply(success_output("secret")), gate.clone()),
            true,
        )
        .await;
        let last = Utc::now();
        h.store
            .save_feedback(&FeedbackRecord {
                person_id: "student".to_string(),
                deliv_id: "d0".to_string(),
                commit_url: commit_url("older"),
                timestamp: last,
            })
            .await
            .unwrap();

        h.scheduler.handle_push(push_event("a"), None).await;
        h.scheduler
            .handle_comment(comment_event(
                "a",
                "student",
                Some("d0"),
                last + Duration::minutes(10),
            ))
            .await;

        gate.add_permits(1);
        settle(&h.scheduler).await;

        let messages = h.poster.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("50 minutes"));
    }

    #[tokio::test]
    async fn test_staff_bypasses_quota() {
        let h = harness(replying("staff view"), true).await;
        h.store
            .save_feedback(&FeedbackRecord {
                person_id: "prof".to_string(),
                deliv_id: "d0".to_string(),
                commit_url: commit_url("older"),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        h.scheduler.handle_push(push_event("a"), None).await;
        settle(&h.scheduler).await;
        h.scheduler
            .handle_comment(comment_event("a", "Prof", Some("d0"), Utc::now()))
            .await;

        assert_eq!(h.poster.messages(), vec!["staff view"]);
    }

    #[tokio::test]
    async fn test_comment_replays_stored_push() {
        let h = harness(replying("recovered"), true).await;
        h.store.save_push(&push_event("a")).await.unwrap();

        h.scheduler
            .handle_comment(comment_event("a", "student", Some("d0"), Utc::now()))
            .await;
        settle(&h.scheduler).await;

        assert_eq!(h.launcher.launched().len(), 1);
        let messages = h.poster.messages();
        assert!(messages[0].contains("queued"));
        assert_eq!(messages.last().map(String::as_str), Some("recovered"));
    }

    #[tokio::test]
    async fn test_comment_without_stored_push() {
        let h = harness(replying("never"), true).await;

        h.scheduler
            .handle_comment(comment_event("a", "student", Some("d0"), Utc::now()))
            .await;

        let messages = h.poster.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("No push has been recorded"));
        assert!(!messages[0].contains("queued"));
        assert!(h.launcher.launched().is_empty());
        assert!(h.scheduler.status().standard.is_empty());
    }

    #[tokio::test]
    async fn test_ignored_comments() {
        let h = harness(replying("ok"), true).await;

        h.scheduler
            .handle_comment(comment_event("a", BOT, Some("d0"), Utc::now()))
            .await;

        let mut unmentioned = comment_event("a", "student", Some("d0"), Utc::now());
        unmentioned.bot_mentioned = false;
        h.scheduler.handle_comment(unmentioned).await;

        assert!(h.poster.posts().is_empty());
        assert!(h.store.comments().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_unknown_deliverable() {
        let h = harness(replying("ok"), true).await;

        h.scheduler
            .handle_comment(comment_event("a", "student", None, Utc::now()))
            .await;
        h.scheduler
            .handle_comment(comment_event("a", "student", Some("d7"), Utc::now()))
            .await;

        let messages = h.poster.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("specify a deliverable"));
        assert!(messages[1].contains("`d7`"));
        assert!(h.store.comments().await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_frees_capacity() {
        let h = harness(FakeLauncher::new(ContainerScript::Silent), true).await;

        h.scheduler.handle_push(push_event("a"), Some("d1")).await;
        h.scheduler.handle_push(push_event("b"), Some("d1")).await;
        settle(&h.scheduler).await;

        for sha in ["a", "b"] {
            let result = h
                .store
                .get_result(&JobKey::new(commit_url(sha), "d1"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result.output.state, ContainerState::Timeout);
        }
        assert_eq!(h.launcher.removed(), 2);
    }
}
