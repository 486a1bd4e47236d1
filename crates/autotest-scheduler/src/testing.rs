//! Test doubles shared by the scheduler tests.

use async_trait::async_trait;
use autotest_config::{CoursePortal, parse_course};
use autotest_core::event::{CommentEvent, PushEvent};
use autotest_core::grading::{ContainerInput, ContainerOutput, ContainerState, GradeReport};
use autotest_core::launcher::{ContainerHandle, ContainerLauncher, LaunchSpec};
use autotest_core::portal::DeliverableConfig;
use autotest_core::postback::CommentPoster;
use autotest_core::{Error, Result};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpSocket;
use tokio::sync::Semaphore;

pub const BOT: &str = "autobot";

pub fn commit_url(sha: &str) -> String {
    format!("https://github.com/cs310/project_team1/commit/{}", sha)
}

pub fn push_event(sha: &str) -> PushEvent {
    PushEvent {
        repo_id: "project_team1".to_string(),
        branch: "main".to_string(),
        clone_url: "https://github.com/cs310/project_team1.git".to_string(),
        commit_sha: sha.to_string(),
        commit_url: commit_url(sha),
        project_url: "https://github.com/cs310/project_team1".to_string(),
        postback_url: format!(
            "https://api.github.com/repos/cs310/project_team1/commits/{}/comments",
            sha
        ),
        timestamp: Utc::now(),
    }
}

pub fn comment_event(
    sha: &str,
    person: &str,
    deliv: Option<&str>,
    timestamp: DateTime<Utc>,
) -> CommentEvent {
    CommentEvent {
        person_id: person.to_string(),
        repo_id: "project_team1".to_string(),
        deliv_id: deliv.map(String::from),
        commit_sha: sha.to_string(),
        commit_url: commit_url(sha),
        bot_mentioned: true,
        postback_url: format!(
            "https://api.github.com/repos/cs310/project_team1/commits/{}/comments",
            sha
        ),
        timestamp,
    }
}

pub fn container_input(commit: &str, deliv: &str) -> ContainerInput {
    let mut target = push_event("abc123");
    target.commit_url = commit.to_string();
    ContainerInput {
        deliv_id: deliv.to_string(),
        target,
        container_config: DeliverableConfig {
            image: "grader:test".to_string(),
            student_delay: 3600,
            max_exec_time: 5,
        },
    }
}

pub fn success_output(feedback: &str) -> ContainerOutput {
    ContainerOutput {
        timestamp: Utc::now(),
        report: GradeReport {
            score_overall: 100.0,
            pass_names: vec!["all".to_string()],
            feedback: feedback.to_string(),
            ..Default::default()
        },
        postback_on_complete: false,
        state: ContainerState::Success,
        custom: serde_json::Value::Null,
    }
}

/// Course with d0 (1h delay), d1 (1h delay, 1s max run time) and one staff member.
pub fn course_portal(with_default: bool) -> CoursePortal {
    let default = if with_default {
        "default-deliverable \"d0\""
    } else {
        ""
    };
    let kdl = format!(
        r#"
        course "cs310"
        {}
        staff "prof"
        deliverable "d0" {{
            image "grader:d0"
            student-delay 3600
            max-exec-time 5
        }}
        deliverable "d1" {{
            image "grader:d1"
            student-delay 3600
            max-exec-time 1
        }}
        "#,
        default
    );
    CoursePortal::new(parse_course(&kdl).unwrap())
}

/// Poster that records every message it is asked to post.
#[derive(Debug, Default)]
pub struct RecordingPoster {
    posts: Mutex<Vec<(String, String)>>,
}

impl RecordingPoster {
    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.posts().into_iter().map(|(_, m)| m).collect()
    }
}

#[async_trait]
impl CommentPoster for RecordingPoster {
    async fn post(&self, commit_url: &str, message: &str) -> bool {
        if commit_url.is_empty() || message.is_empty() {
            return false;
        }
        self.posts
            .lock()
            .unwrap()
            .push((commit_url.to_string(), message.to_string()));
        true
    }
}

/// What a fake grading container does once launched.
#[derive(Debug, Clone)]
pub enum ContainerScript {
    /// Connect, read the job, reply with this output.
    Reply(ContainerOutput),
    /// Connect, read the job, reply with raw bytes.
    Raw(Vec<u8>),
    /// Never connect.
    Silent,
    /// Refuse to launch.
    LaunchFailure,
}

/// Launcher whose "containers" are tasks connecting from the reserved address.
pub struct FakeLauncher {
    script: ContainerScript,
    /// Containers wait for a permit before replying.
    gate: Option<Arc<Semaphore>>,
    launched: Mutex<Vec<LaunchSpec>>,
    received: Arc<Mutex<Vec<ContainerInput>>>,
    removed: Mutex<usize>,
}

impl FakeLauncher {
    pub fn new(script: ContainerScript) -> Self {
        Self {
            script,
            gate: None,
            launched: Mutex::new(Vec::new()),
            received: Arc::new(Mutex::new(Vec::new())),
            removed: Mutex::new(0),
        }
    }

    pub fn gated(script: ContainerScript, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<ContainerInput> {
        self.received.lock().unwrap().clone()
    }

    pub fn removed(&self) -> usize {
        *self.removed.lock().unwrap()
    }
}

#[async_trait]
impl ContainerLauncher for FakeLauncher {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<ContainerHandle> {
        if matches!(self.script, ContainerScript::LaunchFailure) {
            return Err(Error::LaunchFailed("no capacity".to_string()));
        }
        self.launched.lock().unwrap().push(spec.clone());

        let reply = match &self.script {
            ContainerScript::Reply(output) => {
                let mut bytes = serde_json::to_vec(output).unwrap();
                bytes.push(b'\n');
                Some(bytes)
            }
            ContainerScript::Raw(bytes) => Some(bytes.clone()),
            ContainerScript::Silent | ContainerScript::LaunchFailure => None,
        };

        if let Some(reply) = reply {
            let host = spec.env["AUTOTEST_HOST"].clone();
            let port: u16 = spec.env["AUTOTEST_PORT"].parse().unwrap();
            let server: SocketAddr = format!("{}:{}", host, port).parse().unwrap();
            let gate = self.gate.clone();
            let received = self.received.clone();
            let address = spec.address;

            tokio::spawn(async move {
                let socket = TcpSocket::new_v4().unwrap();
                socket.bind(SocketAddr::new(address, 0)).unwrap();
                let stream = socket.connect(server).await.unwrap();
                let mut stream = BufReader::new(stream);

                let mut line = String::new();
                stream.read_line(&mut line).await.unwrap();
                received
                    .lock()
                    .unwrap()
                    .push(serde_json::from_str(&line).unwrap());

                if let Some(gate) = gate {
                    gate.acquire().await.unwrap().forget();
                }

                let _ = stream.get_mut().write_all(&reply).await;
                let _ = stream.get_mut().shutdown().await;
            });
        }

        Ok(ContainerHandle {
            id: spec.id,
            container_id: format!("fake-{}", spec.id),
            launcher_name: self.name().to_string(),
        })
    }

    async fn remove(&self, _handle: &ContainerHandle) -> Result<()> {
        *self.removed.lock().unwrap() += 1;
        Ok(())
    }
}
