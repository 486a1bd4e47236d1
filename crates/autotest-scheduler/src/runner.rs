//! Runs a single grading job in a container.

use crate::rendezvous::{RendezvousError, RendezvousServer};
use autotest_core::grading::{ContainerInput, ContainerOutput, ContainerState};
use autotest_core::launcher::{ContainerHandle, ContainerLauncher, LaunchSpec};
use autotest_core::{JobId, JobKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A job that has been assigned an address and is about to run.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub job_id: JobId,
    pub key: JobKey,
    pub input: ContainerInput,
    pub address: IpAddr,
    pub started: DateTime<Utc>,
}

/// Launches a grading container, exchanges the job over the rendezvous
/// channel and always removes the container afterwards.
pub struct JobRunner {
    launcher: Arc<dyn ContainerLauncher>,
    rendezvous: Arc<RendezvousServer>,
    rendezvous_host: String,
    rendezvous_port: u16,
}

impl JobRunner {
    pub fn new(
        launcher: Arc<dyn ContainerLauncher>,
        rendezvous: Arc<RendezvousServer>,
        rendezvous_host: impl Into<String>,
        rendezvous_port: u16,
    ) -> Self {
        Self {
            launcher,
            rendezvous,
            rendezvous_host: rendezvous_host.into(),
            rendezvous_port,
        }
    }

    fn launch_spec(&self, dispatch: &Dispatch) -> LaunchSpec {
        let env = HashMap::from([
            ("AUTOTEST_HOST".to_string(), self.rendezvous_host.clone()),
            (
                "AUTOTEST_PORT".to_string(),
                self.rendezvous_port.to_string(),
            ),
            ("AUTOTEST_JOB_ID".to_string(), dispatch.job_id.to_string()),
        ]);

        LaunchSpec {
            id: dispatch.job_id,
            image: dispatch.input.container_config.image.clone(),
            address: dispatch.address,
            env,
        }
    }

    /// Run the job to a terminal output. Never fails: launch errors,
    /// timeouts and malformed replies are folded into the output state.
    pub async fn run(&self, dispatch: &Dispatch) -> ContainerOutput {
        let max_exec = Duration::from_secs(dispatch.input.container_config.max_exec_time);

        // Register before launching so the container cannot connect first.
        let pending = self.rendezvous.get_socket(dispatch.address);

        let handle = match self.launcher.launch(self.launch_spec(dispatch)).await {
            Ok(handle) => handle,
            Err(e) => {
                self.rendezvous.forget(dispatch.address);
                error!(job = %dispatch.key, error = %e, "Failed to launch grading container");
                return ContainerOutput::synthesized(
                    ContainerState::Fail,
                    format!("Failed to start the grading container: {}", e),
                );
            }
        };

        info!(
            job = %dispatch.key,
            job_id = %dispatch.job_id,
            address = %dispatch.address,
            launcher = %handle.launcher_name,
            "Grading container launched"
        );

        let exchange = async {
            let mut channel = pending.await?;
            channel.send_json(&dispatch.input).await?;
            channel.recv_json::<ContainerOutput>().await
        };

        let output = match tokio::time::timeout(max_exec, exchange).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(job = %dispatch.key, error = %e, "Grading container exchange failed");
                failure_output(e)
            }
            Err(_) => {
                self.rendezvous.forget(dispatch.address);
                warn!(
                    job = %dispatch.key,
                    seconds = max_exec.as_secs(),
                    "Grading container timed out"
                );
                ContainerOutput::synthesized(
                    ContainerState::Timeout,
                    format!(
                        "Grading did not finish within {} seconds.",
                        max_exec.as_secs()
                    ),
                )
            }
        };

        self.cleanup(&handle).await;

        info!(job = %dispatch.key, state = %output.state, "Grading finished");
        output
    }

    async fn cleanup(&self, handle: &ContainerHandle) {
        if let Err(e) = self.launcher.remove(handle).await {
            warn!(container = %handle.container_id, error = %e, "Failed to remove container");
        }
    }
}

fn failure_output(error: RendezvousError) -> ContainerOutput {
    match error {
        RendezvousError::Decode(_)
        | RendezvousError::InvalidUtf8
        | RendezvousError::TooLarge(_)
        | RendezvousError::Closed => {
            ContainerOutput::synthesized(
                ContainerState::InvalidReport,
                format!("The grading container returned an invalid report: {}", error),
            )
        }
        other => ContainerOutput::synthesized(
            ContainerState::Fail,
            format!("Grading failed: {}", other),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ContainerScript, FakeLauncher, container_input, success_output};
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn runner(launcher: Arc<FakeLauncher>) -> (JobRunner, Arc<RendezvousServer>) {
        let server = Arc::new(RendezvousServer::new("127.0.0.1:0".parse().unwrap()));
        let addr = server.start().await.unwrap();
        let runner = JobRunner::new(launcher, server.clone(), "127.0.0.1", addr.port());
        (runner, server)
    }

    fn dispatch(max_exec_time: u64) -> Dispatch {
        let mut input = container_input("https://github.com/o/r/commit/abc", "d1");
        input.container_config.max_exec_time = max_exec_time;
        Dispatch {
            job_id: JobId::new(),
            key: input.job_key(),
            input,
            address: LOCALHOST,
            started: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_successful_run() {
        let launcher = Arc::new(FakeLauncher::new(ContainerScript::Reply(success_output(
            "all good",
        ))));
        let (runner, server) = runner(launcher.clone()).await;
        let job = dispatch(5);

        let output = runner.run(&job).await;
        assert_eq!(output.state, ContainerState::Success);
        assert_eq!(output.report.feedback, "all good");

        assert_eq!(launcher.received(), vec![job.input.clone()]);
        let launched = launcher.launched();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].image, "grader:test");
        assert_eq!(launched[0].env["AUTOTEST_JOB_ID"], job.job_id.to_string());
        assert_eq!(launcher.removed(), 1);
        assert!(server.waiting().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_report() {
        let launcher = Arc::new(FakeLauncher::new(ContainerScript::Raw(
            b"{\"state\": \"SUCC".to_vec(),
        )));
        let (runner, _server) = runner(launcher.clone()).await;

        let output = runner.run(&dispatch(5)).await;
        assert_eq!(output.state, ContainerState::InvalidReport);
        assert_eq!(launcher.removed(), 1);
    }

    #[tokio::test]
    async fn test_pretty_printed_report() {
        let report = serde_json::to_vec_pretty(&success_output("multi\nline")).unwrap();
        let launcher = Arc::new(FakeLauncher::new(ContainerScript::Raw(report)));
        let (runner, _server) = runner(launcher.clone()).await;

        let output = runner.run(&dispatch(5)).await;
        assert_eq!(output.state, ContainerState::Success);
        assert_eq!(output.report.feedback, "multi\nline");
    }

    #[tokio::test]
    async fn test_timeout_when_container_never_connects() {
        let launcher = Arc::new(FakeLauncher::new(ContainerScript::Silent));
        let (runner, server) = runner(launcher.clone()).await;

        let output = runner.run(&dispatch(1)).await;
        assert_eq!(output.state, ContainerState::Timeout);
        assert!(output.report.feedback.contains("1 seconds"));
        assert_eq!(launcher.removed(), 1);
        assert!(server.waiting().is_empty());
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let launcher = Arc::new(FakeLauncher::new(ContainerScript::LaunchFailure));
        let (runner, server) = runner(launcher.clone()).await;

        let output = runner.run(&dispatch(5)).await;
        assert_eq!(output.state, ContainerState::Fail);
        assert!(output.report.feedback.contains("no capacity"));
        assert_eq!(launcher.removed(), 0);
        assert!(server.waiting().is_empty());
    }
}
