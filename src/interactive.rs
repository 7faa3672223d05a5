//! Interactive sessions: submit a job script, find the node it lands on,
//! wait for its sshd to come up and hand back an editor link.
//!
//! The run moves through the stages of [`Stage`]. From `ResolvingNode` and
//! `AwaitingPattern` an interrupt moves it to `Cancelling`, which cancels the
//! job. The SSH session is closed on every way out.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use regex::Regex;

use crate::error::SlurmjobError;
use crate::session::{tag, Remote, SshSession};
use crate::settings::Settings;
use crate::slurm::{self, quote, JobId};
use crate::tail::{spawn_tailer, TailEvent};
use crate::template::render_sbatch_command;

/// Line a job script prints once its sshd accepts connections.
pub const READY_PATTERN: &str = r"Started SSH on port (\d+)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connecting,
    Submitting,
    ResolvingNode,
    AwaitingPattern,
    Completed,
    Cancelling,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Connecting => "connecting",
            Stage::Submitting => "submitting",
            Stage::ResolvingNode => "resolving node",
            Stage::AwaitingPattern => "awaiting pattern",
            Stage::Completed => "completed",
            Stage::Cancelling => "cancelling",
            Stage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// How often the queue and the log file are polled.
#[derive(Debug, Clone)]
pub struct Polling {
    pub status_interval: Duration,
    pub tail_interval: Duration,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(5),
            tail_interval: Duration::from_secs(1),
        }
    }
}

/// Which job script to submit, with extra `sbatch` arguments.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub job_name: String,
    pub sbatch_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub job_id: JobId,
    pub node: String,
    pub port: u16,
    /// Editor deep link into the job's sshd.
    pub uri: String,
}

pub fn connection_uri(settings: &Settings, node: &str, port: u16) -> String {
    format!(
        "vscode://vscode-remote/ssh-remote+{}@{}:{}{}?ssh={}",
        settings.username, node, port, settings.home_folder, settings.key_location
    )
}

/// Extracts the first capture group of `pattern` in `line` as a port.
pub fn parse_port(pattern: &Regex, line: &str) -> Result<u16, SlurmjobError> {
    pattern
        .captures(line)
        .and_then(|captures| captures.get(1))
        .and_then(|port| port.as_str().parse().ok())
        .ok_or_else(|| SlurmjobError::InvalidPort(line.to_string()))
}

pub struct Orchestrator<'a> {
    settings: &'a Settings,
    polling: Polling,
    stage: Stage,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: &'a Settings, polling: Polling) -> Self {
        Self {
            settings,
            polling,
            stage: Stage::Connecting,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        tracing::info!(from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
    }

    /// Drives one job over an established connection and closes it.
    ///
    /// `interrupt` resolving while the job is queued or booting cancels the
    /// job and yields `SlurmjobError::Cancelled`.
    pub async fn run<F>(
        &mut self,
        remote: Arc<dyn Remote>,
        request: &RunRequest,
        interrupt: F,
    ) -> Result<SessionOutcome, SlurmjobError>
    where
        F: Future<Output = ()>,
    {
        let result = self.drive(Arc::clone(&remote), request, interrupt).await;
        match &result {
            Ok(_) => self.enter(Stage::Completed),
            Err(SlurmjobError::Cancelled(_)) => {}
            Err(_) => self.enter(Stage::Aborted),
        }
        remote.close().await;
        result
    }

    async fn drive<F>(
        &mut self,
        remote: Arc<dyn Remote>,
        request: &RunRequest,
        interrupt: F,
    ) -> Result<SessionOutcome, SlurmjobError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        let settings = self.settings;
        let polling = self.polling.clone();

        self.enter(Stage::Submitting);
        // The job script owns its log file, but not the directory.
        remote.ensure_dir(&settings.log_location).await;
        let command = render_sbatch_command(settings, &request.job_name, &request.sbatch_args)?;
        let job_id = slurm::submit(remote.as_ref(), &command).await?;
        eprintln!("{} Submitted batch job {}", tag(), job_id);

        self.enter(Stage::ResolvingNode);
        let node = tokio::select! {
            node = slurm::resolve_node(
                remote.as_ref(),
                &job_id,
                &settings.machine_prefix,
                polling.status_interval,
            ) => node?,
            _ = &mut interrupt => return self.cancel(remote.as_ref(), job_id.clone()).await,
        };
        eprintln!("{} Job {} is running on {}", tag(), job_id, node);

        self.enter(Stage::AwaitingPattern);
        let pattern = Regex::new(READY_PATTERN)?;
        let log_file = slurm::log_path(&settings.log_location, &job_id);
        let (event_tx, event_rx) = flume::unbounded();
        let tailer = spawn_tailer(
            Arc::clone(&remote),
            log_file.clone(),
            pattern.clone(),
            polling.tail_interval,
            event_tx,
        );
        let colornode = format!("[{}]", node).cyan();
        let ready_line = loop {
            tokio::select! {
                event = event_rx.recv_async() => match event {
                    Ok(TailEvent::Line(line)) => println!("{} {}", colornode, line),
                    Ok(TailEvent::Matched(line)) => break line,
                    // The tailer dropped its sender without a match.
                    Err(_) => return match tailer.await? {
                        Ok(()) => Err(SlurmjobError::TailerStopped),
                        Err(e) => Err(e),
                    },
                },
                _ = &mut interrupt => {
                    tailer.abort();
                    let _ = tailer.await;
                    return self.cancel(remote.as_ref(), job_id.clone()).await;
                }
            }
        };
        tailer.await??;

        let port = parse_port(&pattern, &ready_line)?;
        let uri = connection_uri(settings, &node, port);
        let append = format!("echo {} >> {}", quote(&uri), quote(&log_file));
        match remote.exec(&append).await {
            Ok(output) if output.has_stderr() => {
                tracing::warn!(stderr = %output.stderr.trim(), "could not record link in the job log")
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "could not record link in the job log"),
        }
        eprintln!("{} Interactive session started", tag());
        Ok(SessionOutcome {
            job_id,
            node,
            port,
            uri,
        })
    }

    /// Issues one `scancel` for the job. Its failure is reported, not returned.
    async fn cancel(
        &mut self,
        remote: &dyn Remote,
        job_id: JobId,
    ) -> Result<SessionOutcome, SlurmjobError> {
        self.enter(Stage::Cancelling);
        eprintln!("{} Interrupted, cancelling job {}", tag(), job_id);
        match slurm::cancel(remote, &job_id).await {
            Ok(()) => eprintln!("{} Job {} cancelled successfully", tag(), job_id),
            Err(e) => eprintln!("{} {}", tag(), e),
        }
        Err(SlurmjobError::Cancelled(job_id))
    }
}

/// Connects with `settings` and runs one interactive session to completion.
pub async fn run_interactive<F>(
    settings: &Settings,
    request: &RunRequest,
    polling: Polling,
    interrupt: F,
) -> Result<SessionOutcome, SlurmjobError>
where
    F: Future<Output = ()>,
{
    let mut orchestrator = Orchestrator::new(settings, polling);
    let session = match SshSession::connect(settings).await {
        Ok(session) => session,
        Err(e) => {
            orchestrator.enter(Stage::Aborted);
            return Err(e);
        }
    };
    orchestrator.run(Arc::new(session), request, interrupt).await
}
