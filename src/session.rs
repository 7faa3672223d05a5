//! SSH transport to the cluster's login node.
//!
//! Everything slurmjob does on the cluster goes through one `Remote`: a
//! command executor that captures output in full, plus file upload. The
//! production implementation multiplexes all commands over one openssh
//! connection.

use std::process::Output;

use async_trait::async_trait;
use colored::*;
use openssh::{KnownHosts, Session as SSHSession, SessionBuilder, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::SlurmjobError;
use crate::settings::Settings;
use crate::slurm::quote;

/// Prefix for slurmjob's own status messages.
pub fn tag() -> ColoredString {
    "[slurmjob]".green().bold()
}

/// Captured output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command wrote anything but whitespace to stderr.
    pub fn has_stderr(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

impl From<Output> for RemoteOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

#[async_trait]
pub trait Remote: Send + Sync {
    /// Runs `command` through the remote shell and waits for it to finish.
    async fn exec(&self, command: &str) -> Result<RemoteOutput, SlurmjobError>;

    /// Writes `contents` to the remote file `path`, replacing it.
    async fn upload(&self, path: &str, contents: &[u8]) -> Result<(), SlurmjobError>;

    /// Terminates the connection. Commands issued afterwards fail.
    async fn close(&self);

    /// Best-effort `mkdir -p`. Failures are only logged.
    async fn ensure_dir(&self, dir: &str) {
        match self.exec(&format!("mkdir -p {}", quote(dir))).await {
            Ok(output) if output.has_stderr() => {
                tracing::warn!(dir, stderr = %output.stderr.trim(), "could not create remote directory")
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(dir, %error, "could not create remote directory"),
        }
    }
}

pub struct SshSession {
    hostname: String,
    colorhost: ColoredString,
    // Taken out on close. The lock also keeps commands from overlapping.
    session: Mutex<Option<SSHSession>>,
}

impl SshSession {
    /// Authenticates with the private key from `settings`. Not retried.
    pub async fn connect(settings: &Settings) -> Result<Self, SlurmjobError> {
        let colorhost = format!("[{}]", settings.hostname).bold();
        let mut builder = SessionBuilder::default();
        builder
            .user(settings.username.clone())
            .keyfile(&settings.key_location)
            .known_hosts_check(KnownHosts::Add);
        let session = match builder.connect_mux(&settings.hostname).await {
            Ok(session) => session,
            Err(e) => {
                eprintln!("{} Failed to connect to host: {}", colorhost, e);
                return Err(e.into());
            }
        };
        eprintln!("{} Connected to host.", colorhost);
        Ok(Self {
            hostname: settings.hostname.clone(),
            colorhost,
            session: Mutex::new(Some(session)),
        })
    }

    fn closed(&self) -> SlurmjobError {
        SlurmjobError::SessionClosed(self.hostname.clone())
    }
}

#[async_trait]
impl Remote for SshSession {
    async fn exec(&self, command: &str) -> Result<RemoteOutput, SlurmjobError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or_else(|| self.closed())?;
        tracing::debug!(host = %self.hostname, command, "executing remote command");
        let output = session.raw_command(command).output().await?;
        Ok(output.into())
    }

    async fn upload(&self, path: &str, contents: &[u8]) -> Result<(), SlurmjobError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or_else(|| self.closed())?;
        let command = format!("cat > {}", quote(path));
        tracing::debug!(host = %self.hostname, path, bytes = contents.len(), "uploading file");
        let mut cmd = session.raw_command(&command);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().await?;
        if let Some(mut stdin) = child.stdin().take() {
            stdin.write_all(contents).await?;
            stdin.flush().await?;
            // Dropping stdin sends EOF so `cat` can exit.
        }
        let output: RemoteOutput = child.wait_with_output().await?.into();
        if output.has_stderr() {
            return Err(SlurmjobError::RemoteCommand {
                command,
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            eprintln!("{} Terminating connection.", self.colorhost);
            if let Err(e) = session.close().await {
                eprintln!("{} Error while terminating: {}", self.colorhost, e);
            }
        }
    }
}
