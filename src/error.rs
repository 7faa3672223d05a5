use std::path::PathBuf;

use thiserror::Error;

use crate::slurm::JobId;

#[derive(Error, Debug)]
pub enum SlurmjobError {
    #[error("Failed to connect SSH session or execute SSH command: {0}")]
    SshError(#[from] openssh::Error),
    #[error("SSH session to {0} is already closed")]
    SessionClosed(String),
    #[error("Local I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Settings not found at {}, create it first (see `slurmjob --help`)", .0.display())]
    SettingsNotFound(PathBuf),
    #[error("Failed to parse settings file {}: {source}", path.display())]
    SettingsParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Could not determine the user configuration directory")]
    NoConfigDir,
    #[error("Failed to render template: {0}")]
    TemplateError(#[from] handlebars::RenderError),
    #[error("Invalid log pattern: {0}")]
    PatternError(#[from] regex::Error),
    #[error("Remote command '{command}' failed: {stderr}")]
    RemoteCommand { command: String, stderr: String },
    #[error("Job submission failed: {0}")]
    Submission(String),
    #[error("Could not find a job id in sbatch output '{0}'")]
    UnexpectedSubmitOutput(String),
    #[error("Failed to cancel job {job_id}: {stderr}")]
    CancelFailed { job_id: JobId, stderr: String },
    #[error("Job {0} cancelled")]
    Cancelled(JobId),
    #[error("Log line '{0}' does not carry a valid port")]
    InvalidPort(String),
    #[error("Log tailer stopped before the session was ready")]
    TailerStopped,
    #[error("Log tailer task failed: {0}")]
    TailerJoin(#[from] tokio::task::JoinError),
}
