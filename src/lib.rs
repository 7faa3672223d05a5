//! Slurmjob: Interactive Slurm Sessions over SSH.

// Command line arguments.
pub mod config;
// Cluster connection settings.
pub mod settings;
// SSH session wrapper.
pub mod session;
// Scheduler commands and their output.
pub mod slurm;
// Following remote log files.
pub mod tail;
// Submit command and job script templates.
pub mod template;
// The submit, resolve, wait workflow.
pub mod interactive;
// Error handling.
pub mod error;

pub use config::{Config, CreateArgs, Mode};
pub use error::SlurmjobError;
pub use interactive::{
    connection_uri, run_interactive, Orchestrator, Polling, RunRequest, SessionOutcome, Stage,
    READY_PATTERN,
};
pub use session::{tag, Remote, RemoteOutput, SshSession};
pub use settings::{settings_path, Settings};
pub use slurm::JobId;
pub use tail::{spawn_tailer, LogCursor, TailEvent};
pub use template::{render_sbatch_command, JobScript};
