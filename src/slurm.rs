//! Slurm commands issued on the login node.
//!
//! Every function here takes a `Remote` and issues exactly the scheduler
//! commands it names (`sbatch`, `squeue`, `scancel`, `ls`); parsing of their
//! output is kept in small pure functions.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use itertools::sorted;
use tokio::time;

use crate::error::SlurmjobError;
use crate::session::Remote;

/// Scheduler-assigned identifier of a submitted batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Quotes `word` for the remote POSIX shell unless it is obviously safe.
/// A leading `~` is left unquoted so the remote shell still expands it.
pub fn quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./:=,+@%~".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// `sbatch` reports "Submitted batch job <id>"; the id is the last token.
pub fn parse_job_id(stdout: &str) -> Option<JobId> {
    stdout.split_whitespace().last().map(JobId::from)
}

/// The node is the last column of `squeue -h -j <id>`. While the job is
/// pending that column holds the reason instead, hence the prefix check.
pub fn parse_node<'a>(status: &'a str, machine_prefix: &str) -> Option<&'a str> {
    status
        .split_whitespace()
        .last()
        .filter(|candidate| candidate.starts_with(machine_prefix))
}

/// Output file of a job, following `#SBATCH --output=<log_dir>/slurm-%j.out`.
pub fn log_path(log_location: &str, job_id: &JobId) -> String {
    format!("{}/slurm-{}.out", log_location.trim_end_matches('/'), job_id)
}

/// Runs a fully rendered submit command and returns the new job's id.
///
/// Anything on stderr counts as failure and is returned verbatim; no id is
/// parsed in that case.
pub async fn submit(remote: &dyn Remote, command: &str) -> Result<JobId, SlurmjobError> {
    let output = remote.exec(command).await?;
    if output.has_stderr() {
        return Err(SlurmjobError::Submission(output.stderr));
    }
    let job_id = parse_job_id(&output.stdout)
        .ok_or_else(|| SlurmjobError::UnexpectedSubmitOutput(output.stdout.trim().to_string()))?;
    tracing::info!(job_id = job_id.as_str(), "job submitted");
    Ok(job_id)
}

/// Polls the queue until the job runs on a node named with `machine_prefix`.
///
/// There is no deadline: a job may wait in the queue arbitrarily long.
/// Transport errors end the loop.
pub async fn resolve_node(
    remote: &dyn Remote,
    job_id: &JobId,
    machine_prefix: &str,
    interval: Duration,
) -> Result<String, SlurmjobError> {
    let command = format!("squeue -h -j {}", quote(job_id.as_str()));
    loop {
        let output = remote.exec(&command).await?;
        if let Some(node) = parse_node(&output.stdout, machine_prefix) {
            tracing::info!(%job_id, node, "job placed on node");
            return Ok(node.to_string());
        }
        tracing::debug!(%job_id, status = %output.stdout.trim(), "job not on a node yet");
        time::sleep(interval).await;
    }
}

pub async fn cancel(remote: &dyn Remote, job_id: &JobId) -> Result<(), SlurmjobError> {
    let output = remote
        .exec(&format!("scancel {}", quote(job_id.as_str())))
        .await?;
    if output.has_stderr() {
        return Err(SlurmjobError::CancelFailed {
            job_id: job_id.clone(),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Names of the job scripts in `job_location`, without extension, sorted.
pub async fn list_jobs(remote: &dyn Remote, job_location: &str) -> Result<Vec<String>, SlurmjobError> {
    let command = format!("ls {}", quote(job_location));
    let output = remote.exec(&command).await?;
    if output.has_stderr() {
        return Err(SlurmjobError::RemoteCommand {
            command,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(job_names(&output.stdout))
}

fn job_names(listing: &str) -> Vec<String> {
    let names = listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| Path::new(line).file_stem())
        .map(|stem| stem.to_string_lossy().into_owned());
    sorted(names).collect()
}

/// Uploads a job script as `<job_location>/<name>.sh`, creating the log and
/// job directories first. Returns the remote path.
pub async fn upload_job_script(
    remote: &dyn Remote,
    log_location: &str,
    job_location: &str,
    name: &str,
    script: &str,
) -> Result<String, SlurmjobError> {
    remote.ensure_dir(log_location).await;
    remote.ensure_dir(job_location).await;
    let path = format!("{}/{}.sh", job_location.trim_end_matches('/'), name);
    remote.upload(&path, script.as_bytes()).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_id_takes_last_token() {
        assert_eq!(
            parse_job_id("Submitted batch job 555\n"),
            Some(JobId::from("555"))
        );
        assert_eq!(parse_job_id("   \n"), None);
    }

    #[test]
    fn test_parse_node_requires_prefix() {
        assert_eq!(parse_node(" 555 job user R dlc-03\n", "dlc-"), Some("dlc-03"));
        assert_eq!(parse_node(" 555 job user PD (Priority)\n", "dlc-"), None);
        assert_eq!(parse_node(" 555 job user R othernode-09", "dlc-"), None);
        assert_eq!(parse_node("", "dlc-"), None);
    }

    #[test]
    fn test_log_path_follows_output_convention() {
        let job_id = JobId::from("42");
        assert_eq!(log_path("/home/a/logs", &job_id), "/home/a/logs/slurm-42.out");
        assert_eq!(log_path("/home/a/logs/", &job_id), "/home/a/logs/slurm-42.out");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("/home/alice/logs"), "/home/alice/logs");
        assert_eq!(quote("~/logs"), "~/logs");
        assert_eq!(quote("my logs"), "'my logs'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(
            quote("vscode://x?ssh=/k"),
            "'vscode://x?ssh=/k'"
        );
    }

    #[test]
    fn test_job_names_strip_extension_and_sort() {
        assert_eq!(
            job_names("notebook.sh\nbig-gpu.sh\n\nREADME\n"),
            vec!["README", "big-gpu", "notebook"]
        );
    }
}
