//! Following a remote log file for a readiness line.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time;

use crate::error::SlurmjobError;
use crate::session::Remote;
use crate::slurm::quote;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A last line that was not seen before.
    Line(String),
    /// The line matching the pattern. Always preceded by its `Line` event
    /// and always the final event.
    Matched(String),
}

/// Lines already reported during one tailing session.
#[derive(Debug, Default)]
pub struct LogCursor {
    seen: HashSet<String>,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `line`. Returns `true` only the first time a line is observed.
    pub fn observe(&mut self, line: &str) -> bool {
        if self.seen.contains(line) {
            false
        } else {
            self.seen.insert(line.to_string());
            true
        }
    }
}

/// Polls the last line of `log_file` until one matches `pattern`.
///
/// Only the current last line is looked at on each tick, so lines written and
/// overtaken between two ticks are never reported. A log file that does not
/// exist yet reads as the empty line. Returns early without error if the
/// receiving side hangs up.
pub async fn tail_until(
    remote: Arc<dyn Remote>,
    log_file: String,
    pattern: Regex,
    interval: Duration,
    events: flume::Sender<TailEvent>,
) -> Result<(), SlurmjobError> {
    let command = format!("tail -n 1 {}", quote(&log_file));
    let mut cursor = LogCursor::new();
    loop {
        let output = remote.exec(&command).await?;
        let line = output.stdout.trim();
        if cursor.observe(line) {
            tracing::debug!(log_file = %log_file, line, "new log line");
            if events.send_async(TailEvent::Line(line.to_string())).await.is_err() {
                return Ok(());
            }
            if pattern.is_match(line) {
                let _ = events.send_async(TailEvent::Matched(line.to_string())).await;
                return Ok(());
            }
        }
        time::sleep(interval).await;
    }
}

/// Runs `tail_until` on its own task.
pub fn spawn_tailer(
    remote: Arc<dyn Remote>,
    log_file: String,
    pattern: Regex,
    interval: Duration,
    events: flume::Sender<TailEvent>,
) -> JoinHandle<Result<(), SlurmjobError>> {
    tokio::spawn(tail_until(remote, log_file, pattern, interval, events))
}
