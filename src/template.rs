//! Handlebars templates for the submit command and generated job scripts.

use std::collections::HashMap;

use handlebars::Handlebars;
use itertools::Itertools;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::SlurmjobError;
use crate::settings::Settings;
use crate::slurm::quote;

const JOB_SCRIPT_TEMPLATE: &str = r#"#!/bin/bash
#SBATCH --job-name={{job_name}}
#SBATCH --ntasks={{ntasks}}
#SBATCH --gpus-per-task={{gpus_per_task}}
#SBATCH --cpus-per-task={{cpus_per_task}}
#SBATCH --mem={{mem}}
#SBATCH --time={{time}}
{{#if container_mounts}}#SBATCH --container-mounts={{container_mounts}}
{{/if}}{{#if container_image}}#SBATCH --container-image="{{container_image}}"
{{/if}}#SBATCH --output={{log_location}}/slurm-%j.out
echo "Started SSH on port {{port}}"
/usr/sbin/sshd -D -p {{port}}
"#;

/// Registry shared by all templates. Output is shell text, so nothing is
/// HTML-escaped, and unknown placeholders are errors.
fn registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry.set_strict_mode(true);
    handlebars_misc_helpers::register(&mut registry);
    registry
}

/// Placeholders available to `sbatch_command`.
const SBATCH_PLACEHOLDERS: &[&str] = &[
    "job_name",
    "job_location",
    "log_location",
    "home_folder",
    "username",
    "sbatch_args",
    "script_path",
];

/// Older settings files spell placeholders with single braces, as in
/// `sbatch /home/alice/jobs/{job_name}.sh`. Known names are rewritten to
/// handlebars form; other braced text is left as is.
fn upgrade_placeholders(template: &str) -> Result<String, SlurmjobError> {
    let braced = Regex::new(r"\{+\w+\}+")?;
    let upgraded = braced.replace_all(template, |caps: &Captures| {
        let text = &caps[0];
        match text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            Some(name) if SBATCH_PLACEHOLDERS.contains(&name) => format!("{{{{{}}}}}", name),
            _ => text.to_string(),
        }
    });
    Ok(upgraded.into_owned())
}

/// Renders `settings.sbatch_command` for `job_name`.
///
/// Placeholders: `job_name`, `job_location`, `log_location`, `home_folder`,
/// `username`, `sbatch_args` (the extra arguments, shell-quoted) and
/// `script_path` (`<job_location>/<job_name>.sh`, shell-quoted).
pub fn render_sbatch_command(
    settings: &Settings,
    job_name: &str,
    sbatch_args: &[String],
) -> Result<String, SlurmjobError> {
    if !sbatch_args.is_empty() && !settings.sbatch_command.contains("sbatch_args") {
        tracing::warn!(
            template = %settings.sbatch_command,
            "sbatch_command has no {{{{sbatch_args}}}} placeholder, extra arguments are ignored"
        );
    }
    let template = upgrade_placeholders(&settings.sbatch_command)?;
    let script_path = format!("{}/{}.sh", settings.job_location.trim_end_matches('/'), job_name);
    let mut params = HashMap::new();
    params.insert("script_path", quote(&script_path));
    params.insert("job_name", job_name.to_string());
    params.insert("job_location", settings.job_location.clone());
    params.insert("log_location", settings.log_location.clone());
    params.insert("home_folder", settings.home_folder.clone());
    params.insert("username", settings.username.clone());
    params.insert("sbatch_args", sbatch_args.iter().map(|arg| quote(arg)).join(" "));
    let command = registry().render_template(&template, &params)?;
    Ok(command.trim().to_string())
}

/// Resources and container of an interactive job script.
#[derive(Debug, Clone, Serialize)]
pub struct JobScript {
    pub job_name: String,
    pub ntasks: u32,
    pub gpus_per_task: u32,
    pub cpus_per_task: u32,
    pub mem: String,
    pub time: String,
    pub container_mounts: Option<String>,
    pub container_image: Option<String>,
    /// Port the job's sshd listens on.
    pub port: u16,
    pub log_location: String,
}

impl JobScript {
    /// Renders the batch script. Its output ends up in the log file the
    /// session orchestrator watches, announcing the port once sshd starts.
    pub fn render(&self) -> Result<String, SlurmjobError> {
        Ok(registry().render_template(JOB_SCRIPT_TEMPLATE, self)?)
    }
}
