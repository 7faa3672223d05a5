//! Cluster connection settings.
//!
//! One YAML file describes how to reach the cluster's login node and where
//! job scripts and logs live on it. Only `hostname`, `username` and
//! `key_location` are required; everything else is derived from the username.
//!
//! ```yaml
//! hostname: login.cluster.example.org
//! username: alice
//! key_location: ~/.ssh/id_ed25519
//! machine_prefix: dlc-
//! ```

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SlurmjobError;

const APP_DIR_NAME: &str = "slurmjob";
const SETTINGS_FILE_NAME: &str = "config.yml";
const DEFAULT_MACHINE_PREFIX: &str = "dlc-";
pub const DEFAULT_SBATCH_COMMAND: &str =
    "sbatch {{#if sbatch_args}}{{sbatch_args}} {{/if}}{{script_path}}";

#[derive(Debug, Deserialize)]
struct SettingsFile {
    hostname: String,
    username: String,
    key_location: String,
    home_folder: Option<String>,
    log_location: Option<String>,
    job_location: Option<String>,
    machine_prefix: Option<String>,
    sbatch_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SSH hostname of the login node.
    pub hostname: String,
    /// Remote user name.
    pub username: String,
    /// Local path of the SSH private key, tilde-expanded.
    pub key_location: String,
    /// Remote home folder, opened by the editor once connected.
    pub home_folder: String,
    /// Remote directory Slurm writes job output to.
    pub log_location: String,
    /// Remote directory holding job scripts.
    pub job_location: String,
    /// Compute nodes are recognized by this name prefix.
    pub machine_prefix: String,
    /// Handlebars template of the submit command.
    pub sbatch_command: String,
}

impl From<SettingsFile> for Settings {
    fn from(file: SettingsFile) -> Self {
        let home_folder = file
            .home_folder
            .unwrap_or_else(|| format!("/home/{}", file.username));
        let log_location = file
            .log_location
            .unwrap_or_else(|| format!("{}/logs", home_folder));
        let job_location = file
            .job_location
            .unwrap_or_else(|| format!("{}/jobs", home_folder));
        Self {
            hostname: file.hostname,
            key_location: shellexpand::tilde(&file.key_location).into_owned(),
            username: file.username,
            home_folder,
            log_location,
            job_location,
            machine_prefix: file
                .machine_prefix
                .unwrap_or_else(|| DEFAULT_MACHINE_PREFIX.to_string()),
            sbatch_command: file
                .sbatch_command
                .unwrap_or_else(|| DEFAULT_SBATCH_COMMAND.to_string()),
        }
    }
}

impl Settings {
    /// Parses settings from YAML text, filling in defaults.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        let file: SettingsFile = serde_yaml::from_str(text)?;
        Ok(file.into())
    }

    /// Reads the settings file at `path`.
    pub fn load(path: &Path) -> Result<Self, SlurmjobError> {
        let fd = match File::open(path) {
            Ok(fd) => fd,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SlurmjobError::SettingsNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let file: SettingsFile =
            serde_yaml::from_reader(fd).map_err(|source| SlurmjobError::SettingsParse {
                path: path.to_path_buf(),
                source,
            })?;
        let settings: Settings = file.into();
        tracing::debug!(path = %path.display(), ?settings, "loaded settings");
        Ok(settings)
    }
}

/// Where the settings file lives: the explicit override (tilde-expanded) or
/// `<user config dir>/slurmjob/config.yml`.
pub fn settings_path(path_override: Option<PathBuf>) -> Result<PathBuf, SlurmjobError> {
    match path_override {
        Some(path) => {
            let path = path.to_string_lossy().to_string();
            Ok(PathBuf::from(shellexpand::tilde(&path).as_ref()))
        }
        None => {
            let base = dirs::config_dir().ok_or(SlurmjobError::NoConfigDir)?;
            Ok(base.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
        }
    }
}
