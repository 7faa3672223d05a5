//! Command line arguments and flags.
//!
//! Cluster connection details live in the settings file (see `settings`);
//! the command line only picks what to do and where that file is.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about)]
pub struct Config {
    #[command(subcommand)]
    pub mode: Mode,

    /// Settings file to use. Defaults to `<config dir>/slurmjob/config.yml`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print diagnostics. Repeat for more detail. `RUST_LOG` takes precedence
    #[arg(long, short, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Mode {
    /// Submit a job script and wait until its interactive session is reachable
    Run {
        /// Job script name, without the `.sh` extension
        name: String,

        /// Extra arguments passed to sbatch, after `--`
        #[arg(last = true)]
        sbatch_args: Vec<String>,
    },
    /// Cancel a submitted job
    Cancel {
        /// Slurm job id
        job_id: String,
    },
    /// List the job scripts available on the cluster
    Ls,
    /// Generate an interactive job script and upload it to the cluster
    Create(CreateArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Name of the job script, without the `.sh` extension
    pub name: String,

    /// Port the job's sshd listens on
    #[arg(long, short)]
    pub port: u16,

    #[arg(long, default_value_t = 1)]
    pub ntasks: u32,

    #[arg(long, default_value_t = 0)]
    pub gpus_per_task: u32,

    #[arg(long, default_value_t = 4)]
    pub cpus_per_task: u32,

    #[arg(long, default_value = "8G")]
    pub mem: String,

    /// Wall time limit
    #[arg(long, default_value = "4:00:00")]
    pub time: String,

    /// Container mounts, e.g. `/my/volume:/volume/in_docker`
    #[arg(long)]
    pub container_mounts: Option<String>,

    /// Container image, e.g. `my-registry#name:tag`
    #[arg(long)]
    pub container_image: Option<String>,
}
