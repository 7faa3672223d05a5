use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use slurmjob::slurm::{self, JobId};
use slurmjob::{
    run_interactive, settings_path, tag, Config, CreateArgs, JobScript, Mode, Polling, Remote,
    RunRequest, Settings, SlurmjobError, SshSession,
};

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "slurmjob=info",
        _ => "slurmjob=debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn run_session(
    settings: &Settings,
    name: String,
    sbatch_args: Vec<String>,
) -> Result<(), SlurmjobError> {
    let request = RunRequest {
        job_name: name,
        sbatch_args,
    };
    let outcome = run_interactive(settings, &request, Polling::default(), interrupted()).await?;
    println!("{}", outcome.uri);
    Ok(())
}

async fn run_cancel(settings: &Settings, job_id: String) -> Result<(), SlurmjobError> {
    let job_id = JobId::from(job_id);
    let session = SshSession::connect(settings).await?;
    let result = slurm::cancel(&session, &job_id).await;
    session.close().await;
    result?;
    eprintln!("{} Job {} cancelled successfully", tag(), job_id);
    Ok(())
}

async fn run_ls(settings: &Settings) -> Result<(), SlurmjobError> {
    let session = SshSession::connect(settings).await?;
    let result = slurm::list_jobs(&session, &settings.job_location).await;
    session.close().await;
    let names = result?;
    println!("Jobs available:");
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

async fn run_create(settings: &Settings, args: CreateArgs) -> Result<(), SlurmjobError> {
    let script = JobScript {
        job_name: args.name.clone(),
        ntasks: args.ntasks,
        gpus_per_task: args.gpus_per_task,
        cpus_per_task: args.cpus_per_task,
        mem: args.mem,
        time: args.time,
        container_mounts: args.container_mounts,
        container_image: args.container_image,
        port: args.port,
        log_location: settings.log_location.clone(),
    }
    .render()?;
    let session = SshSession::connect(settings).await?;
    let result = slurm::upload_job_script(
        &session,
        &settings.log_location,
        &settings.job_location,
        &args.name,
        &script,
    )
    .await;
    session.close().await;
    let path = result?;
    eprintln!("{} Job script saved as '{}'", tag(), path);
    Ok(())
}

async fn run(cli: Config) -> Result<(), SlurmjobError> {
    let settings = Settings::load(&settings_path(cli.config)?)?;
    match cli.mode {
        Mode::Run { name, sbatch_args } => run_session(&settings, name, sbatch_args).await,
        Mode::Cancel { job_id } => run_cancel(&settings, job_id).await,
        Mode::Ls => run_ls(&settings).await,
        Mode::Create(args) => run_create(&settings, args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Config::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported while cancelling.
        Err(SlurmjobError::Cancelled(_)) => ExitCode::from(130),
        Err(e) => {
            eprintln!("{} {}", tag(), e);
            ExitCode::FAILURE
        }
    }
}
