//! `hoardctl` drives the Hoard catalog engine from the command line.
//!
//! Each invocation opens the catalog, queues one job on a [`FileWorker`],
//! waits for it and prints a short summary. Paths given relative are taken
//! relative to the media root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hoard_config::{ConfigLoad, HoardConfig, loader};
use hoard_core::hoard_model::{FileTask, JobId, TaskType};
use hoard_core::{EngineContext, FileWorker, JobReport, database};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hoardctl", about = "Reconcile and reorganize a Hoard media library")]
struct Cli {
    /// Override the configured media root.
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,

    /// Override the configured catalog database URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Seconds to wait for the job before giving up.
    #[arg(long, global = true, default_value_t = 3600)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the catalog in line with the filesystem. No paths means the
    /// whole media root.
    Refresh { paths: Vec<PathBuf> },
    /// Count files under the given paths without touching the catalog.
    Count {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Move files or directories into DESTINATION.
    Move {
        destination: PathBuf,
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Rename a file (with its sidecars) or a directory in place.
    Rename { path: PathBuf, new_name: String },
    /// Attach TAG to every cataloged group under PATHS.
    Tag {
        tag: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show catalog totals for the configured media root.
    Status,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write a starter configuration file.
    Init {
        #[arg(long, default_value = "hoard.toml")]
        path: PathBuf,
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = dotenvy::dotenv().is_ok();
    let cli = Cli::parse();

    if let Command::Config {
        action: ConfigAction::Init { path, force },
    } = &cli.command
    {
        return write_starter_config(path, *force);
    }

    let ConfigLoad { mut config, source } =
        loader::load_from_env().context("failed to load configuration")?;
    apply_overrides(&mut config, &cli)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if env_loaded {
        info!("loaded .env file");
    }
    info!(%source, root = %config.engine.media_root.display(), "configuration resolved");

    if let Command::Config {
        action: ConfigAction::Show,
    } = &cli.command
    {
        print!("{}", loader::to_toml(&config)?);
        return Ok(());
    }

    let pool = database::open(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open catalog at {}", config.database.url))?;

    if let Command::Status = cli.command {
        let stats = database::stats(&pool).await?;
        println!("media root:  {}", config.engine.media_root.display());
        println!("file groups: {}", stats.file_groups);
        println!("unindexed:   {}", stats.unindexed);
        println!("directories: {}", stats.directories);
        return Ok(());
    }

    let worker = Arc::new(FileWorker::new(EngineContext::new(pool, config.engine)));

    let job = queue(&worker, cli.command)?;
    info!(%job, "job queued");

    let interrupt = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                worker.cancel_current();
            }
        })
    };

    let result = worker
        .wait_for_job(job, Duration::from_secs(cli.timeout))
        .await;
    interrupt.abort();

    let report = result.with_context(|| match worker.job_error(job) {
        Some(message) => format!("job {job} failed: {message}"),
        None => format!("job {job} did not complete"),
    })?;
    println!("{}", describe(&report));
    Ok(())
}

fn apply_overrides(config: &mut HoardConfig, cli: &Cli) -> anyhow::Result<()> {
    if let Some(root) = &cli.media_root {
        config.engine.media_root = std::path::absolute(root)
            .with_context(|| format!("cannot resolve media root {}", root.display()))?;
    }
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    hoard_config::validate(config).context("invalid command-line overrides")?;
    Ok(())
}

fn queue(worker: &FileWorker, command: Command) -> anyhow::Result<JobId> {
    let job = match command {
        Command::Refresh { paths } => worker.queue_refresh(paths)?,
        Command::Count { paths } => worker.submit(FileTask::new(TaskType::Count, paths))?,
        Command::Move {
            destination,
            sources,
        } => worker.queue_move(destination, sources)?,
        Command::Rename { path, new_name } => worker.queue_rename(path, new_name)?,
        Command::Tag { tag, paths } => worker.queue_tag(tag, paths)?,
        Command::Status | Command::Config { .. } => {
            anyhow::bail!("this command does not queue a job")
        }
    };
    Ok(job)
}

fn describe(report: &JobReport) -> String {
    match report {
        JobReport::Counted(total) => format!("counted {total} files"),
        JobReport::Refreshed(summary) => format!(
            "refreshed {} files: {} new, {} modified, {} deleted, {} unchanged; {} groups indexed",
            summary.files_seen,
            summary.new,
            summary.modified,
            summary.deleted,
            summary.unchanged,
            summary.pipeline.indexed,
        ),
        JobReport::Moved(outcome) => format!(
            "moved {} files ({} groups) in {} chunks",
            outcome.moved_files, outcome.relocated_groups, outcome.chunks
        ),
        JobReport::Tagged(summary) => format!(
            "tagged {} groups ({} newly)",
            summary.groups, summary.newly_tagged
        ),
    }
}

fn write_starter_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (pass --force to replace it)", path.display());
    }
    let rendered = loader::to_toml(&HoardConfig::default())?;
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_requires_at_least_one_source() {
        let err = Cli::try_parse_from(["hoardctl", "move", "/dest"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn refresh_without_paths_means_everything() {
        let cli = Cli::try_parse_from(["hoardctl", "refresh"]).unwrap();
        assert!(matches!(cli.command, Command::Refresh { paths } if paths.is_empty()));
    }

    #[test]
    fn global_overrides_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "hoardctl",
            "tag",
            "favourites",
            "films",
            "--media-root",
            "/srv/media",
            "--timeout",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.media_root, Some(PathBuf::from("/srv/media")));
        assert_eq!(cli.timeout, 5);
        assert!(matches!(cli.command, Command::Tag { tag, .. } if tag == "favourites"));
    }

    #[test]
    fn overrides_are_validated() {
        let mut config = HoardConfig::default();
        let cli = Cli::try_parse_from(["hoardctl", "--database-url", " ", "refresh"]).unwrap();
        let err = apply_overrides(&mut config, &cli).unwrap_err();
        assert!(format!("{err:#}").contains("database url"));
    }
}
