use anyhow::{Context, Result};
use catalog_enricher::background_jobs::{JobController, StartMode};
use catalog_enricher::config::{AppConfig, CliConfig, FileConfig};
use catalog_enricher::enrichment::format_duration;
use catalog_enricher::job_store::{JobKind, JobRecord, JobStatus, JobStore, SqliteJobStore};
use catalog_enricher::mapping_store::SqliteMappingStore;
use catalog_enricher::metrics;
use catalog_enricher::target_store::SqliteTargetStore;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_kind(s: &str) -> Result<JobKind, String> {
    JobKind::parse(s).ok_or_else(|| format!("unknown job kind '{}' (expected author or cover)", s))
}

#[derive(Parser, Debug)]
#[clap(name = "catalog-enricher", version, about = "Resumable bulk enrichment of a book catalog")]
struct CliArgs {
    /// Directory holding jobs.db and mapping.db.
    #[clap(long, global = true, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to the SQLite database with the books table. Defaults to <db-dir>/books.db.
    #[clap(long, global = true, value_parser = parse_path)]
    pub target_db: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Mapping dump for the selected job kind.
    #[clap(long, global = true, value_parser = parse_path)]
    pub mapping_dump: Option<PathBuf>,

    /// Reference dump for the selected job kind.
    #[clap(long, global = true, value_parser = parse_path)]
    pub reference_dump: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a job and run it to the end. Ctrl-C pauses it.
    Run {
        #[clap(long, value_parser = parse_kind)]
        kind: JobKind,

        /// Ignore checkpoints left by earlier jobs of this kind.
        #[clap(long)]
        fresh: bool,

        /// Drop the existing mappings of this kind and rebuild them.
        #[clap(long, requires = "fresh")]
        rebuild_mapping: bool,

        /// Print the Prometheus metrics when the job ends.
        #[clap(long)]
        print_metrics: bool,
    },
    /// Resume a paused job and run it to the end.
    Resume {
        job_id: String,

        #[clap(long)]
        print_metrics: bool,
    },
    /// Ask a running job to pause at its next liveness check.
    Pause { job_id: String },
    /// Stop a running or paused job for good.
    Stop { job_id: String },
    /// Show one job, or the most recent ones.
    Status {
        job_id: Option<String>,

        #[clap(long, value_parser = parse_kind)]
        kind: Option<JobKind>,

        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
}

fn resolve_config(cli_args: &CliArgs, kind: Option<JobKind>) -> Result<AppConfig> {
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        target_db: cli_args.target_db.clone(),
        kind,
        mapping_dump: cli_args.mapping_dump.clone(),
        reference_dump: cli_args.reference_dump.clone(),
    };
    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    AppConfig::resolve(&cli_config, file_config)
}

fn open_job_store(config: &AppConfig) -> Result<Arc<dyn JobStore>> {
    let path = config.jobs_db_path();
    info!("Opening job store at {:?}...", path);
    Ok(Arc::new(SqliteJobStore::new(&path)?))
}

fn build_controller(config: &AppConfig, job_store: Arc<dyn JobStore>) -> Result<Arc<JobController>> {
    let mapping_path = config.mapping_db_path();
    info!("Opening mapping store at {:?}...", mapping_path);
    let mapping_store = Arc::new(SqliteMappingStore::new(&mapping_path)?);

    info!("Opening target store at {:?}...", config.target_db);
    let target_store = Arc::new(SqliteTargetStore::new(
        &config.target_db,
        &config.enrichment.author_placeholders,
    )?);

    Ok(Arc::new(JobController::new(
        job_store,
        mapping_store,
        target_store,
        config.enrichment.clone(),
        config.sources_by_kind(),
    )))
}

/// Runs a registered job to its end, drawing a progress bar from the job row.
async fn run_to_end(
    controller: Arc<JobController>,
    job_store: Arc<dyn JobStore>,
    job_id: &str,
    print_metrics: bool,
) -> Result<()> {
    let bar = ProgressBar::new(1000);
    bar.set_style(
        ProgressStyle::with_template("{elapsed_precise} [{bar:40}] {percent:>3}%  {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=> "),
    );
    let poller = tokio::spawn(poll_progress(job_store.clone(), job_id.to_string(), bar.clone()));

    let mut handle = controller.spawn(job_id);
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = tokio::signal::ctrl_c() => {
            bar.println("Interrupt received, pausing...");
            if let Err(e) = controller.pause(job_id) {
                warn!("Failed to pause job {}: {}", job_id, e);
            }
            handle.await
        }
    };
    poller.abort();
    bar.finish_and_clear();

    let result = joined.context("Job task panicked")?;
    if print_metrics {
        print!("{}", metrics::render_metrics());
    }
    let status = result?;
    if let Some(job) = job_store.get_job(job_id)? {
        print_job(&job);
    }
    if status == JobStatus::Paused {
        println!("Resume with: catalog-enricher resume {}", job_id);
    }
    Ok(())
}

async fn poll_progress(job_store: Arc<dyn JobStore>, job_id: String, bar: ProgressBar) {
    let mut ticker = tokio::time::interval(PROGRESS_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        match job_store.get_job(&job_id) {
            Ok(Some(job)) => {
                bar.set_position((job.progress * 10.0).round() as u64);
                if let Some(summary) = job.summary {
                    bar.set_message(summary);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to poll job {}: {}", job_id, e),
        }
    }
}

fn print_job(job: &JobRecord) {
    let elapsed = job
        .finished_at
        .unwrap_or(job.updated_at)
        .signed_duration_since(job.started_at)
        .to_std()
        .unwrap_or_default();
    println!(
        "{}  {:<6}  {:<9}  {:<8}  {:>5.1}%  started {}  ({})",
        job.id,
        job.kind.as_str(),
        job.status.as_str(),
        job.phase.as_str(),
        job.progress,
        job.started_at.to_rfc3339(),
        format_duration(elapsed)
    );
    if let Some(summary) = &job.summary {
        println!("    {}", summary);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    metrics::init_metrics();

    match &cli_args.command {
        Command::Run {
            kind,
            fresh,
            rebuild_mapping,
            print_metrics,
        } => {
            let config = resolve_config(&cli_args, Some(*kind))?;
            let job_store = open_job_store(&config)?;
            let controller = build_controller(&config, job_store.clone())?;
            let mode = if *fresh {
                StartMode::Fresh {
                    rebuild_mapping: *rebuild_mapping,
                }
            } else {
                StartMode::ResumeLatest
            };
            let job_id = controller.start(*kind, mode)?;
            println!("Started {} job {}", kind.as_str(), job_id);
            run_to_end(controller, job_store, &job_id, *print_metrics).await
        }
        Command::Resume {
            job_id,
            print_metrics,
        } => {
            // The job's kind decides which dump arguments apply
            let config = resolve_config(&cli_args, None)?;
            let job_store = open_job_store(&config)?;
            let kind = job_store
                .get_job(job_id)?
                .map(|job| job.kind)
                .with_context(|| format!("Job not found: {}", job_id))?;
            let config = resolve_config(&cli_args, Some(kind))?;
            let controller = build_controller(&config, job_store.clone())?;
            controller.resume(job_id)?;
            println!("Resumed {} job {}", kind.as_str(), job_id);
            run_to_end(controller, job_store, job_id, *print_metrics).await
        }
        Command::Pause { job_id } => {
            let config = resolve_config(&cli_args, None)?;
            let job_store = open_job_store(&config)?;
            build_controller(&config, job_store)?.pause(job_id)?;
            println!("Pause requested for job {}", job_id);
            Ok(())
        }
        Command::Stop { job_id } => {
            let config = resolve_config(&cli_args, None)?;
            let job_store = open_job_store(&config)?;
            build_controller(&config, job_store)?.stop(job_id)?;
            println!("Job {} stopped", job_id);
            Ok(())
        }
        Command::Status {
            job_id,
            kind,
            limit,
        } => {
            let config = resolve_config(&cli_args, None)?;
            let job_store = open_job_store(&config)?;
            match job_id {
                Some(job_id) => {
                    let job = job_store
                        .get_job(job_id)?
                        .with_context(|| format!("Job not found: {}", job_id))?;
                    print_job(&job);
                }
                None => {
                    let jobs = job_store.list_jobs(*kind, *limit)?;
                    if jobs.is_empty() {
                        println!("No jobs");
                    }
                    for job in &jobs {
                        print_job(job);
                    }
                }
            }
            Ok(())
        }
    }
}
