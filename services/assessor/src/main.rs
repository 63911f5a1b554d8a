use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use assessment::{assemble, ranked_modules, AssessmentReport, DatasetId, ExportFormat, JobId, JobState};
use clap::{Parser, Subcommand};
use tracing::info;

use assessor::{select_backend, AppConfig, AssessmentController, BackendMode, JobBackend, SessionState};

#[derive(Parser, Debug)]
#[command(name = "assessor")]
#[command(about = "Start, watch and export dataset quality assessments")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// `local`, or the base address of a live server. Overrides ASSESSOR_BACKEND.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Session token. Overrides ASSESSOR_TOKEN.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List ingested datasets.
    Datasets,
    /// Show one dataset.
    Dataset { id: String },
    /// Delete a dataset.
    Delete {
        dataset_id: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },
    /// Start an assessment and follow it until it finishes.
    Assess {
        dataset_id: String,
        #[arg(long, value_delimiter = ',', default_value = "quality,accessibility")]
        modules: Vec<String>,
        /// Print the job id and return without polling.
        #[arg(long)]
        no_wait: bool,
    },
    /// Check an assessment's status once.
    Status { job_id: String },
    /// Show the report of a finished assessment.
    Report { job_id: String },
    /// Download a report export.
    Export {
        job_id: String,
        #[arg(long, default_value = "pdf")]
        format: ExportFormat,
        /// Defaults to report_<job-id>.<format> in the current directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the assessments run against a dataset.
    Assessments { dataset_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut cfg = AppConfig::from_env()?;
    if let Some(raw) = args.backend.as_deref() {
        cfg.backend = BackendMode::parse(raw).context("invalid --backend")?;
    }
    if args.token.is_some() {
        cfg.token = args.token.clone();
    }

    let session = SessionState::new(cfg.token.clone());
    if !cfg.backend.is_local() && !session.is_authenticated().await {
        info!("assessor: no session token, live requests go out unauthenticated");
    }
    let backend = select_backend(&cfg, session).context("failed to set up backend")?;
    info!(backend = %backend.info().name, "assessor: ready");

    match args.cmd {
        Command::Datasets => {
            let datasets = backend.list_datasets().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&datasets)?);
            } else if datasets.is_empty() {
                println!("No datasets.");
            } else {
                for d in &datasets {
                    println!(
                        "{:>6}  {:<32} {:>10}  {}",
                        d.id,
                        d.name,
                        format_bytes(d.size_bytes),
                        d.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }
        Command::Dataset { id } => {
            let d = backend.get_dataset(&DatasetId::new(id)).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&d)?);
            } else {
                println!("Dataset {}: {}", d.id, d.name);
                println!("  size:    {}", format_bytes(d.size_bytes));
                println!("  type:    {}", d.content_type);
                println!("  created: {}", d.created_at.to_rfc3339());
            }
        }
        Command::Delete { dataset_id, force } => {
            if !force && !confirm(&format!("Delete dataset {dataset_id}?"))? {
                println!("Deletion cancelled.");
                return Ok(());
            }
            backend.delete_dataset(&DatasetId::new(dataset_id.clone())).await?;
            println!("Dataset {dataset_id} deleted.");
        }
        Command::Status { job_id } => {
            let poll = backend.poll_assessment(&JobId::new(job_id.clone())).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&poll)?);
            } else {
                let update = poll.progress.clone().map(|p| p.into_update()).unwrap_or_default();
                println!("Assessment {job_id}: {}", poll.status.as_str());
                if let Some(pct) = update.percentage {
                    println!("  progress: {pct:.1}%");
                }
                if let Some(module) = &update.current_module {
                    println!("  module:   {module}");
                }
                if let (Some(done), Some(total)) = (update.modules_completed, update.total_modules) {
                    println!("  modules:  {done}/{total}");
                }
                if let Some(err) = poll.error.as_deref().filter(|e| !e.trim().is_empty()) {
                    println!("  error:    {err}");
                }
            }
        }
        Command::Assess {
            dataset_id,
            modules,
            no_wait,
        } => assess(backend, &cfg, DatasetId::new(dataset_id), modules, no_wait, args.json).await?,
        Command::Report { job_id } => {
            let payload = backend.fetch_report(&JobId::new(job_id)).await?;
            print_report(&assemble(&payload), args.json)?;
        }
        Command::Export {
            job_id,
            format,
            output,
        } => {
            let export = backend.export_report(&JobId::new(job_id), format).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&export.file_name));
            std::fs::write(&path, &export.bytes).with_context(|| format!("write {}", path.display()))?;
            println!(
                "Saved {} ({}, {})",
                path.display(),
                export.content_type,
                format_bytes(export.bytes.len() as u64)
            );
        }
        Command::Assessments { dataset_id } => {
            let list = backend.list_assessments(&DatasetId::new(dataset_id)).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("No assessments.");
            } else {
                for a in &list {
                    let score = a.overall_score.map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:>6}  {:<12} {:>6}  {}",
                        a.id,
                        a.status.as_str(),
                        score,
                        a.created_at.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }

    Ok(())
}

async fn assess(
    backend: Arc<dyn JobBackend>,
    cfg: &AppConfig,
    dataset_id: DatasetId,
    modules: Vec<String>,
    no_wait: bool,
    json: bool,
) -> Result<()> {
    let mut ctl = AssessmentController::new(backend, cfg.poll.clone());
    let job_id = ctl.start(dataset_id, modules).await?;
    if no_wait {
        println!("{job_id}");
        return Ok(());
    }
    eprintln!("Assessment {job_id} started");

    let mut rx = ctl.subscribe();
    let progress = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let job = rx.borrow_and_update().clone();
            if job.state == JobState::InProgress {
                match &job.current_module {
                    Some(m) => eprintln!("  {:>5.1}%  {m}", job.progress),
                    None => eprintln!("  {:>5.1}%", job.progress),
                }
            }
        }
    });

    let finished = tokio::select! {
        job = ctl.wait_terminal() => Some(job),
        _ = tokio::signal::ctrl_c() => None,
    };
    progress.abort();

    let Some(job) = finished else {
        ctl.cancel();
        eprintln!("Stopped watching assessment {job_id}; it keeps running on the server.");
        return Ok(());
    };

    match job.state {
        JobState::Completed => print_report(&ctl.report()?, json),
        JobState::Failed => bail!("{}", ctl.report().err().map(|e| e.user_message()).unwrap_or_default()),
        state => bail!("assessment {job_id} stopped in state {state}"),
    }
}

fn print_report(report: &AssessmentReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match (&report.assessment_id, &report.dataset_name) {
        (Some(id), Some(name)) => println!("Assessment {id} of {name}"),
        (Some(id), None) => println!("Assessment {id}"),
        _ => println!("Assessment report"),
    }
    println!("Overall score: {}", report.overall_score);

    let ranked = ranked_modules(report);
    if !ranked.is_empty() {
        println!("\nModules:");
        for m in &ranked {
            println!("  {}. {:<16} {:>5.1}  {}", m.rank, m.label, m.score, m.band.as_str());
        }
    }
    if !report.criteria_scores.is_empty() {
        println!("\nCriteria:");
        for c in &report.criteria_scores {
            println!("  {:<20} {:>5.1}", c.name, c.score);
        }
    }
    if !report.findings.is_empty() {
        println!("\nFindings:");
        for f in &report.findings {
            println!("  - {f}");
        }
    }
    if !report.recommendations.is_empty() {
        println!("\nRecommendations:");
        for r in &report.recommendations {
            println!("  - {r}");
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;

    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush().ok();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).context("read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
