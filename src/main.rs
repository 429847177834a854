// Industry Ledger - CLI
// Paste wallet journal lines, review the batch, commit it to the job ledgers.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use industry_ledger::{
    categorize_jobs, export_missing_materials, format_duration, format_isk, missing_materials,
    needs_attention, next_status, parse_bom_auto, parse_consumed_materials, previous_status,
    remaining_runtime, sales_tax_percent, set_sales_tax_percent, BillKind, Direction, Job,
    JobMetrics, JobStatus, JobStore, NewJob, SqliteRepository, UnitPricing,
};

#[derive(Parser)]
#[command(name = "industry-ledger", version, about = "Track industry jobs and their ledgers")]
struct Cli {
    /// Database file (overrides settings and INDUSTRY_LEDGER_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database
    Init,
    /// Manage jobs
    #[command(subcommand)]
    Job(JobCommand),
    /// Manage materials
    #[command(subcommand)]
    Bom(BomCommand),
    /// Review (and optionally commit) pasted wallet journal lines
    Paste {
        /// income or expenditure
        direction: Direction,
        /// Read from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// Store the assigned rows
        #[arg(long)]
        commit: bool,
    },
    /// Per-job and portfolio metrics
    Metrics {
        /// Only this job
        job: Option<String>,
    },
    /// Materials still to buy for a job
    Missing { job: String },
    /// Sales tax percentage applied to unit prices
    #[command(subcommand)]
    Tax(TaxCommand),
}

#[derive(Subcommand)]
enum JobCommand {
    /// Create a job
    Add {
        output_item: String,
        output_quantity: u64,
        #[arg(long, default_value = "Planned")]
        status: JobStatus,
        #[arg(long, default_value_t = 0.0)]
        projected_cost: f64,
        #[arg(long, default_value_t = 0.0)]
        projected_revenue: f64,
        /// Run time in seconds
        #[arg(long)]
        runtime: Option<u64>,
    },
    /// List jobs in display order
    List {
        /// Filter by output item
        #[arg(long, default_value = "")]
        query: String,
    },
    /// Change status: a status name, `next` or `prev`
    Status { job: String, target: String },
    /// Show one job with its ledgers
    Show { job: String },
}

#[derive(Subcommand)]
enum BomCommand {
    /// Replace a job's bill of materials (or consumed materials)
    Set {
        job: String,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        consumed: bool,
    },
}

#[derive(Subcommand)]
enum TaxCommand {
    Get,
    Set { percent: f64 },
}

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "industry_ledger=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = industry_ledger::load_settings();
    let db_path = cli.db.clone().unwrap_or(settings.database_path.clone());

    let repo = SqliteRepository::open(&db_path)?;
    let mut store = JobStore::with_debounce(repo, settings.notify_debounce());

    match cli.command {
        Commands::Init => {
            println!("✓ Database ready at {}", db_path.display());
        }
        Commands::Job(command) => run_job(&mut store, command)?,
        Commands::Bom(BomCommand::Set { job, file, consumed }) => {
            store.load_jobs(None)?;
            let job_id = resolve_job(&store, &job)?;
            let text = read_input(file.as_deref())?;
            let (kind, items) = if consumed {
                (BillKind::ConsumedMaterials, parse_consumed_materials(&text))
            } else {
                (BillKind::BillOfMaterials, parse_bom_auto(&text))
            };
            if items.is_empty() {
                bail!("No material lines found");
            }
            let stored = store.replace_bill_items(&job_id, kind, &items)?;
            println!("✓ Stored {} {} lines", stored.len(), kind.as_str());
        }
        Commands::Paste {
            direction,
            file,
            commit,
        } => {
            store.load_jobs(None)?;
            let text = read_input(file.as_deref())?;
            let preview = store.preview_paste(&text, direction);

            for group in &preview.groups {
                let target = if group.is_duplicate() {
                    "duplicate".to_string()
                } else {
                    group
                        .assigned_job_id()
                        .and_then(|id| store.job(id))
                        .map(|job| job.output_item.clone())
                        .unwrap_or_else(|| "unassigned".to_string())
                };
                println!(
                    "  {:<30} {:>8} {:>20}  → {}",
                    group.item_name,
                    group.total_quantity,
                    format_isk(group.total_value),
                    target
                );
            }
            println!("\n{}", preview.summary());

            if commit {
                if !preview.can_submit() {
                    bail!("Nothing to submit");
                }
                let created = store.submit_batch(&preview)?;
                println!("✓ Stored {} transactions", created);
            }
        }
        Commands::Metrics { job } => {
            store.load_jobs(None)?;
            let tax = sales_tax_percent(store.repository())?;
            match job {
                Some(job) => {
                    let job_id = resolve_job(&store, &job)?;
                    let job = store.job(&job_id).ok_or_else(|| anyhow!("Job not found"))?;
                    print_job_metrics(job, tax);
                }
                None => {
                    let categorized = categorize_jobs(store.jobs(), "");
                    for job in &categorized.regular {
                        print_job_metrics(job, tax);
                    }
                    let totals = store.portfolio_totals();
                    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
                    println!(
                        "{} jobs  revenue {}  profit {}",
                        totals.job_count,
                        format_isk(totals.total_revenue),
                        format_isk(totals.total_profit)
                    );
                }
            }
        }
        Commands::Missing { job } => {
            store.load_jobs(None)?;
            let job_id = resolve_job(&store, &job)?;
            let job = store.job(&job_id).ok_or_else(|| anyhow!("Job not found"))?;
            let missing = missing_materials(job);
            if missing.is_empty() {
                println!("✓ All materials covered");
            } else {
                println!("{}", export_missing_materials(&missing));
            }
        }
        Commands::Tax(TaxCommand::Get) => {
            println!("{}%", sales_tax_percent(store.repository())?);
        }
        Commands::Tax(TaxCommand::Set { percent }) => {
            set_sales_tax_percent(store.repository(), percent)?;
            println!("✓ Sales tax set to {}%", percent);
        }
    }

    Ok(())
}

fn run_job(store: &mut JobStore<SqliteRepository>, command: JobCommand) -> Result<()> {
    match command {
        JobCommand::Add {
            output_item,
            output_quantity,
            status,
            projected_cost,
            projected_revenue,
            runtime,
        } => {
            let mut new_job = NewJob::new(&output_item, output_quantity, status);
            new_job.projected_cost = projected_cost;
            new_job.projected_revenue = projected_revenue;
            new_job.runtime = runtime;
            let job = store.create_job(&new_job)?;
            println!("✓ Created job {} ({} x{})", job.id, job.output_item, job.output_quantity);
        }
        JobCommand::List { query } => {
            store.load_jobs(None)?;
            let now = Utc::now();
            let categorized = categorize_jobs(store.jobs(), &query);
            for job in categorized.regular.iter().chain(&categorized.tracked) {
                let marker = if needs_attention(job, now) { "⚠" } else { " " };
                let timer = match (job.status, remaining_runtime(job, now)) {
                    (JobStatus::Running, Some(seconds)) => format_duration(seconds),
                    _ => String::new(),
                };
                println!(
                    "{} {:<36} {:<12} {:<30} {}",
                    marker, job.id, job.status, job.output_item, timer
                );
            }
        }
        JobCommand::Status { job, target } => {
            store.load_jobs(None)?;
            let job_id = resolve_job(store, &job)?;
            let current = store
                .job(&job_id)
                .map(|job| job.status)
                .ok_or_else(|| anyhow!("Job not found"))?;
            let status = match target.to_lowercase().as_str() {
                "next" => next_status(current),
                "prev" | "previous" => previous_status(current),
                other => Some(other.parse::<JobStatus>().map_err(|e| anyhow!(e))?),
            }
            .ok_or_else(|| anyhow!("{} has no {} status", current, target))?;

            let updated = store.set_status(&job_id, status, Utc::now())?;
            info!(job_id = %updated.id, status = %updated.status, "Status changed");
            println!("✓ {} is now {}", updated.output_item, updated.status);
        }
        JobCommand::Show { job } => {
            store.load_jobs(None)?;
            let job_id = resolve_job(store, &job)?;
            let job = store.job(&job_id).ok_or_else(|| anyhow!("Job not found"))?;
            println!("{}", serde_json::to_string_pretty(job)?);
        }
    }
    Ok(())
}

/// Accept a full id or a unique id prefix
fn resolve_job(store: &JobStore<SqliteRepository>, needle: &str) -> Result<String> {
    let matches: Vec<&Job> = store
        .jobs()
        .iter()
        .filter(|job| job.id.starts_with(needle))
        .collect();
    match matches.as_slice() {
        [job] => Ok(job.id.clone()),
        [] => bail!("No job matches {}", needle),
        _ => bail!("{} matches {} jobs, use a longer prefix", needle, matches.len()),
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn print_job_metrics(job: &Job, sales_tax: f64) {
    let metrics = JobMetrics::compute(job);
    println!(
        "{:<30} {:<12} spent {:>18}  income {:>18}  profit {:>18}  margin {:>6.1}%",
        job.output_item,
        job.status,
        format_isk(metrics.total_expenditure),
        format_isk(metrics.total_income),
        format_isk(metrics.profit),
        metrics.margin
    );
    if let Some(performance) = metrics.performance {
        println!("    price performance {:.1}%", performance.percentage);
    }
    if let Some(pricing) = UnitPricing::compute(job, sales_tax) {
        println!(
            "    target {}  break-even {}",
            format_isk(pricing.target),
            format_isk(pricing.break_even)
        );
    }
}
