//! DebtStack CLI.
//!
//! Exit codes: 0 success, 1 transient error (retry may help), 2 permanent
//! data error, 3 usage error.

mod config;
mod maintenance;
mod pipeline;
mod qc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use config::Config;
use debtstack_llm::UsageRecord;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::{PipelineContext, RunOptions, StepName};
use std::process;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_TRANSIENT: i32 = 1;
const EXIT_DATA: i32 = 2;
const EXIT_USAGE: i32 = 3;

#[derive(Parser)]
#[command(name = "debtstack")]
#[command(about = "SEC filing extraction into a structured credit graph", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extraction pipeline
    Extract {
        /// Ticker symbol
        #[arg(long, conflicts_with = "all")]
        ticker: Option<String>,

        /// SEC filer identifier (resolved from the ticker when omitted)
        #[arg(long, requires = "ticker")]
        cik: Option<String>,

        /// Process every company in the database
        #[arg(long)]
        all: bool,

        /// With --all, skip companies whose steps are all terminal
        #[arg(long, requires = "all")]
        resume: bool,

        /// Ignore skip rules
        #[arg(long)]
        force: bool,

        /// Run a single step
        #[arg(long, value_enum)]
        step: Option<StepName>,
    },

    /// Audit the whole database against the data invariants
    Qc,

    /// Fill missing outstanding amounts from stored sections
    BackfillAmounts {
        /// Restrict to one ticker
        #[arg(long, conflicts_with = "all_missing")]
        ticker: Option<String>,

        /// Every company with missing amounts
        #[arg(long)]
        all_missing: bool,
    },

    /// Deactivate matured instruments, dedupe, clear aggregate amounts
    FixExcess {
        /// Run the full sweep across all companies
        #[arg(long)]
        fix_all_excess: bool,

        /// Report without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EXIT_USAGE;
        }
    };

    match cli.command {
        Commands::Extract {
            ticker,
            cik,
            all,
            resume,
            force,
            step,
        } => run_extract(&config, ticker, cik, all, resume, force, step).await,
        Commands::Qc => run_qc(&config),
        Commands::BackfillAmounts { ticker, all_missing } => {
            run_backfill(&config, ticker, all_missing).await
        }
        Commands::FixExcess {
            fix_all_excess,
            dry_run,
        } => run_fix_excess(&config, fix_all_excess, dry_run),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_extract(
    config: &Config,
    ticker: Option<String>,
    cik: Option<String>,
    all: bool,
    resume: bool,
    force: bool,
    step: Option<StepName>,
) -> i32 {
    let ctx = match PipelineContext::new(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_DATA;
        }
    };
    let options = RunOptions {
        force,
        only_step: step,
    };

    if let Some(ticker) = ticker {
        let summary = pipeline::run_company(&ctx, &ticker, cik.as_deref(), &options).await;
        pipeline::print_summary(&summary);
        if summary.succeeded() {
            return EXIT_OK;
        }
        // A lock conflict or network trouble is retryable; everything else
        // is a data problem.
        let transient = summary.steps.iter().any(|s| {
            s.reason
                .as_deref()
                .is_some_and(|r| r.contains("locked") || r.contains("transient_network"))
        });
        return if transient { EXIT_TRANSIENT } else { EXIT_DATA };
    }

    if !all {
        eprintln!("Nothing to do: pass --ticker or --all");
        return EXIT_USAGE;
    }

    let companies = match ctx.store.list_companies() {
        Ok(companies) => companies,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_DATA;
        }
    };
    if companies.is_empty() {
        eprintln!("No companies in the database; run extract --ticker first");
        return EXIT_USAGE;
    }

    let pb = ProgressBar::new(companies.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    // Resume filtering happens up front against the shared store.
    let pending: Vec<_> = companies
        .iter()
        .filter(|company| {
            if resume && pipeline::all_steps_terminal(&ctx.store, company.id) {
                pb.inc(1);
                false
            } else {
                true
            }
        })
        .collect();

    // K companies in parallel, each task with its own context (own store
    // connection); the advisory lock keeps merges isolated.
    let concurrency = config.max_concurrent_companies.max(1);
    let summaries: Vec<_> = stream::iter(pending.iter().map(|company| {
        let options = options.clone();
        let pb = pb.clone();
        async move {
            let task_ctx = match PipelineContext::new(config) {
                Ok(task_ctx) => task_ctx,
                Err(e) => {
                    eprintln!("{}: {}", company.ticker, e);
                    pb.inc(1);
                    return None;
                }
            };
            pb.set_message(company.ticker.clone());
            let summary = pipeline::run_company(
                &task_ctx,
                &company.ticker,
                Some(&company.cik),
                &options,
            )
            .await;
            pb.inc(1);
            Some(summary)
        }
    }))
    .buffer_unordered(concurrency)
    .collect()
    .await;

    let mut successes = 0usize;
    for summary in summaries.iter().flatten() {
        pipeline::print_summary(summary);
        if summary.succeeded() {
            successes += 1;
        }
    }
    pb.finish_with_message(format!("{}/{} companies succeeded", successes, companies.len()));

    // Batch mode only fails when nothing succeeded at all.
    if successes == 0 && !pending.is_empty() {
        return EXIT_TRANSIENT;
    }
    EXIT_OK
}

fn run_qc(config: &Config) -> i32 {
    let store = match debtstack_data::store::GraphStore::new(&config.database_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_DATA;
        }
    };

    let findings = match qc::run_audit(&store) {
        Ok(findings) => findings,
        Err(e) => {
            error!(error = %e, "QC audit failed");
            return EXIT_DATA;
        }
    };

    if findings.is_empty() {
        println!("QC clean: no findings");
        return EXIT_OK;
    }

    println!("QC findings ({}):", findings.len());
    for finding in &findings {
        println!(
            "  [{}] {} {}: {}",
            finding.severity, finding.ticker, finding.invariant, finding.detail
        );
    }

    if qc::has_blocking_findings(&findings) {
        EXIT_DATA
    } else {
        EXIT_OK
    }
}

async fn run_backfill(config: &Config, ticker: Option<String>, all_missing: bool) -> i32 {
    if ticker.is_none() && !all_missing {
        eprintln!("Nothing to do: pass --ticker or --all-missing");
        return EXIT_USAGE;
    }

    let ctx = match PipelineContext::new(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_DATA;
        }
    };

    let companies = match ctx.store.list_companies() {
        Ok(companies) => companies,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_DATA;
        }
    };
    let selected: Vec<_> = companies
        .into_iter()
        .filter(|c| ticker.as_deref().map_or(true, |t| c.ticker.eq_ignore_ascii_case(t)))
        .collect();

    if selected.is_empty() {
        eprintln!("No matching companies");
        return EXIT_USAGE;
    }

    let mut usage = UsageRecord::default();
    let mut total_filled = 0usize;
    for company in &selected {
        match maintenance::backfill_amounts(&ctx, company.id, &mut usage).await {
            Ok(filled) => {
                if filled > 0 {
                    println!("{}: filled {} amounts", company.ticker, filled);
                }
                total_filled += filled;
            }
            Err(e) => {
                eprintln!("{}: backfill failed: {}", company.ticker, e);
            }
        }
    }
    println!(
        "Backfilled {} amounts across {} companies (cost ${:.4})",
        total_filled,
        selected.len(),
        usage.cost_usd
    );
    EXIT_OK
}

fn run_fix_excess(config: &Config, fix_all_excess: bool, dry_run: bool) -> i32 {
    if !fix_all_excess {
        eprintln!("Nothing to do: pass --fix-all-excess");
        return EXIT_USAGE;
    }

    let store = match debtstack_data::store::GraphStore::new(&config.database_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_DATA;
        }
    };
    let companies = match store.list_companies() {
        Ok(companies) => companies,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_DATA;
        }
    };

    let today = Utc::now().date_naive();
    let mut total = 0usize;
    for company in &companies {
        match maintenance::fix_excess(&store, company.id, today, dry_run) {
            Ok(report) => {
                if report.total() > 0 {
                    println!(
                        "{}: {} matured, {} duplicates, {} amounts cleared{}",
                        company.ticker,
                        report.matured.len(),
                        report.duplicates.len(),
                        report.amounts_cleared.len(),
                        if dry_run { " (dry run)" } else { "" }
                    );
                }
                total += report.total();

                // Metrics go stale the moment instruments deactivate.
                if !dry_run && (!report.matured.is_empty() || !report.duplicates.is_empty()) {
                    if let Err(e) = debtstack_graph::compute_metrics(&store, company.id, today) {
                        eprintln!("{}: metric recomputation failed: {}", company.ticker, e);
                    }
                }
            }
            Err(e) => {
                eprintln!("{}: sweep failed: {}", company.ticker, e);
            }
        }
    }
    println!("Sweep complete: {} actions{}", total, if dry_run { " (dry run)" } else { "" });
    EXIT_OK
}
