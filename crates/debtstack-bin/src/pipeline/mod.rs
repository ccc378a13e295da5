//! Per-company pipeline orchestration.
//!
//! Steps run in a fixed order with per-step status, cost and latency
//! recorded in extraction metadata. Only a fatal error aborts a company;
//! batch mode never aborts across companies. The advisory company lock is
//! held for the whole run.

pub mod steps;

use crate::config::Config;
use chrono::Duration as ChronoDuration;
use debtstack_data::edgar::{EdgarClient, Filing, FormType};
use debtstack_data::store::{GraphStore, StepStatus};
use debtstack_llm::{ChatClient, HttpChatClient, ModelTier, UsageRecord};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Pipeline steps, in execution order. `--step` selects one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StepName {
    /// Section segmentation and storage
    Documents,
    /// Core entity/debt extraction with the QA/fix loop
    Core,
    /// Financial periods and TTM
    Financials,
    /// Ownership hierarchy
    Hierarchy,
    /// Guarantee edges
    Guarantees,
    /// Collateral classification
    Collateral,
    /// Instrument-to-document links
    Link,
    /// Covenants from governing documents
    Covenants,
    /// Derived credit metrics
    Metrics,
    /// Extraction-cache refresh
    Cache,
}

impl StepName {
    /// Stable label used in metadata and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Core => "core",
            Self::Financials => "financials",
            Self::Hierarchy => "hierarchy",
            Self::Guarantees => "guarantees",
            Self::Collateral => "collateral",
            Self::Link => "link",
            Self::Covenants => "covenants",
            Self::Metrics => "metrics",
            Self::Cache => "cache",
        }
    }

    /// All steps in execution order.
    pub const ALL: [Self; 10] = [
        Self::Documents,
        Self::Core,
        Self::Financials,
        Self::Hierarchy,
        Self::Guarantees,
        Self::Collateral,
        Self::Link,
        Self::Covenants,
        Self::Metrics,
        Self::Cache,
    ];
}

/// Options for one pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Override skip rules
    pub force: bool,
    /// Restrict to a single step
    pub only_step: Option<StepName>,
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Step label
    pub step: &'static str,
    /// Terminal status
    pub status: StepStatus,
    /// Reason for `no_data`/`error`, or the skip reason
    pub reason: Option<String>,
    /// Wall-clock milliseconds
    pub duration_ms: u128,
}

/// Per-company run summary printed by the CLI.
#[derive(Debug)]
pub struct CompanySummary {
    /// Ticker
    pub ticker: String,
    /// QA score of the accepted extraction, when the core step ran
    pub qa_score: Option<i64>,
    /// Dollar cost of model usage
    pub cost_usd: f64,
    /// Total wall-clock milliseconds
    pub duration_ms: u128,
    /// Step outcomes in execution order
    pub steps: Vec<StepReport>,
    /// Whether the company run was aborted by a fatal error
    pub fatal: bool,
}

impl CompanySummary {
    /// Whether every executed step landed in a non-error terminal state.
    pub fn succeeded(&self) -> bool {
        !self.fatal
            && self
                .steps
                .iter()
                .all(|s| !matches!(s.status, StepStatus::Error))
    }
}

/// Shared handles for pipeline runs.
pub struct PipelineContext {
    /// Graph store
    pub store: GraphStore,
    /// SEC client
    pub edgar: EdgarClient,
    /// Model client
    pub client: Arc<dyn ChatClient>,
    /// Starting model tier
    pub tier: ModelTier,
    /// Lock holder id for this process
    pub holder: String,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Build the context from configuration.
    pub fn new(config: &Config) -> Result<Self, String> {
        let store = GraphStore::new(&config.database_path)
            .map_err(|e| format!("cannot open database: {}", e))?;
        let edgar = EdgarClient::new(&config.sec_user_agent)
            .map_err(|e| format!("cannot build SEC client: {}", e))?;
        let client = HttpChatClient::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.tier_policy.clone(),
        )
        .map_err(|e| format!("cannot build model client: {}", e))?;

        Ok(Self {
            store,
            edgar,
            client: Arc::new(client),
            tier: ModelTier::Fast,
            holder: format!("debtstack-{}", std::process::id()),
        })
    }
}

/// Run the full pipeline for one company.
///
/// Acquires the advisory lock (exiting cleanly when another run holds it),
/// executes the steps in order, records per-step status, cost and latency,
/// and releases the lock on every path.
pub async fn run_company(
    ctx: &PipelineContext,
    ticker: &str,
    cik: Option<&str>,
    options: &RunOptions,
) -> CompanySummary {
    let started = Instant::now();
    let mut summary = CompanySummary {
        ticker: ticker.to_uppercase(),
        qa_score: None,
        cost_usd: 0.0,
        duration_ms: 0,
        steps: Vec::new(),
        fatal: false,
    };

    // Resolve identifiers and ensure the company row exists.
    let company_id = match steps::resolve_company(ctx, ticker, cik).await {
        Ok(id) => id,
        Err(e) => {
            error!(ticker, error = %e, "cannot resolve company");
            summary.fatal = true;
            summary.duration_ms = started.elapsed().as_millis();
            return summary;
        }
    };

    if !ctx
        .store
        .try_acquire_lock(company_id, &ctx.holder, ChronoDuration::hours(2))
        .unwrap_or(false)
    {
        warn!(ticker, "another extraction run holds the lock; exiting cleanly");
        summary.steps.push(StepReport {
            step: "lock",
            status: StepStatus::Error,
            reason: Some("company locked by another run".to_string()),
            duration_ms: 0,
        });
        summary.duration_ms = started.elapsed().as_millis();
        return summary;
    }

    let mut usage = UsageRecord::default();
    let result = run_steps(ctx, company_id, options, &mut usage, &mut summary).await;

    if let Err(reason) = result {
        error!(ticker, reason, "company run aborted");
        summary.fatal = true;
    }

    // Persist usage and QA trail.
    if let Ok(mut metadata) = ctx.store.get_metadata(company_id) {
        metadata.usage = serde_json::to_value(&usage).unwrap_or(serde_json::Value::Null);
        if let Some(score) = summary.qa_score {
            metadata.qa_score = Some(score);
        }
        let _ = ctx.store.put_metadata(&metadata);
    }

    let _ = ctx.store.release_lock(company_id, &ctx.holder);
    summary.cost_usd = usage.cost_usd;
    summary.duration_ms = started.elapsed().as_millis();
    info!(
        ticker,
        duration_ms = summary.duration_ms,
        cost_usd = summary.cost_usd,
        "company run complete"
    );
    summary
}

/// Execute the step sequence. Returns `Err` only on fatal conditions.
async fn run_steps(
    ctx: &PipelineContext,
    company_id: i64,
    options: &RunOptions,
    usage: &mut UsageRecord,
    summary: &mut CompanySummary,
) -> Result<(), String> {
    // Filings are fetched once and shared by the steps that need them.
    let filings = match fetch_filings(ctx, company_id).await {
        Ok(filings) => filings,
        Err(reason) => {
            record_step(ctx, company_id, summary, "acquire", StepStatus::Error, Some(&reason), 0);
            return Err(reason);
        }
    };

    for step in StepName::ALL {
        if let Some(only) = options.only_step {
            if only != step {
                continue;
            }
        }

        let t0 = Instant::now();
        let outcome = match step {
            StepName::Documents => {
                steps::run_documents(ctx, company_id, &filings, options).await
            }
            StepName::Core => {
                steps::run_core(ctx, company_id, options, usage, &mut summary.qa_score).await
            }
            StepName::Financials => {
                steps::run_financials(ctx, company_id, &filings, options, usage).await
            }
            StepName::Hierarchy => steps::run_hierarchy(ctx, company_id, options, usage).await,
            StepName::Guarantees => steps::run_guarantees(ctx, company_id, options, usage).await,
            StepName::Collateral => steps::run_collateral(ctx, company_id, options, usage).await,
            StepName::Link => steps::run_link(ctx, company_id).await,
            StepName::Covenants => steps::run_covenants(ctx, company_id, usage).await,
            StepName::Metrics => steps::run_metrics(ctx, company_id).await,
            StepName::Cache => steps::run_cache(ctx, company_id).await,
        };
        let elapsed = t0.elapsed().as_millis();

        match outcome {
            Ok(steps::StepOutcome::Done) => {
                record_step(ctx, company_id, summary, step.as_str(), StepStatus::Success, None, elapsed);
            }
            Ok(steps::StepOutcome::Skipped(reason)) => {
                // Skips keep the prior recorded status; only the summary
                // notes the decision.
                summary.steps.push(StepReport {
                    step: step.as_str(),
                    status: StepStatus::Success,
                    reason: Some(format!("skipped: {}", reason)),
                    duration_ms: elapsed,
                });
            }
            Ok(steps::StepOutcome::NoData(reason)) => {
                record_step(
                    ctx,
                    company_id,
                    summary,
                    step.as_str(),
                    StepStatus::NoData,
                    Some(&reason),
                    elapsed,
                );
            }
            Err(e) => {
                let kind = e.kind();
                record_step(
                    ctx,
                    company_id,
                    summary,
                    step.as_str(),
                    StepStatus::Error,
                    Some(&format!("{}: {}", kind, e)),
                    elapsed,
                );
                if kind == "fatal" {
                    return Err(format!("{} failed fatally: {}", step.as_str(), e));
                }
                // Non-fatal errors: continue with the remaining steps.
            }
        }
    }

    Ok(())
}

async fn fetch_filings(ctx: &PipelineContext, company_id: i64) -> Result<Vec<Filing>, String> {
    let companies = ctx.store.list_companies().map_err(|e| e.to_string())?;
    let company = companies
        .iter()
        .find(|c| c.id == company_id)
        .ok_or_else(|| "company row missing".to_string())?;

    ctx.edgar
        .get_filings(
            &company.cik,
            &[FormType::Form10K, FormType::Form10Q, FormType::Form8K],
            None,
        )
        .await
        .map_err(|e| e.to_string())
}

fn record_step(
    ctx: &PipelineContext,
    company_id: i64,
    summary: &mut CompanySummary,
    step: &'static str,
    status: StepStatus,
    reason: Option<&str>,
    duration_ms: u128,
) {
    let _ = ctx
        .store
        .record_step_status(company_id, step, status, reason);
    summary.steps.push(StepReport {
        step,
        status,
        reason: reason.map(str::to_string),
        duration_ms,
    });
}

/// Whether a company's prior run left every step in a terminal state, for
/// `--all --resume`.
pub fn all_steps_terminal(store: &GraphStore, company_id: i64) -> bool {
    let Ok(statuses) = store.step_statuses(company_id) else {
        return false;
    };
    StepName::ALL.iter().all(|step| {
        statuses
            .get(step.as_str())
            .map(|s| matches!(s.status, StepStatus::Success | StepStatus::NoData))
            .unwrap_or(false)
    })
}

/// Print the per-company summary block.
pub fn print_summary(summary: &CompanySummary) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "{}  {}",
        summary.ticker,
        if summary.succeeded() { "OK" } else { "FAILED" }
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for step in &summary.steps {
        let status = match step.status {
            StepStatus::Success => "success",
            StepStatus::NoData => "no_data",
            StepStatus::Error => "error",
        };
        match &step.reason {
            Some(reason) => println!("  {:<12} {:<8} {:>7}ms  {}", step.step, status, step.duration_ms, reason),
            None => println!("  {:<12} {:<8} {:>7}ms", step.step, status, step.duration_ms),
        }
    }
    if let Some(score) = summary.qa_score {
        println!("  QA score: {}/100", score);
    }
    println!(
        "  Cost: ${:.4}   Duration: {:.1}s",
        summary.cost_usd,
        summary.duration_ms as f64 / 1000.0
    );
}

