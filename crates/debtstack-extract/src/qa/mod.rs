//! Five-check QA agent.
//!
//! Scoring: PASS = 20, WARN = 10, SKIP = 10, FAIL = 0, out of 100; an
//! extraction passes at 85. Cheap pre-checks run before every model-backed
//! check so obvious verdicts never spend tokens.

pub mod checks;

use crate::error::Result;
use crate::output::RawExtraction;
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use serde::{Deserialize, Serialize};

/// Passing score out of 100.
pub const PASS_THRESHOLD: i64 = 85;

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    /// Check passed
    Pass,
    /// Degraded but not disqualifying
    Warn,
    /// Check failed
    Fail,
    /// Source material absent; check not applicable
    Skip,
}

impl CheckStatus {
    /// Points contributed to the 100-point score.
    pub const fn points(&self) -> i64 {
        match self {
            Self::Pass => 20,
            Self::Warn | Self::Skip => 10,
            Self::Fail => 0,
        }
    }
}

/// One structured finding from a check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Machine-readable code (`missing_entity`, `amount_off`, ...)
    pub code: String,
    /// Subject (entity or instrument name), when applicable
    pub subject: Option<String>,
    /// Human-readable detail
    pub detail: String,
}

impl Finding {
    fn new(code: &str, subject: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            subject,
            detail: detail.into(),
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Status
    pub status: CheckStatus,
    /// Findings feeding the fix planner
    pub findings: Vec<Finding>,
}

/// The full QA verdict for one extraction attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaReport {
    /// Per-check results, in check order
    pub checks: Vec<CheckResult>,
    /// Total score out of 100
    pub score: i64,
}

impl QaReport {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        let score = checks.iter().map(|c| c.status.points()).sum();
        Self { checks, score }
    }

    /// Whether the extraction clears the acceptance threshold.
    pub fn passed(&self) -> bool {
        self.score >= PASS_THRESHOLD
    }

    /// Findings across all checks with a given code.
    pub fn findings_with_code(&self, code: &str) -> Vec<&Finding> {
        self.checks
            .iter()
            .flat_map(|c| c.findings.iter())
            .filter(|f| f.code == code)
            .collect()
    }
}

/// Source material the checks compare against.
#[derive(Debug, Clone, Default)]
pub struct QaSources<'a> {
    /// Exhibit 21 text, when present
    pub exhibit21: Option<&'a str>,
    /// Debt footnote text, when present
    pub debt_footnote: Option<&'a str>,
    /// Combined bundle text, for the completeness check
    pub bundle_text: &'a str,
}

/// Run all five checks against an extraction attempt.
pub async fn run_qa(
    client: &dyn ChatClient,
    extraction: &RawExtraction,
    sources: &QaSources<'_>,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<QaReport> {
    let mut results = Vec::with_capacity(5);

    results.push(checks::internal_consistency(extraction));
    results.push(checks::entity_coverage(client, extraction, sources.exhibit21, tier, usage).await?);
    results.push(checks::debt_amounts(client, extraction, sources.debt_footnote, tier, usage).await?);
    results.push(checks::completeness(client, extraction, sources.bundle_text, tier, usage).await?);
    results.push(checks::structure(client, extraction, tier, usage).await?);

    let report = QaReport::from_checks(results);
    tracing::info!(score = report.score, passed = report.passed(), "QA complete");
    Ok(report)
}
