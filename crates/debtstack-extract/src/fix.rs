//! Fix planner: targeted deltas from QA findings, bounded iteration, tier
//! escalation, and best-attempt retention.

use crate::bundle::Bundle;
use crate::core::{extract_core, CoreExtraction};
use crate::error::Result;
use crate::qa::{run_qa, QaReport, QaSources};
use debtstack_data::scale::ScaleDetection;
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use tracing::{info, warn};

/// Default cap on fix iterations before tier escalation.
pub const MAX_FIX_ITERATIONS: u32 = 3;

/// One targeted fix directive derived from QA findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixDirective {
    /// Add or correct entities missed against Exhibit 21
    AddEntities(Vec<String>),
    /// Re-ask outstanding amounts for specific instruments
    ReaskAmounts(Vec<String>),
    /// Resolve references that do not match any extracted entity
    ResolveReferences(Vec<String>),
    /// Re-parent entities flagged by the structure check
    Reparent(Vec<String>),
}

/// Derive fix directives from a QA report. Empty when the report carries
/// nothing actionable.
pub fn plan_fixes(report: &QaReport) -> Vec<FixDirective> {
    let mut directives = Vec::new();

    let missing: Vec<String> = report
        .findings_with_code("missing_entity")
        .iter()
        .chain(report.findings_with_code("missing_material_item").iter())
        .filter_map(|f| f.subject.clone())
        .collect();
    if !missing.is_empty() {
        directives.push(FixDirective::AddEntities(missing));
    }

    let amounts: Vec<String> = report
        .findings_with_code("amount_off")
        .iter()
        .chain(report.findings_with_code("scale_mismatch").iter())
        .filter_map(|f| f.subject.clone())
        .collect();
    if !amounts.is_empty() {
        directives.push(FixDirective::ReaskAmounts(amounts));
    }

    let orphans: Vec<String> = ["orphan_parent", "orphan_issuer", "orphan_guarantor"]
        .iter()
        .flat_map(|code| report.findings_with_code(code))
        .filter_map(|f| f.subject.clone())
        .collect();
    if !orphans.is_empty() {
        directives.push(FixDirective::ResolveReferences(orphans));
    }

    let structural: Vec<String> = ["ownership_cycle", "extra_root", "implausible_tiering"]
        .iter()
        .flat_map(|code| report.findings_with_code(code))
        .filter_map(|f| f.subject.clone())
        .collect();
    if !structural.is_empty() {
        directives.push(FixDirective::Reparent(structural));
    }

    directives
}

/// Render directives into the scoped sub-prompt appended to the bundle.
pub fn render_directives(directives: &[FixDirective]) -> String {
    let mut out = String::from(
        "\n=== FIX DIRECTIVES ===\n\
         A previous extraction attempt had defects. Repeat the extraction, \
         keeping everything that was correct, and specifically:\n",
    );
    for directive in directives {
        match directive {
            FixDirective::AddEntities(names) => {
                out.push_str("- Include these entities you previously missed:\n");
                for name in names {
                    out.push_str(&format!("    {}\n", name));
                }
            }
            FixDirective::ReaskAmounts(instruments) => {
                out.push_str(
                    "- Re-read the debt footnote and correct the outstanding amounts for:\n",
                );
                for instrument in instruments {
                    out.push_str(&format!("    {}\n", instrument));
                }
            }
            FixDirective::ResolveReferences(subjects) => {
                out.push_str(
                    "- These records reference entities you did not extract; extract the \
                     referenced entities or correct the references:\n",
                );
                for subject in subjects {
                    out.push_str(&format!("    {}\n", subject));
                }
            }
            FixDirective::Reparent(subjects) => {
                out.push_str("- The hierarchy around these entities is wrong; re-derive parents:\n");
                for subject in subjects {
                    out.push_str(&format!("    {}\n", subject));
                }
            }
        }
    }
    out
}

/// The accepted extraction attempt plus its QA trail.
#[derive(Debug)]
pub struct AcceptedExtraction {
    /// Best-scoring attempt
    pub extraction: CoreExtraction,
    /// QA report of that attempt
    pub report: QaReport,
    /// Attempts made (1 = first pass accepted)
    pub iteration_count: u32,
    /// Whether the escalation re-extraction ran
    pub escalated: bool,
}

/// Run extraction with the QA/fix loop.
///
/// Up to [`MAX_FIX_ITERATIONS`] targeted fix passes at the starting tier;
/// if still below threshold, one full re-extraction a tier up; finally the
/// best attempt wins. A fix pass never replaces a better earlier attempt
/// (QA monotonicity).
pub async fn extract_with_fixes(
    client: &dyn ChatClient,
    bundle: &Bundle,
    scale: &ScaleDetection,
    sources: &QaSources<'_>,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<AcceptedExtraction> {
    let mut iteration_count = 1u32;
    let mut fix_passes = 0u32;
    let mut escalated = false;

    let extraction = extract_core(client, bundle, scale, tier, usage).await?;
    let report = run_qa(client, &extraction.extraction, sources, tier, usage).await?;
    let mut best = (extraction, report);

    while !best.1.passed() && fix_passes < MAX_FIX_ITERATIONS {
        let directives = plan_fixes(&best.1);
        if directives.is_empty() {
            break;
        }
        fix_passes += 1;
        iteration_count += 1;
        info!(
            iteration = iteration_count,
            score = best.1.score,
            directives = directives.len(),
            "running fix pass"
        );

        let mut fixed_bundle = bundle.clone();
        fixed_bundle.text.push_str(&render_directives(&directives));

        let attempt = extract_core(client, &fixed_bundle, scale, best.0.tier, usage).await?;
        let attempt_report = run_qa(client, &attempt.extraction, sources, best.0.tier, usage).await?;

        if attempt_report.score >= best.1.score {
            best = (attempt, attempt_report);
        } else {
            warn!(
                attempt_score = attempt_report.score,
                kept_score = best.1.score,
                "fix pass scored lower; keeping previous attempt"
            );
        }
    }

    if !best.1.passed() {
        let higher = best.0.tier.escalate();
        if higher != best.0.tier {
            escalated = true;
            iteration_count += 1;
            info!(tier = higher.as_str(), "escalating to higher tier for full re-extraction");

            let attempt = extract_core(client, bundle, scale, higher, usage).await?;
            let attempt_report = run_qa(client, &attempt.extraction, sources, higher, usage).await?;
            if attempt_report.score >= best.1.score {
                best = (attempt, attempt_report);
            }
        }
    }

    if !best.1.passed() {
        warn!(score = best.1.score, "accepting best attempt below threshold");
    }

    Ok(AcceptedExtraction {
        extraction: best.0,
        report: best.1,
        iteration_count,
        escalated,
    })
}
