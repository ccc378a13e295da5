//! Step implementations for the per-company pipeline.

use crate::pipeline::{PipelineContext, RunOptions};
use chrono::Utc;
use debtstack_data::edgar::{ExhibitCode, Filing, FormType};
use debtstack_data::normalize;
use debtstack_data::scale::{detect_scale, ScaleDetection};
use debtstack_data::sections::{segment_filing, SectionType, SegmenterInput};
use debtstack_data::store::{Provenance, StoredSection};
use debtstack_extract::bundle::{assemble, BundlePart};
use debtstack_extract::collateral::{classify, RawCollateral};
use debtstack_extract::error::{ExtractError, Result};
use debtstack_extract::financials::{extract_period, select_ttm_filings};
use debtstack_extract::fix::extract_with_fixes;
use debtstack_extract::guarantees;
use debtstack_extract::hierarchy;
use debtstack_extract::output::RawExtraction;
use debtstack_extract::qa::QaSources;
use debtstack_extract::{collateral, covenants};
use debtstack_graph::merge::Merger;
use debtstack_llm::UsageRecord;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Outcome of one step, distinguishing skip (prior state stands) from
/// no-data (recorded so dependents skip).
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Step ran and wrote its results
    Done,
    /// Step skipped by the idempotence rules
    Skipped(String),
    /// Source material absent
    NoData(String),
}

/// Resolve ticker/CIK and ensure the company row exists.
pub async fn resolve_company(
    ctx: &PipelineContext,
    ticker: &str,
    cik: Option<&str>,
) -> Result<i64> {
    let cik = match cik {
        Some(cik) => cik.to_string(),
        None => ctx.edgar.get_company_cik(ticker).await?,
    };
    let existing = ctx.store.get_company(ticker)?;
    let legal_name = existing
        .map(|c| c.legal_name)
        .unwrap_or_else(|| ticker.to_uppercase());
    let id = ctx
        .store
        .upsert_company(ticker, &cik, &legal_name, None, None)?;
    Ok(id)
}

// ----------------------------------------------------------------------
// Documents
// ----------------------------------------------------------------------

/// Fetch, clean and segment the latest 10-K (with exhibits) and recent
/// 10-Qs into stored sections.
pub async fn run_documents(
    ctx: &PipelineContext,
    company_id: i64,
    filings: &[Filing],
    options: &RunOptions,
) -> Result<StepOutcome> {
    let merger = Merger::new(&ctx.store, options.force);
    if let debtstack_graph::merge::SkipDecision::Skip(reason) =
        merger.should_run_sections(company_id)?
    {
        return Ok(StepOutcome::Skipped(reason));
    }

    let mut targets: Vec<&Filing> = Vec::new();
    if let Some(tenk) = filings
        .iter()
        .filter(|f| f.form == FormType::Form10K)
        .max_by_key(|f| f.filing_date)
    {
        targets.push(tenk);
    }
    let mut tenqs: Vec<&Filing> = filings
        .iter()
        .filter(|f| f.form == FormType::Form10Q)
        .collect();
    tenqs.sort_by_key(|f| std::cmp::Reverse(f.filing_date));
    targets.extend(tenqs.into_iter().take(3));

    if targets.is_empty() {
        return Ok(StepOutcome::NoData("no 10-K or 10-Q on file".to_string()));
    }

    let companies = ctx.store.list_companies()?;
    let cik = companies
        .iter()
        .find(|c| c.id == company_id)
        .map(|c| c.cik.clone())
        .unwrap_or_default();

    let mut stored = 0usize;
    for filing in targets {
        // Exhibits need the accession index resolved first.
        let mut filing = filing.clone();
        ctx.edgar.resolve_exhibits(&cik, &mut filing).await?;

        let doc_type = filing.form.as_str();
        let primary = ctx.edgar.get_document(&filing.primary_document_url).await?;
        stored += store_sections(
            ctx,
            company_id,
            doc_type,
            &filing,
            &primary,
            None,
        )?;

        // Exhibit documents fetched concurrently.
        let exhibit_urls: Vec<String> = [
            ExhibitCode::Ex21,
            ExhibitCode::Ex22,
            ExhibitCode::Ex4,
            ExhibitCode::Ex10,
        ]
        .iter()
        .flat_map(|code| filing.exhibits.get(code).cloned().unwrap_or_default())
        .collect();

        let fetches = exhibit_urls.iter().map(|url| ctx.edgar.get_document(url));
        let bodies = join_all(fetches).await;
        for (url, body) in exhibit_urls.iter().zip(bodies) {
            match body {
                Ok(body) => {
                    stored += store_sections(ctx, company_id, "exhibit", &filing, &body, Some(url))?;
                }
                Err(e) => warn!(url, error = %e, "exhibit fetch failed"),
            }
        }
    }

    if stored == 0 {
        return Ok(StepOutcome::NoData(
            "no recognizable sections (PDF-only or unusual format)".to_string(),
        ));
    }
    info!(company_id, stored, "sections stored");
    Ok(StepOutcome::Done)
}

fn store_sections(
    ctx: &PipelineContext,
    company_id: i64,
    doc_type: &str,
    filing: &Filing,
    raw: &str,
    exhibit_url: Option<&str>,
) -> Result<usize> {
    let sections = segment_filing(&SegmenterInput {
        raw,
        filing_url: &filing.primary_document_url,
        exhibit_url,
    })?;
    let count = sections.len();
    for section in sections {
        ctx.store.upsert_section(
            company_id,
            doc_type,
            section.section_type.as_str(),
            Some(filing.filing_date),
            &section.title,
            &section.content,
            &section.sec_filing_url,
        )?;
    }
    Ok(count)
}

// ----------------------------------------------------------------------
// Core
// ----------------------------------------------------------------------

/// Core extraction with the QA/fix loop, cached and merged.
pub async fn run_core(
    ctx: &PipelineContext,
    company_id: i64,
    options: &RunOptions,
    usage: &mut UsageRecord,
    qa_score: &mut Option<i64>,
) -> Result<StepOutcome> {
    let merger = Merger::new(&ctx.store, options.force);
    if let debtstack_graph::merge::SkipDecision::Skip(reason) = merger.should_run_core(company_id)? {
        return Ok(StepOutcome::Skipped(reason));
    }

    let sections = ctx.store.list_sections(company_id, None)?;
    if sections.is_empty() {
        return Ok(StepOutcome::NoData("no stored sections to extract from".to_string()));
    }

    let parts: Vec<BundlePart> = sections
        .iter()
        .filter_map(|s| {
            SectionType::parse(&s.section_type).map(|section_type| BundlePart {
                section_type,
                content: s.content.clone(),
                scale: None,
            })
        })
        .collect();
    let bundle = assemble(&parts);

    let footnote = section_content(&sections, "debt_footnote");
    let scale = footnote
        .map(|text| detect_scale(text, text.len() / 2))
        .unwrap_or_else(|| ScaleDetection {
            scale: debtstack_data::scale::MoneyScale::Dollars,
            explicit: false,
            warning: Some("no debt footnote; scale defaulted to dollars".to_string()),
        });

    let sources = QaSources {
        exhibit21: section_content(&sections, "exhibit_21"),
        debt_footnote: footnote,
        bundle_text: &bundle.text,
    };

    let accepted = extract_with_fixes(
        ctx.client.as_ref(),
        &bundle,
        &scale,
        &sources,
        ctx.tier,
        usage,
    )
    .await?;
    *qa_score = Some(accepted.report.score);

    // Durable cache of the raw accepted output under the schema version.
    ctx.store.cache_put(
        company_id,
        "core",
        &serde_json::to_value(&accepted.extraction.extraction)?,
    )?;

    let provenance = Provenance {
        source_filing_url: sections.first().map(|s| s.sec_filing_url.clone()),
        filing_date: sections.first().and_then(|s| s.filing_date),
        extracted_at: Some(Utc::now()),
        extraction_method: Some(accepted.extraction.tier.as_str().to_string()),
        confidence: Some(accepted.report.score as f64 / 100.0),
    };
    merger.merge_core(company_id, &accepted.extraction.extraction, &provenance)?;

    // First successful extraction names the company after its root entity.
    promote_root_name(ctx, company_id, &accepted.extraction.extraction)?;

    // QA trail into metadata.
    let mut metadata = ctx.store.get_metadata(company_id)?;
    metadata.extraction_method = Some(accepted.extraction.tier.as_str().to_string());
    metadata.iteration_count = Some(accepted.iteration_count as i64);
    metadata.qa_score = Some(accepted.report.score);
    metadata
        .warnings
        .extend(accepted.extraction.extraction.warnings.iter().cloned());
    let field_confidence: serde_json::Map<String, serde_json::Value> = accepted
        .extraction
        .extraction
        .debt_instruments
        .iter()
        .filter(|d| !d.field_confidence.is_null())
        .map(|d| (d.name.clone(), d.field_confidence.clone()))
        .collect();
    if !field_confidence.is_empty() {
        metadata.field_confidence = serde_json::Value::Object(field_confidence);
    }
    ctx.store.put_metadata(&metadata)?;

    Ok(StepOutcome::Done)
}

fn promote_root_name(
    ctx: &PipelineContext,
    company_id: i64,
    extraction: &RawExtraction,
) -> Result<()> {
    let Some(root) = extraction.entities.iter().find(|e| e.parent_name.is_none()) else {
        return Ok(());
    };
    let companies = ctx.store.list_companies()?;
    if let Some(company) = companies.iter().find(|c| c.id == company_id) {
        if company.legal_name == company.ticker {
            ctx.store
                .upsert_company(&company.ticker, &company.cik, &root.name, None, None)?;
        }
    }
    Ok(())
}

fn section_content<'a>(sections: &'a [StoredSection], section_type: &str) -> Option<&'a str> {
    sections
        .iter()
        .find(|s| s.section_type == section_type)
        .map(|s| s.content.as_str())
}

// ----------------------------------------------------------------------
// Financials
// ----------------------------------------------------------------------

/// Extract the TTM period set (latest 10-K + three most recent 10-Qs by
/// period of report), periods fetched and extracted concurrently.
pub async fn run_financials(
    ctx: &PipelineContext,
    company_id: i64,
    filings: &[Filing],
    options: &RunOptions,
    usage: &mut UsageRecord,
) -> Result<StepOutcome> {
    let merger = Merger::new(&ctx.store, options.force);
    if let debtstack_graph::merge::SkipDecision::Skip(reason) =
        merger.should_run_financials(company_id, Utc::now().date_naive())?
    {
        return Ok(StepOutcome::Skipped(reason));
    }

    let selected = select_ttm_filings(filings);
    if selected.is_empty() {
        return Ok(StepOutcome::NoData("no 10-K/10-Q with a reported period".to_string()));
    }

    let tasks = selected.iter().map(|filing| async {
        let mut task_usage = UsageRecord::default();
        let raw = ctx.edgar.get_document(&filing.primary_document_url).await?;
        let text = normalize::clean_filing(&raw)?;
        if text.trim().is_empty() {
            return Err(ExtractError::NoData {
                step: "financials".to_string(),
                reason: format!("{} is PDF-only", filing.accession_number),
            });
        }
        let target = text.find("Total assets").unwrap_or(text.len() / 2);
        let scale = detect_scale(&text, target);
        let period = extract_period(
            ctx.client.as_ref(),
            company_id,
            filing,
            &text,
            &scale,
            ctx.tier,
            &mut task_usage,
        )
        .await?;
        Ok::<_, ExtractError>((period, task_usage))
    });

    let results = join_all(tasks).await;
    let mut periods = Vec::new();
    let mut first_error: Option<ExtractError> = None;
    for result in results {
        match result {
            Ok((period, task_usage)) => {
                usage.merge(&task_usage);
                periods.push(period);
            }
            Err(e) => {
                warn!(error = %e, "period extraction failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if periods.is_empty() {
        return match first_error {
            Some(e) => Err(e),
            None => Ok(StepOutcome::NoData("no periods extracted".to_string())),
        };
    }

    merger.merge_financials(company_id, &periods)?;
    info!(company_id, periods = periods.len(), "financial periods merged");
    Ok(StepOutcome::Done)
}

// ----------------------------------------------------------------------
// Hierarchy
// ----------------------------------------------------------------------

/// Ownership hierarchy from Exhibit 21 indentation plus the orphan
/// gap-fill pass.
pub async fn run_hierarchy(
    ctx: &PipelineContext,
    company_id: i64,
    options: &RunOptions,
    usage: &mut UsageRecord,
) -> Result<StepOutcome> {
    let merger = Merger::new(&ctx.store, options.force);
    if let debtstack_graph::merge::SkipDecision::Skip(reason) =
        merger.should_run_dependent(company_id, "hierarchy")?
    {
        return Ok(StepOutcome::Skipped(reason));
    }

    let sections = ctx.store.list_sections(company_id, Some("exhibit_21"))?;
    let Some(exhibit) = sections.first() else {
        return Ok(StepOutcome::NoData("no Exhibit 21 on file".to_string()));
    };

    let rows = debtstack_data::sections::parse_subsidiary_list(&exhibit.content);
    if rows.is_empty() {
        return Ok(StepOutcome::NoData("Exhibit 21 carries no subsidiary rows".to_string()));
    }

    let registrant = ctx
        .store
        .list_companies()?
        .into_iter()
        .find(|c| c.id == company_id)
        .map(|c| c.legal_name)
        .unwrap_or_else(|| "Registrant".to_string());

    let mut extraction = hierarchy::edges_from_indentation(&registrant, &rows);

    // Gap-fill restricted to high-value orphans.
    let entities = ctx.store.list_entities(company_id)?;
    let instruments = ctx.store.list_debt_instruments(company_id, true)?;
    let issuer_ids: Vec<i64> = instruments.iter().filter_map(|i| i.issuer_entity_id).collect();
    let entity_flags: Vec<(String, bool)> = entities
        .iter()
        .map(|e| {
            (
                e.name.clone(),
                e.is_guarantor || issuer_ids.contains(&e.id),
            )
        })
        .collect();
    let known_names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
    let orphans = hierarchy::orphan_entities(&entity_flags, &extraction.edges, 15);
    if !orphans.is_empty() {
        let filled = hierarchy::fill_orphans(
            ctx.client.as_ref(),
            &orphans,
            &known_names,
            &exhibit.content,
            ctx.tier,
            usage,
        )
        .await?;
        extraction.edges.extend(filled);
    }

    merger.merge_hierarchy(company_id, &extraction.edges, extraction.root.as_deref())?;
    Ok(StepOutcome::Done)
}

// ----------------------------------------------------------------------
// Guarantees
// ----------------------------------------------------------------------

/// Guarantees: Exhibit 22 (`verified`) first, then the most recent
/// indentures (`extracted`), deduplicated.
pub async fn run_guarantees(
    ctx: &PipelineContext,
    company_id: i64,
    options: &RunOptions,
    usage: &mut UsageRecord,
) -> Result<StepOutcome> {
    let merger = Merger::new(&ctx.store, options.force);
    if let debtstack_graph::merge::SkipDecision::Skip(reason) =
        merger.should_run_dependent(company_id, "guarantees")?
    {
        return Ok(StepOutcome::Skipped(reason));
    }

    let instruments = ctx.store.list_debt_instruments(company_id, true)?;
    if instruments.is_empty() {
        return Ok(StepOutcome::NoData("no instruments to guarantee".to_string()));
    }
    let instrument_names: Vec<String> = instruments.iter().map(|i| i.name.clone()).collect();

    let mut collected = Vec::new();

    let exhibit22 = ctx.store.list_sections(company_id, Some("exhibit_22"))?;
    if let Some(exhibit) = exhibit22.first() {
        collected.extend(guarantees::from_exhibit22(&exhibit.content, &instrument_names));
    }

    let indentures = ctx.store.list_sections(company_id, Some("indenture"))?;
    for indenture in indentures.iter().take(2) {
        let body: String = indenture.content.chars().take(120_000).collect();
        let extracted = guarantees::from_governing_document(
            ctx.client.as_ref(),
            &body,
            &instrument_names,
            ctx.tier,
            usage,
        )
        .await?;
        collected.extend(extracted);
    }

    if collected.is_empty() {
        if exhibit22.is_empty() && indentures.is_empty() {
            return Ok(StepOutcome::NoData(
                "no Exhibit 22 and no indentures on file".to_string(),
            ));
        }
        return Ok(StepOutcome::Done);
    }

    let deduped = guarantees::dedupe(collected);
    merger.merge_guarantees(company_id, &deduped)?;
    Ok(StepOutcome::Done)
}

// ----------------------------------------------------------------------
// Collateral
// ----------------------------------------------------------------------

/// Collateral classification: keyword table first, model pass for secured
/// instruments the table cannot place.
pub async fn run_collateral(
    ctx: &PipelineContext,
    company_id: i64,
    options: &RunOptions,
    usage: &mut UsageRecord,
) -> Result<StepOutcome> {
    let merger = Merger::new(&ctx.store, options.force);
    if let debtstack_graph::merge::SkipDecision::Skip(reason) =
        merger.should_run_dependent(company_id, "collateral")?
    {
        return Ok(StepOutcome::Skipped(reason));
    }

    let instruments = ctx.store.list_debt_instruments(company_id, true)?;
    let secured: Vec<_> = instruments
        .iter()
        .filter(|i| i.seniority == debtstack_data::store::Seniority::SeniorSecured)
        .collect();
    if secured.is_empty() {
        return Ok(StepOutcome::NoData("no secured instruments".to_string()));
    }

    let industry = ctx
        .store
        .list_companies()?
        .into_iter()
        .find(|c| c.id == company_id)
        .and_then(|c| c.industry);

    let mut rows: Vec<RawCollateral> = Vec::new();
    let mut unresolved: Vec<String> = Vec::new();

    for instrument in &secured {
        let description = format!(
            "{} {}",
            instrument.name,
            instrument.security_type.as_deref().unwrap_or("")
        );
        let types = classify(&description, industry.as_deref());
        if types.is_empty() {
            unresolved.push(instrument.name.clone());
        } else {
            for collateral_type in types {
                rows.push(RawCollateral {
                    instrument: instrument.name.clone(),
                    collateral_type,
                    description: description.trim().to_string(),
                    priority: None,
                });
            }
        }
    }

    if !unresolved.is_empty() {
        let sections = ctx.store.list_sections(company_id, Some("debt_footnote"))?;
        if let Some(footnote) = sections.first() {
            let modeled = collateral::classify_with_model(
                ctx.client.as_ref(),
                &footnote.content,
                &unresolved,
                ctx.tier,
                usage,
            )
            .await?;
            rows.extend(modeled);
        }
    }

    if rows.is_empty() {
        // Secured instruments stay tagged collateral_data_confidence =
        // "unknown"; that satisfies the invariant and flags the gap.
        return Ok(StepOutcome::Done);
    }

    merger.merge_collateral(company_id, &rows)?;
    Ok(StepOutcome::Done)
}

// ----------------------------------------------------------------------
// Link / covenants / metrics / cache
// ----------------------------------------------------------------------

/// Instrument-to-document linking.
pub async fn run_link(ctx: &PipelineContext, company_id: i64) -> Result<StepOutcome> {
    let summary = debtstack_graph::link_instruments(&ctx.store, company_id)?;
    if summary.linked == 0 && summary.no_document_expected == 0 {
        return Ok(StepOutcome::NoData("no documents available to link".to_string()));
    }
    Ok(StepOutcome::Done)
}

/// Covenants from each instrument's most recent governing document, with
/// credit-agreement covenants fanned out at company scope.
pub async fn run_covenants(
    ctx: &PipelineContext,
    company_id: i64,
    usage: &mut UsageRecord,
) -> Result<StepOutcome> {
    let instruments = ctx.store.list_debt_instruments(company_id, true)?;

    // Group instruments by their governing section so each document is
    // parsed once.
    let mut by_section: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for instrument in &instruments {
        if let Some(section) = ctx.store.latest_governing_section(instrument.id)? {
            by_section.entry(section.id).or_default().push(instrument.id);
        }
    }

    if by_section.is_empty() {
        return Ok(StepOutcome::NoData("no governing documents linked".to_string()));
    }

    for (section_id, instrument_ids) in by_section {
        let Some(section) = ctx.store.get_section(section_id)? else {
            continue;
        };
        let extracted = covenants::extract_covenants(
            ctx.client.as_ref(),
            company_id,
            None,
            &section,
            ctx.tier,
            usage,
        )
        .await?;

        let is_credit_agreement = section.section_type == "credit_agreement";
        for covenant in &extracted {
            if is_credit_agreement {
                // Company-scope row plus fan-out to governed instruments.
                ctx.store.upsert_covenant(covenant)?;
            }
            for instrument_id in &instrument_ids {
                let mut scoped = covenant.clone();
                scoped.debt_instrument_id = Some(*instrument_id);
                ctx.store.upsert_covenant(&scoped)?;
            }
        }
    }

    Ok(StepOutcome::Done)
}

/// Derived credit metrics.
pub async fn run_metrics(ctx: &PipelineContext, company_id: i64) -> Result<StepOutcome> {
    debtstack_graph::compute_metrics(&ctx.store, company_id, Utc::now().date_naive())?;
    Ok(StepOutcome::Done)
}

/// Refresh the extraction cache with a snapshot of the merged graph, used
/// by targeted backfills without a full re-run.
pub async fn run_cache(ctx: &PipelineContext, company_id: i64) -> Result<StepOutcome> {
    let entities = ctx.store.list_entities(company_id)?;
    let instruments = ctx.store.list_debt_instruments(company_id, false)?;
    let snapshot = json!({
        "entities": entities,
        "debt_instruments": instruments,
        "snapshot_at": Utc::now().to_rfc3339(),
    });
    ctx.store.cache_put(company_id, "graph", &snapshot)?;
    Ok(StepOutcome::Done)
}
