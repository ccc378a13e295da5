//! Maintenance commands: the matured/duplicate/aggregate sweep and the
//! amount backfill.

use crate::pipeline::PipelineContext;
use chrono::NaiveDate;
use debtstack_data::error::Result;
use debtstack_data::scale::detect_scale;
use debtstack_data::store::{name_key, GraphStore};
use debtstack_extract::core::backfill_amount;
use debtstack_llm::UsageRecord;
use serde_json::Value;
use tracing::info;

/// Actions the excess sweep would take (or took, when not a dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instruments deactivated as matured
    pub matured: Vec<String>,
    /// Instruments deactivated as duplicates
    pub duplicates: Vec<String>,
    /// Instruments whose aggregate amounts were cleared
    pub amounts_cleared: Vec<String>,
}

impl SweepReport {
    /// Total actions.
    pub fn total(&self) -> usize {
        self.matured.len() + self.duplicates.len() + self.amounts_cleared.len()
    }
}

/// Sweep a company's instruments: deactivate matured bonds, deactivate
/// duplicates (identity tie-break prefers rows carrying identifiers), and
/// clear amounts on rows a model review flagged as aggregate buckets.
pub fn fix_excess(
    store: &GraphStore,
    company_id: i64,
    today: NaiveDate,
    dry_run: bool,
) -> Result<SweepReport> {
    let instruments = store.list_debt_instruments(company_id, true)?;
    let mut report = SweepReport::default();

    // Matured sweep.
    for instrument in &instruments {
        if let Some(maturity) = instrument.maturity_date {
            if maturity < today {
                report.matured.push(instrument.name.clone());
                if !dry_run {
                    store.deactivate_instrument(instrument.id, "matured")?;
                }
            }
        }
    }

    // Duplicate sweep: same issuer, name key and maturity. The survivor is
    // the row with identifiers, then the oldest row.
    let mut seen: Vec<(Option<i64>, String, Option<NaiveDate>, i64, bool)> = Vec::new();
    for instrument in &instruments {
        if report.matured.contains(&instrument.name) {
            continue;
        }
        let key = (
            instrument.issuer_entity_id,
            name_key(&instrument.name),
            instrument.maturity_date,
        );
        let has_identifier = instrument.cusip.is_some() || instrument.isin.is_some();
        match seen
            .iter_mut()
            .find(|(issuer, name, maturity, _, _)| (*issuer, name.clone(), *maturity) == key)
        {
            Some((_, _, _, kept_id, kept_has_identifier)) => {
                let (loser_id, loser_name) = if has_identifier && !*kept_has_identifier {
                    // The new row is the better survivor; demote the old.
                    let old = *kept_id;
                    *kept_id = instrument.id;
                    *kept_has_identifier = true;
                    let old_name = instruments
                        .iter()
                        .find(|i| i.id == old)
                        .map(|i| i.name.clone())
                        .unwrap_or_default();
                    (old, old_name)
                } else {
                    (instrument.id, instrument.name.clone())
                };
                report.duplicates.push(loser_name);
                if !dry_run {
                    store.deactivate_instrument(loser_id, "duplicate")?;
                }
            }
            None => {
                seen.push((key.0, key.1, key.2, instrument.id, has_identifier));
            }
        }
    }

    // Aggregate-bucket sweep: rows a review pass marked as totals rather
    // than tranches keep their descriptive fields but lose the amount.
    for instrument in &instruments {
        let flagged = instrument
            .attributes
            .get("llm_review_aggregate")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if flagged && instrument.outstanding_cents.is_some() {
            report.amounts_cleared.push(instrument.name.clone());
            if !dry_run {
                let mut updated = instrument.clone();
                updated.outstanding_cents = None;
                if let Value::Object(ref mut map) = updated.attributes {
                    map.insert("amount_cleared".to_string(), Value::Bool(true));
                }
                store.update_debt_instrument(&updated)?;
            }
        }
    }

    info!(
        company_id,
        matured = report.matured.len(),
        duplicates = report.duplicates.len(),
        cleared = report.amounts_cleared.len(),
        dry_run,
        "excess sweep complete"
    );
    Ok(report)
}

/// Backfill missing outstanding amounts from stored debt footnotes with a
/// scoped model pass. Aggregate-only instruments are left alone.
pub async fn backfill_amounts(
    ctx: &PipelineContext,
    company_id: i64,
    usage: &mut UsageRecord,
) -> Result<usize> {
    let instruments = ctx.store.list_debt_instruments(company_id, true)?;
    let sections = ctx.store.list_sections(company_id, Some("debt_footnote"))?;
    let Some(default_footnote) = sections.first() else {
        return Ok(0);
    };

    let mut filled = 0usize;
    for instrument in instruments {
        if instrument.outstanding_cents.is_some() {
            continue;
        }
        let aggregate_only = instrument
            .attributes
            .get("aggregate_only")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if aggregate_only {
            continue;
        }

        // Full-text search picks the section that actually names this
        // instrument; the newest footnote is the fallback.
        let excerpt = ctx
            .store
            .search_sections(company_id, &instrument.name, 3)?
            .into_iter()
            .find(|s| s.section_type == "debt_footnote")
            .map(|s| s.content)
            .unwrap_or_else(|| default_footnote.content.clone());
        let scale = detect_scale(&excerpt, excerpt.len() / 2);

        match backfill_amount(
            ctx.client.as_ref(),
            &instrument.name,
            &excerpt,
            scale.scale,
            ctx.tier,
            usage,
        )
        .await
        {
            Ok(Some(cents)) => {
                let mut updated = instrument.clone();
                updated.outstanding_cents = Some(cents);
                if let Value::Object(ref mut map) = updated.attributes {
                    map.insert(
                        "source".to_string(),
                        Value::String("amount_backfill".to_string()),
                    );
                }
                ctx.store.update_debt_instrument(&updated)?;
                filled += 1;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(instrument = %instrument.name, error = %e, "backfill failed");
            }
        }
    }

    info!(company_id, filled, "amount backfill complete");
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use debtstack_data::store::{DebtInstrument, Provenance, Seniority};
    use serde_json::json;

    fn instrument(company_id: i64, name: &str, maturity: Option<NaiveDate>) -> DebtInstrument {
        DebtInstrument {
            id: 0,
            company_id,
            issuer_entity_id: None,
            name: name.to_string(),
            seniority: Seniority::SeniorUnsecured,
            security_type: None,
            interest_rate_bps: None,
            is_floating: false,
            benchmark: None,
            spread_bps: None,
            floor_bps: None,
            issue_date: None,
            maturity_date: maturity,
            principal_cents: None,
            outstanding_cents: Some(1_000),
            is_drawn: false,
            is_active: true,
            cusip: None,
            isin: None,
            currency: "USD".to_string(),
            collateral_data_confidence: None,
            attributes: json!({}),
            provenance: Provenance::default(),
        }
    }

    #[test]
    fn test_matured_sweep_seed_case() {
        // Instrument matured 2023-06-01, observed 2026-01-25: deactivated
        // with reason "matured" and excluded from metrics afterwards.
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Matured Notes",
                NaiveDate::from_ymd_opt(2023, 6, 1),
            ))
            .unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Live Notes",
                NaiveDate::from_ymd_opt(2031, 6, 1),
            ))
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
        let report = fix_excess(&store, company, today, false).unwrap();
        assert_eq!(report.matured, vec!["Matured Notes".to_string()]);

        let rows = store.list_debt_instruments(company, false).unwrap();
        let matured = rows.iter().find(|i| i.name == "Matured Notes").unwrap();
        assert!(!matured.is_active);
        assert_eq!(matured.attributes["deactivation_reason"], json!("matured"));

        let metrics = debtstack_graph::compute_metrics(&store, company, today).unwrap();
        assert_eq!(metrics.total_debt_cents, 1_000);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Matured Notes",
                NaiveDate::from_ymd_opt(2023, 6, 1),
            ))
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
        let report = fix_excess(&store, company, today, true).unwrap();
        assert_eq!(report.total(), 1);
        assert!(store.list_debt_instruments(company, true).unwrap()[0].is_active);
    }

    #[test]
    fn test_duplicate_sweep_prefers_identifiers() {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let maturity = NaiveDate::from_ymd_opt(2031, 6, 1);
        store
            .insert_debt_instrument(&instrument(company, "4.25% Senior Notes due 2031", maturity))
            .unwrap();
        let mut with_cusip = instrument(company, "4.25% Senior Notes due 2031", maturity);
        with_cusip.cusip = Some("037833AB1".to_string());
        // Insert directly; find_debt_instrument is bypassed to simulate a
        // historical double-write.
        store.insert_debt_instrument(&with_cusip).unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
        let report = fix_excess(&store, company, today, false).unwrap();
        assert_eq!(report.duplicates.len(), 1);

        let active = store.list_debt_instruments(company, true).unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].cusip.is_some());
    }

    #[test]
    fn test_aggregate_amount_cleared() {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let mut bucket = instrument(company, "Other long-term obligations", None);
        bucket.attributes = json!({"llm_review_aggregate": true});
        store.insert_debt_instrument(&bucket).unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
        let report = fix_excess(&store, company, today, false).unwrap();
        assert_eq!(report.amounts_cleared.len(), 1);

        let rows = store.list_debt_instruments(company, true).unwrap();
        assert!(rows[0].outstanding_cents.is_none());
        assert_eq!(rows[0].attributes["amount_cleared"], json!(true));
    }
}
