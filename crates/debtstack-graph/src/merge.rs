//! Idempotent merger: extraction deltas into the graph.
//!
//! Merge never deletes. Existing non-null values survive unless the
//! incoming fact carries higher-confidence provenance, changed fields are
//! recorded, and each merge step commits in its own transaction so a
//! cancelled run leaves prior steps intact.

use chrono::{Duration, NaiveDate};
use debtstack_data::error::Result;
use debtstack_data::store::{
    name_key, DebtInstrument, EntityType, FinancialPeriod, GraphStore, OwnershipType, Provenance,
    StepStatus,
};
use debtstack_extract::collateral::RawCollateral;
use debtstack_extract::guarantees::RawGuarantee;
use debtstack_extract::hierarchy::HierarchyEdge;
use debtstack_extract::output::{RawDebt, RawExtraction};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Core extraction is skipped when the graph already carries this many
/// entities and any debt, unless forced.
const CORE_SKIP_ENTITY_COUNT: i64 = 20;

/// Section refresh is skipped above this count.
const SECTION_SKIP_COUNT: i64 = 5;

/// Financials refresh this many days after the expected next quarter end.
const FINANCIALS_REFRESH_LAG_DAYS: i64 = 60;

/// Whether a step should run against the current graph state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    /// Run the step
    Run,
    /// Skip, with the recorded reason
    Skip(String),
}

impl SkipDecision {
    /// True when the step should run.
    pub fn should_run(&self) -> bool {
        matches!(self, Self::Run)
    }
}

/// Counts of rows touched by one merge step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rows created
    pub created: usize,
    /// Rows updated in place
    pub updated: usize,
    /// Rows left untouched
    pub unchanged: usize,
    /// Field-level changes, as `instrument.field` labels
    pub fields_changed: Vec<String>,
}

/// The idempotent merger over one company's graph.
#[derive(Debug)]
pub struct Merger<'a> {
    store: &'a GraphStore,
    force: bool,
}

impl<'a> Merger<'a> {
    /// Create a merger; `force` overrides every skip rule.
    pub fn new(store: &'a GraphStore, force: bool) -> Self {
        Self { store, force }
    }

    // ------------------------------------------------------------------
    // Skip decisions
    // ------------------------------------------------------------------

    /// Core extraction skip rule: entity_count > 20 AND debt_count > 0.
    pub fn should_run_core(&self, company_id: i64) -> Result<SkipDecision> {
        if self.force {
            return Ok(SkipDecision::Run);
        }
        let counts = self.store.existing_counts(company_id)?;
        if counts.entities > CORE_SKIP_ENTITY_COUNT && counts.debt > 0 {
            return Ok(SkipDecision::Skip(format!(
                "existing graph is populated ({} entities, {} instruments)",
                counts.entities, counts.debt
            )));
        }
        Ok(SkipDecision::Run)
    }

    /// Document-section skip rule: more than 5 sections stored.
    pub fn should_run_sections(&self, company_id: i64) -> Result<SkipDecision> {
        if self.force {
            return Ok(SkipDecision::Run);
        }
        let counts = self.store.existing_counts(company_id)?;
        if counts.sections > SECTION_SKIP_COUNT {
            return Ok(SkipDecision::Skip(format!(
                "{} sections already stored",
                counts.sections
            )));
        }
        Ok(SkipDecision::Run)
    }

    /// Financials refresh rule: re-extract once ~60 days past the quarter
    /// end following the stored latest quarter.
    pub fn should_run_financials(&self, company_id: i64, today: NaiveDate) -> Result<SkipDecision> {
        if self.force {
            return Ok(SkipDecision::Run);
        }
        let Some((year, quarter)) = self.store.latest_financial_quarter(company_id)? else {
            return Ok(SkipDecision::Run);
        };
        let due = next_quarter_end(year, quarter) + Duration::days(FINANCIALS_REFRESH_LAG_DAYS);
        if today < due {
            return Ok(SkipDecision::Skip(format!(
                "financials current through {}Q{}; refresh due {}",
                year, quarter, due
            )));
        }
        Ok(SkipDecision::Run)
    }

    /// Dependent-step rule (hierarchy / guarantees / collateral): skip when
    /// the prior run recorded `no_data` (source absent) or `success`.
    pub fn should_run_dependent(&self, company_id: i64, step: &str) -> Result<SkipDecision> {
        if self.force {
            return Ok(SkipDecision::Run);
        }
        let statuses = self.store.step_statuses(company_id)?;
        match statuses.get(step).map(|s| s.status) {
            Some(StepStatus::NoData) => Ok(SkipDecision::Skip(format!(
                "prior run found no source for {}",
                step
            ))),
            Some(StepStatus::Success) => {
                Ok(SkipDecision::Skip(format!("{} already succeeded", step)))
            }
            _ => Ok(SkipDecision::Run),
        }
    }

    // ------------------------------------------------------------------
    // Merge steps
    // ------------------------------------------------------------------

    /// Merge the core extraction: entities first (two passes so parents
    /// resolve regardless of order), then debt instruments.
    pub fn merge_core(
        &self,
        company_id: i64,
        extraction: &RawExtraction,
        provenance: &Provenance,
    ) -> Result<MergeOutcome> {
        let tx = self.store.connection().unchecked_transaction()?;
        let mut outcome = MergeOutcome::default();

        for entity in &extraction.entities {
            let before = self.store.find_entity(company_id, &entity.name)?;
            self.store.upsert_entity(
                company_id,
                &entity.name,
                entity.jurisdiction.as_deref(),
                entity.entity_type,
                entity.is_guarantor,
                entity.is_unrestricted,
            )?;
            if before.is_none() {
                outcome.created += 1;
            } else {
                outcome.unchanged += 1;
            }
        }

        // Second pass: parents and roots.
        for entity in &extraction.entities {
            let Some(entity_id) = self.store.find_entity(company_id, &entity.name)? else {
                continue;
            };
            match &entity.parent_name {
                Some(parent) => {
                    if let Some(parent_id) = self.store.find_entity(company_id, parent)? {
                        self.store.set_entity_parent(entity_id, Some(parent_id), false)?;
                        self.store.upsert_ownership_link(
                            company_id,
                            parent_id,
                            entity_id,
                            None,
                            None,
                            None,
                        )?;
                    }
                }
                None => {
                    self.store.set_entity_parent(entity_id, None, true)?;
                }
            }
        }

        for debt in &extraction.debt_instruments {
            self.merge_instrument(company_id, debt, extraction.aggregate_only, provenance, &mut outcome)?;
        }

        tx.commit()?;
        info!(
            company_id,
            created = outcome.created,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "core merge complete"
        );
        Ok(outcome)
    }

    fn merge_instrument(
        &self,
        company_id: i64,
        debt: &RawDebt,
        aggregate_only: bool,
        provenance: &Provenance,
        outcome: &mut MergeOutcome,
    ) -> Result<()> {
        let issuer_entity_id = match &debt.issuer_name {
            Some(name) => self.store.find_entity(company_id, name)?,
            None => None,
        };

        let mut attributes = json!({ "source": "sec_extraction" });
        if aggregate_only || debt.outstanding_null_reason.as_deref() == Some("aggregate_only_disclosure") {
            attributes["aggregate_only"] = json!(true);
        }
        if !debt.field_confidence.is_null() {
            attributes["field_confidence"] = debt.field_confidence.clone();
        }

        let incoming = DebtInstrument {
            id: 0,
            company_id,
            issuer_entity_id,
            name: debt.name.clone(),
            seniority: debt.seniority,
            security_type: debt.security_type.clone(),
            interest_rate_bps: debt.interest_rate_bps,
            is_floating: debt.is_floating,
            benchmark: debt.benchmark.clone(),
            spread_bps: debt.spread_bps,
            floor_bps: debt.floor_bps,
            issue_date: debt.issue_date,
            maturity_date: debt.maturity_date,
            principal_cents: debt.principal_cents,
            outstanding_cents: debt.outstanding_cents,
            is_drawn: false,
            is_active: true,
            cusip: debt.cusip.clone(),
            isin: debt.isin.clone(),
            currency: debt.currency.clone(),
            // Secured instruments without classified collateral satisfy the
            // invariant through the explicit "unknown" tag until the
            // collateral step upgrades it.
            collateral_data_confidence: match debt.seniority {
                debtstack_data::store::Seniority::SeniorSecured => Some("unknown".to_string()),
                _ => None,
            },
            attributes,
            provenance: provenance.clone(),
        };

        let existing_id = self.store.find_debt_instrument(
            company_id,
            issuer_entity_id,
            &debt.name,
            debt.maturity_date,
            debt.cusip.as_deref(),
            debt.isin.as_deref(),
        )?;

        match existing_id {
            None => {
                self.store.insert_debt_instrument(&incoming)?;
                outcome.created += 1;
            }
            Some(id) => {
                let existing = self.store.get_debt_instrument(id)?.ok_or_else(|| {
                    debtstack_data::DataError::Parse(format!(
                        "instrument {} vanished during merge",
                        id
                    ))
                })?;
                let (merged, changed) = merge_fields(&existing, &incoming);
                if changed.is_empty() {
                    outcome.unchanged += 1;
                } else {
                    self.store.update_debt_instrument(&merged)?;
                    outcome.updated += 1;
                    outcome
                        .fields_changed
                        .extend(changed.iter().map(|f| format!("{}.{}", debt.name, f)));
                }
            }
        }
        Ok(())
    }

    /// Merge hierarchy edges: ownership links plus principal-parent updates.
    pub fn merge_hierarchy(
        &self,
        company_id: i64,
        edges: &[HierarchyEdge],
        root: Option<&str>,
    ) -> Result<MergeOutcome> {
        let tx = self.store.connection().unchecked_transaction()?;
        let mut outcome = MergeOutcome::default();

        for edge in edges {
            let parent_id = match self.store.find_entity(company_id, &edge.parent)? {
                Some(id) => id,
                None => {
                    outcome.created += 1;
                    self.store.upsert_entity(
                        company_id,
                        &edge.parent,
                        None,
                        EntityType::Subsidiary,
                        false,
                        false,
                    )?
                }
            };
            let child_id = match self.store.find_entity(company_id, &edge.child)? {
                Some(id) => id,
                None => {
                    outcome.created += 1;
                    self.store.upsert_entity(
                        company_id,
                        &edge.child,
                        None,
                        EntityType::Subsidiary,
                        false,
                        false,
                    )?
                }
            };

            let ownership_type = edge
                .ownership_type
                .as_deref()
                .and_then(OwnershipType::parse)
                // Evidence quote is required for a non-null qualifier.
                .filter(|_| edge.evidence.is_some());
            self.store.upsert_ownership_link(
                company_id,
                parent_id,
                child_id,
                ownership_type,
                edge.ownership_percent,
                edge.evidence.as_deref(),
            )?;
            self.store.set_entity_parent(child_id, Some(parent_id), false)?;
            outcome.updated += 1;
        }

        if let Some(root_name) = root {
            if let Some(root_id) = self.store.find_entity(company_id, root_name)? {
                self.store.set_entity_parent(root_id, None, true)?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Merge guarantees, resolving both endpoints by name. Unknown
    /// guarantor entities are created with the guarantor flag set.
    pub fn merge_guarantees(&self, company_id: i64, guarantees: &[RawGuarantee]) -> Result<MergeOutcome> {
        let tx = self.store.connection().unchecked_transaction()?;
        let mut outcome = MergeOutcome::default();
        let instruments = self.store.list_debt_instruments(company_id, false)?;

        for guarantee in guarantees {
            let Some(instrument) = instruments
                .iter()
                .find(|i| name_key(&i.name) == name_key(&guarantee.instrument))
            else {
                debug!(instrument = %guarantee.instrument, "guarantee names unknown instrument");
                outcome.unchanged += 1;
                continue;
            };

            let guarantor_id = match self.store.find_entity(company_id, &guarantee.guarantor)? {
                Some(id) => id,
                None => {
                    outcome.created += 1;
                    self.store.upsert_entity(
                        company_id,
                        &guarantee.guarantor,
                        None,
                        EntityType::Subsidiary,
                        true,
                        false,
                    )?
                }
            };

            self.store.upsert_guarantee(
                instrument.id,
                guarantor_id,
                guarantee.conditions.as_deref(),
                guarantee.confidence,
            )?;
            outcome.updated += 1;
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Merge collateral rows and upgrade the secured instruments'
    /// collateral tag from "unknown" to "classified".
    pub fn merge_collateral(&self, company_id: i64, rows: &[RawCollateral]) -> Result<MergeOutcome> {
        let tx = self.store.connection().unchecked_transaction()?;
        let mut outcome = MergeOutcome::default();
        let instruments = self.store.list_debt_instruments(company_id, false)?;

        for row in rows {
            let Some(instrument) = instruments
                .iter()
                .find(|i| name_key(&i.name) == name_key(&row.instrument))
            else {
                outcome.unchanged += 1;
                continue;
            };

            self.store.upsert_collateral(
                instrument.id,
                row.collateral_type,
                &row.description,
                row.priority.as_deref(),
                None,
            )?;
            outcome.created += 1;

            if instrument.collateral_data_confidence.as_deref() == Some("unknown") {
                let mut updated = instrument.clone();
                updated.collateral_data_confidence = Some("classified".to_string());
                self.store.update_debt_instrument(&updated)?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Merge financial periods; the store-level upsert preserves non-null
    /// values field by field.
    pub fn merge_financials(&self, _company_id: i64, periods: &[FinancialPeriod]) -> Result<MergeOutcome> {
        let tx = self.store.connection().unchecked_transaction()?;
        let mut outcome = MergeOutcome::default();
        for period in periods {
            self.store.upsert_financial_period(period)?;
            outcome.updated += 1;
        }
        tx.commit()?;
        Ok(outcome)
    }
}

/// Field-level merge of an incoming instrument over an existing row.
///
/// Existing non-null values survive unless the incoming row carries strictly
/// higher confidence. Returns the merged row and the list of changed field
/// names.
fn merge_fields(existing: &DebtInstrument, incoming: &DebtInstrument) -> (DebtInstrument, Vec<String>) {
    let mut merged = existing.clone();
    let mut changed = Vec::new();

    let incoming_wins = match (incoming.provenance.confidence, existing.provenance.confidence) {
        (Some(new), Some(old)) => new > old,
        (Some(_), None) => true,
        _ => false,
    };

    macro_rules! merge_option {
        ($field:ident) => {
            if merged.$field.is_none() && incoming.$field.is_some() {
                merged.$field = incoming.$field.clone();
                changed.push(stringify!($field).to_string());
            } else if incoming_wins
                && incoming.$field.is_some()
                && merged.$field != incoming.$field
            {
                merged.$field = incoming.$field.clone();
                changed.push(stringify!($field).to_string());
            }
        };
    }

    merge_option!(issuer_entity_id);
    merge_option!(security_type);
    merge_option!(interest_rate_bps);
    merge_option!(benchmark);
    merge_option!(spread_bps);
    merge_option!(floor_bps);
    merge_option!(issue_date);
    merge_option!(maturity_date);
    merge_option!(principal_cents);
    merge_option!(outstanding_cents);
    merge_option!(cusip);
    merge_option!(isin);

    // Merge attribute objects: incoming keys fill gaps, never clobber.
    if let (Value::Object(merged_map), Value::Object(incoming_map)) =
        (&mut merged.attributes, &incoming.attributes)
    {
        for (key, value) in incoming_map {
            if !merged_map.contains_key(key) {
                merged_map.insert(key.clone(), value.clone());
                changed.push(format!("attributes.{}", key));
            }
        }
    }

    if changed.iter().any(|f| !f.starts_with("attributes.")) {
        merged.provenance = incoming.provenance.clone();
    }

    (merged, changed)
}

/// Calendar end of the quarter after (year, quarter), fiscal quarters
/// approximated to calendar quarters.
fn next_quarter_end(year: i32, quarter: i32) -> NaiveDate {
    let (next_year, next_quarter) = if quarter >= 4 {
        (year + 1, 1)
    } else {
        (year, quarter + 1)
    };
    let month = next_quarter as u32 * 3;
    let day = match month {
        3 | 12 => 31,
        _ => 30,
    };
    NaiveDate::from_ymd_opt(next_year, month, day)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(next_year, 12, 31).expect("valid date"))
}
