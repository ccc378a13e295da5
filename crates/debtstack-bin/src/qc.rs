//! Whole-database QC audit.
//!
//! Verifies the universal invariants over every company and reports
//! findings by severity. The CLI exits non-zero when anything critical or
//! error-level survives.

use debtstack_data::error::Result;
use debtstack_data::store::{is_valid_cusip, is_valid_isin, GraphStore};
use std::fmt;

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; no action required
    Warning,
    /// Data defect that should be fixed
    Error,
    /// Invariant violation that poisons downstream consumers
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One QC finding.
#[derive(Debug, Clone)]
pub struct QcFinding {
    /// Severity
    pub severity: Severity,
    /// Company ticker
    pub ticker: String,
    /// Invariant identifier
    pub invariant: &'static str,
    /// Detail
    pub detail: String,
}

/// Run the audit over every company.
pub fn run_audit(store: &GraphStore) -> Result<Vec<QcFinding>> {
    let mut findings = Vec::new();

    for company in store.list_companies()? {
        audit_company(store, company.id, &company.ticker, &mut findings)?;
    }

    Ok(findings)
}

fn audit_company(
    store: &GraphStore,
    company_id: i64,
    ticker: &str,
    findings: &mut Vec<QcFinding>,
) -> Result<()> {
    let entities = store.list_entities(company_id)?;
    let instruments = store.list_debt_instruments(company_id, false)?;
    let metadata = store.get_metadata(company_id)?;

    // Secured instruments need collateral rows or the explicit unknown tag.
    for instrument in instruments
        .iter()
        .filter(|i| i.is_active && i.seniority == debtstack_data::store::Seniority::SeniorSecured)
    {
        let collateral = store.list_collateral(instrument.id)?;
        let tagged_unknown = instrument.collateral_data_confidence.as_deref() == Some("unknown");
        if collateral.is_empty() && !tagged_unknown {
            findings.push(QcFinding {
                severity: Severity::Critical,
                ticker: ticker.to_string(),
                invariant: "secured_collateral",
                detail: format!(
                    "{} is senior secured with no collateral rows and no unknown tag",
                    instrument.name
                ),
            });
        }
    }

    // Root invariants: a root has no parent; one root per company unless a
    // dual-listed exception is recorded.
    for entity in entities.iter().filter(|e| e.is_root) {
        if entity.parent_entity_id.is_some() {
            findings.push(QcFinding {
                severity: Severity::Error,
                ticker: ticker.to_string(),
                invariant: "root_parent",
                detail: format!("root entity {} has a parent", entity.name),
            });
        }
    }
    let root_count = entities.iter().filter(|e| e.is_root).count();
    let dual_recorded = metadata
        .warnings
        .iter()
        .any(|w| w.contains("dual_listed"));
    if root_count > 1 && !dual_recorded {
        findings.push(QcFinding {
            severity: Severity::Error,
            ticker: ticker.to_string(),
            invariant: "single_root",
            detail: format!("{} root entities without a dual-listed exception", root_count),
        });
    }

    // Guarantee endpoints must share the company.
    let entity_ids: Vec<i64> = entities.iter().map(|e| e.id).collect();
    let instrument_ids: Vec<i64> = instruments.iter().map(|i| i.id).collect();
    for guarantee in store.list_guarantees(company_id)? {
        if !entity_ids.contains(&guarantee.guarantor_entity_id)
            || !instrument_ids.contains(&guarantee.debt_instrument_id)
        {
            findings.push(QcFinding {
                severity: Severity::Critical,
                ticker: ticker.to_string(),
                invariant: "guarantee_scope",
                detail: format!("guarantee {} crosses company boundaries", guarantee.id),
            });
        }
    }

    // Identifier shape and date ordering.
    for instrument in &instruments {
        if let Some(cusip) = &instrument.cusip {
            if !is_valid_cusip(cusip) {
                findings.push(QcFinding {
                    severity: Severity::Error,
                    ticker: ticker.to_string(),
                    invariant: "cusip_shape",
                    detail: format!("{}: CUSIP {:?}", instrument.name, cusip),
                });
            }
        }
        if let Some(isin) = &instrument.isin {
            if !is_valid_isin(isin) {
                findings.push(QcFinding {
                    severity: Severity::Error,
                    ticker: ticker.to_string(),
                    invariant: "isin_shape",
                    detail: format!("{}: ISIN {:?}", instrument.name, isin),
                });
            }
        }
        if let (Some(issue), Some(maturity)) = (instrument.issue_date, instrument.maturity_date) {
            if maturity < issue {
                findings.push(QcFinding {
                    severity: Severity::Error,
                    ticker: ticker.to_string(),
                    invariant: "date_order",
                    detail: format!(
                        "{}: maturity {} before issue {}",
                        instrument.name, maturity, issue
                    ),
                });
            }
        }
    }

    // Metric sanity.
    if let Some(metrics) = store.get_metrics(company_id)? {
        if let Some(leverage) = metrics.leverage_ratio {
            if !(0.0..=100.0).contains(&leverage) {
                findings.push(QcFinding {
                    severity: Severity::Error,
                    ticker: ticker.to_string(),
                    invariant: "metric_sanity",
                    detail: format!("stored leverage_ratio {:.1} out of range", leverage),
                });
            }
        }
        if let Some(wam) = metrics.weighted_avg_maturity {
            if !(0.0..=100.0).contains(&wam) {
                findings.push(QcFinding {
                    severity: Severity::Error,
                    ticker: ticker.to_string(),
                    invariant: "metric_sanity",
                    detail: format!("stored weighted_avg_maturity {:.1} out of range", wam),
                });
            }
        }
    }

    // Instrument sum vs reported total debt: flagged, never reconciled.
    let instrument_sum: i64 = instruments
        .iter()
        .filter(|i| i.is_active)
        .filter_map(|i| i.outstanding_cents)
        .sum();
    let reported = store
        .list_financial_periods(company_id)?
        .first()
        .and_then(|p| p.total_debt_cents);
    if let Some(reported) = reported {
        if reported > 0 && instrument_sum > reported * 2 {
            findings.push(QcFinding {
                severity: Severity::Warning,
                ticker: ticker.to_string(),
                invariant: "debt_excess",
                detail: format!(
                    "instrument outstanding {} exceeds 2x reported total debt {}",
                    instrument_sum, reported
                ),
            });
        }
    }

    Ok(())
}

/// Whether the findings warrant a non-zero exit.
pub fn has_blocking_findings(findings: &[QcFinding]) -> bool {
    findings
        .iter()
        .any(|f| f.severity >= Severity::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use debtstack_data::store::{DebtInstrument, EntityType, Provenance, Seniority};

    fn secured(company_id: i64, name: &str, confidence: Option<&str>) -> DebtInstrument {
        DebtInstrument {
            id: 0,
            company_id,
            issuer_entity_id: None,
            name: name.to_string(),
            seniority: Seniority::SeniorSecured,
            security_type: None,
            interest_rate_bps: None,
            is_floating: false,
            benchmark: None,
            spread_bps: None,
            floor_bps: None,
            issue_date: None,
            maturity_date: NaiveDate::from_ymd_opt(2030, 1, 1),
            principal_cents: None,
            outstanding_cents: Some(1_000),
            is_drawn: false,
            is_active: true,
            cusip: None,
            isin: None,
            currency: "USD".to_string(),
            collateral_data_confidence: confidence.map(str::to_string),
            attributes: serde_json::json!({}),
            provenance: Provenance::default(),
        }
    }

    #[test]
    fn test_secured_invariant() {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();

        // Unknown tag satisfies the invariant.
        store
            .insert_debt_instrument(&secured(company, "Tagged Notes", Some("unknown")))
            .unwrap();
        let findings = run_audit(&store).unwrap();
        assert!(findings.iter().all(|f| f.invariant != "secured_collateral"));

        // Untagged secured instrument without collateral is critical.
        store
            .insert_debt_instrument(&secured(company, "Untagged Notes", None))
            .unwrap();
        let findings = run_audit(&store).unwrap();
        assert!(findings
            .iter()
            .any(|f| f.invariant == "secured_collateral" && f.severity == Severity::Critical));
        assert!(has_blocking_findings(&findings));
    }

    #[test]
    fn test_multiple_roots_flagged() {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let a = store
            .upsert_entity(company, "Root A", None, EntityType::Holdco, false, false)
            .unwrap();
        let b = store
            .upsert_entity(company, "Root B", None, EntityType::Holdco, false, false)
            .unwrap();
        store.set_entity_parent(a, None, true).unwrap();
        store.set_entity_parent(b, None, true).unwrap();

        let findings = run_audit(&store).unwrap();
        assert!(findings.iter().any(|f| f.invariant == "single_root"));
    }

    #[test]
    fn test_clean_database_has_no_blocking_findings() {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let root = store
            .upsert_entity(company, "Acme Holdings", None, EntityType::Holdco, false, false)
            .unwrap();
        store.set_entity_parent(root, None, true).unwrap();

        let findings = run_audit(&store).unwrap();
        assert!(!has_blocking_findings(&findings));
    }
}
