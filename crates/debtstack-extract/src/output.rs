//! Typed front door for raw model output.
//!
//! Model JSON is coerced field-by-field into these candidate types, then
//! validated: reference integrity (issuers, parents and guarantors must
//! resolve to extracted entities), identifier shape, date ordering and the
//! monetary plausibility band. Nothing reaches the store without passing
//! through here.

use crate::error::{ExtractError, Result};
use chrono::NaiveDate;
use debtstack_data::scale::{apply_scale, MoneyScale};
use debtstack_data::store::{is_valid_cusip, is_valid_isin, slugify, EntityType, Seniority};
use debtstack_llm::coerce::{as_bool, as_clean_string, as_float, as_int, ensure_array};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Plausibility band for a single instrument's outstanding amount, in raw
/// dollars: $10K to $10T. Values outside it are validation failures, not
/// facts.
const MIN_PLAUSIBLE_DOLLARS: f64 = 1e4;
const MAX_PLAUSIBLE_DOLLARS: f64 = 1e13;

/// Candidate entity from the core extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntity {
    /// Legal name
    pub name: String,
    /// Jurisdiction, when disclosed
    pub jurisdiction: Option<String>,
    /// Classification
    pub entity_type: EntityType,
    /// Declared parent entity name
    pub parent_name: Option<String>,
    /// Guarantees registered debt
    pub is_guarantor: bool,
    /// Outside the restricted group
    pub is_unrestricted: bool,
    /// Extractor confidence
    pub confidence: Option<f64>,
}

/// Candidate debt instrument from the core extraction. Amounts are raw
/// (as printed); the scale is applied by [`RawExtraction::apply_scale`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDebt {
    /// Instrument name
    pub name: String,
    /// Issuer entity name
    pub issuer_name: Option<String>,
    /// Seniority
    pub seniority: Seniority,
    /// Security type label
    pub security_type: Option<String>,
    /// Fixed coupon in basis points
    pub interest_rate_bps: Option<i64>,
    /// Floating-rate flag
    pub is_floating: bool,
    /// Floating benchmark
    pub benchmark: Option<String>,
    /// Spread in basis points
    pub spread_bps: Option<i64>,
    /// Floor in basis points
    pub floor_bps: Option<i64>,
    /// Issue date
    pub issue_date: Option<NaiveDate>,
    /// Maturity date
    pub maturity_date: Option<NaiveDate>,
    /// Principal as printed (raw units)
    pub principal_raw: Option<f64>,
    /// Outstanding as printed (raw units)
    pub outstanding_raw: Option<f64>,
    /// Declared reason for a null outstanding
    pub outstanding_null_reason: Option<String>,
    /// Principal in cents after scaling
    pub principal_cents: Option<i64>,
    /// Outstanding in cents after scaling
    pub outstanding_cents: Option<i64>,
    /// CUSIP, when printed
    pub cusip: Option<String>,
    /// ISIN, when printed
    pub isin: Option<String>,
    /// Currency code
    pub currency: String,
    /// Declared guarantor names
    pub guarantor_names: Vec<String>,
    /// Extractor confidence
    pub confidence: Option<f64>,
    /// Per-field confidence object
    pub field_confidence: Value,
}

/// The core extraction candidate set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExtraction {
    /// Candidate entities
    pub entities: Vec<RawEntity>,
    /// Candidate instruments
    pub debt_instruments: Vec<RawDebt>,
    /// Company discloses only aggregate debt
    pub aggregate_only: bool,
    /// Warnings accumulated during coercion
    pub warnings: Vec<String>,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Machine-readable code
    pub code: String,
    /// Human-readable detail
    pub detail: String,
}

impl RawExtraction {
    /// Coerce a parsed model payload into the candidate set.
    ///
    /// Tolerates a single object where a list is expected and drops
    /// malformed items with a warning rather than failing the extraction.
    pub fn from_value(payload: &Value) -> Result<Self> {
        let mut extraction = Self {
            aggregate_only: as_bool(&payload["aggregate_only"]).unwrap_or(false),
            ..Self::default()
        };

        for item in ensure_array(&payload["entities"]) {
            match coerce_entity(&item) {
                Some(entity) => extraction.entities.push(entity),
                None => extraction
                    .warnings
                    .push(format!("dropped malformed entity: {}", truncate(&item))),
            }
        }

        for item in ensure_array(&payload["debt_instruments"]) {
            match coerce_debt(&item) {
                Some(debt) => extraction.debt_instruments.push(debt),
                None => extraction
                    .warnings
                    .push(format!("dropped malformed instrument: {}", truncate(&item))),
            }
        }

        if extraction.entities.is_empty() && extraction.debt_instruments.is_empty() {
            return Err(ExtractError::Validation(
                "extraction carries no entities and no instruments".to_string(),
            ));
        }

        Ok(extraction)
    }

    /// Apply the detected monetary scale to raw amounts.
    pub fn apply_scale(&mut self, scale: MoneyScale) {
        for debt in &mut self.debt_instruments {
            debt.principal_cents = debt.principal_raw.map(|raw| apply_scale(scale, raw));
            debt.outstanding_cents = debt.outstanding_raw.map(|raw| apply_scale(scale, raw));
        }
    }

    /// Structural and plausibility validation.
    ///
    /// Reference failures are hard errors (they poison the graph); band and
    /// identifier defects degrade to warnings on the specific field.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let known: HashSet<String> = self.entities.iter().map(|e| slugify(&e.name)).collect();

        for entity in &self.entities {
            if let Some(parent) = &entity.parent_name {
                if !known.contains(&slugify(parent)) {
                    issues.push(ValidationIssue {
                        code: "orphan_parent".to_string(),
                        detail: format!("{} declares unknown parent {}", entity.name, parent),
                    });
                }
            }
        }

        for debt in &self.debt_instruments {
            if let Some(issuer) = &debt.issuer_name {
                if !known.contains(&slugify(issuer)) {
                    issues.push(ValidationIssue {
                        code: "orphan_issuer".to_string(),
                        detail: format!("{} declares unknown issuer {}", debt.name, issuer),
                    });
                }
            }
            for guarantor in &debt.guarantor_names {
                if !known.contains(&slugify(guarantor)) {
                    issues.push(ValidationIssue {
                        code: "orphan_guarantor".to_string(),
                        detail: format!("{} declares unknown guarantor {}", debt.name, guarantor),
                    });
                }
            }

            if debt.outstanding_raw.is_none()
                && debt.outstanding_null_reason.is_none()
                && !self.aggregate_only
            {
                issues.push(ValidationIssue {
                    code: "unexplained_null_amount".to_string(),
                    detail: format!("{} has no outstanding and no stated reason", debt.name),
                });
            }

            if let Some(raw) = debt.outstanding_raw {
                // The raw value is at most off by the scale multiplier, so the
                // band check runs on the scaled value when present.
                let dollars = debt
                    .outstanding_cents
                    .map(|c| c as f64 / 100.0)
                    .unwrap_or(raw);
                if !(MIN_PLAUSIBLE_DOLLARS..=MAX_PLAUSIBLE_DOLLARS).contains(&dollars) {
                    issues.push(ValidationIssue {
                        code: "implausible_amount".to_string(),
                        detail: format!("{}: ${:.0} outside plausibility band", debt.name, dollars),
                    });
                }
            }

            if let Some(cusip) = &debt.cusip {
                if !is_valid_cusip(cusip) {
                    issues.push(ValidationIssue {
                        code: "bad_cusip".to_string(),
                        detail: format!("{}: CUSIP {:?} malformed", debt.name, cusip),
                    });
                }
            }
            if let Some(isin) = &debt.isin {
                if !is_valid_isin(isin) {
                    issues.push(ValidationIssue {
                        code: "bad_isin".to_string(),
                        detail: format!("{}: ISIN {:?} malformed", debt.name, isin),
                    });
                }
            }

            if let (Some(issue), Some(maturity)) = (debt.issue_date, debt.maturity_date) {
                if maturity < issue {
                    issues.push(ValidationIssue {
                        code: "inverted_dates".to_string(),
                        detail: format!(
                            "{}: maturity {} before issue {}",
                            debt.name, maturity, issue
                        ),
                    });
                }
            }
        }

        issues
    }

    /// Whether an issue list contains reference-integrity failures, which
    /// block the merge (others degrade to warnings).
    pub fn has_blocking_issues(issues: &[ValidationIssue]) -> bool {
        issues.iter().any(|issue| {
            matches!(
                issue.code.as_str(),
                "orphan_parent" | "orphan_issuer" | "orphan_guarantor" | "inverted_dates"
            )
        })
    }
}

/// Percent (as printed) to basis points.
fn percent_to_bps(value: &Value) -> Option<i64> {
    as_float(value).map(|pct| (pct * 100.0).round() as i64)
}

fn coerce_date(value: &Value) -> Option<NaiveDate> {
    let s = as_clean_string(value)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()
}

fn coerce_entity(item: &Value) -> Option<RawEntity> {
    let name = as_clean_string(&item["name"])?;
    let entity_type = as_clean_string(&item["entity_type"])
        .and_then(|s| EntityType::parse(&s))
        .unwrap_or(EntityType::Subsidiary);
    Some(RawEntity {
        name,
        jurisdiction: as_clean_string(&item["jurisdiction"]),
        entity_type,
        parent_name: as_clean_string(&item["parent_name"]),
        is_guarantor: as_bool(&item["is_guarantor"]).unwrap_or(false),
        is_unrestricted: as_bool(&item["is_unrestricted"]).unwrap_or(false),
        confidence: as_float(&item["confidence"]),
    })
}

fn coerce_debt(item: &Value) -> Option<RawDebt> {
    let name = as_clean_string(&item["name"])?;
    let seniority = as_clean_string(&item["seniority"])
        .and_then(|s| Seniority::parse(&s))
        .unwrap_or(Seniority::SeniorUnsecured);

    let guarantor_names = ensure_array(&item["guarantor_names"])
        .iter()
        .filter_map(as_clean_string)
        .collect();

    Some(RawDebt {
        name,
        issuer_name: as_clean_string(&item["issuer_name"]),
        seniority,
        security_type: as_clean_string(&item["security_type"]),
        interest_rate_bps: percent_to_bps(&item["interest_rate"]),
        is_floating: as_bool(&item["is_floating"]).unwrap_or(false),
        benchmark: as_clean_string(&item["benchmark"]),
        spread_bps: percent_to_bps(&item["spread"]),
        floor_bps: percent_to_bps(&item["floor"]),
        issue_date: coerce_date(&item["issue_date"]),
        maturity_date: coerce_date(&item["maturity_date"]),
        principal_raw: as_float(&item["principal"]).or_else(|| as_int(&item["principal"]).map(|i| i as f64)),
        outstanding_raw: as_float(&item["outstanding"])
            .or_else(|| as_int(&item["outstanding"]).map(|i| i as f64)),
        outstanding_null_reason: as_clean_string(&item["outstanding_null_reason"]),
        principal_cents: None,
        outstanding_cents: None,
        cusip: as_clean_string(&item["cusip"]).map(|c| c.to_uppercase()),
        isin: as_clean_string(&item["isin"]).map(|c| c.to_uppercase()),
        currency: as_clean_string(&item["currency"]).unwrap_or_else(|| "USD".to_string()),
        guarantor_names,
        confidence: as_float(&item["confidence"]),
        field_confidence: item
            .get("field_confidence")
            .cloned()
            .unwrap_or(Value::Null),
    })
}

fn truncate(value: &Value) -> String {
    let s = value.to_string();
    s.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "entities": [
                {"name": "Acme Holdings Inc.", "entity_type": "holdco", "parent_name": null,
                 "jurisdiction": "Delaware", "is_guarantor": false, "confidence": 0.95},
                {"name": "Acme Finance LLC", "entity_type": "finco",
                 "parent_name": "Acme Holdings Inc.", "is_guarantor": "yes", "confidence": 0.9}
            ],
            "debt_instruments": [
                {"name": "4.25% Senior Notes due 2031", "issuer_name": "Acme Finance LLC",
                 "seniority": "senior_unsecured", "interest_rate": 4.25, "is_floating": false,
                 "maturity_date": "2031-03-15", "issue_date": "2021-03-15",
                 "principal": 500, "outstanding": "500", "currency": "USD",
                 "guarantor_names": ["Acme Holdings Inc."], "confidence": 0.9,
                 "cusip": "037833ab1"}
            ],
            "aggregate_only": false
        })
    }

    #[test]
    fn test_coercion_round_trip() {
        let extraction = RawExtraction::from_value(&payload()).unwrap();
        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(extraction.debt_instruments.len(), 1);

        let debt = &extraction.debt_instruments[0];
        assert_eq!(debt.interest_rate_bps, Some(425));
        assert_eq!(debt.outstanding_raw, Some(500.0));
        // Identifier uppercased at the boundary.
        assert_eq!(debt.cusip.as_deref(), Some("037833AB1"));
        // String "yes" coerced for the guarantor flag.
        assert!(extraction.entities[1].is_guarantor);
    }

    #[test]
    fn test_scale_applied_after_coercion() {
        let mut extraction = RawExtraction::from_value(&payload()).unwrap();
        extraction.apply_scale(MoneyScale::Millions);
        let debt = &extraction.debt_instruments[0];
        assert_eq!(debt.outstanding_cents, Some(50_000_000_000));
        assert_eq!(debt.principal_cents, Some(50_000_000_000));
    }

    #[test]
    fn test_single_object_becomes_list() {
        let payload = json!({
            "entities": {"name": "Solo Corp", "entity_type": "holdco"},
            "debt_instruments": [],
            "aggregate_only": false
        });
        let extraction = RawExtraction::from_value(&payload).unwrap();
        assert_eq!(extraction.entities.len(), 1);
    }

    #[test]
    fn test_orphan_issuer_blocks() {
        let mut value = payload();
        value["debt_instruments"][0]["issuer_name"] = json!("Phantom Finance BV");
        let extraction = RawExtraction::from_value(&value).unwrap();
        let issues = extraction.validate();
        assert!(issues.iter().any(|i| i.code == "orphan_issuer"));
        assert!(RawExtraction::has_blocking_issues(&issues));
    }

    #[test]
    fn test_null_amount_needs_reason() {
        let mut value = payload();
        value["debt_instruments"][0]["outstanding"] = Value::Null;
        let extraction = RawExtraction::from_value(&value).unwrap();
        let issues = extraction.validate();
        assert!(issues.iter().any(|i| i.code == "unexplained_null_amount"));
        // A non-blocking defect: merge proceeds with warnings.
        assert!(!RawExtraction::has_blocking_issues(&issues));
    }

    #[test]
    fn test_aggregate_only_excuses_null_amounts() {
        let mut value = payload();
        value["debt_instruments"][0]["outstanding"] = Value::Null;
        value["aggregate_only"] = json!(true);
        let extraction = RawExtraction::from_value(&value).unwrap();
        let issues = extraction.validate();
        assert!(!issues.iter().any(|i| i.code == "unexplained_null_amount"));
    }

    #[test]
    fn test_plausibility_band() {
        let mut value = payload();
        value["debt_instruments"][0]["outstanding"] = json!(2.5);
        let mut extraction = RawExtraction::from_value(&value).unwrap();
        extraction.apply_scale(MoneyScale::Dollars);
        let issues = extraction.validate();
        assert!(issues.iter().any(|i| i.code == "implausible_amount"));
    }

    #[test]
    fn test_bad_cusip_flagged() {
        let mut value = payload();
        value["debt_instruments"][0]["cusip"] = json!("12345");
        let extraction = RawExtraction::from_value(&value).unwrap();
        let issues = extraction.validate();
        assert!(issues.iter().any(|i| i.code == "bad_cusip"));
    }

    #[test]
    fn test_inverted_dates_block() {
        let mut value = payload();
        value["debt_instruments"][0]["maturity_date"] = json!("2020-01-01");
        let extraction = RawExtraction::from_value(&value).unwrap();
        let issues = extraction.validate();
        assert!(issues.iter().any(|i| i.code == "inverted_dates"));
        assert!(RawExtraction::has_blocking_issues(&issues));
    }

    #[test]
    fn test_empty_extraction_is_error() {
        let result = RawExtraction::from_value(&json!({"entities": [], "debt_instruments": []}));
        assert!(matches!(result, Err(ExtractError::Validation(_))));
    }
}
