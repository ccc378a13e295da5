//! The five verification checks.

use crate::core::request_json;
use crate::error::Result;
use crate::output::RawExtraction;
use crate::prompts;
use crate::qa::{CheckResult, CheckStatus, Finding};
use debtstack_data::store::slugify;
use debtstack_llm::coerce::{as_clean_string, as_int, ensure_array};
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use std::collections::{HashMap, HashSet};

/// Check 1, internal consistency (pure). Every parent/issuer/guarantor
/// reference must resolve to an extracted entity. Any orphan fails.
pub fn internal_consistency(extraction: &RawExtraction) -> CheckResult {
    let known: HashSet<String> = extraction
        .entities
        .iter()
        .map(|e| slugify(&e.name))
        .collect();
    let mut findings = Vec::new();

    for entity in &extraction.entities {
        if let Some(parent) = &entity.parent_name {
            if !known.contains(&slugify(parent)) {
                findings.push(Finding::new(
                    "orphan_parent",
                    Some(entity.name.clone()),
                    format!("parent {:?} not extracted", parent),
                ));
            }
        }
    }
    for debt in &extraction.debt_instruments {
        if let Some(issuer) = &debt.issuer_name {
            if !known.contains(&slugify(issuer)) {
                findings.push(Finding::new(
                    "orphan_issuer",
                    Some(debt.name.clone()),
                    format!("issuer {:?} not extracted", issuer),
                ));
            }
        }
        for guarantor in &debt.guarantor_names {
            if !known.contains(&slugify(guarantor)) {
                findings.push(Finding::new(
                    "orphan_guarantor",
                    Some(debt.name.clone()),
                    format!("guarantor {:?} not extracted", guarantor),
                ));
            }
        }
    }

    CheckResult {
        name: "internal_consistency".to_string(),
        status: if findings.is_empty() {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        },
        findings,
    }
}

/// Check 2, entity coverage vs Exhibit 21 (model-backed).
/// ≥80% PASS, 50–80% WARN, <50% FAIL; no exhibit → SKIP.
pub async fn entity_coverage(
    client: &dyn ChatClient,
    extraction: &RawExtraction,
    exhibit21: Option<&str>,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<CheckResult> {
    let Some(exhibit) = exhibit21 else {
        return Ok(CheckResult {
            name: "entity_verification".to_string(),
            status: CheckStatus::Skip,
            findings: vec![Finding::new("no_exhibit_21", None, "Exhibit 21 absent")],
        });
    };

    let entity_names: Vec<String> = extraction.entities.iter().map(|e| e.name.clone()).collect();
    let user = format!(
        "Extracted entities:\n{}\n\nExhibit 21:\n{}",
        entity_names.join("\n"),
        exhibit
    );
    let (value, _) = request_json(
        client,
        "qa_entities",
        prompts::SYSTEM_QA_ENTITIES,
        &user,
        tier,
        usage,
    )
    .await?;

    let total = as_int(&value["exhibit_entities"]).unwrap_or(0).max(0);
    let matched = as_int(&value["matched"]).unwrap_or(0).clamp(0, total);
    let missing: Vec<String> = ensure_array(&value["missing"])
        .iter()
        .filter_map(as_clean_string)
        .collect();

    let coverage = if total == 0 {
        1.0
    } else {
        matched as f64 / total as f64
    };
    let status = if coverage >= 0.8 {
        CheckStatus::Pass
    } else if coverage >= 0.5 {
        CheckStatus::Warn
    } else {
        CheckStatus::Fail
    };

    let findings = missing
        .into_iter()
        .map(|name| {
            Finding::new(
                "missing_entity",
                Some(name.clone()),
                format!("{} listed in Exhibit 21 but not extracted", name),
            )
        })
        .collect();

    Ok(CheckResult {
        name: "entity_verification".to_string(),
        status,
        findings,
    })
}

/// Check 3, debt amounts vs footnote (model-backed).
/// All within ±10% PASS; some off or missing WARN; wholesale scale
/// mismatch FAIL. Pre-check: all-null amounts short-circuit to WARN
/// (aggregate-only disclosure) without a model call.
pub async fn debt_amounts(
    client: &dyn ChatClient,
    extraction: &RawExtraction,
    footnote: Option<&str>,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<CheckResult> {
    if extraction.debt_instruments.is_empty() {
        return Ok(CheckResult {
            name: "debt_verification".to_string(),
            status: CheckStatus::Skip,
            findings: vec![Finding::new("no_instruments", None, "nothing to verify")],
        });
    }

    let all_null = extraction
        .debt_instruments
        .iter()
        .all(|d| d.outstanding_raw.is_none());
    if all_null {
        return Ok(CheckResult {
            name: "debt_verification".to_string(),
            status: CheckStatus::Warn,
            findings: vec![Finding::new(
                "aggregate_only",
                None,
                "all instruments carry null outstanding (aggregate-only disclosure)",
            )],
        });
    }

    let Some(footnote) = footnote else {
        return Ok(CheckResult {
            name: "debt_verification".to_string(),
            status: CheckStatus::Skip,
            findings: vec![Finding::new("no_footnote", None, "debt footnote absent")],
        });
    };

    let listing: Vec<String> = extraction
        .debt_instruments
        .iter()
        .map(|d| {
            format!(
                "{}: {}",
                d.name,
                d.outstanding_raw
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".to_string())
            )
        })
        .collect();
    let user = format!(
        "Extracted amounts (raw units):\n{}\n\nDebt footnote:\n{}",
        listing.join("\n"),
        footnote
    );
    let (value, _) = request_json(
        client,
        "qa_debt",
        prompts::SYSTEM_QA_DEBT,
        &user,
        tier,
        usage,
    )
    .await?;

    let mut off = 0usize;
    let mut scale_mismatch = 0usize;
    let mut total = 0usize;
    let mut findings = Vec::new();

    for item in ensure_array(&value["comparisons"]) {
        total += 1;
        let instrument = as_clean_string(&item["instrument"]);
        match as_clean_string(&item["verdict"]).as_deref() {
            Some("match") => {}
            Some("scale_mismatch") => {
                scale_mismatch += 1;
                findings.push(Finding::new(
                    "scale_mismatch",
                    instrument,
                    "amount off by a scale factor vs footnote",
                ));
            }
            Some(other) => {
                off += 1;
                findings.push(Finding::new(
                    "amount_off",
                    instrument,
                    format!("verdict: {}", other),
                ));
            }
            None => {}
        }
    }

    let status = if total > 0 && scale_mismatch * 2 > total {
        CheckStatus::Fail
    } else if off + scale_mismatch > 0 {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };

    Ok(CheckResult {
        name: "debt_verification".to_string(),
        status,
        findings,
    })
}

/// Check 4, completeness vs source (model-backed). ≥80% of material items
/// present PASS; 50–80% WARN; below that FAIL.
pub async fn completeness(
    client: &dyn ChatClient,
    extraction: &RawExtraction,
    bundle_text: &str,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<CheckResult> {
    if bundle_text.trim().is_empty() {
        return Ok(CheckResult {
            name: "completeness".to_string(),
            status: CheckStatus::Skip,
            findings: vec![Finding::new("no_source", None, "no source text")],
        });
    }

    let summary = format!(
        "Entities extracted: {}\nInstruments extracted: {}",
        extraction
            .entities
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        extraction
            .debt_instruments
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    );
    let user = format!("{}\n\nSource excerpts:\n{}", summary, bundle_text);
    let (value, _) = request_json(
        client,
        "qa_completeness",
        prompts::SYSTEM_QA_COMPLETENESS,
        &user,
        tier,
        usage,
    )
    .await?;

    let material = as_int(&value["material_items"]).unwrap_or(0).max(0);
    let present = as_int(&value["present"]).unwrap_or(0).clamp(0, material);
    let ratio = if material == 0 {
        1.0
    } else {
        present as f64 / material as f64
    };

    let findings = ensure_array(&value["missing"])
        .iter()
        .filter_map(as_clean_string)
        .map(|item| {
            Finding::new(
                "missing_material_item",
                Some(item.clone()),
                format!("{} appears in source but not in extraction", item),
            )
        })
        .collect();

    let status = if ratio >= 0.8 {
        CheckStatus::Pass
    } else if ratio >= 0.5 {
        CheckStatus::Warn
    } else {
        CheckStatus::Fail
    };

    Ok(CheckResult {
        name: "completeness".to_string(),
        status,
        findings,
    })
}

/// Check 5, structure (pre-checks + model plausibility). Cycles or
/// multiple unjustified roots fail before any model call.
pub async fn structure(
    client: &dyn ChatClient,
    extraction: &RawExtraction,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<CheckResult> {
    let mut findings = Vec::new();

    // Pre-check: root count over the declared-parent forest.
    let roots: Vec<&str> = extraction
        .entities
        .iter()
        .filter(|e| e.parent_name.is_none())
        .map(|e| e.name.as_str())
        .collect();
    if roots.is_empty() && !extraction.entities.is_empty() {
        findings.push(Finding::new("no_root", None, "every entity declares a parent"));
    }

    // Pre-check: cycles in parent declarations.
    let parent_of: HashMap<String, String> = extraction
        .entities
        .iter()
        .filter_map(|e| {
            e.parent_name
                .as_ref()
                .map(|p| (slugify(&e.name), slugify(p)))
        })
        .collect();
    for entity in &extraction.entities {
        let mut seen = HashSet::new();
        let mut cursor = slugify(&entity.name);
        while let Some(parent) = parent_of.get(&cursor) {
            if !seen.insert(cursor.clone()) {
                findings.push(Finding::new(
                    "ownership_cycle",
                    Some(entity.name.clone()),
                    "cycle in declared parents",
                ));
                break;
            }
            cursor = parent.clone();
        }
    }

    if findings.iter().any(|f| f.code == "ownership_cycle") {
        return Ok(CheckResult {
            name: "structure".to_string(),
            status: CheckStatus::Fail,
            findings,
        });
    }

    if extraction.entities.is_empty() {
        return Ok(CheckResult {
            name: "structure".to_string(),
            status: CheckStatus::Skip,
            findings: vec![Finding::new("no_entities", None, "no hierarchy to check")],
        });
    }

    // Model pass: plausibility and dual-root justification.
    let listing: Vec<String> = extraction
        .entities
        .iter()
        .map(|e| {
            format!(
                "{} (type: {}, parent: {})",
                e.name,
                e.entity_type.as_str(),
                e.parent_name.as_deref().unwrap_or("none")
            )
        })
        .collect();
    let (value, _) = request_json(
        client,
        "qa_structure",
        prompts::SYSTEM_QA_STRUCTURE,
        &listing.join("\n"),
        tier,
        usage,
    )
    .await?;

    let model_roots: Vec<String> = ensure_array(&value["roots"])
        .iter()
        .filter_map(as_clean_string)
        .collect();
    let dual_justified = as_clean_string(&value["dual_listed_justification"]).is_some();
    for item in ensure_array(&value["implausible"]) {
        if let Some(detail) = as_clean_string(&item) {
            findings.push(Finding::new("implausible_tiering", None, detail));
        }
    }

    let effective_roots = if model_roots.is_empty() {
        roots.len()
    } else {
        model_roots.len()
    };
    let status = if effective_roots > 1 && !dual_justified {
        for root in &model_roots {
            findings.push(Finding::new(
                "extra_root",
                Some(root.clone()),
                "multiple roots without dual-listed justification",
            ));
        }
        CheckStatus::Fail
    } else if findings.is_empty() {
        CheckStatus::Pass
    } else {
        CheckStatus::Warn
    };

    Ok(CheckResult {
        name: "structure".to_string(),
        status,
        findings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{RawEntity, RawDebt};
    use crate::qa::{run_qa, QaSources};
    use crate::testutil::ScriptedClient;
    use debtstack_data::store::{EntityType, Seniority};
    use serde_json::Value;

    fn entity(name: &str, parent: Option<&str>) -> RawEntity {
        RawEntity {
            name: name.to_string(),
            jurisdiction: None,
            entity_type: EntityType::Subsidiary,
            parent_name: parent.map(str::to_string),
            is_guarantor: false,
            is_unrestricted: false,
            confidence: None,
        }
    }

    fn debt(name: &str, issuer: Option<&str>, outstanding: Option<f64>) -> RawDebt {
        RawDebt {
            name: name.to_string(),
            issuer_name: issuer.map(str::to_string),
            seniority: Seniority::SeniorUnsecured,
            security_type: None,
            interest_rate_bps: None,
            is_floating: false,
            benchmark: None,
            spread_bps: None,
            floor_bps: None,
            issue_date: None,
            maturity_date: None,
            principal_raw: None,
            outstanding_raw: outstanding,
            outstanding_null_reason: None,
            principal_cents: None,
            outstanding_cents: outstanding.map(|v| (v * 100.0) as i64),
            cusip: None,
            isin: None,
            currency: "USD".to_string(),
            guarantor_names: Vec::new(),
            confidence: None,
            field_confidence: Value::Null,
        }
    }

    fn extraction() -> RawExtraction {
        RawExtraction {
            entities: vec![
                entity("Acme Holdings Inc.", None),
                entity("Acme Finance LLC", Some("Acme Holdings Inc.")),
            ],
            debt_instruments: vec![debt(
                "4.25% Senior Notes due 2031",
                Some("Acme Finance LLC"),
                Some(500.0),
            )],
            aggregate_only: false,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_internal_consistency_pass_and_fail() {
        let good = extraction();
        assert_eq!(internal_consistency(&good).status, CheckStatus::Pass);

        let mut bad = extraction();
        bad.debt_instruments[0].issuer_name = Some("Phantom BV".to_string());
        let result = internal_consistency(&bad);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.findings[0].code, "orphan_issuer");
    }

    #[tokio::test]
    async fn test_entity_coverage_skip_without_exhibit() {
        let client = ScriptedClient::new(vec![]);
        let mut usage = UsageRecord::default();
        let result = entity_coverage(&client, &extraction(), None, ModelTier::Fast, &mut usage)
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Skip);
        // No model call spent.
        assert_eq!(usage.calls, 0);
    }

    #[rstest::rstest]
    #[case(10, 9, CheckStatus::Pass)]
    #[case(10, 6, CheckStatus::Warn)]
    #[case(10, 3, CheckStatus::Fail)]
    #[tokio::test]
    async fn test_entity_coverage_thresholds(
        #[case] total: i64,
        #[case] matched: i64,
        #[case] expected: CheckStatus,
    ) {
        let response = format!(
            r#"{{"exhibit_entities": {}, "matched": {}, "missing": ["Acme Shelf Co"]}}"#,
            total, matched
        );
        let client = ScriptedClient::new(vec![&response]);
        let mut usage = UsageRecord::default();
        let result = entity_coverage(
            &client,
            &extraction(),
            Some("exhibit text"),
            ModelTier::Fast,
            &mut usage,
        )
        .await
        .unwrap();
        assert_eq!(result.status, expected);
    }

    #[tokio::test]
    async fn test_debt_all_null_short_circuits_to_warn() {
        let mut ex = extraction();
        ex.debt_instruments = vec![
            debt("Tranche A", None, None),
            debt("Tranche B", None, None),
        ];
        let client = ScriptedClient::new(vec![]);
        let mut usage = UsageRecord::default();
        let result = debt_amounts(&client, &ex, Some("footnote"), ModelTier::Fast, &mut usage)
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Warn);
        assert_eq!(result.findings[0].code, "aggregate_only");
        assert_eq!(usage.calls, 0);
    }

    #[tokio::test]
    async fn test_debt_wholesale_scale_mismatch_fails() {
        let client = ScriptedClient::new(vec![
            r#"{"comparisons": [
                {"instrument": "A", "verdict": "scale_mismatch"},
                {"instrument": "B", "verdict": "scale_mismatch"},
                {"instrument": "C", "verdict": "match"}
            ]}"#,
        ]);
        let mut usage = UsageRecord::default();
        let result = debt_amounts(
            &client,
            &extraction(),
            Some("footnote"),
            ModelTier::Fast,
            &mut usage,
        )
        .await
        .unwrap();
        assert_eq!(result.status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn test_structure_cycle_fails_without_model_call() {
        let mut ex = extraction();
        ex.entities = vec![
            entity("A Corp", Some("B Corp")),
            entity("B Corp", Some("A Corp")),
        ];
        let client = ScriptedClient::new(vec![]);
        let mut usage = UsageRecord::default();
        let result = structure(&client, &ex, ModelTier::Fast, &mut usage).await.unwrap();
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.findings.iter().any(|f| f.code == "ownership_cycle"));
        assert_eq!(usage.calls, 0);
    }

    #[tokio::test]
    async fn test_full_qa_score() {
        // Checks 2-5 scripted: coverage PASS, debt PASS, completeness PASS,
        // structure PASS → 100.
        let client = ScriptedClient::new(vec![
            r#"{"exhibit_entities": 10, "matched": 10, "missing": []}"#,
            r#"{"comparisons": [{"instrument": "4.25% Senior Notes due 2031", "verdict": "match"}]}"#,
            r#"{"material_items": 5, "present": 5, "missing": []}"#,
            r#"{"roots": ["Acme Holdings Inc."], "cycles": [], "implausible": [], "dual_listed_justification": null}"#,
        ]);
        let mut usage = UsageRecord::default();
        let sources = QaSources {
            exhibit21: Some("exhibit"),
            debt_footnote: Some("footnote"),
            bundle_text: "bundle",
        };
        let report = run_qa(&client, &extraction(), &sources, ModelTier::Fast, &mut usage)
            .await
            .unwrap();
        assert_eq!(report.score, 100);
        assert!(report.passed());
    }

    #[tokio::test]
    async fn test_aggregate_only_scenario_scores_90() {
        // Seed case: aggregate-only disclosure. Debt check WARN, others PASS
        // → 90, still a passing run.
        let mut ex = extraction();
        ex.aggregate_only = true;
        for d in &mut ex.debt_instruments {
            d.outstanding_raw = None;
            d.outstanding_cents = None;
        }
        let client = ScriptedClient::new(vec![
            r#"{"exhibit_entities": 10, "matched": 10, "missing": []}"#,
            r#"{"material_items": 7, "present": 7, "missing": []}"#,
            r#"{"roots": ["Acme Holdings Inc."], "cycles": [], "implausible": [], "dual_listed_justification": null}"#,
        ]);
        let mut usage = UsageRecord::default();
        let sources = QaSources {
            exhibit21: Some("exhibit"),
            debt_footnote: Some("footnote"),
            bundle_text: "bundle",
        };
        let report = run_qa(&client, &ex, &sources, ModelTier::Fast, &mut usage)
            .await
            .unwrap();
        assert_eq!(report.score, 90);
        assert!(report.passed());
        let debt_check = &report.checks[2];
        assert_eq!(debt_check.status, CheckStatus::Warn);
    }
}
