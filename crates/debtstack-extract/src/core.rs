//! Core extractor: candidate entities and debt instruments from a bundle.

use crate::bundle::Bundle;
use crate::error::{ExtractError, Result};
use crate::output::RawExtraction;
use crate::prompts;
use debtstack_data::scale::{MoneyScale, ScaleDetection};
use debtstack_llm::json::parse_lenient;
use debtstack_llm::{ChatClient, ChatRequest, LlmError, ModelTier, UsageRecord};
use serde_json::Value;
use tracing::{info, warn};

/// A completed core extraction attempt.
#[derive(Debug, Clone)]
pub struct CoreExtraction {
    /// The validated candidate set, scale applied
    pub extraction: RawExtraction,
    /// Scale used for the amounts
    pub scale: MoneyScale,
    /// Tier that produced this attempt
    pub tier: ModelTier,
}

/// Run one chat call and parse its output as JSON, escalating one tier on
/// an unparseable response before giving up.
pub async fn request_json(
    client: &dyn ChatClient,
    step: &str,
    system: &str,
    user: &str,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<(Value, ModelTier)> {
    let mut current = tier;
    for attempt in 0..2 {
        let request = ChatRequest::extraction(system, user, current);
        let response = client.complete(&request).await?;
        usage.record(step, current, client.policy(), &response);

        match parse_lenient(&response.content) {
            Ok(value) => return Ok((value, current)),
            Err(LlmError::ParseFailure(detail)) if attempt == 0 && current.escalate() != current => {
                warn!(step, tier = current.as_str(), detail, "unparseable output; escalating tier");
                current = current.escalate();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ExtractError::Llm(LlmError::ParseFailure(format!(
        "{}: unparseable at {} tier after escalation",
        step,
        current.as_str()
    ))))
}

/// Extract candidate entities and instruments from an assembled bundle.
///
/// The model reports raw amounts; the scale detected for the debt footnote
/// region is applied here, after coercion. Validation issues are attached
/// as warnings; blocking issues are left for the QA/fix loop to resolve.
pub async fn extract_core(
    client: &dyn ChatClient,
    bundle: &Bundle,
    scale: &ScaleDetection,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<CoreExtraction> {
    if bundle.text.trim().is_empty() {
        return Err(ExtractError::NoData {
            step: "core".to_string(),
            reason: "empty bundle".to_string(),
        });
    }

    let (value, used_tier) = request_json(
        client,
        "core",
        prompts::SYSTEM_CORE,
        &bundle.text,
        tier,
        usage,
    )
    .await?;

    let mut extraction = RawExtraction::from_value(&value)?;
    extraction.apply_scale(scale.scale);
    if let Some(warning) = &scale.warning {
        extraction.warnings.push(warning.clone());
    }

    let issues = extraction.validate();
    for issue in &issues {
        extraction
            .warnings
            .push(format!("{}: {}", issue.code, issue.detail));
    }

    info!(
        entities = extraction.entities.len(),
        instruments = extraction.debt_instruments.len(),
        issues = issues.len(),
        tier = used_tier.as_str(),
        "core extraction complete"
    );

    Ok(CoreExtraction {
        extraction,
        scale: scale.scale,
        tier: used_tier,
    })
}

/// Scoped re-ask for one instrument's outstanding amount against a footnote
/// excerpt. Used by fix passes and the `backfill-amounts` command.
pub async fn backfill_amount(
    client: &dyn ChatClient,
    instrument_name: &str,
    footnote_excerpt: &str,
    scale: MoneyScale,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<Option<i64>> {
    let user = format!(
        "Instrument: {}\n\nDebt footnote excerpt:\n{}",
        instrument_name, footnote_excerpt
    );
    let (value, _) = request_json(
        client,
        "backfill_amounts",
        prompts::SYSTEM_AMOUNT_BACKFILL,
        &user,
        tier,
        usage,
    )
    .await?;

    match debtstack_llm::coerce::as_float(&value["outstanding"]) {
        Some(raw) => Ok(Some(debtstack_data::scale::apply_scale(scale, raw))),
        None => {
            let reason = value["reason"].as_str().unwrap_or("not_found");
            info!(instrument_name, reason, "no amount recovered");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{assemble, BundlePart};
    use crate::testutil::ScriptedClient;
    use debtstack_data::sections::SectionType;

    fn bundle() -> Bundle {
        assemble(&[BundlePart {
            section_type: SectionType::DebtFootnote,
            content: "Note 9 — Long-Term Debt. 4.25% Senior Notes due 2031, outstanding 500."
                .to_string(),
            scale: None,
        }])
    }

    fn detection() -> ScaleDetection {
        ScaleDetection {
            scale: MoneyScale::Millions,
            explicit: true,
            warning: None,
        }
    }

    #[tokio::test]
    async fn test_extract_core_applies_scale() {
        let client = ScriptedClient::new(vec![
            r#"{"entities": [{"name": "Acme Corp", "entity_type": "holdco"}],
                "debt_instruments": [{"name": "4.25% Senior Notes due 2031",
                    "issuer_name": "Acme Corp", "seniority": "senior_unsecured",
                    "interest_rate": 4.25, "outstanding": 500}],
                "aggregate_only": false}"#,
        ]);
        let mut usage = UsageRecord::default();
        let result = extract_core(&client, &bundle(), &detection(), ModelTier::Fast, &mut usage)
            .await
            .unwrap();

        let debt = &result.extraction.debt_instruments[0];
        assert_eq!(debt.outstanding_cents, Some(50_000_000_000));
        assert_eq!(usage.calls, 1);
        assert!(usage.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn test_parse_failure_escalates_one_tier() {
        let client = ScriptedClient::new(vec![
            "I'm sorry, I cannot produce the data in that shape.",
            r#"{"entities": [{"name": "Acme Corp", "entity_type": "holdco"}],
                "debt_instruments": [], "aggregate_only": false}"#,
        ]);
        let mut usage = UsageRecord::default();
        let result = extract_core(&client, &bundle(), &detection(), ModelTier::Fast, &mut usage)
            .await
            .unwrap();

        assert_eq!(result.tier, ModelTier::Standard);
        let tiers = client.tiers_seen.lock().unwrap();
        assert_eq!(*tiers, vec![ModelTier::Fast, ModelTier::Standard]);
    }

    #[tokio::test]
    async fn test_parse_failure_at_top_tier_is_error() {
        let client = ScriptedClient::new(vec![
            "no json here",
            "still no json",
        ]);
        let mut usage = UsageRecord::default();
        let result = extract_core(
            &client,
            &bundle(),
            &detection(),
            ModelTier::Advanced,
            &mut usage,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_backfill_amount() {
        let client = ScriptedClient::new(vec![r#"{"outstanding": 750, "reason": null}"#]);
        let mut usage = UsageRecord::default();
        let cents = backfill_amount(
            &client,
            "4.25% Senior Notes due 2031",
            "footnote text",
            MoneyScale::Millions,
            ModelTier::Fast,
            &mut usage,
        )
        .await
        .unwrap();
        assert_eq!(cents, Some(75_000_000_000));
    }

    #[tokio::test]
    async fn test_backfill_aggregate_only_returns_none() {
        let client = ScriptedClient::new(vec![
            r#"{"outstanding": null, "reason": "aggregate_only_disclosure"}"#,
        ]);
        let mut usage = UsageRecord::default();
        let cents = backfill_amount(
            &client,
            "Notes",
            "footnote",
            MoneyScale::Millions,
            ModelTier::Fast,
            &mut usage,
        )
        .await
        .unwrap();
        assert_eq!(cents, None);
    }
}
