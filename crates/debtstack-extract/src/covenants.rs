//! Covenant extraction from governing documents.
//!
//! The amendment rule applies upstream: the caller hands this extractor
//! the most recent `governs` section per instrument (or the most recent
//! credit agreement for company-scope covenants) and fans the results out.

use crate::core::request_json;
use crate::error::Result;
use crate::prompts;
use debtstack_data::store::{Covenant, CovenantType, StoredSection, ThresholdType};
use debtstack_llm::coerce::{as_bool, as_clean_string, as_float, as_int, ensure_array};
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use tracing::info;

/// Cap on document text shipped to the covenant prompt.
const DOCUMENT_CAP: usize = 120_000;

/// Extract covenants from one governing section.
///
/// `debt_instrument_id` scopes the covenants to an instrument; `None`
/// produces company-scope rows (credit-agreement covenants) the merger
/// fans out to instruments governed by the same agreement.
pub async fn extract_covenants(
    client: &dyn ChatClient,
    company_id: i64,
    debt_instrument_id: Option<i64>,
    section: &StoredSection,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<Vec<Covenant>> {
    let body: String = section.content.chars().take(DOCUMENT_CAP).collect();
    let user = format!("Document ({}):\n{}", section.section_type, body);

    let (value, _) = request_json(
        client,
        "covenants",
        prompts::SYSTEM_COVENANTS,
        &user,
        tier,
        usage,
    )
    .await?;

    let mut out = Vec::new();
    for item in ensure_array(&value["covenants"]) {
        let Some(covenant_name) = as_clean_string(&item["covenant_name"]) else {
            continue;
        };
        let covenant_type = as_clean_string(&item["covenant_type"])
            .and_then(|s| CovenantType::parse(&s))
            .unwrap_or(CovenantType::Protective);

        // Threshold survives as a decimal string; floats only sanity-check.
        let threshold_value = as_clean_string(&item["threshold_value"]).or_else(|| {
            as_float(&item["threshold_value"]).map(|f| format!("{}", f))
        });

        out.push(Covenant {
            id: 0,
            company_id,
            debt_instrument_id,
            section_id: Some(section.id),
            covenant_type,
            covenant_name,
            test_metric: as_clean_string(&item["test_metric"]),
            threshold_value,
            threshold_type: as_clean_string(&item["threshold_type"])
                .and_then(|s| ThresholdType::parse(&s)),
            test_frequency: as_clean_string(&item["test_frequency"]),
            description: as_clean_string(&item["description"]),
            has_step_down: as_bool(&item["has_step_down"]).unwrap_or(false),
            cure_period_days: as_int(&item["cure_period_days"]),
            extraction_confidence: as_float(&item["confidence"]),
            source_text: as_clean_string(&item["source_text"]),
        });
    }

    info!(
        count = out.len(),
        section_id = section.id,
        scope = debt_instrument_id.map_or("company", |_| "instrument"),
        "covenants extracted"
    );
    Ok(out)
}
