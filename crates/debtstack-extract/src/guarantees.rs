//! Guarantee extraction: Exhibit 22 first, governing documents second.

use crate::core::request_json;
use crate::error::Result;
use crate::prompts;
use debtstack_data::store::{name_key, slugify, GuaranteeConfidence};
use debtstack_llm::coerce::{as_clean_string, ensure_array};
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use std::collections::HashSet;
use tracing::info;

/// One candidate guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGuarantee {
    /// Instrument name
    pub instrument: String,
    /// Guarantor entity name
    pub guarantor: String,
    /// Release/add triggers, when stated
    pub conditions: Option<String>,
    /// Source confidence tag
    pub confidence: GuaranteeConfidence,
}

/// Parse Exhibit 22 into guarantees tagged `verified`.
///
/// Exhibit 22 lists guarantor subsidiaries for registered debt; when the
/// exhibit does not break out series, every listed guarantor applies to
/// each registered instrument name supplied by the caller.
pub fn from_exhibit22(content: &str, registered_instruments: &[String]) -> Vec<RawGuarantee> {
    let mut guarantors = Vec::new();
    for line in content.lines() {
        let line = line.trim().trim_end_matches('|').trim();
        if line.is_empty() || is_header_line(line) {
            continue;
        }
        // Table rows keep the entity in the first cell.
        let name = line.split('|').next().unwrap_or(line).trim();
        if name.len() >= 3 && name.chars().any(char::is_alphabetic) {
            guarantors.push(name.to_string());
        }
    }

    let mut out = Vec::new();
    for instrument in registered_instruments {
        for guarantor in &guarantors {
            out.push(RawGuarantee {
                instrument: instrument.clone(),
                guarantor: guarantor.clone(),
                conditions: None,
                confidence: GuaranteeConfidence::Verified,
            });
        }
    }
    out
}

fn is_header_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("guarantor")
        || lower.starts_with("list of")
        || lower.starts_with("exhibit")
        || lower.starts_with("name")
        || lower.starts_with("jurisdiction")
        || lower.starts_with("the following")
        || lower.starts_with("(")
        || lower.starts_with("*")
}

/// LLM pass over an indenture or credit agreement, tagged `extracted`.
pub async fn from_governing_document(
    client: &dyn ChatClient,
    document_text: &str,
    instrument_names: &[String],
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<Vec<RawGuarantee>> {
    let user = format!(
        "Instruments:\n{}\n\nDocument:\n{}",
        instrument_names.join("\n"),
        document_text
    );
    let (value, _) = request_json(
        client,
        "guarantees",
        prompts::SYSTEM_GUARANTEES,
        &user,
        tier,
        usage,
    )
    .await?;

    let known: HashSet<String> = instrument_names.iter().map(|n| slugify(n)).collect();
    let mut out = Vec::new();
    for item in ensure_array(&value["guarantees"]) {
        let Some(instrument) = as_clean_string(&item["instrument"]) else {
            continue;
        };
        let Some(guarantor) = as_clean_string(&item["guarantor"]) else {
            continue;
        };
        if !known.contains(&slugify(&instrument)) {
            continue;
        }
        out.push(RawGuarantee {
            instrument,
            guarantor,
            conditions: as_clean_string(&item["conditions"]),
            confidence: GuaranteeConfidence::Extracted,
        });
    }

    info!(count = out.len(), "guarantees extracted from governing document");
    Ok(out)
}

/// Deduplicate by (instrument, guarantor), keeping the highest-confidence
/// tag and the first non-null conditions. Comparison runs on alphanumeric
/// content so "Acme Operating LP" and "Acme Operating, L.P." collapse.
pub fn dedupe(guarantees: Vec<RawGuarantee>) -> Vec<RawGuarantee> {
    let mut out: Vec<RawGuarantee> = Vec::new();
    for candidate in guarantees {
        let key = (name_key(&candidate.instrument), name_key(&candidate.guarantor));
        match out
            .iter_mut()
            .find(|g| (name_key(&g.instrument), name_key(&g.guarantor)) == key)
        {
            Some(existing) => {
                if candidate.confidence > existing.confidence {
                    existing.confidence = candidate.confidence;
                }
                if existing.conditions.is_none() {
                    existing.conditions = candidate.conditions;
                }
            }
            None => out.push(candidate),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedClient;

    #[test]
    fn test_exhibit22_verified() {
        let content = "List of Guarantor Subsidiaries\n\
                       Name | Jurisdiction |\n\
                       Acme Operating LP | Texas |\n\
                       Acme Finance LLC | Delaware |\n";
        let instruments = vec!["4.25% Senior Notes due 2031".to_string()];
        let guarantees = from_exhibit22(content, &instruments);
        assert_eq!(guarantees.len(), 2);
        assert!(guarantees
            .iter()
            .all(|g| g.confidence == GuaranteeConfidence::Verified));
        assert_eq!(guarantees[0].guarantor, "Acme Operating LP");
    }

    #[tokio::test]
    async fn test_governing_document_drops_unknown_instrument() {
        let client = ScriptedClient::new(vec![
            r#"{"guarantees": [
                {"instrument": "4.25% Senior Notes due 2031", "guarantor": "Acme Operating LP",
                 "conditions": "released upon sale of all capital stock of the guarantor"},
                {"instrument": "Imaginary Notes due 2099", "guarantor": "Acme Operating LP"}
            ]}"#,
        ]);
        let mut usage = UsageRecord::default();
        let instruments = vec!["4.25% Senior Notes due 2031".to_string()];
        let guarantees = from_governing_document(&client, "doc", &instruments, ModelTier::Fast, &mut usage)
            .await
            .unwrap();
        assert_eq!(guarantees.len(), 1);
        assert_eq!(guarantees[0].confidence, GuaranteeConfidence::Extracted);
        assert!(guarantees[0].conditions.as_deref().unwrap().contains("released"));
    }

    #[test]
    fn test_dedupe_keeps_highest_confidence() {
        let guarantees = vec![
            RawGuarantee {
                instrument: "Notes".to_string(),
                guarantor: "Acme Operating LP".to_string(),
                conditions: None,
                confidence: GuaranteeConfidence::Extracted,
            },
            RawGuarantee {
                instrument: "Notes".to_string(),
                guarantor: "Acme Operating, L.P.".to_string(),
                conditions: Some("customary release provisions".to_string()),
                confidence: GuaranteeConfidence::Verified,
            },
        ];
        let deduped = dedupe(guarantees);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].confidence, GuaranteeConfidence::Verified);
        assert_eq!(deduped[0].conditions.as_deref(), Some("customary release provisions"));
    }
}
