//! Collateral classification for secured instruments.
//!
//! A keyword table drives deterministic classification; the LLM pass is
//! only consulted for secured instruments the table cannot place. Industry
//! signals forbid the lazy `general_lien` default: an airline's "substantially
//! all assets" package is aircraft, not a blanket abstraction.

use crate::core::request_json;
use crate::error::Result;
use crate::prompts;
use debtstack_data::store::{name_key, CollateralType};
use debtstack_llm::coerce::{as_clean_string, ensure_array};
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use tracing::info;

/// One candidate collateral entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCollateral {
    /// Instrument name
    pub instrument: String,
    /// Asset class
    pub collateral_type: CollateralType,
    /// Source description
    pub description: String,
    /// Lien priority, when stated
    pub priority: Option<String>,
}

/// Keyword table mapping description phrases to asset classes. Order
/// matters: the first hit wins, and specific asset classes outrank
/// `general_lien`. Bitcoin lands in `securities` as a configurable mapping,
/// not doctrine.
const KEYWORD_TABLE: &[(&str, CollateralType)] = &[
    ("aircraft", CollateralType::Vehicles),
    ("vessel", CollateralType::Vehicles),
    ("drilling rig", CollateralType::Vehicles),
    ("rolling stock", CollateralType::Vehicles),
    ("railcar", CollateralType::Vehicles),
    ("spectrum", CollateralType::Ip),
    ("license", CollateralType::Ip),
    ("patent", CollateralType::Ip),
    ("trademark", CollateralType::Ip),
    ("intellectual property", CollateralType::Ip),
    ("oil and gas", CollateralType::EnergyAssets),
    ("oil & gas", CollateralType::EnergyAssets),
    ("proved reserves", CollateralType::EnergyAssets),
    ("mineral interest", CollateralType::EnergyAssets),
    ("real property", CollateralType::RealEstate),
    ("real estate", CollateralType::RealEstate),
    ("mortgage", CollateralType::RealEstate),
    ("accounts receivable", CollateralType::Receivables),
    ("receivables", CollateralType::Receivables),
    ("inventory", CollateralType::Inventory),
    ("equipment", CollateralType::Equipment),
    ("machinery", CollateralType::Equipment),
    ("capital stock of", CollateralType::SubsidiaryStock),
    ("equity interests of", CollateralType::SubsidiaryStock),
    ("shares of its subsidiaries", CollateralType::SubsidiaryStock),
    ("deposit account", CollateralType::Cash),
    ("cash collateral", CollateralType::Cash),
    ("bitcoin", CollateralType::Securities),
    ("investment securities", CollateralType::Securities),
    ("marketable securities", CollateralType::Securities),
    ("substantially all assets", CollateralType::GeneralLien),
    ("substantially all of the assets", CollateralType::GeneralLien),
    ("all assets", CollateralType::GeneralLien),
    ("blanket lien", CollateralType::GeneralLien),
];

/// Industry phrases that override a `general_lien` classification with the
/// industry's dominant asset class.
const INDUSTRY_SIGNALS: &[(&str, CollateralType)] = &[
    ("airline", CollateralType::Vehicles),
    ("aviation", CollateralType::Vehicles),
    ("shipping", CollateralType::Vehicles),
    ("marine", CollateralType::Vehicles),
    ("offshore drilling", CollateralType::Vehicles),
    ("telecommunications", CollateralType::Ip),
    ("wireless", CollateralType::Ip),
    ("oil", CollateralType::EnergyAssets),
    ("gas", CollateralType::EnergyAssets),
    ("exploration", CollateralType::EnergyAssets),
];

/// Classify a collateral description into one or more asset classes.
///
/// Multi-type descriptions ("aircraft, spare engines and receivables")
/// yield several entries. A `general_lien` verdict is replaced by the
/// industry's asset class when an industry signal is present.
pub fn classify(description: &str, industry: Option<&str>) -> Vec<CollateralType> {
    let lower = description.to_lowercase();
    let mut types: Vec<CollateralType> = Vec::new();

    for (keyword, collateral_type) in KEYWORD_TABLE {
        if lower.contains(keyword) && !types.contains(collateral_type) {
            types.push(*collateral_type);
        }
    }

    // A named asset class makes the blanket lien redundant.
    if types.len() > 1 {
        types.retain(|t| *t != CollateralType::GeneralLien);
    }

    if types == [CollateralType::GeneralLien] {
        if let Some(industry) = industry {
            let industry_lower = industry.to_lowercase();
            for (signal, collateral_type) in INDUSTRY_SIGNALS {
                if industry_lower.contains(signal) {
                    return vec![*collateral_type];
                }
            }
        }
    }

    types
}

/// LLM pass for secured instruments the keyword table could not classify.
pub async fn classify_with_model(
    client: &dyn ChatClient,
    document_text: &str,
    secured_instruments: &[String],
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<Vec<RawCollateral>> {
    if secured_instruments.is_empty() {
        return Ok(Vec::new());
    }

    let user = format!(
        "Secured instruments:\n{}\n\nDocument:\n{}",
        secured_instruments.join("\n"),
        document_text
    );
    let (value, _) = request_json(
        client,
        "collateral",
        prompts::SYSTEM_COLLATERAL,
        &user,
        tier,
        usage,
    )
    .await?;

    let mut out = Vec::new();
    for item in ensure_array(&value["collateral"]) {
        let Some(instrument) = as_clean_string(&item["instrument"]) else {
            continue;
        };
        let Some(type_str) = as_clean_string(&item["collateral_type"]) else {
            continue;
        };
        let Some(collateral_type) = CollateralType::parse(&type_str) else {
            continue;
        };
        if !secured_instruments
            .iter()
            .any(|name| name_key(name) == name_key(&instrument))
        {
            continue;
        }
        out.push(RawCollateral {
            instrument,
            collateral_type,
            description: as_clean_string(&item["description"])
                .unwrap_or_else(|| type_str.clone()),
            priority: as_clean_string(&item["priority"]),
        });
    }

    info!(count = out.len(), "collateral classified by model");
    Ok(out)
}
