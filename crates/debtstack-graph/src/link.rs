//! Instrument-to-document linking.
//!
//! The ladder runs from identifiers down to fallbacks: CUSIP/ISIN in the
//! document body, then the instrument name, then coupon + maturity year,
//! then the oldest base indenture (bonds) or the most recent credit
//! agreement (loans and revolvers). Commercial paper, trade payables and
//! generic buckets expect no governing document and are skipped outright.

use debtstack_data::error::Result;
use debtstack_data::store::{
    DebtInstrument, GraphStore, MatchMethod, RelationshipType, StoredSection,
};
use tracing::{debug, info};

/// Summary of one linking pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSummary {
    /// Links written
    pub linked: usize,
    /// Instruments for which no document is expected
    pub no_document_expected: usize,
    /// Instruments with no candidate document at all
    pub unlinked: usize,
}

/// Phrases marking instruments that have no governing document to find.
const NO_DOCUMENT_MARKERS: &[&str] = &[
    "commercial paper",
    "trade payable",
    "accounts payable",
    "finance lease",
    "other debt",
    "other borrowings",
    "various",
];

/// Link every active instrument of a company to its governing document.
pub fn link_instruments(store: &GraphStore, company_id: i64) -> Result<LinkSummary> {
    let instruments = store.list_debt_instruments(company_id, true)?;
    let indentures = store.list_sections(company_id, Some("indenture"))?;
    let credit_agreements = store.list_sections(company_id, Some("credit_agreement"))?;
    let mut summary = LinkSummary::default();

    for instrument in &instruments {
        if no_document_expected(instrument) {
            debug!(instrument = %instrument.name, "no governing document expected");
            summary.no_document_expected += 1;
            continue;
        }

        let candidates: Vec<&StoredSection> = if is_loan(instrument) {
            credit_agreements.iter().collect()
        } else {
            indentures.iter().chain(credit_agreements.iter()).collect()
        };

        match best_match(instrument, &candidates) {
            Some((section, method)) => {
                store.upsert_instrument_document(
                    instrument.id,
                    section.id,
                    RelationshipType::Governs,
                    method.confidence(),
                    method,
                )?;
                summary.linked += 1;
            }
            None => {
                summary.unlinked += 1;
            }
        }
    }

    info!(
        company_id,
        linked = summary.linked,
        no_document = summary.no_document_expected,
        unlinked = summary.unlinked,
        "document linking complete"
    );
    Ok(summary)
}

/// Pick the best-matching section for an instrument per the ladder.
fn best_match<'a>(
    instrument: &DebtInstrument,
    candidates: &[&'a StoredSection],
) -> Option<(&'a StoredSection, MatchMethod)> {
    if candidates.is_empty() {
        return None;
    }

    // Rung 1: identifier match.
    for section in candidates {
        if identifier_in(instrument, &section.content) {
            return Some((section, MatchMethod::IdentifierMatch));
        }
    }

    // Rung 2: name match against the full body.
    let name_lower = instrument.name.to_lowercase();
    for section in candidates {
        if section.content.to_lowercase().contains(&name_lower) {
            return Some((section, MatchMethod::NameMatch));
        }
    }

    // Rung 3: coupon and maturity year co-occur.
    if let (Some(rate_bps), Some(maturity)) = (instrument.interest_rate_bps, instrument.maturity_date)
    {
        use chrono::Datelike;
        let coupon = format_coupon(rate_bps);
        let year = maturity.year().to_string();
        for section in candidates {
            if section.content.contains(&coupon) && section.content.contains(&year) {
                return Some((section, MatchMethod::RateMaturityMatch));
            }
        }
    }

    // Rung 4: fallbacks.
    if is_loan(instrument) {
        // Most recent credit agreement.
        return candidates
            .iter()
            .filter(|s| s.section_type == "credit_agreement")
            .max_by_key(|s| (s.filing_date, s.id))
            .map(|s| (*s, MatchMethod::CreditAgreementFallback));
    }

    let indentures: Vec<&&StoredSection> = candidates
        .iter()
        .filter(|s| s.section_type == "indenture")
        .collect();
    let base_indentures: Vec<&&StoredSection> = indentures
        .iter()
        .filter(|s| !is_supplemental(s))
        .copied()
        .collect();

    if let Some(base) = base_indentures
        .iter()
        .min_by_key(|s| (s.filing_date, s.id))
    {
        // Oldest base indenture for the issuer.
        return Some((**base, MatchMethod::BaseIndentureFallback));
    }
    if let Some(supplemental) = indentures.iter().max_by_key(|s| (s.filing_date, s.id)) {
        return Some((**supplemental, MatchMethod::SupplementalFallback));
    }

    // Bonds with only credit agreements on file: better than nothing.
    candidates
        .iter()
        .max_by_key(|s| (s.filing_date, s.id))
        .map(|s| (*s, MatchMethod::CreditAgreementFallback))
}

fn identifier_in(instrument: &DebtInstrument, content: &str) -> bool {
    let upper = content.to_uppercase();
    if let Some(cusip) = &instrument.cusip {
        if upper.contains(&cusip.to_uppercase()) {
            return true;
        }
    }
    if let Some(isin) = &instrument.isin {
        if upper.contains(&isin.to_uppercase()) {
            return true;
        }
    }
    false
}

fn no_document_expected(instrument: &DebtInstrument) -> bool {
    let haystack = format!(
        "{} {}",
        instrument.name.to_lowercase(),
        instrument
            .security_type
            .as_deref()
            .unwrap_or("")
            .to_lowercase()
    );
    NO_DOCUMENT_MARKERS
        .iter()
        .any(|marker| haystack.contains(marker))
}

fn is_loan(instrument: &DebtInstrument) -> bool {
    let haystack = format!(
        "{} {}",
        instrument.name.to_lowercase(),
        instrument
            .security_type
            .as_deref()
            .unwrap_or("")
            .to_lowercase()
    );
    ["term loan", "revolv", "credit facility", "credit agreement"]
        .iter()
        .any(|marker| haystack.contains(marker))
}

fn is_supplemental(section: &StoredSection) -> bool {
    let title = section.title.to_lowercase();
    let head: String = section.content.chars().take(400).collect::<String>().to_lowercase();
    title.contains("supplemental") || head.contains("supplemental indenture")
}

/// Coupon in the "4.25%" form filings print.
fn format_coupon(rate_bps: i64) -> String {
    let pct = rate_bps as f64 / 100.0;
    if (pct - pct.trunc()).abs() < f64::EPSILON {
        format!("{:.0}%", pct)
    } else {
        format!("{}%", pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use debtstack_data::store::{Provenance, Seniority};

    fn store_with_company() -> (GraphStore, i64) {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        (store, company)
    }

    fn note(company_id: i64, name: &str, rate_bps: Option<i64>, maturity_year: Option<i32>) -> DebtInstrument {
        DebtInstrument {
            id: 0,
            company_id,
            issuer_entity_id: None,
            name: name.to_string(),
            seniority: Seniority::SeniorUnsecured,
            security_type: Some("notes".to_string()),
            interest_rate_bps: rate_bps,
            is_floating: false,
            benchmark: None,
            spread_bps: None,
            floor_bps: None,
            issue_date: None,
            maturity_date: maturity_year.and_then(|y| NaiveDate::from_ymd_opt(y, 6, 15)),
            principal_cents: Some(50_000_000_000),
            outstanding_cents: Some(50_000_000_000),
            is_drawn: false,
            is_active: true,
            cusip: None,
            isin: None,
            currency: "USD".to_string(),
            collateral_data_confidence: None,
            attributes: serde_json::json!({}),
            provenance: Provenance::default(),
        }
    }

    fn add_section(
        store: &GraphStore,
        company: i64,
        section_type: &str,
        date: &str,
        title: &str,
        content: &str,
        url: &str,
    ) -> i64 {
        store
            .upsert_section(
                company,
                "exhibit",
                section_type,
                NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
                title,
                content,
                url,
            )
            .unwrap()
    }

    #[test]
    fn test_base_indenture_fallback_seed_case() {
        // One 1997 base indenture, five notes with no specific supplemental:
        // all five link at 0.60 / base_indenture_fallback.
        let (store, company) = store_with_company();
        add_section(
            &store,
            company,
            "indenture",
            "1997-03-01",
            "INDENTURE dated as of March 1, 1997",
            "INDENTURE dated as of March 1, 1997 between Acme Corp and the Trustee. \
             Section 1.01 Definitions.",
            "https://example.test/base-indenture.htm",
        );

        for i in 0..5 {
            store
                .insert_debt_instrument(&note(
                    company,
                    &format!("Series {} Notes", i),
                    Some(500 + i * 25),
                    Some(2030 + i as i32),
                ))
                .unwrap();
        }

        let summary = link_instruments(&store, company).unwrap();
        assert_eq!(summary.linked, 5);

        for instrument in store.list_debt_instruments(company, true).unwrap() {
            let links = store.list_instrument_documents(instrument.id).unwrap();
            assert_eq!(links.len(), 1);
            assert_eq!(links[0].match_method, MatchMethod::BaseIndentureFallback);
            assert!((links[0].confidence - 0.60).abs() < 1e-9);
            assert_eq!(links[0].relationship_type, RelationshipType::Governs);
        }
    }

    #[test]
    fn test_name_match_beats_fallback() {
        let (store, company) = store_with_company();
        add_section(
            &store,
            company,
            "indenture",
            "1997-03-01",
            "Base Indenture",
            "INDENTURE dated as of March 1, 1997.",
            "https://example.test/base.htm",
        );
        add_section(
            &store,
            company,
            "indenture",
            "2021-03-15",
            "Fourth Supplemental Indenture",
            "FOURTH SUPPLEMENTAL INDENTURE relating to the 4.25% Senior Notes due 2031.",
            "https://example.test/supp4.htm",
        );
        store
            .insert_debt_instrument(&note(company, "4.25% Senior Notes due 2031", Some(425), Some(2031)))
            .unwrap();

        link_instruments(&store, company).unwrap();
        let instrument = &store.list_debt_instruments(company, true).unwrap()[0];
        let links = store.list_instrument_documents(instrument.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].match_method, MatchMethod::NameMatch);
        let section = store.get_section(links[0].section_id).unwrap().unwrap();
        assert!(section.title.contains("Supplemental"));
    }

    #[test]
    fn test_identifier_match_wins() {
        let (store, company) = store_with_company();
        add_section(
            &store,
            company,
            "indenture",
            "2021-03-15",
            "Supplemental Indenture",
            "SUPPLEMENTAL INDENTURE. CUSIP No. 037833AB1. The notes described herein.",
            "https://example.test/supp.htm",
        );
        let mut instrument = note(company, "Some Obscure Series", Some(425), Some(2031));
        instrument.cusip = Some("037833AB1".to_string());
        store.insert_debt_instrument(&instrument).unwrap();

        link_instruments(&store, company).unwrap();
        let row = &store.list_debt_instruments(company, true).unwrap()[0];
        let links = store.list_instrument_documents(row.id).unwrap();
        assert_eq!(links[0].match_method, MatchMethod::IdentifierMatch);
        assert!((links[0].confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_rate_maturity_match() {
        let (store, company) = store_with_company();
        add_section(
            &store,
            company,
            "indenture",
            "2021-03-15",
            "Supplemental Indenture",
            "SUPPLEMENTAL INDENTURE providing for notes bearing interest at 4.25% \
             per annum and maturing in 2031.",
            "https://example.test/supp.htm",
        );
        // Name does not appear verbatim in the document.
        store
            .insert_debt_instrument(&note(company, "Senior Notes, Series K", Some(425), Some(2031)))
            .unwrap();

        link_instruments(&store, company).unwrap();
        let row = &store.list_debt_instruments(company, true).unwrap()[0];
        let links = store.list_instrument_documents(row.id).unwrap();
        assert_eq!(links[0].match_method, MatchMethod::RateMaturityMatch);
    }

    #[test]
    fn test_loans_link_to_most_recent_credit_agreement() {
        let (store, company) = store_with_company();
        add_section(
            &store,
            company,
            "credit_agreement",
            "2019-05-01",
            "Credit Agreement",
            "CREDIT AGREEMENT dated as of May 1, 2019 among Acme and the lenders.",
            "https://example.test/ca2019.htm",
        );
        add_section(
            &store,
            company,
            "credit_agreement",
            "2023-09-15",
            "Amended and Restated Credit Agreement",
            "AMENDED AND RESTATED CREDIT AGREEMENT dated as of September 15, 2023.",
            "https://example.test/ca2023.htm",
        );
        let mut loan = note(company, "Term Loan B", None, Some(2028));
        loan.security_type = Some("term loan".to_string());
        store.insert_debt_instrument(&loan).unwrap();

        link_instruments(&store, company).unwrap();
        let row = &store.list_debt_instruments(company, true).unwrap()[0];
        let links = store.list_instrument_documents(row.id).unwrap();
        assert_eq!(links[0].match_method, MatchMethod::CreditAgreementFallback);
        let section = store.get_section(links[0].section_id).unwrap().unwrap();
        assert_eq!(section.sec_filing_url, "https://example.test/ca2023.htm");
    }

    #[test]
    fn test_commercial_paper_expects_no_document() {
        let (store, company) = store_with_company();
        add_section(
            &store,
            company,
            "indenture",
            "1997-03-01",
            "Indenture",
            "INDENTURE dated as of March 1, 1997.",
            "https://example.test/base.htm",
        );
        let mut cp = note(company, "Commercial Paper Program", None, None);
        cp.security_type = Some("commercial paper".to_string());
        store.insert_debt_instrument(&cp).unwrap();

        let summary = link_instruments(&store, company).unwrap();
        assert_eq!(summary.no_document_expected, 1);
        assert_eq!(summary.linked, 0);
        let row = &store.list_debt_instruments(company, true).unwrap()[0];
        assert!(store.list_instrument_documents(row.id).unwrap().is_empty());
    }

    #[test]
    fn test_supplemental_fallback_without_base() {
        let (store, company) = store_with_company();
        add_section(
            &store,
            company,
            "indenture",
            "2020-01-01",
            "First Supplemental Indenture",
            "FIRST SUPPLEMENTAL INDENTURE dated January 1, 2020.",
            "https://example.test/supp1.htm",
        );
        add_section(
            &store,
            company,
            "indenture",
            "2022-01-01",
            "Second Supplemental Indenture",
            "SECOND SUPPLEMENTAL INDENTURE dated January 1, 2022.",
            "https://example.test/supp2.htm",
        );
        store
            .insert_debt_instrument(&note(company, "Series Z Notes", Some(700), Some(2033)))
            .unwrap();

        link_instruments(&store, company).unwrap();
        let row = &store.list_debt_instruments(company, true).unwrap()[0];
        let links = store.list_instrument_documents(row.id).unwrap();
        assert_eq!(links[0].match_method, MatchMethod::SupplementalFallback);
        assert!((links[0].confidence - 0.55).abs() < 1e-9);
        // Most recent supplemental wins.
        let section = store.get_section(links[0].section_id).unwrap().unwrap();
        assert_eq!(section.sec_filing_url, "https://example.test/supp2.htm");
    }

    #[test]
    fn test_format_coupon() {
        assert_eq!(format_coupon(425), "4.25%");
        assert_eq!(format_coupon(500), "5%");
        assert_eq!(format_coupon(787), "7.87%");
    }
}
