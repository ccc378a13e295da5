//! Filing index types and form/exhibit taxonomy.

use crate::error::{DataError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// SEC form types the pipeline consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormType {
    /// Annual report
    #[serde(rename = "10-K")]
    Form10K,
    /// Quarterly report
    #[serde(rename = "10-Q")]
    Form10Q,
    /// Current report (material events)
    #[serde(rename = "8-K")]
    Form8K,
}

impl FormType {
    /// The form string as it appears in the EDGAR index.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Form10K => "10-K",
            Self::Form10Q => "10-Q",
            Self::Form8K => "8-K",
        }
    }

    /// Parse an index form string, accepting amended variants (`10-K/A`).
    pub fn parse(form: &str) -> Option<Self> {
        match form.split('/').next().unwrap_or(form) {
            "10-K" => Some(Self::Form10K),
            "10-Q" => Some(Self::Form10Q),
            "8-K" => Some(Self::Form8K),
            _ => None,
        }
    }
}

/// Exhibit classes the extraction pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExhibitCode {
    /// Exhibit 21, list of subsidiaries
    Ex21,
    /// Exhibit 22, list of guarantor subsidiaries
    Ex22,
    /// Exhibit 4.x, instruments defining security-holder rights (indentures)
    Ex4,
    /// Exhibit 10.x, material contracts (credit agreements)
    Ex10,
}

impl ExhibitCode {
    /// Classify an exhibit type string from the filing index (`EX-21.1`,
    /// `EX-4.2`, ...).
    pub fn classify(exhibit_type: &str) -> Option<Self> {
        let upper = exhibit_type.to_uppercase();
        let code = upper.strip_prefix("EX-")?;
        if code.starts_with("21") {
            Some(Self::Ex21)
        } else if code.starts_with("22") {
            Some(Self::Ex22)
        } else if code.starts_with('4') && !code.starts_with("4A") {
            Some(Self::Ex4)
        } else if code.starts_with("10") {
            Some(Self::Ex10)
        } else {
            None
        }
    }
}

/// A single filing resolved from the EDGAR submissions index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    /// Accession number (unique filing identifier)
    pub accession_number: String,
    /// Form type
    pub form: FormType,
    /// Date the filing was submitted
    pub filing_date: NaiveDate,
    /// End of the reporting period, when the index carries one
    pub period_of_report: Option<NaiveDate>,
    /// URL of the primary document
    pub primary_document_url: String,
    /// Exhibit URLs by exhibit class, resolved from the accession index
    pub exhibits: HashMap<ExhibitCode, Vec<String>>,
}

impl Filing {
    /// The best URL for an exhibit of the given class, if any was filed.
    pub fn exhibit_url(&self, code: ExhibitCode) -> Option<&str> {
        self.exhibits
            .get(&code)
            .and_then(|urls| urls.first())
            .map(String::as_str)
    }
}

/// Lookup table for converting ticker symbols to CIK numbers.
#[derive(Debug, Clone)]
pub struct CikLookup {
    ticker_to_cik: HashMap<String, (String, String)>,
}

/// Raw company ticker data from the SEC JSON.
#[derive(Debug, Deserialize)]
struct CompanyTicker {
    cik_str: u64,
    ticker: String,
    title: String,
}

impl CikLookup {
    /// Fetch and parse the company tickers JSON from the SEC.
    ///
    /// # Errors
    /// Returns an error if the network request or JSON parsing fails.
    pub async fn fetch(client: &reqwest::Client) -> Result<Self> {
        let url = "https://www.sec.gov/files/company_tickers.json";
        let response = client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DataError::EdgarApi(format!(
                "Failed to fetch company tickers: HTTP {}",
                response.status()
            )));
        }

        let data: HashMap<String, CompanyTicker> = response.json().await?;

        let mut ticker_to_cik = HashMap::new();
        for (_idx, company) in data {
            ticker_to_cik.insert(
                company.ticker.to_uppercase(),
                (company.cik_str.to_string(), company.title),
            );
        }

        Ok(Self { ticker_to_cik })
    }

    /// Look up (CIK, company name) by ticker symbol, case-insensitive.
    pub fn get(&self, ticker: &str) -> Option<&(String, String)> {
        self.ticker_to_cik.get(&ticker.to_uppercase())
    }

    /// Pad a CIK to the 10 digits EDGAR URLs require.
    ///
    /// # Example
    /// ```
    /// # use debtstack_data::edgar::CikLookup;
    /// assert_eq!(CikLookup::pad_cik("320193"), "0000320193");
    /// ```
    pub fn pad_cik(cik: &str) -> String {
        format!("{:0>10}", cik)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_cik() {
        assert_eq!(CikLookup::pad_cik("320193"), "0000320193");
        assert_eq!(CikLookup::pad_cik("1234"), "0000001234");
        assert_eq!(CikLookup::pad_cik("1234567890"), "1234567890");
    }

    #[test]
    fn test_form_type_parse() {
        assert_eq!(FormType::parse("10-K"), Some(FormType::Form10K));
        assert_eq!(FormType::parse("10-K/A"), Some(FormType::Form10K));
        assert_eq!(FormType::parse("10-Q"), Some(FormType::Form10Q));
        assert_eq!(FormType::parse("DEF 14A"), None);
    }

    #[test]
    fn test_exhibit_classify() {
        assert_eq!(ExhibitCode::classify("EX-21.1"), Some(ExhibitCode::Ex21));
        assert_eq!(ExhibitCode::classify("EX-22"), Some(ExhibitCode::Ex22));
        assert_eq!(ExhibitCode::classify("EX-4.2"), Some(ExhibitCode::Ex4));
        assert_eq!(ExhibitCode::classify("EX-10.14"), Some(ExhibitCode::Ex10));
        assert_eq!(ExhibitCode::classify("EX-31.1"), None);
        assert_eq!(ExhibitCode::classify("GRAPHIC"), None);
    }

    #[test]
    fn test_exhibit_url_missing() {
        let filing = Filing {
            accession_number: "0000320193-23-000077".to_string(),
            form: FormType::Form10K,
            filing_date: NaiveDate::from_ymd_opt(2023, 11, 3).unwrap(),
            period_of_report: NaiveDate::from_ymd_opt(2023, 9, 30),
            primary_document_url: "https://example.test/doc.htm".to_string(),
            exhibits: HashMap::new(),
        };
        assert!(filing.exhibit_url(ExhibitCode::Ex21).is_none());
    }
}
