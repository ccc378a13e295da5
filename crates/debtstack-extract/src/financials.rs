//! Financial-period extraction and TTM selection.
//!
//! One period row per 10-K/10-Q. TTM selection takes the latest 10-K plus
//! the three most recent 10-Qs ranked by `periodOfReport`: filing dates
//! lie when amendments or late filings reorder the index.

use crate::core::request_json;
use crate::error::{ExtractError, Result};
use crate::prompts;
use chrono::NaiveDate;
use debtstack_data::edgar::{Filing, FormType};
use debtstack_data::scale::{apply_scale, ScaleDetection};
use debtstack_data::store::FinancialPeriod;
use debtstack_llm::coerce::{as_clean_string, as_float, as_int};
use debtstack_llm::{ChatClient, ModelTier, UsageRecord};
use serde_json::Value;
use tracing::info;

/// Select the TTM filing set: the latest 10-K and the three most recent
/// 10-Qs, ranked by period of report. Filings without a reported period are
/// excluded; they cannot be placed on the fiscal axis.
pub fn select_ttm_filings(filings: &[Filing]) -> Vec<&Filing> {
    let mut tenks: Vec<&Filing> = filings
        .iter()
        .filter(|f| f.form == FormType::Form10K && f.period_of_report.is_some())
        .collect();
    tenks.sort_by_key(|f| std::cmp::Reverse(f.period_of_report));

    let mut tenqs: Vec<&Filing> = filings
        .iter()
        .filter(|f| f.form == FormType::Form10Q && f.period_of_report.is_some())
        .collect();
    tenqs.sort_by_key(|f| std::cmp::Reverse(f.period_of_report));

    let mut selected = Vec::new();
    if let Some(tenk) = tenks.first() {
        selected.push(*tenk);
    }
    selected.extend(tenqs.into_iter().take(3));
    selected
}

/// Extract one financial period from a filing's statement text.
///
/// Amounts come back raw and are scaled per the detection for this
/// statement block. EBITDA is never extracted; it is derived from the row.
pub async fn extract_period(
    client: &dyn ChatClient,
    company_id: i64,
    filing: &Filing,
    statement_text: &str,
    scale: &ScaleDetection,
    tier: ModelTier,
    usage: &mut UsageRecord,
) -> Result<FinancialPeriod> {
    if statement_text.trim().is_empty() {
        return Err(ExtractError::NoData {
            step: "financials".to_string(),
            reason: format!("no statement text in {}", filing.accession_number),
        });
    }

    let user = format!(
        "Form type: {}\nPeriod of report: {}\n\n{}",
        filing.form.as_str(),
        filing
            .period_of_report
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        statement_text
    );

    let (value, _) = request_json(
        client,
        "financials",
        prompts::SYSTEM_FINANCIALS,
        &user,
        tier,
        usage,
    )
    .await?;

    let period = period_from_value(company_id, filing, &value, scale)?;
    info!(
        fiscal_year = period.fiscal_year,
        fiscal_quarter = period.fiscal_quarter,
        accession = %filing.accession_number,
        "financial period extracted"
    );
    Ok(period)
}

fn period_from_value(
    company_id: i64,
    filing: &Filing,
    value: &Value,
    scale: &ScaleDetection,
) -> Result<FinancialPeriod> {
    let fiscal_year = as_int(&value["fiscal_year"])
        .map(|y| y as i32)
        .or_else(|| filing.period_of_report.map(|d| year_of(d)))
        .ok_or_else(|| ExtractError::Validation("no fiscal year in period row".to_string()))?;

    let fiscal_quarter = as_int(&value["fiscal_quarter"])
        .map(|q| q as i32)
        .unwrap_or(match filing.form {
            FormType::Form10K => 4,
            _ => quarter_of(filing.period_of_report),
        });

    if !(1..=4).contains(&fiscal_quarter) {
        return Err(ExtractError::Validation(format!(
            "fiscal quarter {} out of range",
            fiscal_quarter
        )));
    }

    let money = |field: &str| -> Option<i64> {
        as_float(&value[field]).map(|raw| apply_scale(scale.scale, raw))
    };

    Ok(FinancialPeriod {
        id: 0,
        company_id,
        fiscal_year,
        fiscal_quarter,
        revenue_cents: money("revenue"),
        operating_income_cents: money("operating_income"),
        depreciation_amortization_cents: money("depreciation_amortization"),
        interest_expense_cents: money("interest_expense"),
        income_tax_expense_cents: money("income_tax_expense"),
        total_debt_cents: money("total_debt"),
        cash_cents: money("cash"),
        total_assets_cents: money("total_assets"),
        source_filing_url: Some(filing.primary_document_url.clone()),
        period_end_date: as_clean_string(&value["period_end_date"])
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            .or(filing.period_of_report),
    })
}

fn year_of(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    date.year()
}

fn quarter_of(date: Option<NaiveDate>) -> i32 {
    use chrono::Datelike;
    date.map(|d| ((d.month0() / 3) + 1) as i32).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedClient;
    use debtstack_data::scale::MoneyScale;
    use std::collections::HashMap;

    fn filing(form: FormType, filed: &str, period: Option<&str>) -> Filing {
        Filing {
            accession_number: format!("0000000000-25-{:06}", filed.len()),
            form,
            filing_date: NaiveDate::parse_from_str(filed, "%Y-%m-%d").unwrap(),
            period_of_report: period.map(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").unwrap()),
            primary_document_url: format!("https://example.test/{}.htm", filed),
            exhibits: HashMap::new(),
        }
    }

    #[test]
    fn test_ttm_selection_by_period_not_filing_date() {
        // The oldest 10-Q was amended and re-filed LAST; filing-date order
        // would pick it first, period order must not.
        let filings = vec![
            filing(FormType::Form10K, "2025-02-20", Some("2024-12-31")),
            filing(FormType::Form10Q, "2025-05-05", Some("2025-03-31")),
            filing(FormType::Form10Q, "2025-08-04", Some("2025-06-30")),
            filing(FormType::Form10Q, "2025-09-30", Some("2024-09-30")),
            filing(FormType::Form10Q, "2024-11-04", Some("2024-09-30")),
        ];
        let selected = select_ttm_filings(&filings);
        assert_eq!(selected.len(), 4);
        assert_eq!(selected[0].form, FormType::Form10K);
        let periods: Vec<_> = selected[1..]
            .iter()
            .map(|f| f.period_of_report.unwrap().to_string())
            .collect();
        assert_eq!(periods, vec!["2025-06-30", "2025-03-31", "2024-09-30"]);
    }

    #[test]
    fn test_ttm_selection_skips_missing_period() {
        let filings = vec![
            filing(FormType::Form10K, "2025-02-20", None),
            filing(FormType::Form10Q, "2025-05-05", Some("2025-03-31")),
        ];
        let selected = select_ttm_filings(&filings);
        // The 10-K without a period cannot anchor the TTM window.
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].form, FormType::Form10Q);
    }

    #[tokio::test]
    async fn test_extract_period_scales_and_derives_quarter() {
        let client = ScriptedClient::new(vec![
            r#"{"fiscal_year": 2025, "fiscal_quarter": 2, "revenue": 5200,
                "operating_income": 1200, "depreciation_amortization": 300,
                "interest_expense": 150, "total_debt": 9800, "cash": 1100,
                "period_end_date": "2025-06-30"}"#,
        ]);
        let mut usage = UsageRecord::default();
        let f = filing(FormType::Form10Q, "2025-08-04", Some("2025-06-30"));
        let scale = ScaleDetection {
            scale: MoneyScale::Millions,
            explicit: true,
            warning: None,
        };
        let period = extract_period(&client, 1, &f, "statements...", &scale, ModelTier::Fast, &mut usage)
            .await
            .unwrap();

        assert_eq!(period.fiscal_year, 2025);
        assert_eq!(period.fiscal_quarter, 2);
        assert_eq!(period.revenue_cents, Some(520_000_000_000));
        // EBITDA derived, not extracted.
        assert_eq!(period.ebitda_cents(), Some(150_000_000_000));
    }

    #[tokio::test]
    async fn test_quarter_falls_back_to_period_month() {
        let client = ScriptedClient::new(vec![r#"{"revenue": 100}"#]);
        let mut usage = UsageRecord::default();
        let f = filing(FormType::Form10Q, "2025-08-04", Some("2025-06-30"));
        let scale = ScaleDetection {
            scale: MoneyScale::Thousands,
            explicit: true,
            warning: None,
        };
        let period = extract_period(&client, 1, &f, "text", &scale, ModelTier::Fast, &mut usage)
            .await
            .unwrap();
        assert_eq!(period.fiscal_year, 2025);
        assert_eq!(period.fiscal_quarter, 2);
        assert_eq!(period.period_end_date, f.period_of_report);
    }
}
