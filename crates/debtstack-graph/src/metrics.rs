//! Derived per-company credit metrics.
//!
//! Ratios are computed from reported balance-sheet debt when available and
//! from the instrument sum otherwise; the two are never auto-reconciled.
//! Anything that computes above the sanity ceiling is skipped and recorded
//! as a warning, never stored as a definitive metric.

use chrono::{NaiveDate, Utc};
use debtstack_data::error::Result;
use debtstack_data::store::{CreditMetrics, FinancialPeriod, GraphStore};
use serde_json::json;
use tracing::{info, warn};

/// Ratios above this are treated as data defects, not facts.
const RATIO_SANITY_CEILING: f64 = 100.0;

/// Weighted average maturity is clipped into this range (years).
const WAM_RANGE: (f64, f64) = (0.0, 100.0);

/// Leverage above this marks the company as leveraged.
const LEVERAGE_FLAG_THRESHOLD: f64 = 4.0;

/// Days per year used for maturity arithmetic.
const DAYS_PER_YEAR: f64 = 365.25;

/// Compute and persist credit metrics for a company as of `today`.
pub fn compute_metrics(store: &GraphStore, company_id: i64, today: NaiveDate) -> Result<CreditMetrics> {
    let instruments = store.list_debt_instruments(company_id, true)?;
    let periods = store.list_financial_periods(company_id)?;
    let mut warnings = Vec::new();

    // Maturity profile over active instruments with outstanding amounts.
    let mut instrument_total: i64 = 0;
    let mut due_1yr: i64 = 0;
    let mut due_2yr: i64 = 0;
    let mut due_3yr: i64 = 0;
    let mut weighted_years = 0.0f64;

    for instrument in &instruments {
        let Some(outstanding) = instrument.outstanding_cents else {
            continue;
        };
        instrument_total += outstanding;
        let Some(maturity) = instrument.maturity_date else {
            continue;
        };
        let days = (maturity - today).num_days();
        let months = days as f64 / 30.44;
        if (0.0..12.0).contains(&months) {
            due_1yr += outstanding;
        } else if (12.0..24.0).contains(&months) {
            due_2yr += outstanding;
        } else if (24.0..36.0).contains(&months) {
            due_3yr += outstanding;
        }
        if days > 0 {
            weighted_years += outstanding as f64 * (days as f64 / DAYS_PER_YEAR);
        }
    }

    let weighted_avg_maturity = if instrument_total > 0 {
        let wam = weighted_years / instrument_total as f64;
        Some(wam.clamp(WAM_RANGE.0, WAM_RANGE.1))
    } else {
        None
    };

    // TTM aggregation over the last four periods.
    let ttm: Vec<&FinancialPeriod> = periods.iter().take(4).collect();
    let ttm_ebitda_cents = ttm_ebitda(&ttm, &mut warnings);
    let ttm_interest: Option<i64> = sum_if_all(&ttm, |p| p.interest_expense_cents)
        .or_else(|| ttm.first().and_then(|p| p.interest_expense_cents.map(|v| v * 4)));

    // Reported balance-sheet debt anchors leverage; instrument sum is the
    // fallback and the discrepancy is recorded, not reconciled.
    let latest = periods.first();
    let reported_debt = latest.and_then(|p| p.total_debt_cents);
    let total_debt_cents = match reported_debt {
        Some(reported) => {
            if reported > 0 && instrument_total > reported * 2 {
                warnings.push(format!(
                    "instrument outstanding ({}) exceeds 2x reported total debt ({})",
                    instrument_total, reported
                ));
            }
            reported
        }
        None => {
            if instrument_total > 0 {
                warnings.push("no reported total_debt; using instrument sum".to_string());
            }
            instrument_total
        }
    };
    let cash = latest.and_then(|p| p.cash_cents).unwrap_or(0);

    let leverage_ratio = sane_ratio(
        "leverage_ratio",
        ratio(total_debt_cents, ttm_ebitda_cents),
        true,
        &mut warnings,
    );
    // Net leverage goes negative for a net-cash company and coverage goes
    // negative on negative TTM EBITDA; both are real metrics, so only the
    // ceiling applies.
    let net_leverage_ratio = sane_ratio(
        "net_leverage_ratio",
        ratio(total_debt_cents - cash, ttm_ebitda_cents),
        false,
        &mut warnings,
    );
    let interest_coverage = sane_ratio(
        "interest_coverage",
        match (ttm_ebitda_cents, ttm_interest) {
            (Some(e), Some(i)) if i > 0 => Some(e as f64 / i as f64),
            _ => None,
        },
        false,
        &mut warnings,
    );

    let provenance = json!({
        "financial_periods": ttm
            .iter()
            .map(|p| format!("{}Q{}", p.fiscal_year, p.fiscal_quarter))
            .collect::<Vec<_>>(),
        "source_filings": ttm
            .iter()
            .filter_map(|p| p.source_filing_url.clone())
            .collect::<Vec<_>>(),
        "active_instruments": instruments.len(),
        "debt_source": if reported_debt.is_some() { "balance_sheet" } else { "instrument_sum" },
    });

    let metrics = CreditMetrics {
        company_id,
        total_debt_cents,
        debt_due_1yr_cents: due_1yr,
        debt_due_2yr_cents: due_2yr,
        debt_due_3yr_cents: due_3yr,
        weighted_avg_maturity,
        has_near_term_maturity: due_1yr + due_2yr > 0,
        ttm_ebitda_cents,
        leverage_ratio,
        net_leverage_ratio,
        interest_coverage,
        is_leveraged: leverage_ratio.is_some_and(|l| l > LEVERAGE_FLAG_THRESHOLD),
        warnings,
        provenance,
        computed_at: Utc::now(),
    };

    store.put_metrics(&metrics)?;
    info!(
        company_id,
        total_debt = metrics.total_debt_cents,
        leverage = ?metrics.leverage_ratio,
        "metrics computed"
    );
    Ok(metrics)
}

/// TTM EBITDA: the sum over four periods when all four carry EBITDA inputs;
/// otherwise annualize the latest quarter and warn.
fn ttm_ebitda(ttm: &[&FinancialPeriod], warnings: &mut Vec<String>) -> Option<i64> {
    if ttm.len() == 4 && ttm.iter().all(|p| p.ebitda_cents().is_some()) {
        return Some(ttm.iter().filter_map(|p| p.ebitda_cents()).sum());
    }
    match ttm.first().and_then(|p| p.ebitda_cents()) {
        Some(latest) => {
            warnings.push(format!(
                "TTM EBITDA annualized from a single quarter ({} of 4 periods usable)",
                ttm.iter().filter(|p| p.ebitda_cents().is_some()).count()
            ));
            Some(latest * 4)
        }
        None => None,
    }
}

fn sum_if_all<F>(periods: &[&FinancialPeriod], f: F) -> Option<i64>
where
    F: Fn(&FinancialPeriod) -> Option<i64>,
{
    if periods.len() == 4 && periods.iter().all(|p| f(p).is_some()) {
        Some(periods.iter().filter_map(|p| f(p)).sum())
    } else {
        None
    }
}

fn ratio(numerator_cents: i64, denominator_cents: Option<i64>) -> Option<f64> {
    match denominator_cents {
        Some(d) if d > 0 => Some(numerator_cents as f64 / d as f64),
        _ => None,
    }
}

/// Apply the sanity ceiling: ratios above 100 become a warning and `None`.
/// `floor_at_zero` additionally rejects negatives; that only holds for
/// gross leverage and the maturity average, where a negative value can only
/// be a data defect.
fn sane_ratio(
    name: &str,
    value: Option<f64>,
    floor_at_zero: bool,
    warnings: &mut Vec<String>,
) -> Option<f64> {
    match value {
        Some(v) if v > RATIO_SANITY_CEILING || (floor_at_zero && v < 0.0) => {
            warn!(metric = name, value = v, "ratio outside sanity range; skipped");
            warnings.push(format!("{} computed {:.1}; outside sanity range, skipped", name, v));
            None
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use debtstack_data::store::{DebtInstrument, Provenance, Seniority};
    use serde_json::Value;

    fn store_with_company() -> (GraphStore, i64) {
        let store = GraphStore::in_memory().unwrap();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        (store, company)
    }

    fn instrument(
        company_id: i64,
        name: &str,
        outstanding: Option<i64>,
        maturity: Option<NaiveDate>,
    ) -> DebtInstrument {
        DebtInstrument {
            id: 0,
            company_id,
            issuer_entity_id: None,
            name: name.to_string(),
            seniority: Seniority::SeniorUnsecured,
            security_type: None,
            interest_rate_bps: None,
            is_floating: false,
            benchmark: None,
            spread_bps: None,
            floor_bps: None,
            issue_date: None,
            maturity_date: maturity,
            principal_cents: None,
            outstanding_cents: outstanding,
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

    fn period(
        company_id: i64,
        year: i32,
        quarter: i32,
        oi: i64,
        da: i64,
        interest: i64,
        total_debt: Option<i64>,
        cash: Option<i64>,
    ) -> FinancialPeriod {
        FinancialPeriod {
            id: 0,
            company_id,
            fiscal_year: year,
            fiscal_quarter: quarter,
            revenue_cents: Some(oi * 4),
            operating_income_cents: Some(oi),
            depreciation_amortization_cents: Some(da),
            interest_expense_cents: Some(interest),
            income_tax_expense_cents: None,
            total_debt_cents: total_debt,
            cash_cents: cash,
            total_assets_cents: None,
            source_filing_url: Some(format!("https://example.test/{}q{}.htm", year, quarter)),
            period_end_date: None,
        }
    }

    fn seed_four_quarters(store: &GraphStore, company: i64) {
        // Four quarters, each EBITDA = 250 ($2.50): TTM EBITDA $10.00.
        for (year, quarter) in [(2024, 3), (2024, 4), (2025, 1), (2025, 2)] {
            store
                .upsert_financial_period(&period(
                    company,
                    year,
                    quarter,
                    200,
                    50,
                    25,
                    Some(4_000),
                    Some(500),
                ))
                .unwrap();
        }
    }

    #[test]
    fn test_maturity_buckets_and_wam() {
        let (store, company) = store_with_company();
        let today = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Due in 6 months",
                Some(100_00),
                NaiveDate::from_ymd_opt(2026, 7, 25),
            ))
            .unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Due in 18 months",
                Some(200_00),
                NaiveDate::from_ymd_opt(2027, 7, 25),
            ))
            .unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Due in 30 months",
                Some(300_00),
                NaiveDate::from_ymd_opt(2028, 7, 25),
            ))
            .unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Due in 10 years",
                Some(400_00),
                NaiveDate::from_ymd_opt(2036, 1, 25),
            ))
            .unwrap();

        let metrics = compute_metrics(&store, company, today).unwrap();
        assert_eq!(metrics.debt_due_1yr_cents, 100_00);
        assert_eq!(metrics.debt_due_2yr_cents, 200_00);
        assert_eq!(metrics.debt_due_3yr_cents, 300_00);
        assert!(metrics.has_near_term_maturity);

        // WAM = (100×0.5 + 200×1.5 + 300×2.5 + 400×10) / 1000 ≈ 5.1 years.
        let wam = metrics.weighted_avg_maturity.unwrap();
        assert_relative_eq!(wam, 5.1, epsilon = 0.1);
    }

    #[test]
    fn test_leverage_family_from_reported_debt() {
        let (store, company) = store_with_company();
        seed_four_quarters(&store, company);
        let metrics = compute_metrics(&store, company, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()).unwrap();

        assert_eq!(metrics.ttm_ebitda_cents, Some(1_000));
        // 4000 / 1000 = 4.0: at the threshold, not above it.
        assert_relative_eq!(metrics.leverage_ratio.unwrap(), 4.0);
        assert!(!metrics.is_leveraged);
        // (4000 - 500) / 1000 = 3.5
        assert_relative_eq!(metrics.net_leverage_ratio.unwrap(), 3.5);
        // 1000 / 100 = 10.0
        assert_relative_eq!(metrics.interest_coverage.unwrap(), 10.0);
        assert!(metrics.warnings.is_empty());
    }

    #[test]
    fn test_annualization_warning_with_missing_quarters() {
        let (store, company) = store_with_company();
        store
            .upsert_financial_period(&period(company, 2025, 2, 200, 50, 25, Some(4_000), None))
            .unwrap();
        let metrics = compute_metrics(&store, company, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()).unwrap();
        // 250 × 4 annualized.
        assert_eq!(metrics.ttm_ebitda_cents, Some(1_000));
        assert!(metrics.warnings.iter().any(|w| w.contains("annualized")));
    }

    #[test]
    fn test_net_cash_company_stores_negative_net_leverage() {
        let (store, company) = store_with_company();
        // Cash 6000 against reported debt 4000: net leverage is negative
        // and must be stored, not skipped as a sanity violation.
        for (year, quarter) in [(2024, 3), (2024, 4), (2025, 1), (2025, 2)] {
            store
                .upsert_financial_period(&period(
                    company,
                    year,
                    quarter,
                    200,
                    50,
                    25,
                    Some(4_000),
                    Some(6_000),
                ))
                .unwrap();
        }
        let metrics = compute_metrics(&store, company, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()).unwrap();
        // (4000 - 6000) / 1000 = -2.0
        assert_relative_eq!(metrics.net_leverage_ratio.unwrap(), -2.0);
        assert_relative_eq!(metrics.leverage_ratio.unwrap(), 4.0);
        assert!(!metrics
            .warnings
            .iter()
            .any(|w| w.contains("net_leverage_ratio")));
    }

    #[test]
    fn test_negative_ebitda_stores_negative_coverage() {
        let (store, company) = store_with_company();
        // Operating losses: EBITDA per quarter is -150, TTM -600. Coverage
        // goes negative and is stored; leverage has no positive denominator
        // and stays unset.
        for (year, quarter) in [(2024, 3), (2024, 4), (2025, 1), (2025, 2)] {
            store
                .upsert_financial_period(&period(
                    company,
                    year,
                    quarter,
                    -200,
                    50,
                    25,
                    Some(4_000),
                    Some(500),
                ))
                .unwrap();
        }
        let metrics = compute_metrics(&store, company, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()).unwrap();
        assert_eq!(metrics.ttm_ebitda_cents, Some(-600));
        // -600 / 100 = -6.0
        assert_relative_eq!(metrics.interest_coverage.unwrap(), -6.0);
        assert!(metrics.leverage_ratio.is_none());
        assert!(metrics.net_leverage_ratio.is_none());
        assert!(!metrics.is_leveraged);
        assert!(!metrics
            .warnings
            .iter()
            .any(|w| w.contains("interest_coverage")));
    }

    #[test]
    fn test_insane_ratio_skipped_with_warning() {
        let (store, company) = store_with_company();
        // Tiny EBITDA vs huge debt: leverage would be 4000.
        store
            .upsert_financial_period(&period(company, 2025, 2, 1, 0, 1, Some(4_000), None))
            .unwrap();
        let metrics = compute_metrics(&store, company, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()).unwrap();
        assert!(metrics.leverage_ratio.is_none());
        assert!(!metrics.is_leveraged);
        assert!(metrics
            .warnings
            .iter()
            .any(|w| w.contains("leverage_ratio") && w.contains("skipped")));
    }

    #[test]
    fn test_matured_inactive_instruments_excluded() {
        let (store, company) = store_with_company();
        let today = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
        let id = store
            .insert_debt_instrument(&instrument(
                company,
                "Matured 2023 Notes",
                Some(500_00),
                NaiveDate::from_ymd_opt(2023, 6, 1),
            ))
            .unwrap();
        store
            .insert_debt_instrument(&instrument(
                company,
                "Live Notes",
                Some(300_00),
                NaiveDate::from_ymd_opt(2030, 6, 1),
            ))
            .unwrap();

        // Before deactivation the matured bond pollutes the total.
        let metrics = compute_metrics(&store, company, today).unwrap();
        assert_eq!(metrics.total_debt_cents, 800_00);

        store.deactivate_instrument(id, "matured").unwrap();
        let metrics = compute_metrics(&store, company, today).unwrap();
        assert_eq!(metrics.total_debt_cents, 300_00);
        assert_eq!(metrics.debt_due_1yr_cents, 0);
    }

    #[test]
    fn test_excess_instrument_debt_flagged_not_reconciled() {
        let (store, company) = store_with_company();
        seed_four_quarters(&store, company); // reported total debt 4000
        store
            .insert_debt_instrument(&instrument(
                company,
                "Pre-reorg notes",
                Some(10_000),
                NaiveDate::from_ymd_opt(2030, 1, 1),
            ))
            .unwrap();
        let metrics = compute_metrics(&store, company, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()).unwrap();
        // Reported figure wins; the excess is a warning.
        assert_eq!(metrics.total_debt_cents, 4_000);
        assert!(metrics.warnings.iter().any(|w| w.contains("exceeds 2x")));
    }
}
