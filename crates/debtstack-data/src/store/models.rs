//! Row types and enumerations for the credit graph.
//!
//! Monetary values are integer cents and rates are integer basis points
//! throughout; floats only appear for ratios and percentages that are not
//! stored as money.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A public company tracked by the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    /// Row id
    pub id: i64,
    /// Ticker symbol
    pub ticker: String,
    /// SEC filer identifier
    pub cik: String,
    /// Legal name
    pub legal_name: String,
    /// Industry, when known
    pub industry: Option<String>,
    /// Sector, when known
    pub sector: Option<String>,
}

/// Legal-entity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Holding company
    Holdco,
    /// Operating company
    Opco,
    /// Financing entity
    Finco,
    /// Special-purpose vehicle
    Spv,
    /// Ordinary subsidiary
    Subsidiary,
}

impl EntityType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Holdco => "holdco",
            Self::Opco => "opco",
            Self::Finco => "finco",
            Self::Spv => "spv",
            Self::Subsidiary => "subsidiary",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "holdco" => Some(Self::Holdco),
            "opco" => Some(Self::Opco),
            "finco" => Some(Self::Finco),
            "spv" => Some(Self::Spv),
            "subsidiary" => Some(Self::Subsidiary),
            _ => None,
        }
    }
}

/// A legal entity within a company's structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Row id
    pub id: i64,
    /// Owning company
    pub company_id: i64,
    /// Normalized legal name
    pub name: String,
    /// Identity slug, unique within the company
    pub slug: String,
    /// Jurisdiction of organization
    pub jurisdiction: Option<String>,
    /// Entity classification
    pub entity_type: EntityType,
    /// Guarantees registered debt
    pub is_guarantor: bool,
    /// Outside the restricted group
    pub is_unrestricted: bool,
    /// Ultimate parent within the company
    pub is_root: bool,
    /// Principal parent entity, when resolved
    pub parent_entity_id: Option<i64>,
}

/// Ownership edge qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipType {
    /// The source text says "direct"
    Direct,
    /// The source text says "indirect"
    Indirect,
}

impl OwnershipType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Indirect => "indirect",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "indirect" => Some(Self::Indirect),
            _ => None,
        }
    }
}

/// Directed ownership edge between two entities of the same company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipLink {
    /// Row id
    pub id: i64,
    /// Owning company
    pub company_id: i64,
    /// Parent entity
    pub parent_entity_id: i64,
    /// Child entity
    pub child_entity_id: i64,
    /// Direct/indirect, only when the source says so
    pub ownership_type: Option<OwnershipType>,
    /// Ownership percentage, when disclosed
    pub ownership_percent: Option<f64>,
    /// Verbatim evidence, required for a non-null ownership_type
    pub evidence_quote: Option<String>,
}

/// Seniority ranking of a debt instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    /// Senior secured
    SeniorSecured,
    /// Senior unsecured
    SeniorUnsecured,
    /// Subordinated
    Subordinated,
}

impl Seniority {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SeniorSecured => "senior_secured",
            Self::SeniorUnsecured => "senior_unsecured",
            Self::Subordinated => "subordinated",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "senior_secured" => Some(Self::SeniorSecured),
            "senior_unsecured" => Some(Self::SeniorUnsecured),
            "subordinated" => Some(Self::Subordinated),
            _ => None,
        }
    }
}

/// A debt instrument (bond series, term loan, revolver, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtInstrument {
    /// Row id
    pub id: i64,
    /// Owning company
    pub company_id: i64,
    /// Issuing entity, resolved by name within the company
    pub issuer_entity_id: Option<i64>,
    /// Instrument name as disclosed
    pub name: String,
    /// Seniority ranking
    pub seniority: Seniority,
    /// Security type label (notes, term loan, revolver, ...)
    pub security_type: Option<String>,
    /// Fixed coupon in basis points
    pub interest_rate_bps: Option<i64>,
    /// Floating-rate instrument
    pub is_floating: bool,
    /// Floating benchmark (SOFR, EURIBOR, ...)
    pub benchmark: Option<String>,
    /// Spread over the benchmark in basis points
    pub spread_bps: Option<i64>,
    /// Benchmark floor in basis points
    pub floor_bps: Option<i64>,
    /// Issue date
    pub issue_date: Option<NaiveDate>,
    /// Maturity date
    pub maturity_date: Option<NaiveDate>,
    /// Original principal in cents
    pub principal_cents: Option<i64>,
    /// Outstanding amount in cents; null under aggregate-only disclosure
    pub outstanding_cents: Option<i64>,
    /// Drawn (credit facilities)
    pub is_drawn: bool,
    /// Active instrument; deactivation is explicit, never deletion
    pub is_active: bool,
    /// CUSIP, nine characters
    pub cusip: Option<String>,
    /// ISIN, twelve characters
    pub isin: Option<String>,
    /// Currency code
    pub currency: String,
    /// Collateral knowledge tag; "unknown" satisfies the secured invariant
    /// when no collateral rows exist
    pub collateral_data_confidence: Option<String>,
    /// Open attribute object: source tags, deactivation reasons, per-field
    /// confidence
    pub attributes: Value,
    /// Provenance
    pub provenance: Provenance,
}

/// Provenance fields carried by extracted facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    /// Source filing URL
    pub source_filing_url: Option<String>,
    /// Filing date of the source
    pub filing_date: Option<NaiveDate>,
    /// When the fact was extracted
    pub extracted_at: Option<DateTime<Utc>>,
    /// Extraction method (model tier or deterministic parser)
    pub extraction_method: Option<String>,
    /// Extractor confidence in [0, 1]
    pub confidence: Option<f64>,
}

/// Confidence tag on a guarantee edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuaranteeConfidence {
    /// No usable source
    Unknown,
    /// Partially supported
    Partial,
    /// LLM-extracted from a governing document
    Extracted,
    /// Read from Exhibit 22
    Verified,
}

impl GuaranteeConfidence {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Partial => "partial",
            Self::Extracted => "extracted",
            Self::Verified => "verified",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Self::Unknown),
            "partial" => Some(Self::Partial),
            "extracted" => Some(Self::Extracted),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }
}

/// Guarantee edge from a debt instrument to a guarantor entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guarantee {
    /// Row id
    pub id: i64,
    /// Guaranteed instrument
    pub debt_instrument_id: i64,
    /// Guarantor entity
    pub guarantor_entity_id: i64,
    /// Release/add triggers, when disclosed
    pub conditions: Option<String>,
    /// Source confidence tag
    pub confidence: GuaranteeConfidence,
}

/// Collateral classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollateralType {
    /// Real property
    RealEstate,
    /// Equipment
    Equipment,
    /// Aircraft, vessels, rigs, rolling stock
    Vehicles,
    /// Receivables
    Receivables,
    /// Inventory
    Inventory,
    /// Intellectual property, licenses, spectrum
    Ip,
    /// Cash and deposit accounts
    Cash,
    /// Investment securities
    Securities,
    /// Pledged subsidiary equity
    SubsidiaryStock,
    /// Oil & gas reserves and related assets
    EnergyAssets,
    /// Blanket lien on substantially all assets
    GeneralLien,
}

impl CollateralType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RealEstate => "real_estate",
            Self::Equipment => "equipment",
            Self::Vehicles => "vehicles",
            Self::Receivables => "receivables",
            Self::Inventory => "inventory",
            Self::Ip => "ip",
            Self::Cash => "cash",
            Self::Securities => "securities",
            Self::SubsidiaryStock => "subsidiary_stock",
            Self::EnergyAssets => "energy_assets",
            Self::GeneralLien => "general_lien",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "real_estate" => Some(Self::RealEstate),
            "equipment" => Some(Self::Equipment),
            "vehicles" => Some(Self::Vehicles),
            "receivables" => Some(Self::Receivables),
            "inventory" => Some(Self::Inventory),
            "ip" => Some(Self::Ip),
            "cash" => Some(Self::Cash),
            "securities" => Some(Self::Securities),
            "subsidiary_stock" => Some(Self::SubsidiaryStock),
            "energy_assets" => Some(Self::EnergyAssets),
            "general_lien" => Some(Self::GeneralLien),
            _ => None,
        }
    }
}

/// Collateral securing a debt instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collateral {
    /// Row id
    pub id: i64,
    /// Secured instrument
    pub debt_instrument_id: i64,
    /// Asset class
    pub collateral_type: CollateralType,
    /// Description from the source
    pub description: String,
    /// Lien priority (first_lien / second_lien)
    pub priority: Option<String>,
    /// Estimated value in cents, when disclosed
    pub estimated_value_cents: Option<i64>,
}

/// Covenant classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovenantType {
    /// Maintenance/financial covenant
    Financial,
    /// Negative covenant
    Negative,
    /// Incurrence covenant
    Incurrence,
    /// Protective/affirmative covenant
    Protective,
}

impl CovenantType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Negative => "negative",
            Self::Incurrence => "incurrence",
            Self::Protective => "protective",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "financial" => Some(Self::Financial),
            "negative" => Some(Self::Negative),
            "incurrence" => Some(Self::Incurrence),
            "protective" => Some(Self::Protective),
            _ => None,
        }
    }
}

/// Threshold direction for a tested covenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    /// Metric must stay at or below the threshold
    Maximum,
    /// Metric must stay at or above the threshold
    Minimum,
}

impl ThresholdType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "maximum" => Some(Self::Maximum),
            "minimum" => Some(Self::Minimum),
            _ => None,
        }
    }
}

/// A covenant extracted from a governing document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Covenant {
    /// Row id
    pub id: i64,
    /// Owning company
    pub company_id: i64,
    /// Linked instrument, when instrument-scoped
    pub debt_instrument_id: Option<i64>,
    /// Source document section
    pub section_id: Option<i64>,
    /// Covenant classification
    pub covenant_type: CovenantType,
    /// Covenant name
    pub covenant_name: String,
    /// Tested metric, when any
    pub test_metric: Option<String>,
    /// Threshold as a decimal string to avoid float loss
    pub threshold_value: Option<String>,
    /// Threshold direction
    pub threshold_type: Option<ThresholdType>,
    /// Test frequency
    pub test_frequency: Option<String>,
    /// Free-text description
    pub description: Option<String>,
    /// Threshold steps down over time
    pub has_step_down: bool,
    /// Cure period in days
    pub cure_period_days: Option<i64>,
    /// Extractor confidence in [0, 1]
    pub extraction_confidence: Option<f64>,
    /// Verbatim source text
    pub source_text: Option<String>,
}

/// One fiscal period of company financials. EBITDA is computed, not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialPeriod {
    /// Row id
    pub id: i64,
    /// Owning company
    pub company_id: i64,
    /// Fiscal year
    pub fiscal_year: i32,
    /// Fiscal quarter, 1–4
    pub fiscal_quarter: i32,
    /// Revenue in cents
    pub revenue_cents: Option<i64>,
    /// Operating income in cents
    pub operating_income_cents: Option<i64>,
    /// Depreciation & amortization in cents
    pub depreciation_amortization_cents: Option<i64>,
    /// Interest expense in cents
    pub interest_expense_cents: Option<i64>,
    /// Income tax expense in cents
    pub income_tax_expense_cents: Option<i64>,
    /// Total debt from the balance sheet in cents
    pub total_debt_cents: Option<i64>,
    /// Cash and equivalents in cents
    pub cash_cents: Option<i64>,
    /// Total assets in cents
    pub total_assets_cents: Option<i64>,
    /// Source filing URL
    pub source_filing_url: Option<String>,
    /// Period end date
    pub period_end_date: Option<NaiveDate>,
}

impl FinancialPeriod {
    /// EBITDA = operating income + depreciation & amortization.
    pub fn ebitda_cents(&self) -> Option<i64> {
        match (
            self.operating_income_cents,
            self.depreciation_amortization_cents,
        ) {
            (Some(oi), Some(da)) => Some(oi + da),
            _ => None,
        }
    }
}

/// A stored document section (see `sections::SectionType` for the taxonomy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSection {
    /// Row id
    pub id: i64,
    /// Owning company
    pub company_id: i64,
    /// Document class
    pub doc_type: String,
    /// Section class
    pub section_type: String,
    /// Filing date of the source document
    pub filing_date: Option<NaiveDate>,
    /// Section title
    pub title: String,
    /// Section text
    pub content: String,
    /// Cached content length
    pub content_length: i64,
    /// Provenance URL
    pub sec_filing_url: String,
}

/// How a debt instrument relates to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// The document governs the instrument
    Governs,
    /// The document merely references the instrument
    References,
}

impl RelationshipType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Governs => "governs",
            Self::References => "references",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "governs" => Some(Self::Governs),
            "references" => Some(Self::References),
            _ => None,
        }
    }
}

/// Provenance tag for an instrument-to-document link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// CUSIP or ISIN appears in the document
    IdentifierMatch,
    /// Instrument name appears in the document body
    NameMatch,
    /// Coupon and maturity year co-occur in the document
    RateMaturityMatch,
    /// Oldest base indenture for the issuer
    BaseIndentureFallback,
    /// Most recent supplemental indenture
    SupplementalFallback,
    /// Most recent credit agreement (loans/revolvers)
    CreditAgreementFallback,
}

impl MatchMethod {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IdentifierMatch => "identifier_match",
            Self::NameMatch => "name_match",
            Self::RateMaturityMatch => "rate_maturity_match",
            Self::BaseIndentureFallback => "base_indenture_fallback",
            Self::SupplementalFallback => "supplemental_fallback",
            Self::CreditAgreementFallback => "credit_agreement_fallback",
        }
    }

    /// Link confidence for this match method.
    pub const fn confidence(&self) -> f64 {
        match self {
            Self::IdentifierMatch => 0.95,
            Self::NameMatch => 0.85,
            Self::RateMaturityMatch => 0.80,
            Self::BaseIndentureFallback => 0.60,
            Self::SupplementalFallback => 0.55,
            Self::CreditAgreementFallback => 0.60,
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identifier_match" => Some(Self::IdentifierMatch),
            "name_match" => Some(Self::NameMatch),
            "rate_maturity_match" => Some(Self::RateMaturityMatch),
            "base_indenture_fallback" => Some(Self::BaseIndentureFallback),
            "supplemental_fallback" => Some(Self::SupplementalFallback),
            "credit_agreement_fallback" => Some(Self::CreditAgreementFallback),
            _ => None,
        }
    }
}

/// Link between a debt instrument and its governing/referenced document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDocumentLink {
    /// Row id
    pub id: i64,
    /// Linked instrument
    pub debt_instrument_id: i64,
    /// Linked section
    pub section_id: i64,
    /// Relationship class
    pub relationship_type: RelationshipType,
    /// Link confidence in [0, 1]
    pub confidence: f64,
    /// How the link was made
    pub match_method: MatchMethod,
}

/// Terminal status of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step completed and wrote data
    Success,
    /// Source material absent; dependents skip
    NoData,
    /// Step failed
    Error,
}

impl StepStatus {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoData => "no_data",
            Self::Error => "error",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "no_data" => Some(Self::NoData),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Recorded state of one pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    /// Terminal status
    pub status: StepStatus,
    /// Reason, mostly for `no_data` and `error`
    pub reason: Option<String>,
    /// When the step reached this state
    pub at: DateTime<Utc>,
}

/// Per-company extraction bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// Company id
    pub company_id: i64,
    /// Last QA score out of 100
    pub qa_score: Option<i64>,
    /// Model tier that produced the accepted extraction
    pub extraction_method: Option<String>,
    /// Schema version of the cached extraction
    pub data_version: i64,
    /// Fix-loop iterations of the accepted extraction
    pub iteration_count: Option<i64>,
    /// Status per pipeline step
    pub extraction_status: BTreeMap<String, StepState>,
    /// Per-field confidence map
    pub field_confidence: Value,
    /// Accumulated warnings
    pub warnings: Vec<String>,
    /// Token/cost usage by step
    pub usage: Value,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl ExtractionMetadata {
    /// Fresh metadata for a company with nothing recorded yet.
    pub fn empty(company_id: i64) -> Self {
        Self {
            company_id,
            qa_score: None,
            extraction_method: None,
            data_version: 1,
            iteration_count: None,
            extraction_status: BTreeMap::new(),
            field_confidence: Value::Null,
            warnings: Vec::new(),
            usage: Value::Null,
            updated_at: Utc::now(),
        }
    }
}

/// Derived per-company credit metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditMetrics {
    /// Company id
    pub company_id: i64,
    /// Sum of active outstanding in cents
    pub total_debt_cents: i64,
    /// Outstanding maturing within 12 months, cents
    pub debt_due_1yr_cents: i64,
    /// Outstanding maturing in 12–24 months, cents
    pub debt_due_2yr_cents: i64,
    /// Outstanding maturing in 24–36 months, cents
    pub debt_due_3yr_cents: i64,
    /// Outstanding-weighted average years to maturity
    pub weighted_avg_maturity: Option<f64>,
    /// Any outstanding due within 24 months
    pub has_near_term_maturity: bool,
    /// Trailing-twelve-month EBITDA in cents
    pub ttm_ebitda_cents: Option<i64>,
    /// total_debt / TTM EBITDA
    pub leverage_ratio: Option<f64>,
    /// (total_debt − cash) / TTM EBITDA
    pub net_leverage_ratio: Option<f64>,
    /// TTM EBITDA / TTM interest expense
    pub interest_coverage: Option<f64>,
    /// Leverage above 4×
    pub is_leveraged: bool,
    /// Warnings attached during computation
    pub warnings: Vec<String>,
    /// Filings that supplied the inputs
    pub provenance: Value,
    /// Computation timestamp
    pub computed_at: DateTime<Utc>,
}

/// Maximum slug length; long legal names are cut at a hyphen boundary, so
/// two distinct names can collide and need [`dedupe_slug`].
const SLUG_MAX_LEN: usize = 60;

/// Normalize an entity name to its identity slug.
///
/// Lowercases, maps runs of non-alphanumerics to single hyphens, trims and
/// caps the length. Collisions within a company are resolved by
/// [`dedupe_slug`].
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    if slug.len() > SLUG_MAX_LEN {
        slug.truncate(SLUG_MAX_LEN);
        if let Some(cut) = slug.rfind('-') {
            slug.truncate(cut);
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("entity");
    }
    slug
}

/// Alphanumeric content of a name, used to tell "same entity, punctuation
/// variance" apart from a genuine slug collision after truncation.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Resolve a slug collision with a deterministic numeric suffix.
pub fn dedupe_slug(base: &str, taken: &dyn Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    for i in 2.. {
        let candidate = format!("{}-{}", base, i);
        if !taken(&candidate) {
            return candidate;
        }
    }
    unreachable!("slug space exhausted")
}

/// Validate a CUSIP: nine characters of `[A-Z0-9]`.
pub fn is_valid_cusip(cusip: &str) -> bool {
    cusip.len() == 9
        && cusip
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Validate an ISIN: twelve characters, two-letter country prefix.
pub fn is_valid_isin(isin: &str) -> bool {
    isin.len() == 12
        && isin.chars().take(2).all(|c| c.is_ascii_uppercase())
        && isin
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Finance, LLC"), "acme-finance-llc");
        assert_eq!(slugify("Acme (Luxembourg) S.à r.l."), "acme-luxembourg-s-r-l");
        assert_eq!(slugify("  "), "entity");
    }

    #[test]
    fn test_slugify_caps_length() {
        let long_a = format!("{} Alpha Partners", "Very Long Holding Name ".repeat(4));
        let long_b = format!("{} Beta Partners", "Very Long Holding Name ".repeat(4));
        let slug_a = slugify(&long_a);
        let slug_b = slugify(&long_b);
        assert!(slug_a.len() <= 60);
        // Truncation makes distinct names collide; name_key still tells
        // them apart so the store can suffix.
        assert_eq!(slug_a, slug_b);
        assert_ne!(name_key(&long_a), name_key(&long_b));
    }

    #[test]
    fn test_name_key_ignores_punctuation() {
        assert_eq!(name_key("Acme Finance, LLC"), name_key("Acme Finance LLC"));
        assert_ne!(name_key("Acme Co"), name_key("Acme Corp"));
    }

    #[test]
    fn test_dedupe_slug() {
        let existing = ["acme-finance-llc", "acme-finance-llc-2"];
        let taken = |s: &str| existing.contains(&s);
        assert_eq!(dedupe_slug("acme-holdings", &taken), "acme-holdings");
        assert_eq!(dedupe_slug("acme-finance-llc", &taken), "acme-finance-llc-3");
    }

    #[test]
    fn test_cusip_validation() {
        assert!(is_valid_cusip("037833100"));
        assert!(is_valid_cusip("68389X105"));
        assert!(!is_valid_cusip("68389x105"));
        assert!(!is_valid_cusip("12345678"));
        assert!(!is_valid_cusip("1234567890"));
    }

    #[test]
    fn test_isin_validation() {
        assert!(is_valid_isin("US0378331005"));
        assert!(!is_valid_isin("0S0378331005"));
        assert!(!is_valid_isin("US03783310"));
    }

    #[test]
    fn test_ebitda_computed() {
        let mut period = FinancialPeriod {
            id: 0,
            company_id: 1,
            fiscal_year: 2025,
            fiscal_quarter: 2,
            revenue_cents: Some(500_000_000_00),
            operating_income_cents: Some(120_000_000_00),
            depreciation_amortization_cents: Some(30_000_000_00),
            interest_expense_cents: Some(20_000_000_00),
            income_tax_expense_cents: None,
            total_debt_cents: None,
            cash_cents: None,
            total_assets_cents: None,
            source_filing_url: None,
            period_end_date: None,
        };
        assert_eq!(period.ebitda_cents(), Some(150_000_000_00));
        period.depreciation_amortization_cents = None;
        assert_eq!(period.ebitda_cents(), None);
    }

    #[test]
    fn test_match_method_confidence_ladder() {
        assert!(MatchMethod::IdentifierMatch.confidence() > MatchMethod::NameMatch.confidence());
        assert!(MatchMethod::NameMatch.confidence() > MatchMethod::RateMaturityMatch.confidence());
        assert!(
            MatchMethod::BaseIndentureFallback.confidence()
                > MatchMethod::SupplementalFallback.confidence()
        );
        assert_eq!(MatchMethod::BaseIndentureFallback.confidence(), 0.60);
    }

    #[test]
    fn test_guarantee_confidence_ordering() {
        assert!(GuaranteeConfidence::Verified > GuaranteeConfidence::Extracted);
        assert!(GuaranteeConfidence::Extracted > GuaranteeConfidence::Partial);
        assert!(GuaranteeConfidence::Partial > GuaranteeConfidence::Unknown);
    }

    #[test]
    fn test_enum_round_trips() {
        for s in ["holdco", "opco", "finco", "spv", "subsidiary"] {
            assert_eq!(EntityType::parse(s).unwrap().as_str(), s);
        }
        for s in ["senior_secured", "senior_unsecured", "subordinated"] {
            assert_eq!(Seniority::parse(s).unwrap().as_str(), s);
        }
        for s in [
            "real_estate",
            "equipment",
            "vehicles",
            "receivables",
            "inventory",
            "ip",
            "cash",
            "securities",
            "subsidiary_stock",
            "energy_assets",
            "general_lien",
        ] {
            assert_eq!(CollateralType::parse(s).unwrap().as_str(), s);
        }
        for s in ["financial", "negative", "incurrence", "protective"] {
            assert_eq!(CovenantType::parse(s).unwrap().as_str(), s);
        }
    }
}
