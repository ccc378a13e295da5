//! SQLite credit graph store.
//!
//! Single-connection store in the same shape as a cache layer: explicit
//! schema initialization, prepared statements, `params!` everywhere and one
//! transaction per logical write. Full-text search over document sections
//! uses an external-content FTS5 table kept in sync by triggers.

use crate::error::{DataError, Result};
use crate::store::models::{
    dedupe_slug, name_key, slugify, Collateral, CollateralType, Company, Covenant, CovenantType,
    CreditMetrics, DebtInstrument, Entity, EntityType, ExtractionMetadata, FinancialPeriod,
    Guarantee, GuaranteeConfidence, InstrumentDocumentLink, MatchMethod, OwnershipLink,
    OwnershipType, Provenance, RelationshipType, Seniority, StepState, StepStatus, StoredSection,
    ThresholdType,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Schema version stamped on extraction-cache rows.
pub const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed credit graph.
#[derive(Debug)]
pub struct GraphStore {
    conn: Connection,
}

impl GraphStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY,
                ticker TEXT NOT NULL UNIQUE,
                cik TEXT NOT NULL,
                legal_name TEXT NOT NULL,
                industry TEXT,
                sector TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                jurisdiction TEXT,
                entity_type TEXT NOT NULL,
                is_guarantor INTEGER NOT NULL DEFAULT 0,
                is_unrestricted INTEGER NOT NULL DEFAULT 0,
                is_root INTEGER NOT NULL DEFAULT 0,
                parent_entity_id INTEGER REFERENCES entities(id),
                UNIQUE (company_id, slug)
            );
            CREATE INDEX IF NOT EXISTS idx_entities_company ON entities(company_id);

            CREATE TABLE IF NOT EXISTS ownership_links (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                parent_entity_id INTEGER NOT NULL REFERENCES entities(id),
                child_entity_id INTEGER NOT NULL REFERENCES entities(id),
                ownership_type TEXT,
                ownership_percent REAL,
                evidence_quote TEXT,
                UNIQUE (parent_entity_id, child_entity_id)
            );

            CREATE TABLE IF NOT EXISTS debt_instruments (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                issuer_entity_id INTEGER REFERENCES entities(id),
                name TEXT NOT NULL,
                seniority TEXT NOT NULL,
                security_type TEXT,
                interest_rate_bps INTEGER,
                is_floating INTEGER NOT NULL DEFAULT 0,
                benchmark TEXT,
                spread_bps INTEGER,
                floor_bps INTEGER,
                issue_date TEXT,
                maturity_date TEXT,
                principal_cents INTEGER,
                outstanding_cents INTEGER,
                is_drawn INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                cusip TEXT,
                isin TEXT,
                currency TEXT NOT NULL DEFAULT 'USD',
                collateral_data_confidence TEXT,
                attributes TEXT NOT NULL DEFAULT '{}',
                source_filing_url TEXT,
                filing_date TEXT,
                extracted_at TEXT,
                extraction_method TEXT,
                confidence REAL
            );
            CREATE INDEX IF NOT EXISTS idx_debt_company ON debt_instruments(company_id);

            CREATE TABLE IF NOT EXISTS guarantees (
                id INTEGER PRIMARY KEY,
                debt_instrument_id INTEGER NOT NULL REFERENCES debt_instruments(id) ON DELETE CASCADE,
                guarantor_entity_id INTEGER NOT NULL REFERENCES entities(id),
                conditions TEXT,
                confidence TEXT NOT NULL,
                UNIQUE (debt_instrument_id, guarantor_entity_id)
            );

            CREATE TABLE IF NOT EXISTS collateral (
                id INTEGER PRIMARY KEY,
                debt_instrument_id INTEGER NOT NULL REFERENCES debt_instruments(id) ON DELETE CASCADE,
                collateral_type TEXT NOT NULL,
                description TEXT NOT NULL,
                priority TEXT,
                estimated_value_cents INTEGER,
                UNIQUE (debt_instrument_id, collateral_type, description)
            );

            CREATE TABLE IF NOT EXISTS covenants (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                debt_instrument_id INTEGER REFERENCES debt_instruments(id),
                section_id INTEGER REFERENCES document_sections(id),
                covenant_type TEXT NOT NULL,
                covenant_name TEXT NOT NULL,
                test_metric TEXT,
                threshold_value TEXT,
                threshold_type TEXT,
                test_frequency TEXT,
                description TEXT,
                has_step_down INTEGER NOT NULL DEFAULT 0,
                cure_period_days INTEGER,
                extraction_confidence REAL,
                source_text TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_covenants_company ON covenants(company_id);

            CREATE TABLE IF NOT EXISTS company_financials (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                fiscal_year INTEGER NOT NULL,
                fiscal_quarter INTEGER NOT NULL,
                revenue_cents INTEGER,
                operating_income_cents INTEGER,
                depreciation_amortization_cents INTEGER,
                interest_expense_cents INTEGER,
                income_tax_expense_cents INTEGER,
                total_debt_cents INTEGER,
                cash_cents INTEGER,
                total_assets_cents INTEGER,
                source_filing_url TEXT,
                period_end_date TEXT,
                UNIQUE (company_id, fiscal_year, fiscal_quarter)
            );

            CREATE TABLE IF NOT EXISTS document_sections (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                doc_type TEXT NOT NULL,
                section_type TEXT NOT NULL,
                filing_date TEXT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                content_length INTEGER NOT NULL,
                sec_filing_url TEXT NOT NULL,
                UNIQUE (company_id, section_type, sec_filing_url)
            );
            CREATE INDEX IF NOT EXISTS idx_sections_company ON document_sections(company_id);

            CREATE VIRTUAL TABLE IF NOT EXISTS document_sections_fts USING fts5(
                title,
                content,
                content='document_sections',
                content_rowid='id'
            );
            CREATE TRIGGER IF NOT EXISTS sections_ai AFTER INSERT ON document_sections BEGIN
                INSERT INTO document_sections_fts(rowid, title, content)
                VALUES (new.id, new.title, new.content);
            END;
            CREATE TRIGGER IF NOT EXISTS sections_ad AFTER DELETE ON document_sections BEGIN
                INSERT INTO document_sections_fts(document_sections_fts, rowid, title, content)
                VALUES ('delete', old.id, old.title, old.content);
            END;
            CREATE TRIGGER IF NOT EXISTS sections_au AFTER UPDATE ON document_sections BEGIN
                INSERT INTO document_sections_fts(document_sections_fts, rowid, title, content)
                VALUES ('delete', old.id, old.title, old.content);
                INSERT INTO document_sections_fts(rowid, title, content)
                VALUES (new.id, new.title, new.content);
            END;

            CREATE TABLE IF NOT EXISTS instrument_documents (
                id INTEGER PRIMARY KEY,
                debt_instrument_id INTEGER NOT NULL REFERENCES debt_instruments(id) ON DELETE CASCADE,
                section_id INTEGER NOT NULL REFERENCES document_sections(id) ON DELETE CASCADE,
                relationship_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                match_method TEXT NOT NULL,
                UNIQUE (debt_instrument_id, section_id, relationship_type)
            );

            CREATE TABLE IF NOT EXISTS extraction_metadata (
                company_id INTEGER PRIMARY KEY REFERENCES companies(id) ON DELETE CASCADE,
                qa_score INTEGER,
                extraction_method TEXT,
                data_version INTEGER NOT NULL DEFAULT 1,
                iteration_count INTEGER,
                extraction_status TEXT NOT NULL DEFAULT '{}',
                field_confidence TEXT NOT NULL DEFAULT 'null',
                warnings TEXT NOT NULL DEFAULT '[]',
                usage TEXT NOT NULL DEFAULT 'null',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS extraction_cache (
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                step TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (company_id, step, schema_version)
            );

            CREATE TABLE IF NOT EXISTS company_locks (
                company_id INTEGER PRIMARY KEY REFERENCES companies(id) ON DELETE CASCADE,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credit_metrics (
                company_id INTEGER PRIMARY KEY REFERENCES companies(id) ON DELETE CASCADE,
                total_debt_cents INTEGER NOT NULL,
                debt_due_1yr_cents INTEGER NOT NULL,
                debt_due_2yr_cents INTEGER NOT NULL,
                debt_due_3yr_cents INTEGER NOT NULL,
                weighted_avg_maturity REAL,
                has_near_term_maturity INTEGER NOT NULL,
                ttm_ebitda_cents INTEGER,
                leverage_ratio REAL,
                net_leverage_ratio REAL,
                interest_coverage REAL,
                is_leveraged INTEGER NOT NULL,
                warnings TEXT NOT NULL DEFAULT '[]',
                provenance TEXT NOT NULL DEFAULT 'null',
                computed_at TEXT NOT NULL
            );",
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Companies
    // ------------------------------------------------------------------

    /// Insert a company if new, otherwise refresh its descriptive fields.
    pub fn upsert_company(
        &self,
        ticker: &str,
        cik: &str,
        legal_name: &str,
        industry: Option<&str>,
        sector: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO companies (ticker, cik, legal_name, industry, sector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(ticker) DO UPDATE SET
                cik = excluded.cik,
                legal_name = excluded.legal_name,
                industry = COALESCE(excluded.industry, companies.industry),
                sector = COALESCE(excluded.sector, companies.sector)",
            params![
                ticker.to_uppercase(),
                cik,
                legal_name,
                industry,
                sector,
                Utc::now().to_rfc3339()
            ],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM companies WHERE ticker = ?1",
            params![ticker.to_uppercase()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Look up a company by ticker.
    pub fn get_company(&self, ticker: &str) -> Result<Option<Company>> {
        self.conn
            .query_row(
                "SELECT id, ticker, cik, legal_name, industry, sector
                 FROM companies WHERE ticker = ?1",
                params![ticker.to_uppercase()],
                |row| {
                    Ok(Company {
                        id: row.get(0)?,
                        ticker: row.get(1)?,
                        cik: row.get(2)?,
                        legal_name: row.get(3)?,
                        industry: row.get(4)?,
                        sector: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(DataError::from)
    }

    /// All companies, ordered by ticker.
    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticker, cik, legal_name, industry, sector
             FROM companies ORDER BY ticker",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Company {
                id: row.get(0)?,
                ticker: row.get(1)?,
                cik: row.get(2)?,
                legal_name: row.get(3)?,
                industry: row.get(4)?,
                sector: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    // ------------------------------------------------------------------
    // Entities and ownership
    // ------------------------------------------------------------------

    /// Upsert an entity by its name slug within a company.
    ///
    /// A different name that happens to collide on the slug gets a
    /// deterministic suffix instead of silently merging two entities.
    pub fn upsert_entity(
        &self,
        company_id: i64,
        name: &str,
        jurisdiction: Option<&str>,
        entity_type: EntityType,
        is_guarantor: bool,
        is_unrestricted: bool,
    ) -> Result<i64> {
        let base_slug = slugify(name);

        // Scan the base slug and its suffixed variants: re-upserting an
        // entity that previously collided must land on its existing row,
        // not mint another suffix.
        let mut stmt = self.conn.prepare(
            "SELECT id, name, slug FROM entities
             WHERE company_id = ?1 AND (slug = ?2 OR slug LIKE ?2 || '-%')",
        )?;
        let candidates: Vec<(i64, String, String)> = stmt
            .query_map(params![company_id, base_slug], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        if let Some((id, _, _)) = candidates
            .iter()
            .find(|(_, existing_name, _)| names_equivalent(existing_name, name))
        {
            self.conn.execute(
                "UPDATE entities SET
                    jurisdiction = COALESCE(?1, jurisdiction),
                    is_guarantor = is_guarantor OR ?2,
                    is_unrestricted = is_unrestricted OR ?3
                 WHERE id = ?4",
                params![jurisdiction, is_guarantor, is_unrestricted, id],
            )?;
            return Ok(*id);
        }

        let slug = if candidates.iter().any(|(_, _, slug)| *slug == base_slug) {
            let taken = |candidate: &str| -> bool {
                candidates.iter().any(|(_, _, slug)| slug == candidate)
            };
            dedupe_slug(&base_slug, &taken)
        } else {
            base_slug
        };

        self.conn.execute(
            "INSERT INTO entities
                (company_id, name, slug, jurisdiction, entity_type,
                 is_guarantor, is_unrestricted, is_root, parent_entity_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL)",
            params![
                company_id,
                name,
                slug,
                jurisdiction,
                entity_type.as_str(),
                is_guarantor,
                is_unrestricted
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Find an entity id by name within a company, resolving through the
    /// same slug-and-suffix scan as [`Self::upsert_entity`].
    pub fn find_entity(&self, company_id: i64, name: &str) -> Result<Option<i64>> {
        let base_slug = slugify(name);
        let mut stmt = self.conn.prepare(
            "SELECT id, name, slug FROM entities
             WHERE company_id = ?1 AND (slug = ?2 OR slug LIKE ?2 || '-%')",
        )?;
        let candidates: Vec<(i64, String, String)> = stmt
            .query_map(params![company_id, base_slug], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if let Some((id, _, _)) = candidates
            .iter()
            .find(|(_, existing_name, _)| names_equivalent(existing_name, name))
        {
            return Ok(Some(*id));
        }
        Ok(candidates
            .iter()
            .find(|(_, _, slug)| *slug == base_slug)
            .map(|(id, _, _)| *id))
    }

    /// All entities of a company.
    pub fn list_entities(&self, company_id: i64) -> Result<Vec<Entity>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, name, slug, jurisdiction, entity_type,
                    is_guarantor, is_unrestricted, is_root, parent_entity_id
             FROM entities WHERE company_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            let entity_type: String = row.get(5)?;
            Ok(Entity {
                id: row.get(0)?,
                company_id: row.get(1)?,
                name: row.get(2)?,
                slug: row.get(3)?,
                jurisdiction: row.get(4)?,
                entity_type: EntityType::parse(&entity_type).unwrap_or(EntityType::Subsidiary),
                is_guarantor: row.get(6)?,
                is_unrestricted: row.get(7)?,
                is_root: row.get(8)?,
                parent_entity_id: row.get(9)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    /// Set the principal parent and root flag of an entity.
    pub fn set_entity_parent(
        &self,
        entity_id: i64,
        parent_entity_id: Option<i64>,
        is_root: bool,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE entities SET parent_entity_id = ?1, is_root = ?2 WHERE id = ?3",
            params![parent_entity_id, is_root, entity_id],
        )?;
        Ok(())
    }

    /// Upsert an ownership edge. Existing non-null qualifiers survive a null
    /// re-extraction.
    pub fn upsert_ownership_link(
        &self,
        company_id: i64,
        parent_entity_id: i64,
        child_entity_id: i64,
        ownership_type: Option<OwnershipType>,
        ownership_percent: Option<f64>,
        evidence_quote: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO ownership_links
                (company_id, parent_entity_id, child_entity_id,
                 ownership_type, ownership_percent, evidence_quote)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(parent_entity_id, child_entity_id) DO UPDATE SET
                ownership_type = COALESCE(excluded.ownership_type, ownership_links.ownership_type),
                ownership_percent = COALESCE(excluded.ownership_percent, ownership_links.ownership_percent),
                evidence_quote = COALESCE(excluded.evidence_quote, ownership_links.evidence_quote)",
            params![
                company_id,
                parent_entity_id,
                child_entity_id,
                ownership_type.map(|t| t.as_str()),
                ownership_percent,
                evidence_quote
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM ownership_links
             WHERE parent_entity_id = ?1 AND child_entity_id = ?2",
            params![parent_entity_id, child_entity_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// All ownership edges of a company.
    pub fn list_ownership_links(&self, company_id: i64) -> Result<Vec<OwnershipLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, parent_entity_id, child_entity_id,
                    ownership_type, ownership_percent, evidence_quote
             FROM ownership_links WHERE company_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            let ownership_type: Option<String> = row.get(4)?;
            Ok(OwnershipLink {
                id: row.get(0)?,
                company_id: row.get(1)?,
                parent_entity_id: row.get(2)?,
                child_entity_id: row.get(3)?,
                ownership_type: ownership_type.as_deref().and_then(OwnershipType::parse),
                ownership_percent: row.get(5)?,
                evidence_quote: row.get(6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    // ------------------------------------------------------------------
    // Debt instruments
    // ------------------------------------------------------------------

    /// Find an existing instrument by identity: CUSIP/ISIN first, then
    /// (issuer, name slug, maturity date).
    pub fn find_debt_instrument(
        &self,
        company_id: i64,
        issuer_entity_id: Option<i64>,
        name: &str,
        maturity_date: Option<NaiveDate>,
        cusip: Option<&str>,
        isin: Option<&str>,
    ) -> Result<Option<i64>> {
        if let Some(cusip) = cusip {
            let hit: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM debt_instruments WHERE company_id = ?1 AND cusip = ?2",
                    params![company_id, cusip],
                    |row| row.get(0),
                )
                .optional()?;
            if hit.is_some() {
                return Ok(hit);
            }
        }
        if let Some(isin) = isin {
            let hit: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM debt_instruments WHERE company_id = ?1 AND isin = ?2",
                    params![company_id, isin],
                    |row| row.get(0),
                )
                .optional()?;
            if hit.is_some() {
                return Ok(hit);
            }
        }

        let name_slug = slugify(name);
        let mut stmt = self.conn.prepare(
            "SELECT id, issuer_entity_id, name, maturity_date
             FROM debt_instruments WHERE company_id = ?1",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        for row in rows {
            let (id, row_issuer, row_name, row_maturity) = row?;
            let row_maturity =
                row_maturity.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
            if slugify(&row_name) == name_slug
                && row_issuer == issuer_entity_id
                && row_maturity == maturity_date
            {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Insert a new debt instrument, returning its id.
    pub fn insert_debt_instrument(&self, instrument: &DebtInstrument) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO debt_instruments
                (company_id, issuer_entity_id, name, seniority, security_type,
                 interest_rate_bps, is_floating, benchmark, spread_bps, floor_bps,
                 issue_date, maturity_date, principal_cents, outstanding_cents,
                 is_drawn, is_active, cusip, isin, currency,
                 collateral_data_confidence, attributes,
                 source_filing_url, filing_date, extracted_at, extraction_method, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            params![
                instrument.company_id,
                instrument.issuer_entity_id,
                instrument.name,
                instrument.seniority.as_str(),
                instrument.security_type,
                instrument.interest_rate_bps,
                instrument.is_floating,
                instrument.benchmark,
                instrument.spread_bps,
                instrument.floor_bps,
                instrument.issue_date.map(|d| d.to_string()),
                instrument.maturity_date.map(|d| d.to_string()),
                instrument.principal_cents,
                instrument.outstanding_cents,
                instrument.is_drawn,
                instrument.is_active,
                instrument.cusip,
                instrument.isin,
                instrument.currency,
                instrument.collateral_data_confidence,
                instrument.attributes.to_string(),
                instrument.provenance.source_filing_url,
                instrument.provenance.filing_date.map(|d| d.to_string()),
                instrument.provenance.extracted_at.map(|t| t.to_rfc3339()),
                instrument.provenance.extraction_method,
                instrument.provenance.confidence,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Rewrite a debt instrument row in place.
    pub fn update_debt_instrument(&self, instrument: &DebtInstrument) -> Result<()> {
        self.conn.execute(
            "UPDATE debt_instruments SET
                issuer_entity_id = ?1, name = ?2, seniority = ?3, security_type = ?4,
                interest_rate_bps = ?5, is_floating = ?6, benchmark = ?7,
                spread_bps = ?8, floor_bps = ?9, issue_date = ?10, maturity_date = ?11,
                principal_cents = ?12, outstanding_cents = ?13, is_drawn = ?14,
                is_active = ?15, cusip = ?16, isin = ?17, currency = ?18,
                collateral_data_confidence = ?19, attributes = ?20,
                source_filing_url = ?21, filing_date = ?22, extracted_at = ?23,
                extraction_method = ?24, confidence = ?25
             WHERE id = ?26",
            params![
                instrument.issuer_entity_id,
                instrument.name,
                instrument.seniority.as_str(),
                instrument.security_type,
                instrument.interest_rate_bps,
                instrument.is_floating,
                instrument.benchmark,
                instrument.spread_bps,
                instrument.floor_bps,
                instrument.issue_date.map(|d| d.to_string()),
                instrument.maturity_date.map(|d| d.to_string()),
                instrument.principal_cents,
                instrument.outstanding_cents,
                instrument.is_drawn,
                instrument.is_active,
                instrument.cusip,
                instrument.isin,
                instrument.currency,
                instrument.collateral_data_confidence,
                instrument.attributes.to_string(),
                instrument.provenance.source_filing_url,
                instrument.provenance.filing_date.map(|d| d.to_string()),
                instrument.provenance.extracted_at.map(|t| t.to_rfc3339()),
                instrument.provenance.extraction_method,
                instrument.provenance.confidence,
                instrument.id,
            ],
        )?;
        Ok(())
    }

    /// Load one instrument by id.
    pub fn get_debt_instrument(&self, id: i64) -> Result<Option<DebtInstrument>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE id = ?1",
            Self::DEBT_SELECT
        ))?;
        let mut rows = stmt.query_map(params![id], Self::debt_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All instruments of a company, optionally active only.
    pub fn list_debt_instruments(
        &self,
        company_id: i64,
        active_only: bool,
    ) -> Result<Vec<DebtInstrument>> {
        let sql = if active_only {
            format!("{} WHERE company_id = ?1 AND is_active = 1 ORDER BY id", Self::DEBT_SELECT)
        } else {
            format!("{} WHERE company_id = ?1 ORDER BY id", Self::DEBT_SELECT)
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![company_id], Self::debt_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    const DEBT_SELECT: &'static str = "SELECT id, company_id, issuer_entity_id, name, seniority,
            security_type, interest_rate_bps, is_floating, benchmark, spread_bps,
            floor_bps, issue_date, maturity_date, principal_cents, outstanding_cents,
            is_drawn, is_active, cusip, isin, currency, collateral_data_confidence,
            attributes, source_filing_url, filing_date, extracted_at,
            extraction_method, confidence
         FROM debt_instruments";

    fn debt_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DebtInstrument> {
        let seniority: String = row.get(4)?;
        let issue_date: Option<String> = row.get(11)?;
        let maturity_date: Option<String> = row.get(12)?;
        let attributes: String = row.get(21)?;
        let filing_date: Option<String> = row.get(23)?;
        let extracted_at: Option<String> = row.get(24)?;
        Ok(DebtInstrument {
            id: row.get(0)?,
            company_id: row.get(1)?,
            issuer_entity_id: row.get(2)?,
            name: row.get(3)?,
            seniority: Seniority::parse(&seniority).unwrap_or(Seniority::SeniorUnsecured),
            security_type: row.get(5)?,
            interest_rate_bps: row.get(6)?,
            is_floating: row.get(7)?,
            benchmark: row.get(8)?,
            spread_bps: row.get(9)?,
            floor_bps: row.get(10)?,
            issue_date: issue_date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            maturity_date: maturity_date
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            principal_cents: row.get(13)?,
            outstanding_cents: row.get(14)?,
            is_drawn: row.get(15)?,
            is_active: row.get(16)?,
            cusip: row.get(17)?,
            isin: row.get(18)?,
            currency: row.get(19)?,
            collateral_data_confidence: row.get(20)?,
            attributes: serde_json::from_str(&attributes).unwrap_or(Value::Null),
            provenance: Provenance {
                source_filing_url: row.get(22)?,
                filing_date: filing_date
                    .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                extracted_at: extracted_at
                    .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                    .map(|t| t.with_timezone(&Utc)),
                extraction_method: row.get(25)?,
                confidence: row.get(26)?,
            },
        })
    }

    /// Deactivate an instrument, recording the reason in its attributes.
    /// Deactivation is the only way rows leave the active set; merge never
    /// deletes.
    pub fn deactivate_instrument(&self, id: i64, reason: &str) -> Result<()> {
        let Some(mut instrument) = self.get_debt_instrument(id)? else {
            return Err(DataError::Parse(format!("no debt instrument with id {}", id)));
        };
        instrument.is_active = false;
        if let Value::Object(ref mut map) = instrument.attributes {
            map.insert(
                "deactivation_reason".to_string(),
                Value::String(reason.to_string()),
            );
        } else {
            instrument.attributes = serde_json::json!({ "deactivation_reason": reason });
        }
        self.update_debt_instrument(&instrument)?;
        info!(instrument_id = id, reason, "deactivated instrument");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Guarantees, collateral, covenants
    // ------------------------------------------------------------------

    /// Upsert a guarantee. A higher-confidence tag replaces a lower one;
    /// the reverse never downgrades.
    pub fn upsert_guarantee(
        &self,
        debt_instrument_id: i64,
        guarantor_entity_id: i64,
        conditions: Option<&str>,
        confidence: GuaranteeConfidence,
    ) -> Result<i64> {
        let existing: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, confidence FROM guarantees
                 WHERE debt_instrument_id = ?1 AND guarantor_entity_id = ?2",
                params![debt_instrument_id, guarantor_entity_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((id, old_confidence)) = existing {
            let old = GuaranteeConfidence::parse(&old_confidence)
                .unwrap_or(GuaranteeConfidence::Unknown);
            if confidence > old {
                self.conn.execute(
                    "UPDATE guarantees SET confidence = ?1,
                        conditions = COALESCE(?2, conditions)
                     WHERE id = ?3",
                    params![confidence.as_str(), conditions, id],
                )?;
            } else if conditions.is_some() {
                self.conn.execute(
                    "UPDATE guarantees SET conditions = COALESCE(conditions, ?1) WHERE id = ?2",
                    params![conditions, id],
                )?;
            }
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO guarantees
                (debt_instrument_id, guarantor_entity_id, conditions, confidence)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                debt_instrument_id,
                guarantor_entity_id,
                conditions,
                confidence.as_str()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All guarantees across a company's instruments.
    pub fn list_guarantees(&self, company_id: i64) -> Result<Vec<Guarantee>> {
        let mut stmt = self.conn.prepare(
            "SELECT g.id, g.debt_instrument_id, g.guarantor_entity_id, g.conditions, g.confidence
             FROM guarantees g
             JOIN debt_instruments d ON d.id = g.debt_instrument_id
             WHERE d.company_id = ?1 ORDER BY g.id",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            let confidence: String = row.get(4)?;
            Ok(Guarantee {
                id: row.get(0)?,
                debt_instrument_id: row.get(1)?,
                guarantor_entity_id: row.get(2)?,
                conditions: row.get(3)?,
                confidence: GuaranteeConfidence::parse(&confidence)
                    .unwrap_or(GuaranteeConfidence::Unknown),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    /// Upsert a collateral row.
    pub fn upsert_collateral(
        &self,
        debt_instrument_id: i64,
        collateral_type: CollateralType,
        description: &str,
        priority: Option<&str>,
        estimated_value_cents: Option<i64>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO collateral
                (debt_instrument_id, collateral_type, description, priority, estimated_value_cents)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(debt_instrument_id, collateral_type, description) DO UPDATE SET
                priority = COALESCE(excluded.priority, collateral.priority),
                estimated_value_cents = COALESCE(excluded.estimated_value_cents, collateral.estimated_value_cents)",
            params![
                debt_instrument_id,
                collateral_type.as_str(),
                description,
                priority,
                estimated_value_cents
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM collateral
             WHERE debt_instrument_id = ?1 AND collateral_type = ?2 AND description = ?3",
            params![debt_instrument_id, collateral_type.as_str(), description],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Collateral rows for an instrument.
    pub fn list_collateral(&self, debt_instrument_id: i64) -> Result<Vec<Collateral>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, debt_instrument_id, collateral_type, description, priority,
                    estimated_value_cents
             FROM collateral WHERE debt_instrument_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![debt_instrument_id], |row| {
            let ty: String = row.get(2)?;
            Ok(Collateral {
                id: row.get(0)?,
                debt_instrument_id: row.get(1)?,
                collateral_type: CollateralType::parse(&ty).unwrap_or(CollateralType::GeneralLien),
                description: row.get(3)?,
                priority: row.get(4)?,
                estimated_value_cents: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    /// Upsert a covenant by (company, instrument, section, name). The key
    /// columns are nullable, so the lookup uses `IS` rather than a unique
    /// constraint: `ON CONFLICT` never fires across NULLs in SQLite.
    pub fn upsert_covenant(&self, covenant: &Covenant) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM covenants
                 WHERE company_id = ?1 AND covenant_name = ?2
                   AND debt_instrument_id IS ?3 AND section_id IS ?4",
                params![
                    covenant.company_id,
                    covenant.covenant_name,
                    covenant.debt_instrument_id,
                    covenant.section_id
                ],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE covenants SET
                    covenant_type = ?1,
                    test_metric = COALESCE(?2, test_metric),
                    threshold_value = COALESCE(?3, threshold_value),
                    threshold_type = COALESCE(?4, threshold_type),
                    test_frequency = COALESCE(?5, test_frequency),
                    description = COALESCE(?6, description),
                    has_step_down = ?7,
                    cure_period_days = COALESCE(?8, cure_period_days),
                    extraction_confidence = COALESCE(?9, extraction_confidence),
                    source_text = COALESCE(?10, source_text)
                 WHERE id = ?11",
                params![
                    covenant.covenant_type.as_str(),
                    covenant.test_metric,
                    covenant.threshold_value,
                    covenant.threshold_type.map(|t| t.as_str()),
                    covenant.test_frequency,
                    covenant.description,
                    covenant.has_step_down,
                    covenant.cure_period_days,
                    covenant.extraction_confidence,
                    covenant.source_text,
                    id,
                ],
            )?;
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO covenants
                (company_id, debt_instrument_id, section_id, covenant_type, covenant_name,
                 test_metric, threshold_value, threshold_type, test_frequency, description,
                 has_step_down, cure_period_days, extraction_confidence, source_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                covenant.company_id,
                covenant.debt_instrument_id,
                covenant.section_id,
                covenant.covenant_type.as_str(),
                covenant.covenant_name,
                covenant.test_metric,
                covenant.threshold_value,
                covenant.threshold_type.map(|t| t.as_str()),
                covenant.test_frequency,
                covenant.description,
                covenant.has_step_down,
                covenant.cure_period_days,
                covenant.extraction_confidence,
                covenant.source_text,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All covenants of a company.
    pub fn list_covenants(&self, company_id: i64) -> Result<Vec<Covenant>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, debt_instrument_id, section_id, covenant_type,
                    covenant_name, test_metric, threshold_value, threshold_type,
                    test_frequency, description, has_step_down, cure_period_days,
                    extraction_confidence, source_text
             FROM covenants WHERE company_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            let covenant_type: String = row.get(4)?;
            let threshold_type: Option<String> = row.get(8)?;
            Ok(Covenant {
                id: row.get(0)?,
                company_id: row.get(1)?,
                debt_instrument_id: row.get(2)?,
                section_id: row.get(3)?,
                covenant_type: CovenantType::parse(&covenant_type)
                    .unwrap_or(CovenantType::Protective),
                covenant_name: row.get(5)?,
                test_metric: row.get(6)?,
                threshold_value: row.get(7)?,
                threshold_type: threshold_type.as_deref().and_then(ThresholdType::parse),
                test_frequency: row.get(9)?,
                description: row.get(10)?,
                has_step_down: row.get(11)?,
                cure_period_days: row.get(12)?,
                extraction_confidence: row.get(13)?,
                source_text: row.get(14)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    // ------------------------------------------------------------------
    // Financials
    // ------------------------------------------------------------------

    /// Upsert one fiscal period, preserving existing non-null values.
    pub fn upsert_financial_period(&self, period: &FinancialPeriod) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO company_financials
                (company_id, fiscal_year, fiscal_quarter, revenue_cents,
                 operating_income_cents, depreciation_amortization_cents,
                 interest_expense_cents, income_tax_expense_cents, total_debt_cents,
                 cash_cents, total_assets_cents, source_filing_url, period_end_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(company_id, fiscal_year, fiscal_quarter) DO UPDATE SET
                revenue_cents = COALESCE(excluded.revenue_cents, company_financials.revenue_cents),
                operating_income_cents = COALESCE(excluded.operating_income_cents, company_financials.operating_income_cents),
                depreciation_amortization_cents = COALESCE(excluded.depreciation_amortization_cents, company_financials.depreciation_amortization_cents),
                interest_expense_cents = COALESCE(excluded.interest_expense_cents, company_financials.interest_expense_cents),
                income_tax_expense_cents = COALESCE(excluded.income_tax_expense_cents, company_financials.income_tax_expense_cents),
                total_debt_cents = COALESCE(excluded.total_debt_cents, company_financials.total_debt_cents),
                cash_cents = COALESCE(excluded.cash_cents, company_financials.cash_cents),
                total_assets_cents = COALESCE(excluded.total_assets_cents, company_financials.total_assets_cents),
                source_filing_url = COALESCE(excluded.source_filing_url, company_financials.source_filing_url),
                period_end_date = COALESCE(excluded.period_end_date, company_financials.period_end_date)",
            params![
                period.company_id,
                period.fiscal_year,
                period.fiscal_quarter,
                period.revenue_cents,
                period.operating_income_cents,
                period.depreciation_amortization_cents,
                period.interest_expense_cents,
                period.income_tax_expense_cents,
                period.total_debt_cents,
                period.cash_cents,
                period.total_assets_cents,
                period.source_filing_url,
                period.period_end_date.map(|d| d.to_string()),
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM company_financials
             WHERE company_id = ?1 AND fiscal_year = ?2 AND fiscal_quarter = ?3",
            params![period.company_id, period.fiscal_year, period.fiscal_quarter],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Fiscal periods of a company, most recent first.
    pub fn list_financial_periods(&self, company_id: i64) -> Result<Vec<FinancialPeriod>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, fiscal_year, fiscal_quarter, revenue_cents,
                    operating_income_cents, depreciation_amortization_cents,
                    interest_expense_cents, income_tax_expense_cents, total_debt_cents,
                    cash_cents, total_assets_cents, source_filing_url, period_end_date
             FROM company_financials
             WHERE company_id = ?1
             ORDER BY fiscal_year DESC, fiscal_quarter DESC",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            let period_end: Option<String> = row.get(13)?;
            Ok(FinancialPeriod {
                id: row.get(0)?,
                company_id: row.get(1)?,
                fiscal_year: row.get(2)?,
                fiscal_quarter: row.get(3)?,
                revenue_cents: row.get(4)?,
                operating_income_cents: row.get(5)?,
                depreciation_amortization_cents: row.get(6)?,
                interest_expense_cents: row.get(7)?,
                income_tax_expense_cents: row.get(8)?,
                total_debt_cents: row.get(9)?,
                cash_cents: row.get(10)?,
                total_assets_cents: row.get(11)?,
                source_filing_url: row.get(12)?,
                period_end_date: period_end
                    .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    /// Latest stored (fiscal_year, fiscal_quarter), if any.
    pub fn latest_financial_quarter(&self, company_id: i64) -> Result<Option<(i32, i32)>> {
        self.conn
            .query_row(
                "SELECT fiscal_year, fiscal_quarter FROM company_financials
                 WHERE company_id = ?1
                 ORDER BY fiscal_year DESC, fiscal_quarter DESC LIMIT 1",
                params![company_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(DataError::from)
    }

    // ------------------------------------------------------------------
    // Document sections
    // ------------------------------------------------------------------

    /// Upsert a document section by (company, section_type, url). Re-running
    /// the segmenter over the same filing touches the same rows.
    pub fn upsert_section(
        &self,
        company_id: i64,
        doc_type: &str,
        section_type: &str,
        filing_date: Option<NaiveDate>,
        title: &str,
        content: &str,
        sec_filing_url: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO document_sections
                (company_id, doc_type, section_type, filing_date, title, content,
                 content_length, sec_filing_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(company_id, section_type, sec_filing_url) DO UPDATE SET
                doc_type = excluded.doc_type,
                filing_date = COALESCE(excluded.filing_date, document_sections.filing_date),
                title = excluded.title,
                content = excluded.content,
                content_length = excluded.content_length",
            params![
                company_id,
                doc_type,
                section_type,
                filing_date.map(|d| d.to_string()),
                title,
                content,
                content.len() as i64,
                sec_filing_url
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM document_sections
             WHERE company_id = ?1 AND section_type = ?2 AND sec_filing_url = ?3",
            params![company_id, section_type, sec_filing_url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Sections of a company, optionally restricted to a type, newest first.
    pub fn list_sections(
        &self,
        company_id: i64,
        section_type: Option<&str>,
    ) -> Result<Vec<StoredSection>> {
        let sql = "SELECT id, company_id, doc_type, section_type, filing_date, title,
                          content, content_length, sec_filing_url
                   FROM document_sections
                   WHERE company_id = ?1 AND (?2 IS NULL OR section_type = ?2)
                   ORDER BY filing_date DESC, id DESC";
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![company_id, section_type], Self::section_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    /// Load one section by id.
    pub fn get_section(&self, id: i64) -> Result<Option<StoredSection>> {
        self.conn
            .query_row(
                "SELECT id, company_id, doc_type, section_type, filing_date, title,
                        content, content_length, sec_filing_url
                 FROM document_sections WHERE id = ?1",
                params![id],
                Self::section_from_row,
            )
            .optional()
            .map_err(DataError::from)
    }

    fn section_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredSection> {
        let filing_date: Option<String> = row.get(4)?;
        Ok(StoredSection {
            id: row.get(0)?,
            company_id: row.get(1)?,
            doc_type: row.get(2)?,
            section_type: row.get(3)?,
            filing_date: filing_date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            title: row.get(5)?,
            content: row.get(6)?,
            content_length: row.get(7)?,
            sec_filing_url: row.get(8)?,
        })
    }

    /// Full-text search over a company's sections, best match first.
    pub fn search_sections(
        &self,
        company_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredSection>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.company_id, s.doc_type, s.section_type, s.filing_date,
                    s.title, s.content, s.content_length, s.sec_filing_url
             FROM document_sections_fts f
             JOIN document_sections s ON s.id = f.rowid
             WHERE document_sections_fts MATCH ?1 AND s.company_id = ?2
             ORDER BY rank LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![fts_escape(query), company_id, limit as i64],
            Self::section_from_row,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    // ------------------------------------------------------------------
    // Instrument-document links
    // ------------------------------------------------------------------

    /// Upsert an instrument-to-document link.
    pub fn upsert_instrument_document(
        &self,
        debt_instrument_id: i64,
        section_id: i64,
        relationship_type: RelationshipType,
        confidence: f64,
        match_method: MatchMethod,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO instrument_documents
                (debt_instrument_id, section_id, relationship_type, confidence, match_method)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(debt_instrument_id, section_id, relationship_type) DO UPDATE SET
                confidence = MAX(excluded.confidence, instrument_documents.confidence),
                match_method = CASE
                    WHEN excluded.confidence > instrument_documents.confidence
                    THEN excluded.match_method
                    ELSE instrument_documents.match_method END",
            params![
                debt_instrument_id,
                section_id,
                relationship_type.as_str(),
                confidence,
                match_method.as_str()
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM instrument_documents
             WHERE debt_instrument_id = ?1 AND section_id = ?2 AND relationship_type = ?3",
            params![debt_instrument_id, section_id, relationship_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Links for one instrument.
    pub fn list_instrument_documents(
        &self,
        debt_instrument_id: i64,
    ) -> Result<Vec<InstrumentDocumentLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, debt_instrument_id, section_id, relationship_type, confidence, match_method
             FROM instrument_documents WHERE debt_instrument_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![debt_instrument_id], |row| {
            let relationship: String = row.get(3)?;
            let method: String = row.get(5)?;
            Ok(InstrumentDocumentLink {
                id: row.get(0)?,
                debt_instrument_id: row.get(1)?,
                section_id: row.get(2)?,
                relationship_type: RelationshipType::parse(&relationship)
                    .unwrap_or(RelationshipType::References),
                confidence: row.get(4)?,
                match_method: MatchMethod::parse(&method)
                    .unwrap_or(MatchMethod::BaseIndentureFallback),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DataError::from)
    }

    /// The most recent `governs` section for an instrument: latest filing
    /// date, ties broken by the higher section id. Used by covenant
    /// extraction under the amendment rule.
    pub fn latest_governing_section(
        &self,
        debt_instrument_id: i64,
    ) -> Result<Option<StoredSection>> {
        self.conn
            .query_row(
                "SELECT s.id, s.company_id, s.doc_type, s.section_type, s.filing_date,
                        s.title, s.content, s.content_length, s.sec_filing_url
                 FROM instrument_documents l
                 JOIN document_sections s ON s.id = l.section_id
                 WHERE l.debt_instrument_id = ?1 AND l.relationship_type = 'governs'
                 ORDER BY s.filing_date DESC, s.id DESC LIMIT 1",
                params![debt_instrument_id],
                Self::section_from_row,
            )
            .optional()
            .map_err(DataError::from)
    }

    // ------------------------------------------------------------------
    // Metadata, cache, locks, metrics
    // ------------------------------------------------------------------

    /// Load extraction metadata, or an empty record for unseen companies.
    pub fn get_metadata(&self, company_id: i64) -> Result<ExtractionMetadata> {
        let row: Option<ExtractionMetadata> = self
            .conn
            .query_row(
                "SELECT qa_score, extraction_method, data_version, iteration_count,
                        extraction_status, field_confidence, warnings, usage, updated_at
                 FROM extraction_metadata WHERE company_id = ?1",
                params![company_id],
                |row| {
                    let status: String = row.get(4)?;
                    let field_confidence: String = row.get(5)?;
                    let warnings: String = row.get(6)?;
                    let usage: String = row.get(7)?;
                    let updated_at: String = row.get(8)?;
                    Ok(ExtractionMetadata {
                        company_id,
                        qa_score: row.get(0)?,
                        extraction_method: row.get(1)?,
                        data_version: row.get(2)?,
                        iteration_count: row.get(3)?,
                        extraction_status: serde_json::from_str(&status).unwrap_or_default(),
                        field_confidence: serde_json::from_str(&field_confidence)
                            .unwrap_or(Value::Null),
                        warnings: serde_json::from_str(&warnings).unwrap_or_default(),
                        usage: serde_json::from_str(&usage).unwrap_or(Value::Null),
                        updated_at: DateTime::parse_from_rfc3339(&updated_at)
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()?;

        Ok(row.unwrap_or_else(|| ExtractionMetadata::empty(company_id)))
    }

    /// Persist extraction metadata.
    pub fn put_metadata(&self, metadata: &ExtractionMetadata) -> Result<()> {
        self.conn.execute(
            "INSERT INTO extraction_metadata
                (company_id, qa_score, extraction_method, data_version, iteration_count,
                 extraction_status, field_confidence, warnings, usage, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(company_id) DO UPDATE SET
                qa_score = excluded.qa_score,
                extraction_method = excluded.extraction_method,
                data_version = excluded.data_version,
                iteration_count = excluded.iteration_count,
                extraction_status = excluded.extraction_status,
                field_confidence = excluded.field_confidence,
                warnings = excluded.warnings,
                usage = excluded.usage,
                updated_at = excluded.updated_at",
            params![
                metadata.company_id,
                metadata.qa_score,
                metadata.extraction_method,
                metadata.data_version,
                metadata.iteration_count,
                serde_json::to_string(&metadata.extraction_status)?,
                metadata.field_confidence.to_string(),
                serde_json::to_string(&metadata.warnings)?,
                metadata.usage.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Record the terminal state of one step in the metadata map.
    pub fn record_step_status(
        &self,
        company_id: i64,
        step: &str,
        status: StepStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut metadata = self.get_metadata(company_id)?;
        metadata.extraction_status.insert(
            step.to_string(),
            StepState {
                status,
                reason: reason.map(str::to_string),
                at: Utc::now(),
            },
        );
        self.put_metadata(&metadata)?;
        debug!(company_id, step, status = status.as_str(), "step status recorded");
        Ok(())
    }

    /// Per-step status map for skip decisions.
    pub fn step_statuses(&self, company_id: i64) -> Result<BTreeMap<String, StepState>> {
        Ok(self.get_metadata(company_id)?.extraction_status)
    }

    /// Write an extraction-cache payload, replacing any prior row for the
    /// same (company, step, schema version).
    pub fn cache_put(&self, company_id: i64, step: &str, payload: &Value) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO extraction_cache
                (company_id, step, schema_version, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                company_id,
                step,
                SCHEMA_VERSION,
                payload.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Read a cached extraction payload under the current schema version.
    pub fn cache_get(&self, company_id: i64, step: &str) -> Result<Option<Value>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM extraction_cache
                 WHERE company_id = ?1 AND step = ?2 AND schema_version = ?3",
                params![company_id, step, SCHEMA_VERSION],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Try to acquire the advisory company lock.
    ///
    /// Claims happen inside an immediate transaction so two local processes
    /// cannot both observe the lock as free. Expired locks from crashed
    /// holders are reaped on acquisition.
    pub fn try_acquire_lock(&self, company_id: i64, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM company_locks WHERE company_id = ?1 AND expires_at < ?2",
            params![company_id, now.to_rfc3339()],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO company_locks (company_id, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                company_id,
                holder,
                now.to_rfc3339(),
                (now + ttl).to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    /// Release the advisory lock when held by this holder.
    pub fn release_lock(&self, company_id: i64, holder: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM company_locks WHERE company_id = ?1 AND holder = ?2",
            params![company_id, holder],
        )?;
        Ok(())
    }

    /// Persist computed metrics.
    pub fn put_metrics(&self, metrics: &CreditMetrics) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO credit_metrics
                (company_id, total_debt_cents, debt_due_1yr_cents, debt_due_2yr_cents,
                 debt_due_3yr_cents, weighted_avg_maturity, has_near_term_maturity,
                 ttm_ebitda_cents, leverage_ratio, net_leverage_ratio, interest_coverage,
                 is_leveraged, warnings, provenance, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                metrics.company_id,
                metrics.total_debt_cents,
                metrics.debt_due_1yr_cents,
                metrics.debt_due_2yr_cents,
                metrics.debt_due_3yr_cents,
                metrics.weighted_avg_maturity,
                metrics.has_near_term_maturity,
                metrics.ttm_ebitda_cents,
                metrics.leverage_ratio,
                metrics.net_leverage_ratio,
                metrics.interest_coverage,
                metrics.is_leveraged,
                serde_json::to_string(&metrics.warnings)?,
                metrics.provenance.to_string(),
                metrics.computed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load computed metrics.
    pub fn get_metrics(&self, company_id: i64) -> Result<Option<CreditMetrics>> {
        self.conn
            .query_row(
                "SELECT total_debt_cents, debt_due_1yr_cents, debt_due_2yr_cents,
                        debt_due_3yr_cents, weighted_avg_maturity, has_near_term_maturity,
                        ttm_ebitda_cents, leverage_ratio, net_leverage_ratio,
                        interest_coverage, is_leveraged, warnings, provenance, computed_at
                 FROM credit_metrics WHERE company_id = ?1",
                params![company_id],
                |row| {
                    let warnings: String = row.get(11)?;
                    let provenance: String = row.get(12)?;
                    let computed_at: String = row.get(13)?;
                    Ok(CreditMetrics {
                        company_id,
                        total_debt_cents: row.get(0)?,
                        debt_due_1yr_cents: row.get(1)?,
                        debt_due_2yr_cents: row.get(2)?,
                        debt_due_3yr_cents: row.get(3)?,
                        weighted_avg_maturity: row.get(4)?,
                        has_near_term_maturity: row.get(5)?,
                        ttm_ebitda_cents: row.get(6)?,
                        leverage_ratio: row.get(7)?,
                        net_leverage_ratio: row.get(8)?,
                        interest_coverage: row.get(9)?,
                        is_leveraged: row.get(10)?,
                        warnings: serde_json::from_str(&warnings).unwrap_or_default(),
                        provenance: serde_json::from_str(&provenance).unwrap_or(Value::Null),
                        computed_at: DateTime::parse_from_rfc3339(&computed_at)
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()
            .map_err(DataError::from)
    }

    // ------------------------------------------------------------------
    // Counts for skip logic
    // ------------------------------------------------------------------

    /// Row counts used by the merger's skip decisions.
    pub fn existing_counts(&self, company_id: i64) -> Result<ExistingCounts> {
        let entities: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE company_id = ?1",
            params![company_id],
            |row| row.get(0),
        )?;
        let debt: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM debt_instruments WHERE company_id = ?1",
            params![company_id],
            |row| row.get(0),
        )?;
        let financials: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM company_financials WHERE company_id = ?1",
            params![company_id],
            |row| row.get(0),
        )?;
        let sections: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM document_sections WHERE company_id = ?1",
            params![company_id],
            |row| row.get(0),
        )?;
        Ok(ExistingCounts {
            entities,
            debt,
            financials,
            sections,
        })
    }

    /// Direct access for multi-statement transactions in the merger.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Existing-data counts consulted by skip logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingCounts {
    /// Entity rows
    pub entities: i64,
    /// Debt instrument rows
    pub debt: i64,
    /// Financial period rows
    pub financials: i64,
    /// Document section rows
    pub sections: i64,
}

/// Case- and punctuation-insensitive name comparison used when deciding
/// whether a slug hit is the same entity or a truncation collision.
fn names_equivalent(a: &str, b: &str) -> bool {
    name_key(a) == name_key(b)
}

/// Quote an FTS5 query so user-supplied punctuation cannot break the match
/// expression.
fn fts_escape(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c == '"' { ' ' } else { c })
        .collect();
    cleaned
        .split_whitespace()
        .map(|term| format!("\"{}\"", term))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> GraphStore {
        GraphStore::in_memory().unwrap()
    }

    fn sample_instrument(company_id: i64, issuer: Option<i64>) -> DebtInstrument {
        DebtInstrument {
            id: 0,
            company_id,
            issuer_entity_id: issuer,
            name: "4.25% Senior Notes due 2031".to_string(),
            seniority: Seniority::SeniorUnsecured,
            security_type: Some("notes".to_string()),
            interest_rate_bps: Some(425),
            is_floating: false,
            benchmark: None,
            spread_bps: None,
            floor_bps: None,
            issue_date: NaiveDate::from_ymd_opt(2021, 3, 15),
            maturity_date: NaiveDate::from_ymd_opt(2031, 3, 15),
            principal_cents: Some(50_000_000_000),
            outstanding_cents: Some(50_000_000_000),
            is_drawn: false,
            is_active: true,
            cusip: Some("037833AB1".to_string()),
            isin: None,
            currency: "USD".to_string(),
            collateral_data_confidence: None,
            attributes: json!({}),
            provenance: Provenance::default(),
        }
    }

    #[test]
    fn test_company_upsert_is_stable() {
        let store = store();
        let a = store
            .upsert_company("ACME", "0000123456", "Acme Corp", Some("Industrials"), None)
            .unwrap();
        let b = store
            .upsert_company("acme", "0000123456", "Acme Corporation", None, Some("Capital Goods"))
            .unwrap();
        assert_eq!(a, b);
        let company = store.get_company("ACME").unwrap().unwrap();
        assert_eq!(company.legal_name, "Acme Corporation");
        // COALESCE preserved the earlier industry.
        assert_eq!(company.industry.as_deref(), Some("Industrials"));
    }

    #[test]
    fn test_entity_slug_identity() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let a = store
            .upsert_entity(company, "Acme Finance, LLC", Some("Delaware"), EntityType::Finco, false, false)
            .unwrap();
        // Same entity under punctuation variance.
        let b = store
            .upsert_entity(company, "Acme Finance LLC", None, EntityType::Finco, true, false)
            .unwrap();
        assert_eq!(a, b);
        let entities = store.list_entities(company).unwrap();
        assert_eq!(entities.len(), 1);
        assert!(entities[0].is_guarantor);
        assert_eq!(entities[0].jurisdiction.as_deref(), Some("Delaware"));
    }

    #[test]
    fn test_slug_collision_gets_suffix() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        // Punctuation variants merge into one row.
        store
            .upsert_entity(company, "Acme Intl", None, EntityType::Subsidiary, false, false)
            .unwrap();
        store
            .upsert_entity(company, "Acme-Intl!", None, EntityType::Subsidiary, false, false)
            .unwrap();
        assert_eq!(store.list_entities(company).unwrap().len(), 1);

        // Distinct long names that collide after slug truncation get a
        // deterministic suffix instead of merging.
        let prefix = "Very Long Holding Name ".repeat(4);
        let a = store
            .upsert_entity(company, &format!("{} Alpha Partners", prefix), None, EntityType::Subsidiary, false, false)
            .unwrap();
        let b = store
            .upsert_entity(company, &format!("{} Beta Partners", prefix), None, EntityType::Subsidiary, false, false)
            .unwrap();
        assert_ne!(a, b);
        let entities = store.list_entities(company).unwrap();
        assert_eq!(entities.len(), 3);
        let slugs: Vec<&str> = entities.iter().map(|e| e.slug.as_str()).collect();
        assert!(slugs.iter().any(|s| s.ends_with("-2")));
    }

    #[test]
    fn test_covenant_upsert_with_null_keys() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let covenant = Covenant {
            id: 0,
            company_id: company,
            debt_instrument_id: None,
            section_id: None,
            covenant_type: CovenantType::Financial,
            covenant_name: "Maximum Total Leverage Ratio".to_string(),
            test_metric: Some("total_debt_to_ebitda".to_string()),
            threshold_value: Some("4.50".to_string()),
            threshold_type: Some(ThresholdType::Maximum),
            test_frequency: Some("quarterly".to_string()),
            description: None,
            has_step_down: true,
            cure_period_days: Some(30),
            extraction_confidence: Some(0.9),
            source_text: Some("the Total Leverage Ratio shall not exceed 4.50 to 1.00".to_string()),
        };
        let a = store.upsert_covenant(&covenant).unwrap();
        let b = store.upsert_covenant(&covenant).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list_covenants(company).unwrap().len(), 1);
    }

    #[test]
    fn test_debt_identity_by_cusip() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let id = store.insert_debt_instrument(&sample_instrument(company, None)).unwrap();

        let found = store
            .find_debt_instrument(company, None, "Different Name", None, Some("037833AB1"), None)
            .unwrap();
        assert_eq!(found, Some(id));

        let found = store
            .find_debt_instrument(
                company,
                None,
                "4.25% SENIOR NOTES DUE 2031",
                NaiveDate::from_ymd_opt(2031, 3, 15),
                None,
                None,
            )
            .unwrap();
        assert_eq!(found, Some(id));
    }

    #[test]
    fn test_deactivation_tags_attributes() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let id = store.insert_debt_instrument(&sample_instrument(company, None)).unwrap();
        store.deactivate_instrument(id, "matured").unwrap();

        let instrument = store.get_debt_instrument(id).unwrap().unwrap();
        assert!(!instrument.is_active);
        assert_eq!(
            instrument.attributes["deactivation_reason"],
            Value::String("matured".to_string())
        );
        assert!(store.list_debt_instruments(company, true).unwrap().is_empty());
        assert_eq!(store.list_debt_instruments(company, false).unwrap().len(), 1);
    }

    #[test]
    fn test_guarantee_confidence_never_downgrades() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let entity = store
            .upsert_entity(company, "Acme Opco", None, EntityType::Opco, true, false)
            .unwrap();
        let debt = store.insert_debt_instrument(&sample_instrument(company, None)).unwrap();

        store
            .upsert_guarantee(debt, entity, None, GuaranteeConfidence::Verified)
            .unwrap();
        store
            .upsert_guarantee(debt, entity, Some("released on sale"), GuaranteeConfidence::Extracted)
            .unwrap();

        let guarantees = store.list_guarantees(company).unwrap();
        assert_eq!(guarantees.len(), 1);
        assert_eq!(guarantees[0].confidence, GuaranteeConfidence::Verified);
        assert_eq!(guarantees[0].conditions.as_deref(), Some("released on sale"));
    }

    #[test]
    fn test_financial_period_preserves_non_null() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let mut period = FinancialPeriod {
            id: 0,
            company_id: company,
            fiscal_year: 2025,
            fiscal_quarter: 1,
            revenue_cents: Some(1_000),
            operating_income_cents: Some(100),
            depreciation_amortization_cents: None,
            interest_expense_cents: None,
            income_tax_expense_cents: None,
            total_debt_cents: None,
            cash_cents: None,
            total_assets_cents: None,
            source_filing_url: None,
            period_end_date: None,
        };
        store.upsert_financial_period(&period).unwrap();

        period.revenue_cents = None;
        period.depreciation_amortization_cents = Some(25);
        store.upsert_financial_period(&period).unwrap();

        let periods = store.list_financial_periods(company).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].revenue_cents, Some(1_000));
        assert_eq!(periods[0].depreciation_amortization_cents, Some(25));
    }

    #[test]
    fn test_section_upsert_and_fts() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let id = store
            .upsert_section(
                company,
                "10-K",
                "debt_footnote",
                NaiveDate::from_ymd_opt(2025, 2, 20),
                "Note 9 — Long-Term Debt",
                "The Company's 4.25% Senior Notes mature in 2031 and carry covenants.",
                "https://example.test/10k.htm",
            )
            .unwrap();
        // Idempotent: same key updates in place.
        let id2 = store
            .upsert_section(
                company,
                "10-K",
                "debt_footnote",
                NaiveDate::from_ymd_opt(2025, 2, 20),
                "Note 9 — Long-Term Debt",
                "The Company's 4.25% Senior Notes mature in 2031 and carry updated covenants.",
                "https://example.test/10k.htm",
            )
            .unwrap();
        assert_eq!(id, id2);

        let hits = store.search_sections(company, "senior notes covenants", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("updated covenants"));
    }

    #[test]
    fn test_latest_governing_tiebreak_by_id() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let debt = store.insert_debt_instrument(&sample_instrument(company, None)).unwrap();
        let same_day = NaiveDate::from_ymd_opt(2024, 6, 1);
        let s1 = store
            .upsert_section(company, "exhibit", "credit_agreement", same_day, "Credit Agreement", "original terms", "https://example.test/ca1.htm")
            .unwrap();
        let s2 = store
            .upsert_section(company, "exhibit", "credit_agreement", same_day, "First Amendment", "amended terms", "https://example.test/ca2.htm")
            .unwrap();
        store
            .upsert_instrument_document(debt, s1, RelationshipType::Governs, 0.60, MatchMethod::CreditAgreementFallback)
            .unwrap();
        store
            .upsert_instrument_document(debt, s2, RelationshipType::Governs, 0.60, MatchMethod::CreditAgreementFallback)
            .unwrap();

        let governing = store.latest_governing_section(debt).unwrap().unwrap();
        assert_eq!(governing.id, s2);
    }

    #[test]
    fn test_advisory_lock() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        assert!(store.try_acquire_lock(company, "run-a", Duration::minutes(10)).unwrap());
        assert!(!store.try_acquire_lock(company, "run-b", Duration::minutes(10)).unwrap());
        store.release_lock(company, "run-a").unwrap();
        assert!(store.try_acquire_lock(company, "run-b", Duration::minutes(10)).unwrap());
    }

    #[test]
    fn test_expired_lock_is_reaped() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        assert!(store.try_acquire_lock(company, "run-a", Duration::minutes(-1)).unwrap());
        assert!(store.try_acquire_lock(company, "run-b", Duration::minutes(10)).unwrap());
    }

    #[test]
    fn test_metadata_round_trip() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        store
            .record_step_status(company, "core", StepStatus::Success, None)
            .unwrap();
        store
            .record_step_status(company, "hierarchy", StepStatus::NoData, Some("no exhibit 21"))
            .unwrap();

        let metadata = store.get_metadata(company).unwrap();
        assert_eq!(metadata.extraction_status["core"].status, StepStatus::Success);
        assert_eq!(metadata.extraction_status["hierarchy"].status, StepStatus::NoData);
        assert_eq!(
            metadata.extraction_status["hierarchy"].reason.as_deref(),
            Some("no exhibit 21")
        );
    }

    #[test]
    fn test_extraction_cache_round_trip() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        let payload = json!({"entities": [{"name": "Acme Opco"}]});
        store.cache_put(company, "core", &payload).unwrap();
        assert_eq!(store.cache_get(company, "core").unwrap(), Some(payload));
        assert_eq!(store.cache_get(company, "financials").unwrap(), None);
    }

    #[test]
    fn test_existing_counts() {
        let store = store();
        let company = store.upsert_company("ACME", "1", "Acme", None, None).unwrap();
        store
            .upsert_entity(company, "Acme Opco", None, EntityType::Opco, false, false)
            .unwrap();
        store.insert_debt_instrument(&sample_instrument(company, None)).unwrap();
        let counts = store.existing_counts(company).unwrap();
        assert_eq!(counts.entities, 1);
        assert_eq!(counts.debt, 1);
        assert_eq!(counts.financials, 0);
        assert_eq!(counts.sections, 0);
    }
}
