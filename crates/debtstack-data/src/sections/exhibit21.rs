//! Exhibit 21 validation and subsidiary-list parsing.
//!
//! Exhibit 21 URLs frequently point at auditor consents, powers of attorney
//! or certifications that were filed under a neighboring exhibit number, so
//! a candidate document must positively validate as a subsidiary list before
//! the pipeline will trust it.

use crate::sections::{FilingSection, SectionType};
use regex::Regex;
use std::sync::OnceLock;

/// Red-flag phrases in the early content that mark a non-subsidiary exhibit.
const RED_FLAGS: &[&str] = &[
    "consent of",
    "power of attorney",
    "certification of",
    "pursuant to",
];

/// Jurisdiction tokens whose presence marks a subsidiary table.
const JURISDICTIONS: &[&str] = &[
    "delaware",
    "nevada",
    "texas",
    "california",
    "new york",
    "maryland",
    "virginia",
    "ohio",
    "georgia",
    "cayman islands",
    "bermuda",
    "luxembourg",
    "ireland",
    "netherlands",
    "united kingdom",
    "england and wales",
    "singapore",
    "hong kong",
    "japan",
    "germany",
    "france",
    "canada",
    "australia",
    "brazil",
    "mexico",
];

/// A parsed subsidiary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsidiaryRow {
    /// Entity legal name
    pub name: String,
    /// Jurisdiction of organization, when listed
    pub jurisdiction: Option<String>,
    /// Indentation depth (0 = top level) for hierarchy reconstruction
    pub depth: u32,
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)subsidiaries\s+of|jurisdiction\s+of\s+(?:incorporation|organization)")
            .unwrap()
    })
}

/// Wdesk-style exports encode hierarchy depth as a margin-left style on the
/// entity's div; after normalization the indentation survives as leading
/// whitespace runs.
fn indent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)(\S.*)$").unwrap())
}

/// Validate a candidate Exhibit 21 document.
///
/// Rejects when the early content carries a red-flag phrase; accepts when a
/// subsidiary header is present or multiple jurisdiction tokens occur.
/// Returns the section on acceptance, `None` on rejection.
pub fn validate_exhibit21(text: &str, url: &str) -> Option<FilingSection> {
    let head: String = text.chars().take(600).collect::<String>().to_lowercase();

    for flag in RED_FLAGS {
        if head.contains(flag) {
            return None;
        }
    }

    let lower = text.to_lowercase();
    let jurisdiction_hits = JURISDICTIONS
        .iter()
        .filter(|j| lower.contains(*j))
        .count();

    if !header_re().is_match(text) && jurisdiction_hits < 2 {
        return None;
    }

    let title = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("Subsidiaries of the Registrant")
        .trim()
        .chars()
        .take(120)
        .collect();

    Some(FilingSection {
        section_type: SectionType::Exhibit21,
        title,
        content: text.trim_end().to_string(),
        start_offset: 0,
        sec_filing_url: url.to_string(),
    })
}

/// Parse subsidiary rows out of a validated Exhibit 21 body.
///
/// Handles both table layouts (`Name | Jurisdiction |`) and indentation-
/// encoded hierarchies. Depth is derived from leading whitespace in units of
/// two spaces, capped to keep a stray tab from producing absurd tiers.
pub fn parse_subsidiary_list(content: &str) -> Vec<SubsidiaryRow> {
    let mut rows = Vec::new();

    for line in content.lines() {
        let Some(caps) = indent_re().captures(line) else {
            continue;
        };
        let indent = caps.get(1).map_or(0, |m| m.as_str().len());
        let body = caps.get(2).map_or("", |m| m.as_str()).trim_end();

        if body.is_empty() || looks_like_header(body) {
            continue;
        }

        let (name, jurisdiction) = split_name_jurisdiction(body);
        if name.len() < 3 || !name.chars().any(char::is_alphabetic) {
            continue;
        }

        rows.push(SubsidiaryRow {
            name,
            jurisdiction,
            depth: ((indent / 2) as u32).min(8),
        });
    }

    rows
}

/// Column headers and footnote lines that are not entities.
fn looks_like_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("name")
        || lower.starts_with("subsidiaries of")
        || lower.starts_with("jurisdiction")
        || lower.starts_with("state o")
        || lower.starts_with("country")
        || lower.starts_with("exhibit 21")
        || lower.starts_with("(")
        || lower.starts_with("*")
}

/// Split an entity line into name and jurisdiction.
///
/// Table rows carry a `|` separator from normalization; plain-text lists
/// trail the jurisdiction after a run of spaces or an em-dash.
fn split_name_jurisdiction(line: &str) -> (String, Option<String>) {
    if line.contains('|') {
        let mut parts = line.split('|').map(str::trim).filter(|p| !p.is_empty());
        let name = parts.next().unwrap_or("").to_string();
        let jurisdiction = parts.next().map(str::to_string);
        return (name, jurisdiction);
    }

    static TAIL_RE: OnceLock<Regex> = OnceLock::new();
    let tail_re = TAIL_RE
        .get_or_init(|| Regex::new(r"^(.{3,}?)(?:\s{3,}|\s+—\s+)([A-Z][A-Za-z ,.]+)$").unwrap());

    if let Some(caps) = tail_re.captures(line) {
        let name = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
        let jurisdiction = caps.get(2).map(|m| m.as_str().trim().to_string());
        return (name, jurisdiction);
    }

    (line.trim().to_string(), None)
}
