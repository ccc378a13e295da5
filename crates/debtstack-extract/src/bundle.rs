//! Filing-bundle assembly for the core extraction prompt.
//!
//! The prompt budget is finite; sections are ranked by keyword relevance
//! and truncated at sentence or table-row boundaries, never mid-number.

use debtstack_data::scale::ScaleDetection;
use debtstack_data::sections::SectionType;

/// Character budget for the combined bundle (~50K tokens of content).
const DEFAULT_BUDGET: usize = 200_000;

/// Keywords that raise a section's relevance for credit extraction.
const RELEVANCE_KEYWORDS: &[(&str, u32)] = &[
    ("senior notes", 8),
    ("indenture", 6),
    ("credit agreement", 6),
    ("guarantor", 6),
    ("outstanding", 5),
    ("subsidiaries", 5),
    ("maturity", 4),
    ("revolving", 4),
    ("term loan", 4),
    ("interest rate", 3),
    ("principal amount", 3),
    ("collateral", 3),
    ("lien", 2),
    ("covenant", 2),
];

/// Base priority per section type; exhibits and the debt footnote lead.
fn base_priority(section_type: SectionType) -> u32 {
    match section_type {
        SectionType::Exhibit21 | SectionType::Exhibit22 => 100,
        SectionType::DebtFootnote => 90,
        SectionType::MdaLiquidity => 60,
        SectionType::GuarantorList => 55,
        SectionType::DescSecurities => 40,
        SectionType::Indenture | SectionType::CreditAgreement => 30,
        SectionType::Covenants => 20,
    }
}

/// One section offered to the bundle.
#[derive(Debug, Clone)]
pub struct BundlePart {
    /// Section class
    pub section_type: SectionType,
    /// Section text
    pub content: String,
    /// Scale detected for this section's numbers
    pub scale: Option<ScaleDetection>,
}

/// The assembled prompt content plus bookkeeping.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Combined prompt text with per-section headers
    pub text: String,
    /// Section types included, in priority order
    pub included: Vec<SectionType>,
    /// Sections that were cut entirely for budget
    pub dropped: Vec<SectionType>,
}

/// Assemble a bundle from candidate sections under the default budget.
pub fn assemble(parts: &[BundlePart]) -> Bundle {
    assemble_with_budget(parts, DEFAULT_BUDGET)
}

/// Assemble with an explicit character budget.
pub fn assemble_with_budget(parts: &[BundlePart], budget: usize) -> Bundle {
    let mut scored: Vec<(u32, &BundlePart)> = parts
        .iter()
        .map(|part| (score(part), part))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let mut text = String::new();
    let mut included = Vec::new();
    let mut dropped = Vec::new();

    for (_, part) in scored {
        let header = format!("\n=== {} ===\n", part.section_type.as_str().to_uppercase());
        let remaining = budget.saturating_sub(text.len() + header.len());
        // A sliver is worse than nothing: the model anchors on headers.
        if remaining < 500 {
            dropped.push(part.section_type);
            continue;
        }
        let body = if part.content.len() <= remaining {
            part.content.clone()
        } else {
            truncate_at_boundary(&part.content, remaining)
        };
        text.push_str(&header);
        text.push_str(&body);
        included.push(part.section_type);
    }

    Bundle {
        text,
        included,
        dropped,
    }
}

fn score(part: &BundlePart) -> u32 {
    let lower = part.content.to_lowercase();
    let keyword_score: u32 = RELEVANCE_KEYWORDS
        .iter()
        .map(|(kw, weight)| {
            let hits = lower.matches(kw).count().min(10) as u32;
            hits * weight
        })
        .sum();
    base_priority(part.section_type) + keyword_score
}

/// Cut at the last sentence or table-row boundary inside the limit.
fn truncate_at_boundary(content: &str, limit: usize) -> String {
    let mut end = limit.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    let window = &content[..end];

    let boundary = window
        .rfind(". ")
        .map(|i| i + 1)
        .into_iter()
        .chain(window.rfind('\n'))
        .max()
        .unwrap_or(end);

    window[..boundary].trim_end().to_string()
}
