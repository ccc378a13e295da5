//! Pattern-family section segmenter.

use crate::error::Result;
use crate::normalize;
use crate::sections::{exhibit21, FilingSection, SectionType};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use tracing::debug;

/// Full-document section types are capped rather than heading-bounded.
const FULL_DOC_CAP: usize = 100_000;

/// Heading-bounded sections end at the next plausible heading or this cap.
const BODY_SECTION_CAP: usize = 40_000;

/// Per-type minimum content length. A match shorter than this is a table of
/// contents entry or a cross-reference, not the section.
fn min_len(section_type: SectionType) -> usize {
    match section_type {
        SectionType::Exhibit21 | SectionType::Exhibit22 => 200,
        SectionType::DebtFootnote => 500,
        SectionType::MdaLiquidity => 400,
        SectionType::CreditAgreement | SectionType::Indenture => 2_000,
        SectionType::GuarantorList => 200,
        SectionType::Covenants => 300,
        SectionType::DescSecurities => 400,
    }
}

/// One pattern family: ordered alternatives for locating a section heading.
struct PatternFamily {
    section_type: SectionType,
    patterns: &'static [&'static str],
}

/// Ordered pattern families. Order within each family matters: the most
/// specific variant comes first and the first qualifying match wins.
fn families() -> &'static [PatternFamily] {
    &[
        PatternFamily {
            section_type: SectionType::DebtFootnote,
            patterns: &[
                r"(?m)^\s*Note\s+\d{1,2}\s*[—\-–.:]\s*(?:Long[\- ]Term\s+)?(?:Debt|Borrowings|Obligations)",
                r"(?m)^\s*\d{1,2}\.\s*Long[\- ]Term\s+(?:Debt|Obligations)",
                r"(?m)^\s*\d{1,2}\.\s*(?:Debt|Borrowings|Financing\s+Arrangements)\s*$",
                r"(?im)^\s*Long[\- ]Term\s+Debt\s*$",
            ],
        },
        PatternFamily {
            section_type: SectionType::MdaLiquidity,
            patterns: &[
                r"(?im)^\s*Liquidity\s+and\s+Capital\s+Resources",
                r"(?im)^\s*Capital\s+Resources\s+and\s+Liquidity",
            ],
        },
        PatternFamily {
            section_type: SectionType::Covenants,
            patterns: &[
                r"(?im)^\s*(?:Financial\s+)?Covenants?\s*$",
                r"(?im)^\s*Restrictive\s+Covenants",
                r"(?im)^\s*Covenant\s+Compliance",
            ],
        },
        PatternFamily {
            section_type: SectionType::GuarantorList,
            patterns: &[
                r"(?im)^\s*Guarantor\s+(?:Subsidiaries|Entities)",
                r"(?im)^\s*Subsidiary\s+Guarantors",
            ],
        },
        PatternFamily {
            section_type: SectionType::DescSecurities,
            patterns: &[
                r"(?im)^\s*Description\s+of\s+(?:the\s+)?(?:Registrant'?s\s+)?Securities",
                r"(?im)^\s*Description\s+of\s+(?:Capital\s+Stock|Notes|Debt\s+Securities)",
            ],
        },
    ]
}

/// Patterns that identify full exhibit documents.
fn indenture_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"(?:SUPPLEMENTAL\s+)?INDENTURE\b.{0,200}?\b(?:dated|among|between)")
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .unwrap()
    })
}

fn credit_agreement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(
            r"(?:AMENDED\s+AND\s+RESTATED\s+)?(?:CREDIT|LOAN)\s+AGREEMENT\b.{0,200}?\b(?:dated|among|between)",
        )
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap()
    })
}

/// A heading-ish line: short, mostly capitalized start. Used to find the end
/// of heading-bounded sections.
fn next_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:Note\s+\d{1,2}\s*[—\-–.:]|\d{1,2}\.\s+[A-Z]|Item\s+\d|[A-Z][A-Za-z ,&'\-]{3,60}$)")
            .unwrap()
    })
}

/// Input for one segmentation pass.
#[derive(Debug, Clone)]
pub struct SegmenterInput<'a> {
    /// Raw (un-normalized) filing or exhibit body
    pub raw: &'a str,
    /// URL of the parent filing
    pub filing_url: &'a str,
    /// Exhibit URL when segmenting a standalone exhibit document
    pub exhibit_url: Option<&'a str>,
}

/// Segment a filing into typed sections.
///
/// Returns an empty vector for PDF payloads; the caller records `no_data`
/// rather than inventing sections. Re-running on identical input yields an
/// identical section set.
pub fn segment_filing(input: &SegmenterInput<'_>) -> Result<Vec<FilingSection>> {
    if normalize::is_pdf(input.raw) {
        debug!(url = input.filing_url, "skipping PDF attachment");
        return Ok(Vec::new());
    }

    let text = normalize::clean_filing(input.raw)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let url = input.exhibit_url.unwrap_or(input.filing_url).to_string();
    let mut sections = Vec::new();

    // Exhibit 21/22 only validate as standalone exhibit documents; the body
    // patterns below never claim them.
    if input.exhibit_url.is_some() {
        if let Some(section) = exhibit21::validate_exhibit21(&text, &url) {
            sections.push(section);
            return Ok(sections);
        }
        if let Some(section) = match_exhibit22(&text, &url) {
            sections.push(section);
            return Ok(sections);
        }
        // Full-document exhibit types.
        if let Some(m) = indenture_re().find(&text) {
            sections.push(full_document_section(
                SectionType::Indenture,
                &text,
                m.start(),
                &url,
            ));
            return Ok(sections);
        }
        if let Some(m) = credit_agreement_re().find(&text) {
            sections.push(full_document_section(
                SectionType::CreditAgreement,
                &text,
                m.start(),
                &url,
            ));
            return Ok(sections);
        }
    }

    // Heading-bounded body sections.
    for family in families() {
        if let Some(section) = match_family(family, &text, &url) {
            sections.push(section);
        }
    }

    sections.sort_by_key(|s| s.start_offset);
    Ok(sections)
}

/// Try each pattern of a family in order; first qualifying match wins.
fn match_family(family: &PatternFamily, text: &str, url: &str) -> Option<FilingSection> {
    for pattern in family.patterns {
        let re = Regex::new(pattern).ok()?;
        for m in re.find_iter(text) {
            let content = cut_section(text, m.start());
            if content.len() >= min_len(family.section_type) {
                let title = text[m.start()..m.end()].trim().to_string();
                return Some(FilingSection {
                    section_type: family.section_type,
                    title,
                    content,
                    start_offset: m.start(),
                    sec_filing_url: url.to_string(),
                });
            }
            // Too short: usually the table-of-contents hit. Keep scanning.
        }
    }
    None
}

/// Cut a heading-bounded section: from the heading to the next heading-ish
/// line, capped at the body limit.
fn cut_section(text: &str, start: usize) -> String {
    let window_end = (start + BODY_SECTION_CAP).min(text.len());
    let window = &text[start..window_end];

    // Skip past the heading line itself before searching for the terminator.
    let after_heading = window.find('\n').map(|i| i + 1).unwrap_or(window.len());
    let end = next_heading_re()
        .find_at(window, after_heading.min(window.len()))
        .map(|m| m.start())
        .unwrap_or(window.len());

    window[..end].trim_end().to_string()
}

/// Capture a full exhibit document from the matched preamble onward.
fn full_document_section(
    section_type: SectionType,
    text: &str,
    start: usize,
    url: &str,
) -> FilingSection {
    let end = (start + FULL_DOC_CAP).min(text.len());
    let title = text[start..]
        .lines()
        .next()
        .unwrap_or(section_type.as_str())
        .trim()
        .chars()
        .take(120)
        .collect();
    FilingSection {
        section_type,
        title,
        content: text[start..end].to_string(),
        start_offset: start,
        sec_filing_url: url.to_string(),
    }
}

/// Exhibit 22 guarantor lists: a header mentioning guarantors plus listed
/// entity lines.
fn match_exhibit22(text: &str, url: &str) -> Option<FilingSection> {
    static HEADER_RE: OnceLock<Regex> = OnceLock::new();
    let header_re = HEADER_RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:List\s+of\s+)?Guarantor(?:s|\s+Subsidiaries)").unwrap()
    });

    let m = header_re.find(text)?;
    let content = text[m.start()..].trim_end().to_string();
    if content.len() < min_len(SectionType::Exhibit22) {
        return None;
    }
    Some(FilingSection {
        section_type: SectionType::Exhibit22,
        title: text[m.start()..m.end()].trim().to_string(),
        content,
        start_offset: m.start(),
        sec_filing_url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(heading: &str) -> String {
        let filler = "The Company's outstanding borrowings consist of senior notes \
                      and a revolving credit facility with customary terms. "
            .repeat(12);
        format!("Item 8. Financial Statements\n{}\n{}\nItem 9. Controls\n", heading, filler)
    }

    #[test]
    fn test_note_style_debt_footnote() {
        let input = body("Note 9 — Long-Term Debt");
        let sections = segment_filing(&SegmenterInput {
            raw: &input,
            filing_url: "https://example.test/10k.htm",
            exhibit_url: None,
        })
        .unwrap();
        let debt: Vec<_> = sections
            .iter()
            .filter(|s| s.section_type == SectionType::DebtFootnote)
            .collect();
        assert_eq!(debt.len(), 1);
        assert!(debt[0].title.contains("Note 9"));
        assert_eq!(debt[0].sec_filing_url, "https://example.test/10k.htm");
    }

    #[rstest::rstest]
    #[case("9. Long-Term Debt")]
    #[case("3. Long-Term Obligations")]
    fn test_numbered_debt_variants(#[case] heading: &str) {
        let input = body(heading);
        let sections = segment_filing(&SegmenterInput {
            raw: &input,
            filing_url: "https://example.test/10k.htm",
            exhibit_url: None,
        })
        .unwrap();
        assert!(
            sections.iter().any(|s| s.section_type == SectionType::DebtFootnote),
            "heading {:?} not matched",
            heading
        );
    }

    #[test]
    fn test_toc_hit_skipped_for_real_section() {
        // A short TOC line followed by the real section later in the filing.
        let filler = "Borrowings under the revolving facility bear interest at SOFR plus \
                      an applicable margin. "
            .repeat(20);
        let input = format!(
            "Note 9 — Long-Term Debt .......... 54\n\nOther notes here\n\
             Note 9 — Long-Term Debt\n{}\nNote 10 — Leases\n",
            filler
        );
        let sections = segment_filing(&SegmenterInput {
            raw: &input,
            filing_url: "u",
            exhibit_url: None,
        })
        .unwrap();
        let debt = sections
            .iter()
            .find(|s| s.section_type == SectionType::DebtFootnote)
            .expect("debt footnote");
        assert!(debt.content.contains("revolving facility"));
    }

    #[test]
    fn test_pdf_yields_no_sections() {
        let sections = segment_filing(&SegmenterInput {
            raw: "%PDF-1.7 stream",
            filing_url: "u",
            exhibit_url: None,
        })
        .unwrap();
        assert!(sections.is_empty());
    }

    #[test]
    fn test_indenture_full_document() {
        let filler = "Section 1.01. Definitions. As used in this Indenture the following \
                      terms have the meanings set forth below. "
            .repeat(40);
        let input = format!(
            "INDENTURE dated as of March 1, 1997 between Acme Corp and the Trustee\n{}",
            filler
        );
        let sections = segment_filing(&SegmenterInput {
            raw: &input,
            filing_url: "https://example.test/filing.htm",
            exhibit_url: Some("https://example.test/ex4.htm"),
        })
        .unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].section_type, SectionType::Indenture);
        // Exhibit URL preferred over the parent filing URL.
        assert_eq!(sections[0].sec_filing_url, "https://example.test/ex4.htm");
    }

    #[test]
    fn test_segmentation_is_idempotent() {
        let input = body("Note 9 — Long-Term Debt");
        let seg = SegmenterInput {
            raw: &input,
            filing_url: "u",
            exhibit_url: None,
        };
        let a = segment_filing(&seg).unwrap();
        let b = segment_filing(&seg).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.section_type, y.section_type);
            assert_eq!(x.content, y.content);
            assert_eq!(x.start_offset, y.start_offset);
        }
    }

    #[test]
    fn test_mda_liquidity() {
        let input = body("Liquidity and Capital Resources");
        let sections = segment_filing(&SegmenterInput {
            raw: &input,
            filing_url: "u",
            exhibit_url: None,
        })
        .unwrap();
        assert!(sections.iter().any(|s| s.section_type == SectionType::MdaLiquidity));
    }
}
