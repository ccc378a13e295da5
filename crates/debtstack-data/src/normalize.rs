//! Filing normalization: HTML/XBRL markup to plain text.
//!
//! Section boundaries and table rows carry meaning downstream, so the
//! cleaner preserves line breaks at block-element boundaries and emits a
//! `|` separator between table cells rather than flattening everything to
//! one whitespace run. Leading indentation survives verbatim and interior
//! space runs keep a three-space floor: Exhibit 21 hierarchy depth and
//! pre-formatted column alignment are both encoded in whitespace.

use crate::error::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Tags whose end marks a line break in the cleaned text.
const BLOCK_TAGS: &[&str] = &["p", "div", "tr", "br", "li", "h1", "h2", "h3", "h4", "table"];

/// Tags whose content is dropped entirely.
const DROP_TAGS: &[&str] = &["script", "style", "head", "ix:header"];

/// Pixels of margin that encode one indentation level in Wdesk exports.
const PX_PER_LEVEL: f64 = 12.0;

fn tag_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]{1,512}>").unwrap())
}

fn interior_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\x{a0}]{2,}").unwrap())
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

fn margin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:margin-left|text-indent|padding-left)\s*:\s*([\d.]+)\s*(px|pt|em)")
            .unwrap()
    })
}

/// Whether a payload is a PDF rather than markup. PDF attachments are
/// skipped by the segmenter and recorded as `no_data`.
pub fn is_pdf(content: &str) -> bool {
    content.trim_start().starts_with("%PDF-")
}

/// Clean an EDGAR HTML/XBRL document to plain text.
///
/// Walks the markup with a lenient XML event reader so inline-XBRL tags and
/// attribute-heavy spans do not leak into the text, then falls back to a
/// regex strip when the markup is too malformed to tokenize.
pub fn clean_filing(raw: &str) -> Result<String> {
    if is_pdf(raw) {
        return Ok(String::new());
    }
    let text = match clean_via_events(raw) {
        Some(text) => text,
        None => clean_via_regex(raw),
    };
    Ok(collapse_whitespace(&decode_entities(&text)))
}

/// Indentation encoded as a margin style on the element, in levels.
fn style_indent_levels(e: &BytesStart<'_>) -> usize {
    let Ok(Some(style)) = e.try_get_attribute("style") else {
        return 0;
    };
    let style = String::from_utf8_lossy(&style.value).into_owned();
    let Some(caps) = margin_re().captures(&style) else {
        return 0;
    };
    let value: f64 = caps[1].parse().unwrap_or(0.0);
    let levels = match &caps[2].to_lowercase()[..] {
        "em" => value,
        _ => value / PX_PER_LEVEL,
    };
    (levels.round().max(0.0) as usize).min(8)
}

/// Event-reader pass. Returns `None` when the markup cannot be tokenized,
/// which routes the caller to the regex fallback.
fn clean_via_events(raw: &str) -> Option<String> {
    let mut reader = Reader::from_str(raw);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.trim_text(false);

    let mut out = String::with_capacity(raw.len() / 4);
    let mut buf = Vec::new();
    let mut drop_depth: u32 = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                if DROP_TAGS.contains(&name.as_str()) {
                    drop_depth += 1;
                } else if drop_depth == 0 && name == "div" {
                    // Wdesk-style exports encode hierarchy as margin-left on
                    // sibling divs; surface it as leading spaces.
                    let levels = style_indent_levels(e);
                    if levels > 0 && out.ends_with('\n') {
                        out.push_str(&"  ".repeat(levels));
                    }
                } else if drop_depth == 0 && name == "br" {
                    // HTML-style unclosed <br> arrives as a start event.
                    out.push('\n');
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                if DROP_TAGS.contains(&name.as_str()) {
                    drop_depth = drop_depth.saturating_sub(1);
                } else if drop_depth == 0 {
                    if name == "td" || name == "th" {
                        out.push_str(" | ");
                    } else if BLOCK_TAGS.contains(&name.as_str()) {
                        out.push('\n');
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                if drop_depth == 0 && BLOCK_TAGS.contains(&name.as_str()) {
                    out.push('\n');
                }
            }
            Ok(Event::Text(ref t)) => {
                if drop_depth == 0 {
                    if let Ok(text) = t.unescape() {
                        out.push_str(&text);
                    } else {
                        out.push_str(&String::from_utf8_lossy(t.as_ref()));
                    }
                }
            }
            Ok(_) => {}
            Err(_) => return None,
        }
        buf.clear();
    }

    Some(out)
}

/// Regex fallback for markup the event reader rejects.
fn clean_via_regex(raw: &str) -> String {
    static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
    let script_re = SCRIPT_RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap()
    });
    static CELL_RE: OnceLock<Regex> = OnceLock::new();
    let cell_re = CELL_RE.get_or_init(|| Regex::new(r"(?i)</t[dh]>").unwrap());
    static LINE_RE: OnceLock<Regex> = OnceLock::new();
    let line_re = LINE_RE.get_or_init(|| {
        Regex::new(r"(?i)</(p|div|tr|li|h[1-4]|table)>|<br\s*/?>").unwrap()
    });

    let no_scripts = script_re.replace_all(raw, " ");
    let with_cells = cell_re.replace_all(&no_scripts, " | ");
    let with_lines = line_re.replace_all(&with_cells, "\n");
    tag_strip_re().replace_all(&with_lines, " ").into_owned()
}

/// Decode the handful of HTML entities that matter in filing text.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&amp;", "&")
        .replace("&#38;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#8217;", "'")
        .replace("&#8220;", "\"")
        .replace("&#8221;", "\"")
        .replace("&#8212;", "—")
        .replace("&mdash;", "—")
}

/// Normalize whitespace per line: leading indentation survives (tabs become
/// two spaces), interior runs collapse to one space (or three when the run
/// was wide enough to be a column separator) and trailing space is cut.
fn collapse_whitespace(text: &str) -> String {
    let lines: Vec<String> = text.lines().map(normalize_line).collect();
    blank_lines_re()
        .replace_all(&lines.join("\n"), "\n\n")
        .into_owned()
}

fn normalize_line(line: &str) -> String {
    let mut out = String::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\u{a0}' => {
                out.push(' ');
                chars.next();
            }
            '\t' => {
                out.push_str("  ");
                chars.next();
            }
            _ => break,
        }
    }

    let rest: String = chars.collect();
    let rest = interior_run_re().replace_all(&rest, |caps: &Captures<'_>| {
        if caps[0].chars().count() >= 3 {
            "   "
        } else {
            " "
        }
    });
    out.push_str(rest.trim_end());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf("%PDF-1.7 ..."));
        assert!(is_pdf("  %PDF-1.4"));
        assert!(!is_pdf("<html><body>hi</body></html>"));
    }

    #[test]
    fn test_pdf_yields_empty() {
        assert_eq!(clean_filing("%PDF-1.7 binary").unwrap(), "");
    }

    #[test]
    fn test_table_cells_preserved() {
        let html = "<table><tr><td>Senior Notes</td><td>4.25%</td><td>2031</td></tr></table>";
        let text = clean_filing(html).unwrap();
        assert!(text.contains("Senior Notes | 4.25% | 2031 |"), "got: {}", text);
    }

    #[test]
    fn test_block_tags_become_newlines() {
        let html = "<div>Item 7. MD&amp;A</div><p>Liquidity and Capital Resources</p>";
        let text = clean_filing(html).unwrap();
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["Item 7. MD&A", "Liquidity and Capital Resources"]);
    }

    #[test]
    fn test_wdesk_margin_becomes_indentation() {
        let html = "<div>Acme Holdings Inc.</div>\n\
                    <div style=\"margin-left:12px\">Acme Intermediate LLC</div>\n\
                    <div style=\"margin-left:24px\">Acme Operating LP</div>";
        let text = clean_filing(html).unwrap();
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        assert_eq!(lines[0], "Acme Holdings Inc.");
        assert_eq!(lines[1], "  Acme Intermediate LLC");
        assert_eq!(lines[2], "    Acme Operating LP");
    }

    #[test]
    fn test_column_runs_keep_three_space_floor() {
        let text = clean_filing("Acme Finance LLC        Delaware").unwrap();
        assert_eq!(text, "Acme Finance LLC   Delaware");
        let text = clean_filing("two  spaces collapse").unwrap();
        assert_eq!(text, "two spaces collapse");
    }

    #[test]
    fn test_leading_indentation_survives() {
        let text = clean_filing("  Acme Intermediate LLC   Delaware").unwrap();
        assert_eq!(text, "  Acme Intermediate LLC   Delaware");
    }

    #[test]
    fn test_script_and_style_dropped() {
        let html = "<html><head><style>.x{color:red}</style></head>\
                    <body><script>var a=1;</script><p>Real content</p></body></html>";
        let text = clean_filing(html).unwrap();
        assert!(text.contains("Real content"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains("var a=1"));
    }

    #[test]
    fn test_entities_decoded() {
        let html = "<p>Moody&#8217;s &amp; S&amp;P&nbsp;ratings</p>";
        let text = clean_filing(html).unwrap();
        assert!(text.contains("Moody's & S&P ratings"));
    }

    #[test]
    fn test_malformed_markup_falls_back() {
        let html = "<p>Total debt of <b>$1,250 million</p> < which matures";
        let text = clean_filing(html).unwrap();
        assert!(text.contains("$1,250 million"));
    }

    #[test]
    fn test_idempotent_on_plain_text() {
        let plain = "9. Long-Term Debt\nSenior Notes due 2031 | 500 |";
        let once = clean_filing(plain).unwrap();
        let twice = clean_filing(&once).unwrap();
        assert_eq!(once, twice);
    }
}
