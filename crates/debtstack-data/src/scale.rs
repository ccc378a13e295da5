//! Monetary-scale detection for numeric filing regions.
//!
//! A filing can mix scales: "in millions" for the income statement and
//! "in thousands" for a schedule elsewhere. Detection is therefore
//! per-region, anchored to the financial-statement header nearest the data
//! being read, and the first header in the document (usually a table of
//! contents) is never trusted on its own.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Window after a statement header that may carry the scale phrase.
const SCALE_WINDOW: usize = 500;

/// Monetary unit in force for a filing region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyScale {
    /// Values are whole dollars
    Dollars,
    /// Values are thousands of dollars
    Thousands,
    /// Values are millions of dollars
    Millions,
}

impl MoneyScale {
    /// Multiplier from a raw reported value to cents.
    pub const fn to_cents_multiplier(&self) -> i64 {
        match self {
            Self::Dollars => 100,
            Self::Thousands => 100_000,
            Self::Millions => 100_000_000,
        }
    }

    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dollars => "dollars",
            Self::Thousands => "thousands",
            Self::Millions => "millions",
        }
    }
}

/// Result of a scale detection pass over a region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleDetection {
    /// The detected (or defaulted) scale
    pub scale: MoneyScale,
    /// Whether an explicit scale phrase was found
    pub explicit: bool,
    /// Warning attached when the detector had to default
    pub warning: Option<String>,
}

/// Convert a raw reported value under a detected scale to integer cents.
///
/// Rounds half-away-from-zero; filings report at most two decimal places at
/// any scale that matters here.
pub fn apply_scale(scale: MoneyScale, raw: f64) -> i64 {
    (raw * scale.to_cents_multiplier() as f64).round() as i64
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(
            r"(?:condensed\s+)?(?:consolidated\s+)?(?:balance\s+sheets?|statements?\s+of\s+(?:operations|income|cash\s+flows)|income\s+statements?)",
        )
        .case_insensitive(true)
        .build()
        .unwrap()
    })
}

struct ScalePhrase {
    pattern: &'static str,
    scale: MoneyScale,
}

/// Ordered: the more specific phrasings first.
const SCALE_PHRASES: &[ScalePhrase] = &[
    ScalePhrase {
        pattern: r"(?i)in\s+millions\s+of\s+(?:u\.?s\.?\s+)?dollars",
        scale: MoneyScale::Millions,
    },
    ScalePhrase {
        pattern: r"(?i)in\s+thousands\s+of\s+(?:u\.?s\.?\s+)?dollars",
        scale: MoneyScale::Thousands,
    },
    ScalePhrase {
        pattern: r"(?i)\(\s*in\s+millions\b",
        scale: MoneyScale::Millions,
    },
    ScalePhrase {
        pattern: r"(?i)\(\s*in\s+thousands\b",
        scale: MoneyScale::Thousands,
    },
    ScalePhrase {
        pattern: r"(?i)\bin\s+millions\b",
        scale: MoneyScale::Millions,
    },
    ScalePhrase {
        pattern: r"(?i)\bin\s+thousands\b",
        scale: MoneyScale::Thousands,
    },
    ScalePhrase {
        pattern: r"\$\s*000(?:'s|s)?\b",
        scale: MoneyScale::Thousands,
    },
];

fn scale_res() -> &'static Vec<(Regex, MoneyScale)> {
    static RES: OnceLock<Vec<(Regex, MoneyScale)>> = OnceLock::new();
    RES.get_or_init(|| {
        SCALE_PHRASES
            .iter()
            .map(|p| (Regex::new(p.pattern).unwrap(), p.scale))
            .collect()
    })
}

/// Detect the monetary scale in force at `target_offset` within `region`.
///
/// Scans every financial-statement header, checks the window after each for
/// an explicit scale phrase, and prefers the detection nearest the target.
/// The first header alone is never decisive: with a single header the
/// detector requires the phrase itself, and with none it falls back to
/// scanning the whole region for a phrase. No phrase anywhere means a
/// `Dollars` default plus a warning the caller must surface.
pub fn detect_scale(region: &str, target_offset: usize) -> ScaleDetection {
    let mut detections: Vec<(usize, MoneyScale)> = Vec::new();

    for header in header_re().find_iter(region) {
        let window_end = (header.end() + SCALE_WINDOW).min(region.len());
        let window = &region[header.end()..window_end];

        for (re, scale) in scale_res() {
            if let Some(m) = re.find(window) {
                detections.push((header.end() + m.start(), *scale));
                break;
            }
        }
    }

    // No header carried a phrase: scan the region directly so schedules with
    // a bare "(in thousands)" caption still resolve.
    if detections.is_empty() {
        for (re, scale) in scale_res() {
            for m in re.find_iter(region) {
                detections.push((m.start(), *scale));
            }
        }
    }

    match detections
        .iter()
        .min_by_key(|(offset, _)| offset.abs_diff(target_offset))
    {
        Some((_, scale)) => ScaleDetection {
            scale: *scale,
            explicit: true,
            warning: None,
        },
        None => ScaleDetection {
            scale: MoneyScale::Dollars,
            explicit: false,
            warning: Some("no explicit scale indicator found; defaulted to dollars".to_string()),
        },
    }
}
