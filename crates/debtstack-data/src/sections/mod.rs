//! Typed section extraction from cleaned filings.
//!
//! A filing is split into zero or more [`FilingSection`]s, each tagged with
//! a [`SectionType`] from the fixed taxonomy the extraction pipeline
//! understands. Pattern families per type are ordered; the first match whose
//! captured span meets the per-type minimum length wins.

pub mod exhibit21;
pub mod segmenter;

use serde::{Deserialize, Serialize};

pub use exhibit21::{parse_subsidiary_list, validate_exhibit21, SubsidiaryRow};
pub use segmenter::{segment_filing, SegmenterInput};

/// Document class a section was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocType {
    /// Annual report
    Form10K,
    /// Quarterly report
    Form10Q,
    /// Current report
    Form8K,
    /// Standalone exhibit document
    Exhibit,
}

impl DocType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Form10K => "10-K",
            Self::Form10Q => "10-Q",
            Self::Form8K => "8-K",
            Self::Exhibit => "exhibit",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "10-K" => Some(Self::Form10K),
            "10-Q" => Some(Self::Form10Q),
            "8-K" => Some(Self::Form8K),
            "exhibit" => Some(Self::Exhibit),
            _ => None,
        }
    }
}

/// Section taxonomy used across extraction, linking and covenant analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    /// Exhibit 21, subsidiaries of the registrant
    Exhibit21,
    /// Exhibit 22, guarantor subsidiaries
    Exhibit22,
    /// Long-term debt footnote
    DebtFootnote,
    /// MD&A liquidity and capital resources
    MdaLiquidity,
    /// Credit agreement (full document)
    CreditAgreement,
    /// Indenture or supplemental indenture (full document)
    Indenture,
    /// Guarantor list inside a filing body
    GuarantorList,
    /// Covenant-describing section
    Covenants,
    /// Description of registered securities
    DescSecurities,
}

impl SectionType {
    /// Database string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exhibit21 => "exhibit_21",
            Self::Exhibit22 => "exhibit_22",
            Self::DebtFootnote => "debt_footnote",
            Self::MdaLiquidity => "mda_liquidity",
            Self::CreditAgreement => "credit_agreement",
            Self::Indenture => "indenture",
            Self::GuarantorList => "guarantor_list",
            Self::Covenants => "covenants",
            Self::DescSecurities => "desc_securities",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exhibit_21" => Some(Self::Exhibit21),
            "exhibit_22" => Some(Self::Exhibit22),
            "debt_footnote" => Some(Self::DebtFootnote),
            "mda_liquidity" => Some(Self::MdaLiquidity),
            "credit_agreement" => Some(Self::CreditAgreement),
            "indenture" => Some(Self::Indenture),
            "guarantor_list" => Some(Self::GuarantorList),
            "covenants" => Some(Self::Covenants),
            "desc_securities" => Some(Self::DescSecurities),
        _ => None,
        }
    }
}

/// A typed slice of a filing, ready for storage and extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingSection {
    /// Section class
    pub section_type: SectionType,
    /// Human-readable title (matched heading or exhibit label)
    pub title: String,
    /// Cleaned section text
    pub content: String,
    /// Byte offset of the section start in the cleaned filing
    pub start_offset: usize,
    /// URL recorded for provenance: the exhibit URL for exhibit-born
    /// sections, the parent filing URL otherwise
    pub sec_filing_url: String,
}
