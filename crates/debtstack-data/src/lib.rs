//! Filing acquisition, normalization and persistent graph store for DebtStack.
//!
//! This crate owns the data-facing half of the extraction pipeline:
//!
//! - [`edgar`]: rate-limited SEC EDGAR access (CIK lookup, filing index,
//!   documents and exhibits)
//! - [`normalize`]: HTML/XBRL to text cleanup that preserves the table and
//!   line structure the section segmenter relies on
//! - [`sections`]: typed section extraction from cleaned filings
//! - [`scale`]: monetary-unit detection for numeric filing regions
//! - [`store`]: the SQLite credit graph (companies, entities, debt,
//!   guarantees, collateral, covenants, financials, document sections and
//!   extraction bookkeeping)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod edgar;
pub mod error;
pub mod normalize;
pub mod scale;
pub mod sections;
pub mod store;

pub use error::{DataError, Result};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
