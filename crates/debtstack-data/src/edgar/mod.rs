//! SEC EDGAR data fetching.
//!
//! This module provides access to SEC EDGAR filings including:
//! - Company CIK lookup from ticker symbols
//! - Filing index retrieval (10-K, 10-Q, 8-K and exhibits)
//! - Document and exhibit fetching with normalization
//!
//! # Example
//!
//! ```no_run
//! use debtstack_data::edgar::{EdgarClient, FormType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EdgarClient::new("DebtStack/0.1 (ops@debtstack.io)")?;
//!     let cik = client.get_company_cik("AAPL").await?;
//!     let filings = client
//!         .get_filings(&cik, &[FormType::Form10K, FormType::Form10Q], None)
//!         .await?;
//!     println!("Found {} filings", filings.len());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod filings;

pub use client::EdgarClient;
pub use filings::{CikLookup, ExhibitCode, Filing, FormType};
