//! Graph-side half of the pipeline: the idempotent merger, the metric
//! computer and the instrument-to-document linker.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod link;
pub mod merge;
pub mod metrics;

pub use link::link_instruments;
pub use merge::{MergeOutcome, Merger, SkipDecision};
pub use metrics::compute_metrics;
