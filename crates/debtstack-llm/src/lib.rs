//! Model-agnostic chat/JSON client for the extraction pipeline.
//!
//! Everything the extractors need from a language model goes through this
//! crate: the [`client::ChatClient`] seam, the [`tier`] escalation policy,
//! [`json`] extraction and repair of imperfect model output, [`coerce`]
//! structural coercion at the typed boundary, and [`usage`] token/cost
//! accounting.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod coerce;
pub mod error;
pub mod json;
pub mod tier;
pub mod usage;

pub use client::{ChatClient, ChatRequest, ChatResponse, HttpChatClient};
pub use error::{LlmError, Result};
pub use tier::{ModelTier, TierPolicy};
pub use usage::UsageRecord;
