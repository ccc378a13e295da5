//! Token and cost accounting.

use crate::client::ChatResponse;
use crate::tier::{ModelTier, TierPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated model usage for one company run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Calls made
    pub calls: u64,
    /// Total input tokens
    pub input_tokens: u64,
    /// Total output tokens
    pub output_tokens: u64,
    /// Total dollar cost
    pub cost_usd: f64,
    /// Per-step breakdown
    pub by_step: BTreeMap<String, StepUsage>,
}

/// Usage for one pipeline step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepUsage {
    /// Calls made in this step
    pub calls: u64,
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Dollar cost
    pub cost_usd: f64,
}

impl UsageRecord {
    /// Record one completed call against a step.
    pub fn record(
        &mut self,
        step: &str,
        tier: ModelTier,
        policy: &TierPolicy,
        response: &ChatResponse,
    ) {
        let cost = policy.cost(tier, response.input_tokens, response.output_tokens);
        self.calls += 1;
        self.input_tokens += response.input_tokens;
        self.output_tokens += response.output_tokens;
        self.cost_usd += cost;

        let entry = self.by_step.entry(step.to_string()).or_default();
        entry.calls += 1;
        entry.input_tokens += response.input_tokens;
        entry.output_tokens += response.output_tokens;
        entry.cost_usd += cost;
    }

    /// Fold another record into this one. Used when concurrent sub-tasks
    /// account usage separately.
    pub fn merge(&mut self, other: &Self) {
        self.calls += other.calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
        for (step, usage) in &other.by_step {
            let entry = self.by_step.entry(step.clone()).or_default();
            entry.calls += usage.calls;
            entry.input_tokens += usage.input_tokens;
            entry.output_tokens += usage.output_tokens;
            entry.cost_usd += usage.cost_usd;
        }
    }
}
