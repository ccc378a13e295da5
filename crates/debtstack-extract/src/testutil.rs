//! Scripted chat client shared by extractor tests.

use async_trait::async_trait;
use debtstack_llm::tier::{TierPolicy, TierPricing};
use debtstack_llm::{ChatClient, ChatRequest, ChatResponse, ModelTier, Result as LlmResult};
use std::sync::Mutex;

/// Returns canned responses in order; records the tier of every call.
pub(crate) struct ScriptedClient {
    responses: Mutex<Vec<String>>,
    policy: TierPolicy,
    pub(crate) tiers_seen: Mutex<Vec<ModelTier>>,
}

impl ScriptedClient {
    pub(crate) fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            policy: TierPolicy {
                fast: TierPricing {
                    model: "small-1".to_string(),
                    input_per_mtok: 1.0,
                    output_per_mtok: 2.0,
                },
                standard: TierPricing {
                    model: "mid-1".to_string(),
                    input_per_mtok: 10.0,
                    output_per_mtok: 20.0,
                },
                advanced: TierPricing {
                    model: "large-1".to_string(),
                    input_per_mtok: 100.0,
                    output_per_mtok: 200.0,
                },
            },
            tiers_seen: Mutex::new(Vec::new()),
        }
    }

    /// How many scripted responses are left unconsumed.
    pub(crate) fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(&self, request: &ChatRequest) -> LlmResult<ChatResponse> {
        self.tiers_seen.lock().unwrap().push(request.tier);
        let mut responses = self.responses.lock().unwrap();
        let content = if responses.is_empty() {
            "{}".to_string()
        } else {
            responses.remove(0)
        };
        Ok(ChatResponse {
            content,
            input_tokens: 1_000,
            output_tokens: 200,
            model: "scripted".to_string(),
        })
    }

    fn policy(&self) -> &TierPolicy {
        &self.policy
    }
}
