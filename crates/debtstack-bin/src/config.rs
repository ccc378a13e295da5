//! Per-invocation configuration from the environment.

use debtstack_llm::tier::{TierPolicy, TierPricing};
use std::path::PathBuf;

/// Everything the pipeline needs from the environment. Built once per
/// invocation; no global state.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub database_path: PathBuf,
    /// Chat-completions API base URL
    pub llm_base_url: String,
    /// API key for the model provider
    pub llm_api_key: String,
    /// Tier policy (model ids and pricing)
    pub tier_policy: TierPolicy,
    /// User agent for SEC requests (must carry contact info)
    pub sec_user_agent: String,
    /// Companies processed in parallel in batch mode
    pub max_concurrent_companies: usize,
}

impl Config {
    /// Read configuration, with `.env` support and sane defaults for
    /// everything except the API key.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let database_path = std::env::var("DEBTSTACK_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("debtstack")
                    .join("debtstack.db")
            });

        let llm_api_key = std::env::var("DEBTSTACK_LLM_API_KEY")
            .map_err(|_| "DEBTSTACK_LLM_API_KEY is not set".to_string())?;

        let llm_base_url = std::env::var("DEBTSTACK_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let tier_policy = TierPolicy {
            fast: TierPricing {
                model: std::env::var("DEBTSTACK_MODEL_FAST")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                input_per_mtok: env_f64("DEBTSTACK_PRICE_FAST_IN", 0.15),
                output_per_mtok: env_f64("DEBTSTACK_PRICE_FAST_OUT", 0.60),
            },
            standard: TierPricing {
                model: std::env::var("DEBTSTACK_MODEL_STANDARD")
                    .unwrap_or_else(|_| "gpt-4o".to_string()),
                input_per_mtok: env_f64("DEBTSTACK_PRICE_STANDARD_IN", 2.50),
                output_per_mtok: env_f64("DEBTSTACK_PRICE_STANDARD_OUT", 10.0),
            },
            advanced: TierPricing {
                model: std::env::var("DEBTSTACK_MODEL_ADVANCED")
                    .unwrap_or_else(|_| "o3".to_string()),
                input_per_mtok: env_f64("DEBTSTACK_PRICE_ADVANCED_IN", 10.0),
                output_per_mtok: env_f64("DEBTSTACK_PRICE_ADVANCED_OUT", 40.0),
            },
        };

        let sec_user_agent = std::env::var("DEBTSTACK_SEC_USER_AGENT")
            .unwrap_or_else(|_| "DebtStack/0.1 (ops@debtstack.io)".to_string());

        let max_concurrent_companies = std::env::var("DEBTSTACK_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        Ok(Self {
            database_path,
            llm_base_url,
            llm_api_key,
            tier_policy,
            sec_user_agent,
            max_concurrent_companies,
        })
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
