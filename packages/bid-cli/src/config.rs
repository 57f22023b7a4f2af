use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// CLI configuration loaded from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    /// Only required by commands that call the model
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub extraction_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            openai_api_key: env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            extraction_concurrency: env::var("BID_EXTRACTION_CONCURRENCY")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("BID_EXTRACTION_CONCURRENCY must be a positive number")?,
        })
    }
}
