//! Configuration types for the comparison pipeline, learning and export.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::training::CorrectionType;

/// Retry policy for the completion gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    ///
    /// Default: 3.
    pub max_attempts: u32,

    /// Delay unit in milliseconds. The wait after failed attempt `n`
    /// is `n * base_delay_ms`.
    ///
    /// Default: 1000 (waits of 1s, then 2s).
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
        }
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms * attempt as u64)
    }
}

/// Configuration for a comparison run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chat model name passed to the completion service.
    pub model: String,

    /// Sampling temperature for all stages.
    ///
    /// Default: 0.1.
    pub temperature: f32,

    /// Completion token cap for extraction.
    pub extraction_max_tokens: u32,

    /// Completion token cap for normalization and recommendation.
    pub analysis_max_tokens: u32,

    /// Documents extracted at once. 1 keeps the loop sequential.
    ///
    /// Default: 1.
    pub extraction_concurrency: usize,

    /// Approved corrections rendered as few-shot examples.
    ///
    /// Default: 5.
    pub max_examples: usize,

    /// Learned patterns rendered into the extraction prompt.
    ///
    /// Default: 20.
    pub max_patterns: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            extraction_max_tokens: 4096,
            analysis_max_tokens: 4096,
            extraction_concurrency: 1,
            max_examples: 5,
            max_patterns: 20,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set extraction concurrency (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.extraction_concurrency = concurrency.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for variant selection and promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Probability of serving an experimental variant instead of the control.
    ///
    /// Default: 0.8.
    pub variant_share: f64,

    /// Runs a variant needs before it can be promoted.
    ///
    /// Default: 20.
    pub min_runs_for_promotion: u64,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            variant_share: 0.8,
            min_runs_for_promotion: 20,
        }
    }
}

/// Configuration for fine-tuning export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Minimum quality score to keep a correction.
    ///
    /// Default: 0.8.
    pub min_quality_score: f64,

    /// Cap on exported examples.
    ///
    /// Default: 1000.
    pub max_examples: usize,

    /// Only these trades (empty = all).
    #[serde(default)]
    pub trade_types: Vec<String>,

    /// Only these correction types (empty = all).
    #[serde(default)]
    pub correction_types: Vec<CorrectionType>,

    /// Embed id, trade, type and score alongside the messages.
    pub include_metadata: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 0.8,
            max_examples: 1000,
            trade_types: vec![],
            correction_types: vec![],
            include_metadata: false,
        }
    }
}

impl ExportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_quality(mut self, score: f64) -> Self {
        self.min_quality_score = score;
        self
    }

    pub fn with_max_examples(mut self, max: usize) -> Self {
        self.max_examples = max;
        self
    }

    pub fn with_trades(mut self, trades: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.trade_types = trades.into_iter().map(|t| t.into()).collect();
        self
    }

    pub fn with_correction_types(mut self, types: impl IntoIterator<Item = CorrectionType>) -> Self {
        self.correction_types = types.into_iter().collect();
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delays_increase() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[test]
    fn test_concurrency_never_zero() {
        assert_eq!(PipelineConfig::new().with_concurrency(0).extraction_concurrency, 1);
    }
}
