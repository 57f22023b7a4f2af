//! Prompt variants and learned patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// LLM-backed stage of the comparison pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extraction,
    Normalization,
    Recommendation,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Extraction => "extraction",
            PipelineStage::Normalization => "normalization",
            PipelineStage::Recommendation => "recommendation",
        }
    }
}

/// An experimental prompt fragment for one (trade, stage) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVariant {
    pub id: Uuid,
    pub trade_type: String,
    pub stage: PipelineStage,
    pub name: String,

    /// Prompt fragment appended to the stage prompt
    pub content: String,

    pub is_control: bool,
    pub is_active: bool,
    pub total_runs: u64,
    pub avg_confidence: f64,

    /// Share of runs that later received a user correction
    pub correction_rate: f64,

    pub avg_extraction_ms: f64,
    pub updated_at: DateTime<Utc>,
}

impl PromptVariant {
    pub fn new(
        trade_type: impl Into<String>,
        stage: PipelineStage,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trade_type: trade_type.into(),
            stage,
            name: name.into(),
            content: content.into(),
            is_control: false,
            is_active: true,
            total_runs: 0,
            avg_confidence: 0.0,
            correction_rate: 0.0,
            avg_extraction_ms: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Mark as the control arm.
    pub fn control(mut self) -> Self {
        self.is_control = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Promotion score: confidence rewarded, corrections penalized.
    pub fn performance_score(&self) -> f64 {
        self.avg_confidence * 100.0 - self.correction_rate * 50.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Wording rewrite ("GWB" → "gypsum wall board")
    Terminology,
    /// Description → category assignment
    Category,
    /// Free-form extraction rule
    Extraction,
}

/// A rule distilled from approved corrections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: Uuid,
    pub trade_type: String,
    pub pattern_type: PatternType,
    pub from_value: String,
    pub to_value: String,
    pub occurrence_count: u32,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl LearnedPattern {
    pub fn new(
        trade_type: impl Into<String>,
        pattern_type: PatternType,
        from_value: impl Into<String>,
        to_value: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trade_type: trade_type.into(),
            pattern_type,
            from_value: from_value.into(),
            to_value: to_value.into(),
            occurrence_count: 1,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    /// Identity of the mapping, independent of counts.
    pub fn key(&self) -> (String, PatternType, String, String) {
        (
            self.trade_type.to_lowercase(),
            self.pattern_type,
            self.from_value.to_lowercase(),
            self.to_value.to_lowercase(),
        )
    }
}
