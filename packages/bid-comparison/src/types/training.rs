//! User corrections collected as training contributions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which field of an extracted item the user corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    Description,
    Category,
    Price,
    Quantity,
    Unit,
    ExclusionFlag,
}

impl CorrectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionType::Description => "description",
            CorrectionType::Category => "category",
            CorrectionType::Price => "price",
            CorrectionType::Quantity => "quantity",
            CorrectionType::Unit => "unit",
            CorrectionType::ExclusionFlag => "exclusion_flag",
        }
    }

    /// Key of the item field this correction touches in the value objects.
    pub fn value_key(&self) -> &'static str {
        match self {
            CorrectionType::Description => "description",
            CorrectionType::Category => "category",
            CorrectionType::Price => "total_price",
            CorrectionType::Quantity => "quantity",
            CorrectionType::Unit => "unit",
            CorrectionType::ExclusionFlag => "is_exclusion",
        }
    }
}

impl std::fmt::Display for CorrectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// A user correction of an extracted item.
///
/// `original_value` and `corrected_value` are JSON objects shaped like the
/// item fields they touch (`description`, `category`, `total_price`,
/// `quantity`, `unit`, `is_exclusion`). Only `moderation_status` changes
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingContribution {
    pub id: Uuid,
    pub trade_type: String,
    pub correction_type: CorrectionType,
    pub original_value: Value,
    pub corrected_value: Value,

    #[serde(default)]
    pub raw_text_snippet: Option<String>,

    #[serde(default)]
    pub original_confidence: Option<f64>,

    #[serde(default)]
    pub moderation_status: ModerationStatus,

    pub created_at: DateTime<Utc>,
}

impl TrainingContribution {
    /// Create a pending contribution.
    pub fn new(
        trade_type: impl Into<String>,
        correction_type: CorrectionType,
        original_value: Value,
        corrected_value: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trade_type: trade_type.into(),
            correction_type,
            original_value,
            corrected_value,
            raw_text_snippet: None,
            original_confidence: None,
            moderation_status: ModerationStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Attach the raw text the item was extracted from.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.raw_text_snippet = Some(snippet.into());
        self
    }

    /// Record the extraction confidence of the original value.
    pub fn with_original_confidence(mut self, confidence: f64) -> Self {
        self.original_confidence = Some(confidence);
        self
    }

    /// Mark approved.
    pub fn approved(mut self) -> Self {
        self.moderation_status = ModerationStatus::Approved;
        self
    }

    /// String field from the original value.
    pub fn original_str(&self, key: &str) -> Option<&str> {
        self.original_value.get(key).and_then(Value::as_str)
    }

    /// String field from the corrected value.
    pub fn corrected_str(&self, key: &str) -> Option<&str> {
        self.corrected_value.get(key).and_then(Value::as_str)
    }

    /// Numeric field from the original value.
    pub fn original_f64(&self, key: &str) -> Option<f64> {
        self.original_value.get(key).and_then(Value::as_f64)
    }

    /// Numeric field from the corrected value.
    pub fn corrected_f64(&self, key: &str) -> Option<f64> {
        self.corrected_value.get(key).and_then(Value::as_f64)
    }
}

/// Filter for fetching approved contributions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContributionFilter {
    /// Only these trades (empty = all)
    #[serde(default)]
    pub trade_types: Vec<String>,

    /// Only these correction types (empty = all)
    #[serde(default)]
    pub correction_types: Vec<CorrectionType>,

    pub limit: Option<usize>,
}

impl ContributionFilter {
    pub fn for_trade(trade: impl Into<String>) -> Self {
        Self {
            trade_types: vec![trade.into()],
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a contribution against the filter (ignores limit).
    pub fn matches(&self, contribution: &TrainingContribution) -> bool {
        let trade_ok = self.trade_types.is_empty()
            || self
                .trade_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&contribution.trade_type));
        let type_ok = self.correction_types.is_empty()
            || self.correction_types.contains(&contribution.correction_type);
        trade_ok && type_ok
    }
}
