//! Bid documents and the line items extracted from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Items below this confidence are flagged for human review.
pub const REVIEW_THRESHOLD: f64 = 0.7;

/// Confidence scale used by extraction.
pub mod confidence {
    /// Value is explicitly stated in the bid.
    pub const EXPLICIT: f64 = 1.0;
    /// Value is reasonably inferred.
    pub const INFERRED: f64 = 0.8;
    /// Value is ambiguous.
    pub const AMBIGUOUS: f64 = 0.6;
    /// Significant uncertainty.
    pub const UNCERTAIN: f64 = 0.4;
}

/// Whether an item with this confidence needs review.
///
/// Exactly [`REVIEW_THRESHOLD`] is not flagged.
pub fn needs_review(confidence: f64) -> bool {
    confidence < REVIEW_THRESHOLD
}

/// Processing status of an uploaded bid document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Uploading,
    Processing,
    Processed,
    Error,
}

impl DocumentStatus {
    /// `processed` and `error` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Processed | DocumentStatus::Error)
    }
}

/// One uploaded bid file. Each contractor submits exactly one, so the
/// document id doubles as the contractor id throughout the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidDocument {
    pub id: Uuid,
    pub project_id: Uuid,
    pub contractor_name: String,
    pub file_type: String,

    /// Text pulled out of the file, if the upload step already has it
    #[serde(default)]
    pub raw_text: Option<String>,

    pub status: DocumentStatus,

    #[serde(default)]
    pub error_message: Option<String>,

    /// Base bid total as stated on the document, when extraction found one
    #[serde(default)]
    pub base_bid_total: Option<f64>,

    pub created_at: DateTime<Utc>,
}

impl BidDocument {
    /// Create a freshly uploaded document.
    pub fn new(project_id: Uuid, contractor_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            contractor_name: contractor_name.into(),
            file_type: "pdf".to_string(),
            raw_text: None,
            status: DocumentStatus::Uploading,
            error_message: None,
            base_bid_total: None,
            created_at: Utc::now(),
        }
    }

    /// Set the extracted raw text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = Some(text.into());
        self
    }

    /// Set the file type.
    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    /// Contractor identity for this bid.
    pub fn contractor_id(&self) -> Uuid {
        self.id
    }
}

/// A single line item within one bid document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub id: Uuid,
    pub document_id: Uuid,
    pub description: String,

    #[serde(default)]
    pub quantity: Option<f64>,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub unit_price: Option<f64>,

    pub total_price: f64,
    pub category: String,
    pub is_exclusion: bool,
    pub is_inclusion: bool,
    pub confidence_score: f64,
    pub needs_review: bool,

    /// Canonical label assigned during normalization
    #[serde(default)]
    pub normalized_category: Option<String>,

    #[serde(default)]
    pub raw_text: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    pub user_modified: bool,
}

impl ExtractedItem {
    /// Create an explicitly-stated item.
    pub fn new(document_id: Uuid, description: impl Into<String>, total_price: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            description: description.into(),
            quantity: None,
            unit: None,
            unit_price: None,
            total_price,
            category: "general".to_string(),
            is_exclusion: false,
            is_inclusion: false,
            confidence_score: confidence::EXPLICIT,
            needs_review: false,
            normalized_category: None,
            raw_text: None,
            notes: None,
            user_modified: false,
        }
    }

    /// Set confidence; keeps `needs_review` in step.
    pub fn with_confidence(mut self, score: f64) -> Self {
        self.set_confidence(score);
        self
    }

    /// Set quantity, unit and unit price.
    pub fn with_quantity(mut self, quantity: f64, unit: impl Into<String>, unit_price: f64) -> Self {
        self.quantity = Some(quantity);
        self.unit = Some(unit.into());
        self.unit_price = Some(unit_price);
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Mark as an exclusion.
    pub fn excluded(mut self) -> Self {
        self.is_exclusion = true;
        self.is_inclusion = false;
        self
    }

    /// Set the normalized category.
    pub fn with_normalized_category(mut self, category: impl Into<String>) -> Self {
        self.normalized_category = Some(category.into());
        self
    }

    /// Clamp and store a confidence score, recomputing `needs_review`.
    pub fn set_confidence(&mut self, score: f64) {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        self.confidence_score = score;
        self.needs_review = needs_review(score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_threshold_boundary() {
        assert!(needs_review(0.69));
        assert!(!needs_review(0.7));
        assert!(!needs_review(1.0));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let item = ExtractedItem::new(Uuid::new_v4(), "Drywall", 100.0).with_confidence(1.4);
        assert_eq!(item.confidence_score, 1.0);
        assert!(!item.needs_review);

        let item = ExtractedItem::new(Uuid::new_v4(), "Drywall", 100.0).with_confidence(f64::NAN);
        assert_eq!(item.confidence_score, 0.0);
        assert!(item.needs_review);
    }
}
