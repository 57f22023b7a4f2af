//! Extraction stage: one bid document in, structured line items out.

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::decode::{decode_response, lenient_amount, lenient_bool};
use crate::pipeline::markers::is_exclusion_marker;
use crate::pipeline::prompts::{format_extraction_messages, PromptAugmentation};
use crate::traits::completion::{Completion, CompletionOptions};
use crate::types::config::PipelineConfig;
use crate::types::document::{confidence, ExtractedItem};

/// Raw extraction response from the model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AIExtractionResponse {
    #[serde(default)]
    pub contractor_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_amount")]
    pub base_bid_total: Option<f64>,

    #[serde(default)]
    pub items: Vec<AIExtractedItem>,

    #[serde(default)]
    pub exclusions: Vec<String>,

    #[serde(default)]
    pub inclusions: Vec<String>,

    #[serde(default)]
    pub extraction_notes: Option<String>,
}

/// One item as the model reports it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AIExtractedItem {
    #[serde(default)]
    pub description: String,

    #[serde(default, deserialize_with = "lenient_amount")]
    pub quantity: Option<f64>,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default, deserialize_with = "lenient_amount")]
    pub unit_price: Option<f64>,

    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_price: Option<f64>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_exclusion: bool,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_inclusion: bool,

    #[serde(default, deserialize_with = "lenient_amount")]
    pub confidence_score: Option<f64>,

    #[serde(default)]
    pub raw_text: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,
}

/// Extraction result for one document.
#[derive(Debug, Clone, Default)]
pub struct DocumentExtraction {
    /// Contractor name found on the bid, if any
    pub contractor_name: Option<String>,
    pub base_bid_total: Option<f64>,
    pub items: Vec<ExtractedItem>,
    pub exclusions: Vec<String>,
    pub inclusions: Vec<String>,
    pub extraction_notes: Option<String>,
}

impl DocumentExtraction {
    /// Confidence of every item, in item order.
    pub fn confidence_scores(&self) -> Vec<f64> {
        self.items.iter().map(|i| i.confidence_score).collect()
    }

    pub fn items_needing_review(&self) -> usize {
        self.items.iter().filter(|i| i.needs_review).count()
    }
}

/// Turn a decoded response into items owned by `document_id`.
///
/// Items without a description are dropped. A missing total falls back to
/// `quantity * unit_price` (capped at inferred confidence), then to 0.
/// Missing confidence is treated as ambiguous.
pub fn transform_extraction(document_id: Uuid, response: AIExtractionResponse) -> DocumentExtraction {
    let mut items = Vec::with_capacity(response.items.len());

    for raw in response.items {
        let description = raw.description.trim();
        if description.is_empty() {
            debug!(%document_id, "Skipping extracted item without description");
            continue;
        }

        let mut score = raw.confidence_score.unwrap_or(confidence::AMBIGUOUS);
        let total_price = match (raw.total_price, raw.quantity, raw.unit_price) {
            (Some(total), _, _) => total,
            (None, Some(q), Some(p)) => {
                score = score.min(confidence::INFERRED);
                q * p
            }
            _ => 0.0,
        };

        // Markers only override the model on lines without a positive price
        let marked = total_price <= 0.0
            && (is_exclusion_marker(description)
                || raw.raw_text.as_deref().is_some_and(|t| is_exclusion_marker(t)));
        let is_exclusion = raw.is_exclusion || marked;

        let mut item = ExtractedItem::new(document_id, description, total_price);
        item.quantity = raw.quantity;
        item.unit = raw.unit.filter(|u| !u.trim().is_empty());
        item.unit_price = raw.unit_price;
        if let Some(category) = raw.category.filter(|c| !c.trim().is_empty()) {
            item.category = category.trim().to_string();
        }
        item.is_exclusion = is_exclusion;
        item.is_inclusion = raw.is_inclusion && !is_exclusion;
        item.raw_text = raw.raw_text;
        item.notes = raw.notes;
        item.set_confidence(score);

        items.push(item);
    }

    DocumentExtraction {
        contractor_name: response
            .contractor_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        base_bid_total: response.base_bid_total,
        items,
        exclusions: response.exclusions,
        inclusions: response.inclusions,
        extraction_notes: response.extraction_notes,
    }
}

/// Run extraction for one document's text.
pub async fn extract_document<C: Completion + ?Sized>(
    completion: &C,
    config: &PipelineConfig,
    document_id: Uuid,
    document_text: &str,
    trade_type: &str,
    augmentation: &PromptAugmentation,
) -> Result<DocumentExtraction> {
    let messages = format_extraction_messages(document_text, trade_type, augmentation);
    let options = CompletionOptions::json(config.temperature, config.extraction_max_tokens);

    let text = completion.complete(&messages, &options).await?;
    let response: AIExtractionResponse = decode_response("extraction", &text)?;

    Ok(transform_extraction(document_id, response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComparisonError;
    use crate::testing::MockCompletion;

    fn decode(json: &str) -> AIExtractionResponse {
        decode_response("extraction", json).unwrap()
    }

    #[test]
    fn test_transform_defaults_and_flags() {
        let response = decode(
            r#"{
                "contractor_name": "  Acme Drywall ",
                "base_bid_total": "$245,000",
                "items": [
                    {"description": "Hang board", "quantity": 1000, "unit": "SF", "unit_price": 2.5, "confidence_score": 1.0},
                    {"description": "Fire caulking", "total_price": 0, "raw_text": "Fire caulking - NIC", "confidence_score": 0.8},
                    {"description": "Cleanup", "total_price": "1,200"},
                    {"description": "   ", "total_price": 5}
                ]
            }"#,
        );
        let doc = Uuid::new_v4();
        let extraction = transform_extraction(doc, response);

        assert_eq!(extraction.contractor_name.as_deref(), Some("Acme Drywall"));
        assert_eq!(extraction.base_bid_total, Some(245000.0));
        assert_eq!(extraction.items.len(), 3);

        let hang = &extraction.items[0];
        assert_eq!(hang.total_price, 2500.0);
        assert_eq!(hang.confidence_score, confidence::INFERRED);
        assert_eq!(hang.document_id, doc);

        assert!(extraction.items[1].is_exclusion);

        let cleanup = &extraction.items[2];
        assert_eq!(cleanup.total_price, 1200.0);
        assert_eq!(cleanup.confidence_score, confidence::AMBIGUOUS);
        assert!(cleanup.needs_review);
        assert_eq!(extraction.items_needing_review(), 1);
    }

    #[test]
    fn test_exclusion_wins_over_inclusion() {
        let response = decode(
            r#"{"items": [{"description": "Permits", "is_exclusion": "yes", "is_inclusion": true, "total_price": 500}]}"#,
        );
        let extraction = transform_extraction(Uuid::new_v4(), response);
        assert!(extraction.items[0].is_exclusion);
        assert!(!extraction.items[0].is_inclusion);
    }

    #[test]
    fn test_priced_line_keeps_model_exclusion_flag() {
        let response = decode(
            r#"{"items": [
                {"description": "Hang and finish board, excludes taping", "total_price": 50000, "is_exclusion": false},
                {"description": "Permits TBD", "total_price": 1500, "raw_text": "Permits TBD $1,500"},
                {"description": "Scaffolding", "raw_text": "Scaffolding - by others"}
            ]}"#,
        );
        let extraction = transform_extraction(Uuid::new_v4(), response);

        assert!(!extraction.items[0].is_exclusion);
        assert_eq!(extraction.items[0].total_price, 50000.0);
        assert!(!extraction.items[1].is_exclusion);
        assert!(extraction.items[2].is_exclusion);
    }

    #[tokio::test]
    async fn test_extract_document_reports_decode_failure() {
        let mock = MockCompletion::new().then_respond("I could not read this bid.");
        let err = extract_document(
            &mock,
            &PipelineConfig::default(),
            Uuid::new_v4(),
            "text",
            "drywall",
            &PromptAugmentation::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ComparisonError::Decode { stage: "extraction", .. }));
    }
}
