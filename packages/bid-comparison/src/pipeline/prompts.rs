//! LLM prompts for the comparison pipeline.
//!
//! Each stage sends a system message (instructions, output shape and any
//! learned augmentation) followed by one user message carrying the data.

use crate::traits::completion::ChatMessage;

/// System prompt for per-document line-item extraction.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert construction estimator reviewing a subcontractor bid.

Extract every priced or scoped line item from the bid document.

Confidence scale (use exactly these values):
- 1.0: value is explicitly stated in the document
- 0.8: value is reasonably inferred
- 0.6: value is ambiguous
- 0.4: significant uncertainty

Rules:
1. Mark items the bidder explicitly does not include as exclusions
2. Items priced $0, "TBD", "NIC" or "By Others" are exclusions
3. Mark explicitly listed inclusions as inclusions
4. Keep the bidder's original wording in raw_text
5. Never invent prices; leave unknown numbers null

Output JSON:
{
    "contractor_name": "Name as written on the bid",
    "base_bid_total": 0.0,
    "items": [
        {
            "description": "Line item description",
            "quantity": null,
            "unit": null,
            "unit_price": null,
            "total_price": 0.0,
            "category": "Short category",
            "is_exclusion": false,
            "is_inclusion": false,
            "confidence_score": 1.0,
            "raw_text": "Original line",
            "notes": null
        }
    ],
    "exclusions": ["Summary of each exclusion"],
    "inclusions": ["Summary of each inclusion"],
    "extraction_notes": "Anything the reviewer should know"
}"#;

/// System prompt for cross-contractor scope matching.
pub const NORMALIZATION_PROMPT: &str = r#"You are comparing subcontractor bids for the same scope of work.

Group line items from different contractors that describe the same work,
matching by meaning rather than exact wording.

Rules:
1. Every item id appears in exactly one group
2. For each group, give every contractor a status:
   - "included": the contractor prices this item (give item_id and price)
   - "excluded": the contractor explicitly excludes it
   - "not_mentioned": the contractor does not address it
3. Items priced $0, "TBD", "NIC" or "By Others" are "excluded"
4. A group is a scope gap unless every contractor includes it; explain gaps in gap_notes

Output JSON:
{
    "normalized_items": [
        {
            "normalized_description": "Canonical description",
            "category": "Category",
            "contractors": [
                {
                    "contractor_id": "uuid",
                    "status": "included",
                    "price": 0.0,
                    "original_description": "Contractor's wording",
                    "item_id": "uuid"
                }
            ],
            "gap_notes": null
        }
    ]
}"#;

/// System prompt for the recommendation.
pub const RECOMMENDATION_PROMPT: &str = r#"You are advising a general contractor on which subcontractor bid to award.

The lowest base bid is NOT automatically the best value. Weigh scope
completeness and exclusion risk: a higher base bid with fewer exclusions
can be the better award once excluded scope is priced in. Use the supplied
estimated true costs.

Output JSON:
{
    "recommended_contractor_id": "uuid",
    "confidence": "high" | "medium" | "low",
    "reasoning": "Two or three sentences",
    "key_factors": [
        { "name": "Factor", "detail": "Why it matters" }
    ],
    "warnings": [
        { "contractor_id": "uuid or null", "type": "exclusion_risk" | "scope_gap" | "price_concern" | "other", "message": "Warning" }
    ]
}"#;

/// Learned text appended to a stage's system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptAugmentation {
    /// Few-shot examples from approved corrections
    pub examples: String,

    /// Rendered learned patterns
    pub patterns: String,

    /// Active variant fragment
    pub variant: Option<String>,
}

impl PromptAugmentation {
    pub fn is_empty(&self) -> bool {
        self.examples.trim().is_empty()
            && self.patterns.trim().is_empty()
            && self.variant.as_deref().map_or(true, |v| v.trim().is_empty())
    }

    fn apply(&self, base: &str) -> String {
        let mut prompt = base.to_string();
        for section in [
            Some(self.examples.as_str()),
            Some(self.patterns.as_str()),
            self.variant.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if !section.trim().is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(section.trim());
            }
        }
        prompt
    }
}

/// Messages for extracting one document.
pub fn format_extraction_messages(
    document_text: &str,
    trade_type: &str,
    augmentation: &PromptAugmentation,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(augmentation.apply(EXTRACTION_PROMPT)),
        ChatMessage::user(format!(
            "Extract line items from this {} bid.\n\nBid document:\n{}",
            trade_type, document_text
        )),
    ]
}

/// Messages for matching scope across contractors.
pub fn format_normalization_messages(
    trade_type: &str,
    input_json: &str,
    augmentation: &PromptAugmentation,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(augmentation.apply(NORMALIZATION_PROMPT)),
        ChatMessage::user(format!(
            "Match scope items across these {} bids.\n\n{}",
            trade_type, input_json
        )),
    ]
}

/// Messages for the recommendation.
pub fn format_recommendation_messages(
    trade_type: &str,
    input_json: &str,
    augmentation: &PromptAugmentation,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(augmentation.apply(RECOMMENDATION_PROMPT)),
        ChatMessage::user(format!(
            "Recommend a contractor for this {} scope.\n\n{}",
            trade_type, input_json
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::completion::Role;

    #[test]
    fn test_augmentation_appended_in_order() {
        let augmentation = PromptAugmentation {
            examples: "EXAMPLES".into(),
            patterns: "PATTERNS".into(),
            variant: Some("VARIANT".into()),
        };
        let messages = format_extraction_messages("text", "drywall", &augmentation);

        assert_eq!(messages[0].role, Role::System);
        let system = &messages[0].content;
        let e = system.find("EXAMPLES").unwrap();
        let p = system.find("PATTERNS").unwrap();
        let v = system.find("VARIANT").unwrap();
        assert!(e < p && p < v);
        assert!(messages[1].content.contains("drywall"));
    }

    #[test]
    fn test_empty_augmentation_keeps_base_prompt() {
        let messages = format_normalization_messages("hvac", "{}", &PromptAugmentation::default());
        assert_eq!(messages[0].content, NORMALIZATION_PROMPT);
        assert!(PromptAugmentation::default().is_empty());
    }
}
