//! Few-shot examples built from approved corrections.

use serde_json::Value;
use tracing::warn;

use crate::traits::store::ContributionStore;
use crate::types::training::{ContributionFilter, TrainingContribution};

/// Renders approved corrections for a trade as prompt examples.
#[derive(Debug, Clone)]
pub struct ExampleLibrary {
    max_examples: usize,
}

impl Default for ExampleLibrary {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ExampleLibrary {
    pub fn new(max_examples: usize) -> Self {
        Self { max_examples }
    }

    /// Prompt block for `trade_type`, or an empty string when there is
    /// nothing to show or the fetch fails.
    pub async fn render<S: ContributionStore + ?Sized>(&self, store: &S, trade_type: &str) -> String {
        if self.max_examples == 0 {
            return String::new();
        }

        let filter = ContributionFilter::for_trade(trade_type).with_limit(self.max_examples);
        match store.list_approved(&filter).await {
            Ok(contributions) => render_examples(trade_type, &contributions),
            Err(e) => {
                warn!(error = %e, trade_type, "Failed to load correction examples");
                String::new()
            }
        }
    }
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "(none)".to_string(),
        // Whole amounts read as "14200", not "14200.0"
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Render corrections as "original → corrected" lines.
pub fn render_examples(trade_type: &str, contributions: &[TrainingContribution]) -> String {
    let lines: Vec<String> = contributions
        .iter()
        .filter_map(|c| {
            let key = c.correction_type.value_key();
            let original = c.original_value.get(key)?;
            let corrected = c.corrected_value.get(key)?;
            let mut line = format!(
                "- {}: \"{}\" → \"{}\"",
                c.correction_type,
                display_value(original),
                display_value(corrected)
            );
            if let Some(snippet) = c.raw_text_snippet.as_deref().filter(|s| !s.trim().is_empty()) {
                line.push_str(&format!(" (from: \"{}\")", snippet.trim()));
            }
            Some(line)
        })
        .collect();

    if lines.is_empty() {
        return String::new();
    }

    format!(
        "Corrections reviewers made to past {} extractions. Apply the same judgement:\n{}",
        trade_type,
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreResult};
    use crate::stores::MemoryStore;
    use crate::types::training::{CorrectionType, ModerationStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_renders_only_approved_for_trade() {
        let store = MemoryStore::new();
        store.insert_contribution(
            TrainingContribution::new(
                "drywall",
                CorrectionType::Description,
                json!({"description": "GWB"}),
                json!({"description": "Gypsum wall board"}),
            )
            .with_snippet("GWB 5/8 type X")
            .approved(),
        );
        store.insert_contribution(TrainingContribution::new(
            "drywall",
            CorrectionType::Category,
            json!({"category": "misc"}),
            json!({"category": "framing"}),
        ));
        store.insert_contribution(
            TrainingContribution::new(
                "hvac",
                CorrectionType::Price,
                json!({"total_price": 10.0}),
                json!({"total_price": 100.0}),
            )
            .approved(),
        );

        let text = ExampleLibrary::default().render(&store, "drywall").await;
        assert!(text.contains("\"GWB\" → \"Gypsum wall board\""));
        assert!(text.contains("GWB 5/8 type X"));
        assert!(!text.contains("framing"));
        assert!(!text.contains("100"));
    }

    struct BrokenStore;

    #[async_trait]
    impl ContributionStore for BrokenStore {
        async fn create_contribution(&self, _: &TrainingContribution) -> StoreResult<()> {
            Err(StoreError::Backend("down".into()))
        }
        async fn list_approved(&self, _: &ContributionFilter) -> StoreResult<Vec<TrainingContribution>> {
            Err(StoreError::Backend("down".into()))
        }
        async fn set_moderation_status(&self, _: Uuid, _: ModerationStatus) -> StoreResult<()> {
            Err(StoreError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_empty_block() {
        assert_eq!(ExampleLibrary::default().render(&BrokenStore, "drywall").await, "");
    }
}
