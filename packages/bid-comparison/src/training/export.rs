//! Fine-tuning dataset export and JSONL validation.
//!
//! Each kept correction becomes one chat-format line:
//!
//! ```text
//! {"messages":[{"role":"system",...},{"role":"user",...},{"role":"assistant",...}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{ExportError, ExportResult};
use crate::learning::examples::display_value;
use crate::traits::store::ContributionStore;
use crate::types::config::ExportConfig;
use crate::types::training::{ContributionFilter, CorrectionType, TrainingContribution};

use super::quality::{score_correction, QualityScore};

/// Counts describing an export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportStats {
    pub total_examples: usize,
    pub by_trade: BTreeMap<String, usize>,
    pub by_correction_type: BTreeMap<String, usize>,
    /// Mean score of the kept examples
    pub average_quality_score: f64,
}

/// A rendered dataset and its stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExport {
    /// Newline-delimited JSON, one example per line
    pub jsonl: String,
    pub stats: ExportStats,
}

/// Result of checking a JSONL dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonlValidation {
    pub valid: bool,
    /// One entry per violation, prefixed with the 1-based line number
    pub errors: Vec<String>,
    pub total_examples: usize,
}

/// Builds fine-tuning datasets from approved corrections.
pub struct ExportManager<S> {
    store: S,
}

impl<S: ContributionStore> ExportManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch, score, filter and render approved corrections.
    pub async fn export(&self, config: &ExportConfig) -> ExportResult<TrainingExport> {
        let filter = ContributionFilter {
            trade_types: config.trade_types.clone(),
            correction_types: config.correction_types.clone(),
            limit: None,
        };
        let contributions = self.store.list_approved(&filter).await?;
        let fetched = contributions.len();

        let export = build_export(&contributions, config)?;
        if export.stats.total_examples == 0 {
            return Err(ExportError::NoQualifyingCorrections {
                fetched,
                min_score: config.min_quality_score,
            });
        }

        info!(
            fetched,
            exported = export.stats.total_examples,
            average_quality = export.stats.average_quality_score,
            "Training export built"
        );
        Ok(export)
    }
}

/// Render already-fetched contributions. Filters from `config` still apply;
/// moderation status does not.
pub fn build_export(
    contributions: &[TrainingContribution],
    config: &ExportConfig,
) -> ExportResult<TrainingExport> {
    let filter = ContributionFilter {
        trade_types: config.trade_types.clone(),
        correction_types: config.correction_types.clone(),
        limit: None,
    };

    let kept: Vec<(&TrainingContribution, QualityScore)> = contributions
        .iter()
        .filter(|c| filter.matches(c))
        .map(|c| (c, score_correction(c)))
        .filter(|(c, q)| {
            let keep = q.score >= config.min_quality_score;
            if !keep {
                debug!(contribution_id = %c.id, score = q.score, "Correction below export threshold");
            }
            keep
        })
        .take(config.max_examples)
        .collect();

    let mut lines = Vec::with_capacity(kept.len());
    let mut stats = ExportStats::default();
    let mut score_sum = 0.0;

    for (contribution, quality) in &kept {
        let mut record = json!({ "messages": messages_for(contribution) });
        if config.include_metadata {
            record["metadata"] = json!({
                "id": contribution.id,
                "trade_type": contribution.trade_type,
                "correction_type": contribution.correction_type,
                "quality_score": quality.score,
            });
        }
        lines.push(serde_json::to_string(&record)?);

        stats.total_examples += 1;
        *stats
            .by_trade
            .entry(contribution.trade_type.to_lowercase())
            .or_default() += 1;
        *stats
            .by_correction_type
            .entry(contribution.correction_type.as_str().to_string())
            .or_default() += 1;
        score_sum += quality.score;
    }

    if stats.total_examples > 0 {
        stats.average_quality_score = score_sum / stats.total_examples as f64;
    }

    let mut jsonl = lines.join("\n");
    if !jsonl.is_empty() {
        jsonl.push('\n');
    }
    Ok(TrainingExport { jsonl, stats })
}

fn system_prompt(trade_type: &str, correction_type: CorrectionType) -> String {
    let focus = match correction_type {
        CorrectionType::Description => {
            "Rewrite abbreviated or vague line item descriptions into clear scope language."
        }
        CorrectionType::Category => "Assign each line item to the correct work category.",
        CorrectionType::Price => {
            "Read the line item's total price exactly as written, without taxes or markups the bid does not state."
        }
        CorrectionType::Quantity => "Read the quantity the bid states for the line item.",
        CorrectionType::Unit => "Read the unit of measure the bid states (SF, LF, EA, LS, ...).",
        CorrectionType::ExclusionFlag => {
            "Decide whether the line item is included in the bid or excluded from it. $0, TBD, NIC and \"by others\" mean excluded."
        }
    };
    format!(
        "You extract line items from {} subcontractor bids. {}",
        trade_type, focus
    )
}

fn user_prompt(contribution: &TrainingContribution) -> String {
    // An exclusion flag alone says nothing about which item it belongs to
    let field = match contribution.correction_type {
        CorrectionType::ExclusionFlag => None,
        kind => contribution
            .original_value
            .get(kind.value_key())
            .filter(|v| !v.is_null()),
    };
    let original = display_value(field.unwrap_or(&contribution.original_value));
    match contribution
        .raw_text_snippet
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(snippet) => format!("Bid text: {}\n\nExtracted value: {}", snippet, original),
        None => format!("Extracted value: {}", original),
    }
}

fn assistant_reply(contribution: &TrainingContribution) -> String {
    let key = contribution.correction_type.value_key();
    let field = contribution.corrected_value.get(key).filter(|v| !v.is_null());

    let rendered = match (contribution.correction_type, field) {
        (CorrectionType::ExclusionFlag, Some(Value::Bool(excluded))) => Some(if *excluded {
            "This item is excluded from the bid.".to_string()
        } else {
            "This item is included in the bid.".to_string()
        }),
        (kind, Some(value)) => {
            let label = match kind {
                CorrectionType::Description => "Description",
                CorrectionType::Category => "Category",
                CorrectionType::Price => "Total price",
                CorrectionType::Quantity => "Quantity",
                CorrectionType::Unit => "Unit",
                CorrectionType::ExclusionFlag => "Excluded",
            };
            Some(format!("{}: {}", label, display_value(value)))
        }
        (_, None) => None,
    };

    rendered.unwrap_or_else(|| display_value(&contribution.corrected_value))
}

fn messages_for(contribution: &TrainingContribution) -> Value {
    json!([
        {
            "role": "system",
            "content": system_prompt(&contribution.trade_type, contribution.correction_type),
        },
        { "role": "user", "content": user_prompt(contribution) },
        { "role": "assistant", "content": assistant_reply(contribution) },
    ])
}

/// Check every non-empty line of a chat-format JSONL dataset.
pub fn validate_jsonl(text: &str) -> JsonlValidation {
    let mut errors = Vec::new();
    let mut total_examples = 0;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        total_examples += 1;

        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!("Line {}: invalid JSON ({})", line_no, e));
                continue;
            }
        };

        let Some(messages) = record.get("messages").and_then(Value::as_array) else {
            errors.push(format!("Line {}: missing \"messages\" array", line_no));
            continue;
        };

        let role_present = |wanted: &[&str]| {
            messages.iter().any(|m| {
                m.get("role")
                    .and_then(Value::as_str)
                    .is_some_and(|r| wanted.contains(&r))
            })
        };
        if !role_present(&["system", "user"]) {
            errors.push(format!("Line {}: missing system or user message", line_no));
        }
        if !role_present(&["assistant"]) {
            errors.push(format!("Line {}: missing assistant message", line_no));
        }

        for (position, message) in messages.iter().enumerate() {
            let content_ok = message
                .get("content")
                .and_then(Value::as_str)
                .is_some_and(|c| !c.trim().is_empty());
            if !content_ok {
                errors.push(format!(
                    "Line {}: message {} has empty or non-string content",
                    line_no,
                    position + 1
                ));
            }
        }
    }

    if total_examples == 0 {
        errors.push("No examples found".to_string());
    }

    JsonlValidation {
        valid: errors.is_empty(),
        errors,
        total_examples,
    }
}
