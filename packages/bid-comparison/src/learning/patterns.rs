//! Learned patterns: distilled from corrections, rendered into prompts.

use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::traits::store::PatternStore;
use crate::types::learning::{LearnedPattern, PatternType};
use crate::types::training::{CorrectionType, ModerationStatus, TrainingContribution};

/// Renders active learned patterns for a trade.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    max_patterns: usize,
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::new(20)
    }
}

impl PatternLibrary {
    pub fn new(max_patterns: usize) -> Self {
        Self { max_patterns }
    }

    /// Prompt block for `trade_type`; empty when there are no patterns or
    /// the fetch fails.
    pub async fn render<S: PatternStore + ?Sized>(&self, store: &S, trade_type: &str) -> String {
        if self.max_patterns == 0 {
            return String::new();
        }

        match store.list_active_patterns(trade_type, self.max_patterns).await {
            Ok(patterns) => render_patterns(&patterns),
            Err(e) => {
                warn!(error = %e, trade_type, "Failed to load learned patterns");
                String::new()
            }
        }
    }
}

/// Group patterns by type and render them as rule lists.
pub fn render_patterns(patterns: &[LearnedPattern]) -> String {
    let mut terminology = Vec::new();
    let mut categories = Vec::new();
    let mut extraction = Vec::new();

    for p in patterns.iter().filter(|p| p.is_active) {
        match p.pattern_type {
            PatternType::Terminology => {
                terminology.push(format!("- \"{}\" means \"{}\"", p.from_value, p.to_value))
            }
            PatternType::Category => categories.push(format!(
                "- \"{}\" belongs in category \"{}\"",
                p.from_value, p.to_value
            )),
            PatternType::Extraction => {
                extraction.push(format!("- \"{}\": {}", p.from_value, p.to_value))
            }
        }
    }

    let mut sections = Vec::new();
    for (title, lines) in [
        ("Terminology", terminology),
        ("Category assignments", categories),
        ("Extraction rules", extraction),
    ] {
        if !lines.is_empty() {
            sections.push(format!("{}:\n{}", title, lines.join("\n")));
        }
    }

    if sections.is_empty() {
        return String::new();
    }
    format!("Learned patterns from reviewed bids:\n\n{}", sections.join("\n\n"))
}

/// The pattern a correction teaches, if any.
fn pattern_for(contribution: &TrainingContribution) -> Option<(PatternType, String, String)> {
    let key = contribution.correction_type.value_key();
    let subject = contribution
        .original_str("description")
        .or(contribution.raw_text_snippet.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mapping = match contribution.correction_type {
        CorrectionType::Description => (
            PatternType::Terminology,
            contribution.original_str(key)?.trim().to_string(),
            contribution.corrected_str(key)?.trim().to_string(),
        ),
        CorrectionType::Category => (
            PatternType::Category,
            subject.or(contribution.original_str(key))?.to_string(),
            contribution.corrected_str(key)?.trim().to_string(),
        ),
        CorrectionType::ExclusionFlag => {
            let excluded = contribution.corrected_value.get(key)?.as_bool()?;
            (
                PatternType::Extraction,
                subject?.to_string(),
                if excluded {
                    "mark as exclusion".to_string()
                } else {
                    "mark as included scope".to_string()
                },
            )
        }
        _ => return None,
    };

    let (_, from, to) = &mapping;
    if from.is_empty() || to.is_empty() || from.eq_ignore_ascii_case(to) {
        return None;
    }
    Some(mapping)
}

/// Distil approved corrections into learned patterns.
///
/// Each mapping already known for the trade has its occurrence count
/// bumped; new mappings are inserted with a count of 1. Returns the
/// patterns written.
pub async fn learn_patterns<S: PatternStore + ?Sized>(
    store: &S,
    contributions: &[TrainingContribution],
) -> StoreResult<Vec<LearnedPattern>> {
    let mut known: HashMap<String, HashMap<(String, PatternType, String, String), LearnedPattern>> =
        HashMap::new();
    let mut written: Vec<LearnedPattern> = Vec::new();

    for contribution in contributions
        .iter()
        .filter(|c| c.moderation_status == ModerationStatus::Approved)
    {
        let Some((pattern_type, from, to)) = pattern_for(contribution) else {
            continue;
        };

        let trade_key = contribution.trade_type.to_lowercase();
        if !known.contains_key(&trade_key) {
            let existing = store.list_patterns(&contribution.trade_type).await?;
            known.insert(
                trade_key.clone(),
                existing.into_iter().map(|p| (p.key(), p)).collect(),
            );
        }
        let Some(patterns) = known.get_mut(&trade_key) else {
            continue;
        };

        let candidate = LearnedPattern::new(&contribution.trade_type, pattern_type, from, to);
        let pattern = patterns
            .entry(candidate.key())
            .and_modify(|p| {
                p.occurrence_count += 1;
                p.updated_at = Utc::now();
            })
            .or_insert(candidate);

        store.save_pattern(pattern).await?;

        match written.iter_mut().find(|p| p.id == pattern.id) {
            Some(existing) => *existing = pattern.clone(),
            None => written.push(pattern.clone()),
        }
    }

    info!(patterns = written.len(), "Learned patterns updated");
    Ok(written)
}
