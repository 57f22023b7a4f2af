//! Heuristic quality scoring of user corrections.
//!
//! A score in [0, 1] estimates how useful a correction is as a fine-tuning
//! example. Four factors are weighted: clarity 0.30, completeness 0.25,
//! consistency 0.25, specificity 0.20.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::training::{CorrectionType, TrainingContribution};

/// Scores at or above this are high quality.
pub const HIGH_QUALITY_THRESHOLD: f64 = 0.8;

const CLARITY_WEIGHT: f64 = 0.30;
const COMPLETENESS_WEIGHT: f64 = 0.25;
const CONSISTENCY_WEIGHT: f64 = 0.25;
const SPECIFICITY_WEIGHT: f64 = 0.20;

const GENERIC_TERMS: &[&str] = &["item", "thing", "stuff", "misc", "other"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityFactors {
    pub clarity: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub specificity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: f64,
    pub factors: QualityFactors,
    pub is_high_quality: bool,
    /// Why points were lost (or gained)
    pub notes: Vec<String>,
}

/// Case-insensitive positional character agreement over the longer length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let longer = a.len().max(b.len());
    if longer == 0 {
        return 1.0;
    }
    let same = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    same as f64 / longer as f64
}

fn has_generic_term(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| GENERIC_TERMS.contains(&w))
}

fn clarity(c: &TrainingContribution, notes: &mut Vec<String>) -> f64 {
    if c.original_value.to_string() == c.corrected_value.to_string() {
        notes.push("Original and corrected values are identical".to_string());
        return 0.0;
    }

    let mut score: f64 = 1.0;
    match c.correction_type {
        CorrectionType::Description => {
            if let (Some(original), Some(corrected)) =
                (c.original_str("description"), c.corrected_str("description"))
            {
                if similarity(original, corrected) > 0.95 {
                    score -= 0.3;
                    notes.push("Corrected description is nearly identical".to_string());
                }
            }
            if let Some(corrected) = c.corrected_str("description") {
                if corrected.chars().count() < 5 {
                    score -= 0.4;
                    notes.push("Corrected description is very short".to_string());
                }
            }
        }
        CorrectionType::Price => {
            if let (Some(original), Some(corrected)) =
                (c.original_f64("total_price"), c.corrected_f64("total_price"))
            {
                if original != 0.0 && ((corrected - original) / original).abs() < 0.01 {
                    score -= 0.3;
                    notes.push("Price change is under 1%".to_string());
                }
            }
        }
        _ => {}
    }
    score.clamp(0.0, 1.0)
}

fn completeness(c: &TrainingContribution, notes: &mut Vec<String>) -> f64 {
    let mut score: f64 = 1.0;

    if c
        .raw_text_snippet
        .as_deref()
        .map_or(true, |s| s.trim().is_empty())
    {
        score -= 0.2;
        notes.push("No raw text snippet attached".to_string());
    }

    let (key, penalty, present) = match c.correction_type {
        CorrectionType::Description | CorrectionType::Category => {
            let key = c.correction_type.value_key();
            (key, 0.3, (c.original_str(key).is_some(), c.corrected_str(key).is_some()))
        }
        CorrectionType::Price => (
            "total_price",
            0.2,
            (
                c.original_f64("total_price").is_some(),
                c.corrected_f64("total_price").is_some(),
            ),
        ),
        _ => return score.clamp(0.0, 1.0),
    };
    if !present.0 {
        score -= penalty;
        notes.push(format!("Missing original {}", key));
    }
    if !present.1 {
        score -= penalty;
        notes.push(format!("Missing corrected {}", key));
    }
    score.clamp(0.0, 1.0)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn consistency(c: &TrainingContribution, notes: &mut Vec<String>) -> f64 {
    let mut score: f64 = 1.0;
    let (Some(original), Some(corrected)) =
        (c.original_value.as_object(), c.corrected_value.as_object())
    else {
        notes.push("Values are not objects".to_string());
        return (score - 0.4).clamp(0.0, 1.0);
    };

    let shared: Vec<&String> = original.keys().filter(|k| corrected.contains_key(*k)).collect();
    if shared.is_empty() {
        score -= 0.4;
        notes.push("Original and corrected share no fields".to_string());
    }

    for key in shared {
        let (a, b) = (&original[key], &corrected[key]);
        if !a.is_null() && !b.is_null() && value_kind(a) != value_kind(b) {
            score -= 0.2;
            notes.push(format!("Field '{}' changed type", key));
        }
    }
    score.clamp(0.0, 1.0)
}

fn specificity(c: &TrainingContribution, notes: &mut Vec<String>) -> f64 {
    let mut score: f64 = 1.0;

    if let Some(confidence) = c.original_confidence {
        if confidence < 0.6 {
            score += 0.1;
            notes.push("Corrects an uncertain extraction".to_string());
        } else if confidence > 0.9 {
            score -= 0.1;
            notes.push("Corrects a high-confidence extraction".to_string());
        }
    }

    if c.correction_type == CorrectionType::Description {
        if let Some(corrected) = c.corrected_str("description") {
            if has_generic_term(corrected) && corrected.chars().count() < 20 {
                score -= 0.2;
                notes.push("Corrected description is generic".to_string());
            }
        }
    }
    score.clamp(0.0, 1.0)
}

/// Score one correction.
pub fn score_correction(contribution: &TrainingContribution) -> QualityScore {
    let mut notes = Vec::new();
    let factors = QualityFactors {
        clarity: clarity(contribution, &mut notes),
        completeness: completeness(contribution, &mut notes),
        consistency: consistency(contribution, &mut notes),
        specificity: specificity(contribution, &mut notes),
    };

    let score = (factors.clarity * CLARITY_WEIGHT
        + factors.completeness * COMPLETENESS_WEIGHT
        + factors.consistency * CONSISTENCY_WEIGHT
        + factors.specificity * SPECIFICITY_WEIGHT)
        .clamp(0.0, 1.0);

    QualityScore {
        score,
        factors,
        is_high_quality: score >= HIGH_QUALITY_THRESHOLD,
        notes,
    }
}

/// Score every contribution, keyed by id.
pub fn score_batch(contributions: &[TrainingContribution]) -> HashMap<Uuid, QualityScore> {
    contributions
        .iter()
        .map(|c| (c.id, score_correction(c)))
        .collect()
}

/// Contributions whose score is high quality, in input order.
pub fn filter_high_quality(contributions: &[TrainingContribution]) -> Vec<&TrainingContribution> {
    contributions
        .iter()
        .filter(|c| score_correction(c).is_high_quality)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn description(from: &str, to: &str) -> TrainingContribution {
        TrainingContribution::new(
            "drywall",
            CorrectionType::Description,
            json!({"description": from}),
            json!({"description": to}),
        )
    }

    #[test]
    fn test_good_description_correction() {
        let c = description("GWB 5/8", "5/8 in. type X gypsum wall board")
            .with_snippet("GWB 5/8 TYPE X 12,000 SF")
            .with_original_confidence(0.5);
        let q = score_correction(&c);

        assert_eq!(q.factors.clarity, 1.0);
        assert_eq!(q.factors.completeness, 1.0);
        assert_eq!(q.factors.consistency, 1.0);
        assert_eq!(q.factors.specificity, 1.0);
        assert!(q.is_high_quality);
        assert!((q.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_description_penalties() {
        let c = description("Misc", "Misc item");
        let q = score_correction(&c);

        // similarity 4/9; corrected text long enough
        assert_eq!(q.factors.clarity, 1.0);
        // no snippet
        assert!((q.factors.completeness - 0.8).abs() < 1e-9);
        // generic and short
        assert!((q.factors.specificity - 0.8).abs() < 1e-9);

        let short = score_correction(&description("Drywall", "Dw"));
        assert!((short.factors.clarity - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_price_penalties() {
        let c = TrainingContribution::new(
            "drywall",
            CorrectionType::Price,
            json!({"total_price": 1000.0}),
            json!({"total_price": "1005"}),
        );
        let q = score_correction(&c);

        // corrected price is a string: missing as a number, and a type change
        assert!((q.factors.completeness - 0.6).abs() < 1e-9);
        assert!((q.factors.consistency - 0.8).abs() < 1e-9);

        let small = TrainingContribution::new(
            "drywall",
            CorrectionType::Price,
            json!({"total_price": 1000.0}),
            json!({"total_price": 1005.0}),
        );
        assert!((score_correction(&small).factors.clarity - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_keys() {
        let c = TrainingContribution::new(
            "hvac",
            CorrectionType::Unit,
            json!({"unit": "EA"}),
            json!({"uom": "LF"}),
        );
        assert!((score_correction(&c).factors.consistency - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_specificity_confidence_adjustments() {
        let confident = description("a b", "Level 4 finish").with_original_confidence(0.95);
        assert!((score_correction(&confident).factors.specificity - 0.9).abs() < 1e-9);

        // The uncertain-extraction bonus cannot lift the factor past 1.0
        let uncertain = description("a b", "Level 4 finish").with_original_confidence(0.3);
        let score = score_correction(&uncertain);
        assert_eq!(score.factors.specificity, 1.0);
        assert!(score.notes.iter().any(|n| n == "Corrects an uncertain extraction"));
    }

    #[test]
    fn test_batch_and_filter() {
        let good = description("GWB", "Gypsum wall board, 5/8 type X").with_snippet("GWB 5/8");
        let bad = description("Same", "Same");
        let batch = vec![good.clone(), bad.clone()];

        let scores = score_batch(&batch);
        assert_eq!(scores.len(), 2);
        assert!(scores[&good.id].is_high_quality);
        assert!(!scores[&bad.id].is_high_quality);

        let kept = filter_high_quality(&batch);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, good.id);
    }

    proptest! {
        #[test]
        fn identical_values_never_high_quality(text in ".{0,40}", price in proptest::num::f64::NORMAL) {
            let value = json!({"description": text, "total_price": price});
            for kind in [CorrectionType::Description, CorrectionType::Price, CorrectionType::Category] {
                let c = TrainingContribution::new("drywall", kind, value.clone(), value.clone())
                    .with_snippet("snippet")
                    .with_original_confidence(0.1);
                let q = score_correction(&c);
                prop_assert_eq!(q.factors.clarity, 0.0);
                prop_assert!(!q.is_high_quality);
            }
        }

        #[test]
        fn score_stays_in_unit_range(from in ".{0,30}", to in ".{0,30}", confidence in 0.0f64..1.0) {
            let c = description(&from, &to).with_original_confidence(confidence);
            let q = score_correction(&c);
            prop_assert!((0.0..=1.0).contains(&q.score));
        }
    }
}
