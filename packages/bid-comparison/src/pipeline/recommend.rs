//! Recommendation stage.
//!
//! Prices are always computed here: base bid, exclusion value and the
//! estimated true cost of every contractor. The model contributes the
//! narrative and may pick the winner, but a pick of an unknown contractor,
//! or of the lowest base bidder when its true cost is not the lowest, is
//! replaced by the deterministic true-cost ranking.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ComparisonError, Result};
use crate::leveling::ContractorBid;
use crate::pipeline::decode::decode_response;
use crate::pipeline::prompts::{format_recommendation_messages, PromptAugmentation};
use crate::traits::completion::{Completion, CompletionOptions};
use crate::types::comparison::{
    ConfidenceLevel, ContractorSummary, CostEstimate, KeyFactor, PriceAnalysis, Recommendation,
    RecommendationSource, RecommendationWarning, WarningKind,
};
use crate::types::config::PipelineConfig;
use crate::types::document::REVIEW_THRESHOLD;
use crate::types::scope::{EntryStatus, NormalizedScopeItem};

/// Per-contractor rollup over extracted items and scope gaps.
pub fn summarize_contractors(
    bids: &[ContractorBid],
    scope_items: &[NormalizedScopeItem],
) -> Vec<ContractorSummary> {
    bids.iter()
        .map(|bid| {
            let (exclusions, included): (Vec<_>, Vec<_>) =
                bid.items.iter().partition(|i| i.is_exclusion);
            let scope_gaps_count = scope_items
                .iter()
                .filter(|g| g.is_scope_gap)
                .filter(|g| {
                    g.contractors
                        .get(&bid.contractor_id)
                        .map_or(true, |e| e.status != EntryStatus::Included)
                })
                .count();
            let average_confidence = if bid.items.is_empty() {
                0.0
            } else {
                bid.items.iter().map(|i| i.confidence_score).sum::<f64>() / bid.items.len() as f64
            };

            ContractorSummary {
                contractor_id: bid.contractor_id,
                contractor_name: bid.contractor_name.clone(),
                base_bid: included.iter().map(|i| i.total_price).sum(),
                exclusions_value: exclusions.iter().map(|i| i.total_price).sum(),
                exclusions_count: exclusions.len(),
                scope_gaps_count,
                average_confidence,
                item_count: bid.items.len(),
            }
        })
        .collect()
}

/// A scope gap as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeGapSummary {
    pub description: String,
    pub missing_contractors: Vec<Uuid>,
    pub missing_contractor_names: Vec<String>,
    /// Mean price among contractors that include the item
    pub estimated_value: Option<f64>,
}

pub fn scope_gap_summaries(
    summaries: &[ContractorSummary],
    scope_items: &[NormalizedScopeItem],
) -> Vec<ScopeGapSummary> {
    scope_items
        .iter()
        .filter(|g| g.is_scope_gap)
        .map(|g| {
            let missing = g.missing_contractors();
            let names = missing
                .iter()
                .filter_map(|id| summaries.iter().find(|s| s.contractor_id == *id))
                .map(|s| s.contractor_name.clone())
                .collect();
            ScopeGapSummary {
                description: g.normalized_description.clone(),
                missing_contractors: missing,
                missing_contractor_names: names,
                estimated_value: g.estimated_value(),
            }
        })
        .collect()
}

/// Lowest base bid and per-contractor true cost.
///
/// Adds are the contractor's priced exclusions plus, for each gap it does
/// not include, the gap's estimated value. Gaps where the contractor's own
/// exclusion already carries a price are not counted twice.
pub fn compute_price_analysis(
    summaries: &[ContractorSummary],
    scope_items: &[NormalizedScopeItem],
) -> PriceAnalysis {
    let estimates: Vec<CostEstimate> = summaries
        .iter()
        .map(|s| {
            let gap_adds: f64 = scope_items
                .iter()
                .filter(|g| g.is_scope_gap)
                .filter_map(|g| {
                    let entry = g.contractors.get(&s.contractor_id);
                    let priced_exclusion = entry.is_some_and(|e| {
                        e.status == EntryStatus::Excluded
                            && e.item_id.is_some()
                            && e.price.is_some_and(|p| p > 0.0)
                    });
                    let included = entry.is_some_and(|e| e.status == EntryStatus::Included);
                    if included || priced_exclusion {
                        None
                    } else {
                        g.estimated_value()
                    }
                })
                .sum();
            let estimated_adds = s.exclusions_value + gap_adds;
            CostEstimate {
                contractor_id: s.contractor_id,
                base_bid: s.base_bid,
                estimated_adds,
                estimated_true_cost: s.base_bid + estimated_adds,
            }
        })
        .collect();

    let lowest = summaries
        .iter()
        .min_by(|a, b| a.base_bid.partial_cmp(&b.base_bid).unwrap_or(Ordering::Equal));

    PriceAnalysis {
        lowest_base_bid: lowest.map(|s| s.base_bid).unwrap_or(0.0),
        lowest_base_bid_contractor: lowest.map(|s| s.contractor_id),
        estimates,
    }
}

fn true_cost(analysis: &PriceAnalysis, contractor_id: Uuid) -> f64 {
    analysis
        .estimate_for(contractor_id)
        .map(|e| e.estimated_true_cost)
        .unwrap_or(f64::INFINITY)
}

/// Contractors ordered best first: true cost, then fewer exclusions, then
/// higher extraction confidence.
pub fn rank_contractors<'a>(
    summaries: &'a [ContractorSummary],
    analysis: &PriceAnalysis,
) -> Vec<&'a ContractorSummary> {
    let mut ranked: Vec<&ContractorSummary> = summaries.iter().collect();
    ranked.sort_by(|a, b| {
        true_cost(analysis, a.contractor_id)
            .partial_cmp(&true_cost(analysis, b.contractor_id))
            .unwrap_or(Ordering::Equal)
            .then(a.exclusions_count.cmp(&b.exclusions_count))
            .then(
                b.average_confidence
                    .partial_cmp(&a.average_confidence)
                    .unwrap_or(Ordering::Equal),
            )
    });
    ranked
}

fn money(value: f64) -> String {
    let whole = value.round() as i64;
    let digits = whole.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if whole < 0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

/// Warnings derived from the numbers alone.
pub fn deterministic_warnings(
    summaries: &[ContractorSummary],
    analysis: &PriceAnalysis,
    recommended: Option<Uuid>,
) -> Vec<RecommendationWarning> {
    let mut warnings = Vec::new();

    for s in summaries {
        if s.exclusions_count > 0 {
            warnings.push(RecommendationWarning {
                contractor_id: Some(s.contractor_id),
                kind: WarningKind::ExclusionRisk,
                message: format!(
                    "{} excludes {} item(s) worth {}",
                    s.contractor_name,
                    s.exclusions_count,
                    money(s.exclusions_value)
                ),
            });
        }
    }

    if let Some(lowest) = analysis.lowest_base_bid_contractor {
        if recommended.is_some_and(|r| r != lowest) {
            if let Some(s) = summaries.iter().find(|s| s.contractor_id == lowest) {
                warnings.push(RecommendationWarning {
                    contractor_id: Some(lowest),
                    kind: WarningKind::PriceConcern,
                    message: format!(
                        "{} has the lowest base bid ({}) but an estimated true cost of {}",
                        s.contractor_name,
                        money(s.base_bid),
                        money(true_cost(analysis, lowest))
                    ),
                });
            }
        }
    }

    for s in summaries.iter().filter(|s| s.scope_gaps_count > 0) {
        warnings.push(RecommendationWarning {
            contractor_id: Some(s.contractor_id),
            kind: WarningKind::ScopeGap,
            message: format!(
                "{} does not include {} scope item(s) priced elsewhere",
                s.contractor_name, s.scope_gaps_count
            ),
        });
    }

    for s in summaries
        .iter()
        .filter(|s| s.item_count > 0 && s.average_confidence < REVIEW_THRESHOLD)
    {
        warnings.push(RecommendationWarning {
            contractor_id: Some(s.contractor_id),
            kind: WarningKind::Other,
            message: format!(
                "Extraction confidence for {} averages {:.0}%; review flagged items",
                s.contractor_name,
                s.average_confidence * 100.0
            ),
        });
    }

    warnings
}

/// Recommendation from the true-cost ranking alone.
pub fn deterministic_recommendation(
    summaries: &[ContractorSummary],
    analysis: PriceAnalysis,
) -> Recommendation {
    let ranked = rank_contractors(summaries, &analysis);

    let Some(best) = ranked.first().copied() else {
        return Recommendation {
            recommended_contractor_id: None,
            recommended_contractor_name: None,
            confidence: ConfidenceLevel::Low,
            reasoning: "No processed bids to compare.".to_string(),
            key_factors: vec![],
            warnings: vec![],
            price_analysis: analysis,
            source: RecommendationSource::Deterministic,
        };
    };

    let best_cost = true_cost(&analysis, best.contractor_id);
    let margin = ranked
        .get(1)
        .map(|next| (true_cost(&analysis, next.contractor_id) - best_cost) / best_cost.max(1.0));

    let confidence = match margin {
        None => ConfidenceLevel::Low,
        Some(_) if best.average_confidence < REVIEW_THRESHOLD => ConfidenceLevel::Low,
        Some(m) if m < 0.02 => ConfidenceLevel::Low,
        Some(m) if m >= 0.05 && best.exclusions_count == 0 && best.average_confidence >= 0.8 => {
            ConfidenceLevel::High
        }
        Some(_) => ConfidenceLevel::Medium,
    };

    let mut key_factors = vec![
        KeyFactor {
            name: "Estimated true cost".to_string(),
            detail: format!(
                "{} including {} of excluded or missing scope",
                money(best_cost),
                money(best_cost - best.base_bid)
            ),
        },
        KeyFactor {
            name: "Scope completeness".to_string(),
            detail: format!(
                "{} exclusion(s), {} scope gap(s)",
                best.exclusions_count, best.scope_gaps_count
            ),
        },
        KeyFactor {
            name: "Extraction confidence".to_string(),
            detail: format!("{:.0}% average", best.average_confidence * 100.0),
        },
    ];

    let lowest_base = analysis.lowest_base_bid_contractor;
    let mut reasoning = format!(
        "{} has the lowest estimated true cost at {}.",
        best.contractor_name,
        money(best_cost)
    );
    if let Some(lowest) = lowest_base.filter(|l| *l != best.contractor_id) {
        if let Some(s) = summaries.iter().find(|s| s.contractor_id == lowest) {
            reasoning.push_str(&format!(
                " {} bid lower at {} but carries {} in exclusions and gaps.",
                s.contractor_name,
                money(s.base_bid),
                money(true_cost(&analysis, lowest) - s.base_bid)
            ));
            key_factors.push(KeyFactor {
                name: "Lowest base bid not selected".to_string(),
                detail: format!("{} rises to {}", s.contractor_name, money(true_cost(&analysis, lowest))),
            });
        }
    }

    Recommendation {
        recommended_contractor_id: Some(best.contractor_id),
        recommended_contractor_name: Some(best.contractor_name.clone()),
        confidence,
        reasoning,
        key_factors,
        warnings: deterministic_warnings(summaries, &analysis, Some(best.contractor_id)),
        price_analysis: analysis,
        source: RecommendationSource::Deterministic,
    }
}

// ============================================================================
// Model exchange
// ============================================================================

/// Recommendation request payload.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationInput<'a> {
    pub contractors: &'a [ContractorSummary],
    pub scope_gaps: Vec<ScopeGapSummary>,
    pub price_analysis: &'a PriceAnalysis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AIKeyFactor {
    Named {
        name: String,
        #[serde(default, alias = "description")]
        detail: String,
    },
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AIWarning {
    #[serde(default)]
    pub contractor_id: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AIRecommendationResponse {
    #[serde(default)]
    pub recommended_contractor_id: Option<String>,

    #[serde(default)]
    pub confidence: Option<String>,

    #[serde(default)]
    pub reasoning: Option<String>,

    #[serde(default)]
    pub key_factors: Vec<AIKeyFactor>,

    #[serde(default)]
    pub warnings: Vec<AIWarning>,
}

fn parse_confidence(raw: Option<&str>) -> Option<ConfidenceLevel> {
    match raw?.trim().to_lowercase().as_str() {
        "high" => Some(ConfidenceLevel::High),
        "medium" => Some(ConfidenceLevel::Medium),
        "low" => Some(ConfidenceLevel::Low),
        _ => None,
    }
}

fn parse_warning_kind(raw: Option<&str>) -> WarningKind {
    match raw.unwrap_or_default().trim().to_lowercase().as_str() {
        "exclusion_risk" => WarningKind::ExclusionRisk,
        "scope_gap" => WarningKind::ScopeGap,
        "price_concern" => WarningKind::PriceConcern,
        _ => WarningKind::Other,
    }
}

/// Merge the model's answer with the locally computed analysis.
pub fn build_recommendation(
    summaries: &[ContractorSummary],
    analysis: PriceAnalysis,
    model: Option<AIRecommendationResponse>,
) -> Recommendation {
    let fallback = deterministic_recommendation(summaries, analysis);
    let Some(model) = model else {
        return fallback;
    };

    let known: HashSet<Uuid> = summaries.iter().map(|s| s.contractor_id).collect();
    let parse_known = |raw: Option<&str>| {
        raw.and_then(|s| Uuid::parse_str(s.trim()).ok())
            .filter(|id| known.contains(id))
    };

    let Some(pick) = parse_known(model.recommended_contractor_id.as_deref()) else {
        warn!(
            pick = ?model.recommended_contractor_id,
            "Model recommended an unknown contractor, using true-cost ranking"
        );
        return fallback;
    };

    let analysis = fallback.price_analysis.clone();
    let best_cost = analysis
        .estimates
        .iter()
        .map(|e| e.estimated_true_cost)
        .fold(f64::INFINITY, f64::min);
    if analysis.lowest_base_bid_contractor == Some(pick) && true_cost(&analysis, pick) > best_cost {
        warn!(
            %pick,
            "Model picked the lowest base bid despite a higher true cost, using true-cost ranking"
        );
        return fallback;
    }

    let name = summaries
        .iter()
        .find(|s| s.contractor_id == pick)
        .map(|s| s.contractor_name.clone());

    let key_factors: Vec<KeyFactor> = model
        .key_factors
        .into_iter()
        .map(|f| match f {
            AIKeyFactor::Named { name, detail } => KeyFactor { name, detail },
            AIKeyFactor::Text(text) => KeyFactor {
                name: text,
                detail: String::new(),
            },
        })
        .filter(|f| !f.name.trim().is_empty())
        .collect();

    let mut warnings: Vec<RecommendationWarning> = model
        .warnings
        .into_iter()
        .filter(|w| !w.message.trim().is_empty())
        .map(|w| RecommendationWarning {
            contractor_id: parse_known(w.contractor_id.as_deref()),
            kind: parse_warning_kind(w.kind.as_deref()),
            message: w.message,
        })
        .collect();
    for warning in deterministic_warnings(summaries, &analysis, Some(pick)) {
        let covered = warnings
            .iter()
            .any(|w| w.kind == warning.kind && w.contractor_id == warning.contractor_id);
        if !covered {
            warnings.push(warning);
        }
    }

    Recommendation {
        recommended_contractor_id: Some(pick),
        recommended_contractor_name: name,
        confidence: parse_confidence(model.confidence.as_deref()).unwrap_or(fallback.confidence),
        reasoning: model
            .reasoning
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(fallback.reasoning),
        key_factors: if key_factors.is_empty() {
            fallback.key_factors
        } else {
            key_factors
        },
        warnings,
        price_analysis: analysis,
        source: RecommendationSource::Model,
    }
}

/// Result of the recommendation stage.
#[derive(Debug, Clone)]
pub struct RecommendationOutcome {
    pub summaries: Vec<ContractorSummary>,
    pub recommendation: Recommendation,
    /// The model response was unusable and the ranking decided alone
    pub used_fallback: bool,
    pub duration_ms: u64,
}

/// Run the recommendation stage.
pub async fn recommend<C: Completion + ?Sized>(
    completion: &C,
    config: &PipelineConfig,
    trade_type: &str,
    bids: &[ContractorBid],
    scope_items: &[NormalizedScopeItem],
    augmentation: &PromptAugmentation,
) -> Result<RecommendationOutcome> {
    let start = Instant::now();
    let summaries = summarize_contractors(bids, scope_items);
    let analysis = compute_price_analysis(&summaries, scope_items);

    if summaries.is_empty() {
        return Ok(RecommendationOutcome {
            recommendation: deterministic_recommendation(&summaries, analysis),
            summaries,
            used_fallback: true,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }

    let input = RecommendationInput {
        contractors: &summaries,
        scope_gaps: scope_gap_summaries(&summaries, scope_items),
        price_analysis: &analysis,
    };
    let input = serde_json::to_string_pretty(&input).map_err(|e| ComparisonError::Decode {
        stage: "recommendation",
        reason: format!("failed to encode input: {}", e),
    })?;
    let messages = format_recommendation_messages(trade_type, &input, augmentation);
    let options = CompletionOptions::json(config.temperature, config.analysis_max_tokens);

    let text = completion.complete(&messages, &options).await?;

    let model = match decode_response::<AIRecommendationResponse>("recommendation", &text) {
        Ok(response) => Some(response),
        Err(e) => {
            warn!(error = %e, "Recommendation response unusable, using true-cost ranking");
            None
        }
    };
    let used_fallback = model.is_none();
    let recommendation = build_recommendation(&summaries, analysis, model);

    info!(
        recommended = ?recommendation.recommended_contractor_name,
        confidence = ?recommendation.confidence,
        source = ?recommendation.source,
        "Recommendation complete"
    );

    Ok(RecommendationOutcome {
        summaries,
        recommendation,
        used_fallback,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
