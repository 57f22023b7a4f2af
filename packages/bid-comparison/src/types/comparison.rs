//! Comparison results and recommendations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a comparison request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    #[default]
    Uploading,
    Processing,
    Complete,
    Error,
}

/// Per-contractor rollup used by recommendation and the summary view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorSummary {
    pub contractor_id: Uuid,
    pub contractor_name: String,

    /// Sum of non-exclusion item totals
    pub base_bid: f64,

    pub exclusions_value: f64,
    pub exclusions_count: usize,
    pub scope_gaps_count: usize,
    pub average_confidence: f64,
    pub item_count: usize,
}

/// How sure the recommendation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Category of a recommendation warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ExclusionRisk,
    ScopeGap,
    PriceConcern,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationWarning {
    #[serde(default)]
    pub contractor_id: Option<Uuid>,

    #[serde(rename = "type")]
    pub kind: WarningKind,

    pub message: String,
}

/// A named factor behind the recommendation, in order of weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFactor {
    pub name: String,
    pub detail: String,
}

/// Estimated true cost of one contractor's bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub contractor_id: Uuid,
    pub base_bid: f64,

    /// Excluded scope plus gaps priced by other contractors
    pub estimated_adds: f64,

    pub estimated_true_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAnalysis {
    pub lowest_base_bid: f64,

    #[serde(default)]
    pub lowest_base_bid_contractor: Option<Uuid>,

    pub estimates: Vec<CostEstimate>,
}

impl PriceAnalysis {
    /// Estimate for one contractor.
    pub fn estimate_for(&self, contractor_id: Uuid) -> Option<&CostEstimate> {
        self.estimates.iter().find(|e| e.contractor_id == contractor_id)
    }
}

/// Where the recommendation narrative came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Model,
    Deterministic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommended_contractor_id: Option<Uuid>,
    pub recommended_contractor_name: Option<String>,
    pub confidence: ConfidenceLevel,
    pub reasoning: String,
    pub key_factors: Vec<KeyFactor>,
    pub warnings: Vec<RecommendationWarning>,
    pub price_analysis: PriceAnalysis,
    pub source: RecommendationSource,
}

/// Aggregate result of one comparison. Upserted per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub project_id: Uuid,
    pub status: ComparisonStatus,

    #[serde(default)]
    pub error_message: Option<String>,

    pub price_low: f64,
    pub price_high: f64,
    pub price_average: f64,
    pub total_items: usize,
    pub scope_gaps_count: usize,
    pub common_items_count: usize,
    pub match_rate: f64,
    pub contractors: Vec<ContractorSummary>,

    #[serde(default)]
    pub recommendation: Option<Recommendation>,

    pub updated_at: DateTime<Utc>,
}

impl ComparisonResult {
    /// An empty result in the given status.
    pub fn new(project_id: Uuid, status: ComparisonStatus) -> Self {
        Self {
            project_id,
            status,
            error_message: None,
            price_low: 0.0,
            price_high: 0.0,
            price_average: 0.0,
            total_items: 0,
            scope_gaps_count: 0,
            common_items_count: 0,
            match_rate: 0.0,
            contractors: Vec::new(),
            recommendation: None,
            updated_at: Utc::now(),
        }
    }

    /// Fill the price band from contractor base bids.
    pub fn with_price_band(mut self) -> Self {
        let bids: Vec<f64> = self.contractors.iter().map(|c| c.base_bid).collect();
        if !bids.is_empty() {
            self.price_low = bids.iter().cloned().fold(f64::INFINITY, f64::min);
            self.price_high = bids.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            self.price_average = bids.iter().sum::<f64>() / bids.len() as f64;
        }
        self
    }
}
