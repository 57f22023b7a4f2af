//! Comparison pipeline stages.
//!
//! - `extract`: per-document line-item extraction
//! - `normalize`: cross-contractor scope matching and gap detection
//! - `recommend`: price analysis and recommendation
//! - `comparison`: orchestration over a store

pub mod comparison;
pub mod decode;
pub mod extract;
pub mod markers;
pub mod normalize;
pub mod prompts;
pub mod recommend;

pub use comparison::{AnalysisRequest, ComparisonPipeline};
pub use extract::{extract_document, transform_extraction, DocumentExtraction};
pub use markers::is_exclusion_marker;
pub use normalize::{literal_match, match_rate, normalize_scope, reconcile, NormalizationOutcome};
pub use prompts::PromptAugmentation;
pub use recommend::{
    build_recommendation, compute_price_analysis, deterministic_recommendation, recommend,
    summarize_contractors, RecommendationOutcome,
};
