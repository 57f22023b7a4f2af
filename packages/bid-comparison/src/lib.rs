//! Subcontractor Bid Comparison Library
//!
//! Turns several contractors' bid documents for the same scope of work into
//! an apples-to-apples comparison with a recommendation.
//!
//! # Design Philosophy
//!
//! **"The model reads, the code decides"**
//!
//! - The LLM extracts line items, matches scope and writes the narrative
//! - Prices, gaps and true costs are always computed locally
//! - Every model response is decoded into typed shapes, with fallbacks
//! - One bad document never sinks the comparison
//! - The lowest base bid is never automatically the best value
//!
//! # Usage
//!
//! ```rust,ignore
//! use bid_comparison::{AnalysisRequest, ComparisonPipeline, LevelingService, MemoryStore};
//! use bid_comparison::testing::MockCompletion;
//!
//! let pipeline = ComparisonPipeline::new(MemoryStore::new(), MockCompletion::new());
//! let result = pipeline
//!     .run(&AnalysisRequest::new(project_id, "drywall"))
//!     .await?;
//!
//! // A reviewer forces consistent quantities
//! let leveling = LevelingService::new(pipeline.into_store());
//! let report = leveling
//!     .set_baseline(project_id, "Hang board", contractor_id, Some(1000.0), Some("SF".into()))
//!     .await?;
//! assert!(report.ranking_changed);
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (Completion, stores, MetricsSink)
//! - [`types`] - Domain data types and configuration
//! - [`pipeline`] - Extraction, normalization, recommendation and orchestration
//! - [`leveling`] - Baseline leveling engine
//! - [`learning`] - Example library, learned patterns, prompt variants
//! - [`training`] - Correction quality scoring and fine-tuning export
//! - [`ai`] - OpenAI completion gateway and retry decorator
//! - [`stores`] - Storage implementations (MemoryStore)
//! - [`testing`] - Mock implementations for testing

pub mod ai;
pub mod error;
pub mod learning;
pub mod leveling;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod training;
pub mod types;

// Re-export core types at crate root
pub use error::{
    BoxError, ComparisonError, CompletionError, ExportError, LevelingError, StoreError,
};
pub use traits::{
    completion::{ChatMessage, Completion, CompletionOptions, ResponseFormat, Role},
    metrics::{
        ExtractionMetrics, MetricsSink, NoopMetrics, NormalizationMetrics, RecommendationMetrics,
        TracingMetrics,
    },
    store::{
        BaselineStore, BidStore, ComparisonStore, ContributionStore, DocumentStore, PatternStore,
        VariantStore,
    },
};
pub use types::{
    comparison::{
        ComparisonResult, ComparisonStatus, ConfidenceLevel, ContractorSummary, CostEstimate,
        KeyFactor, PriceAnalysis, Recommendation, RecommendationSource, RecommendationWarning,
        WarningKind,
    },
    config::{ExportConfig, PipelineConfig, RetryPolicy, VariantConfig},
    document::{needs_review, BidDocument, DocumentStatus, ExtractedItem, REVIEW_THRESHOLD},
    learning::{LearnedPattern, PatternType, PipelineStage, PromptVariant},
    scope::{ContractorEntry, EntryStatus, NormalizedScopeItem},
    training::{ContributionFilter, CorrectionType, ModerationStatus, TrainingContribution},
};

// Re-export pipeline components
pub use pipeline::{AnalysisRequest, ComparisonPipeline, PromptAugmentation};

// Re-export leveling
pub use leveling::{
    level, BaselineSet, ContractorBid, ContractorLeveledTotals, ItemBaseline, LevelingReport,
    LevelingService,
};

// Re-export learning
pub use learning::{learn_patterns, ExampleLibrary, PatternLibrary, RunObservation, VariantSelector};

// Re-export training export
pub use training::{
    score_batch, score_correction, validate_jsonl, ExportManager, ExportStats, JsonlValidation,
    QualityFactors, QualityScore, TrainingExport,
};

// Re-export gateway and stores
pub use ai::{OpenAI, RetryingCompletion};
pub use stores::MemoryStore;

// Re-export testing utilities
pub use testing::{MockCompletion, RecordingMetrics};
