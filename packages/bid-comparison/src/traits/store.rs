//! Storage traits for the persistence collaborator.
//!
//! The storage layer is split into focused traits:
//! - `DocumentStore`: bid documents and their extracted items
//! - `ComparisonStore`: comparison results and normalized scope items
//! - `BaselineStore`: leveling baselines and derived totals
//! - `ContributionStore`: user corrections
//! - `VariantStore` / `PatternStore`: learning substrate
//! - `BidStore`: composite trait combining all of them

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::leveling::{BaselineSet, ContractorLeveledTotals};
use crate::types::{
    comparison::ComparisonResult,
    document::{BidDocument, ExtractedItem},
    learning::{LearnedPattern, PipelineStage, PromptVariant},
    scope::NormalizedScopeItem,
    training::{ContributionFilter, ModerationStatus, TrainingContribution},
};

/// Bid documents and extracted line items.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of a project, in upload order.
    async fn list_documents(&self, project_id: Uuid) -> StoreResult<Vec<BidDocument>>;

    /// Get a document by id.
    async fn get_document(&self, document_id: Uuid) -> StoreResult<Option<BidDocument>>;

    /// Fetch the file and return its text.
    ///
    /// Fetching and text extraction belong to the collaborator; failures
    /// here isolate to the one document.
    async fn load_document_text(&self, document_id: Uuid) -> StoreResult<String>;

    /// Persist status, contractor name, error message and base bid.
    async fn update_document(&self, document: &BidDocument) -> StoreResult<()>;

    /// Replace every item of a document.
    async fn replace_items(&self, document_id: Uuid, items: &[ExtractedItem]) -> StoreResult<()>;

    /// Items of a document.
    async fn list_items(&self, document_id: Uuid) -> StoreResult<Vec<ExtractedItem>>;

    /// Update existing items in place (matched by id).
    async fn update_items(&self, items: &[ExtractedItem]) -> StoreResult<()>;
}

/// Comparison results and normalized scope.
#[async_trait]
pub trait ComparisonStore: Send + Sync {
    async fn get_comparison(&self, project_id: Uuid) -> StoreResult<Option<ComparisonResult>>;

    /// Insert or overwrite the project's result.
    async fn upsert_comparison(&self, result: &ComparisonResult) -> StoreResult<()>;

    async fn replace_scope_items(
        &self,
        project_id: Uuid,
        items: &[NormalizedScopeItem],
    ) -> StoreResult<()>;

    async fn list_scope_items(&self, project_id: Uuid) -> StoreResult<Vec<NormalizedScopeItem>>;
}

/// Leveling baselines.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Current baseline set (empty, version 0, if none saved).
    async fn load_baselines(&self, project_id: Uuid) -> StoreResult<BaselineSet>;

    /// Save if the stored version equals `expected_version`.
    ///
    /// Returns the new version, or `StoreError::Conflict`.
    async fn save_baselines(
        &self,
        project_id: Uuid,
        baselines: &BaselineSet,
        expected_version: u64,
    ) -> StoreResult<u64>;

    /// Cache the latest derived totals.
    async fn save_leveled_totals(
        &self,
        project_id: Uuid,
        totals: &[ContractorLeveledTotals],
    ) -> StoreResult<()>;
}

/// User corrections.
#[async_trait]
pub trait ContributionStore: Send + Sync {
    async fn create_contribution(&self, contribution: &TrainingContribution) -> StoreResult<()>;

    /// Approved contributions matching the filter, oldest first.
    async fn list_approved(
        &self,
        filter: &ContributionFilter,
    ) -> StoreResult<Vec<TrainingContribution>>;

    /// The only mutation a contribution allows.
    async fn set_moderation_status(
        &self,
        contribution_id: Uuid,
        status: ModerationStatus,
    ) -> StoreResult<()>;
}

/// Prompt variants.
#[async_trait]
pub trait VariantStore: Send + Sync {
    async fn list_variants(
        &self,
        trade_type: &str,
        stage: PipelineStage,
    ) -> StoreResult<Vec<PromptVariant>>;

    async fn get_variant(&self, variant_id: Uuid) -> StoreResult<Option<PromptVariant>>;

    async fn save_variant(&self, variant: &PromptVariant) -> StoreResult<()>;
}

/// Learned patterns.
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Active patterns for a trade, most frequent first.
    async fn list_active_patterns(
        &self,
        trade_type: &str,
        limit: usize,
    ) -> StoreResult<Vec<LearnedPattern>>;

    /// All patterns for a trade, active or not.
    async fn list_patterns(&self, trade_type: &str) -> StoreResult<Vec<LearnedPattern>>;

    /// Insert or overwrite by id.
    async fn save_pattern(&self, pattern: &LearnedPattern) -> StoreResult<()>;
}

/// Composite storage trait combining all stores.
///
/// This is the main trait used by the pipeline and services.
pub trait BidStore:
    DocumentStore + ComparisonStore + BaselineStore + ContributionStore + VariantStore + PatternStore
{
}

// Blanket implementation: anything implementing all stores is a BidStore
impl<T> BidStore for T where
    T: DocumentStore
        + ComparisonStore
        + BaselineStore
        + ContributionStore
        + VariantStore
        + PatternStore
{
}
