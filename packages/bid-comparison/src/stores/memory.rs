//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::leveling::{BaselineSet, ContractorLeveledTotals};
use crate::traits::store::{
    BaselineStore, ComparisonStore, ContributionStore, DocumentStore, PatternStore, VariantStore,
};
use crate::types::{
    comparison::ComparisonResult,
    document::{BidDocument, ExtractedItem},
    learning::{LearnedPattern, PipelineStage, PromptVariant},
    scope::NormalizedScopeItem,
    training::{ContributionFilter, ModerationStatus, TrainingContribution},
};

/// In-memory storage for every pipeline record.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<IndexMap<Uuid, BidDocument>>,
    items: RwLock<HashMap<Uuid, Vec<ExtractedItem>>>,
    comparisons: RwLock<HashMap<Uuid, ComparisonResult>>,
    scope_items: RwLock<HashMap<Uuid, Vec<NormalizedScopeItem>>>,
    baselines: RwLock<HashMap<Uuid, BaselineSet>>,
    leveled_totals: RwLock<HashMap<Uuid, Vec<ContractorLeveledTotals>>>,
    contributions: RwLock<IndexMap<Uuid, TrainingContribution>>,
    variants: RwLock<IndexMap<Uuid, PromptVariant>>,
    patterns: RwLock<IndexMap<Uuid, LearnedPattern>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document (upload).
    pub fn insert_document(&self, document: BidDocument) {
        self.documents
            .write()
            .unwrap()
            .insert(document.id, document);
    }

    /// Insert a contribution regardless of status.
    pub fn insert_contribution(&self, contribution: TrainingContribution) {
        self.contributions
            .write()
            .unwrap()
            .insert(contribution.id, contribution);
    }

    /// Insert a variant.
    pub fn insert_variant(&self, variant: PromptVariant) {
        self.variants.write().unwrap().insert(variant.id, variant);
    }

    /// Insert a pattern.
    pub fn insert_pattern(&self, pattern: LearnedPattern) {
        self.patterns.write().unwrap().insert(pattern.id, pattern);
    }

    /// Last saved leveled totals for a project.
    pub fn leveled_totals(&self, project_id: Uuid) -> Vec<ContractorLeveledTotals> {
        self.leveled_totals
            .read()
            .unwrap()
            .get(&project_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Get the number of stored documents.
    pub fn document_count(&self) -> usize {
        self.documents.read().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_documents(&self, project_id: Uuid) -> StoreResult<Vec<BidDocument>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn get_document(&self, document_id: Uuid) -> StoreResult<Option<BidDocument>> {
        Ok(self.documents.read().unwrap().get(&document_id).cloned())
    }

    async fn load_document_text(&self, document_id: Uuid) -> StoreResult<String> {
        let documents = self.documents.read().unwrap();
        let document = documents
            .get(&document_id)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", document_id)))?;

        match document.raw_text.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(StoreError::Backend(
                format!("no text could be extracted from document {}", document_id).into(),
            )),
        }
    }

    async fn update_document(&self, document: &BidDocument) -> StoreResult<()> {
        let mut documents = self.documents.write().unwrap();
        match documents.get_mut(&document.id) {
            Some(existing) => {
                *existing = document.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("document {}", document.id))),
        }
    }

    async fn replace_items(&self, document_id: Uuid, items: &[ExtractedItem]) -> StoreResult<()> {
        self.items
            .write()
            .unwrap()
            .insert(document_id, items.to_vec());
        Ok(())
    }

    async fn list_items(&self, document_id: Uuid) -> StoreResult<Vec<ExtractedItem>> {
        Ok(self
            .items
            .read()
            .unwrap()
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_items(&self, updated: &[ExtractedItem]) -> StoreResult<()> {
        let mut items = self.items.write().unwrap();
        for item in updated {
            if let Some(existing) = items
                .get_mut(&item.document_id)
                .and_then(|list| list.iter_mut().find(|i| i.id == item.id))
            {
                *existing = item.clone();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ComparisonStore for MemoryStore {
    async fn get_comparison(&self, project_id: Uuid) -> StoreResult<Option<ComparisonResult>> {
        Ok(self.comparisons.read().unwrap().get(&project_id).cloned())
    }

    async fn upsert_comparison(&self, result: &ComparisonResult) -> StoreResult<()> {
        self.comparisons
            .write()
            .unwrap()
            .insert(result.project_id, result.clone());
        Ok(())
    }

    async fn replace_scope_items(
        &self,
        project_id: Uuid,
        items: &[NormalizedScopeItem],
    ) -> StoreResult<()> {
        self.scope_items
            .write()
            .unwrap()
            .insert(project_id, items.to_vec());
        Ok(())
    }

    async fn list_scope_items(&self, project_id: Uuid) -> StoreResult<Vec<NormalizedScopeItem>> {
        Ok(self
            .scope_items
            .read()
            .unwrap()
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl BaselineStore for MemoryStore {
    async fn load_baselines(&self, project_id: Uuid) -> StoreResult<BaselineSet> {
        Ok(self
            .baselines
            .read()
            .unwrap()
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_baselines(
        &self,
        project_id: Uuid,
        baselines: &BaselineSet,
        expected_version: u64,
    ) -> StoreResult<u64> {
        let mut stored = self.baselines.write().unwrap();
        let found = stored.get(&project_id).map(|b| b.version()).unwrap_or(0);

        if found != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                found,
            });
        }

        let version = found + 1;
        stored.insert(project_id, baselines.clone().with_version(version));
        Ok(version)
    }

    async fn save_leveled_totals(
        &self,
        project_id: Uuid,
        totals: &[ContractorLeveledTotals],
    ) -> StoreResult<()> {
        self.leveled_totals
            .write()
            .unwrap()
            .insert(project_id, totals.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ContributionStore for MemoryStore {
    async fn create_contribution(&self, contribution: &TrainingContribution) -> StoreResult<()> {
        self.insert_contribution(contribution.clone());
        Ok(())
    }

    async fn list_approved(
        &self,
        filter: &ContributionFilter,
    ) -> StoreResult<Vec<TrainingContribution>> {
        let contributions = self.contributions.read().unwrap();
        let mut approved: Vec<TrainingContribution> = contributions
            .values()
            .filter(|c| c.moderation_status == ModerationStatus::Approved)
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();

        approved.sort_by_key(|c| c.created_at);
        if let Some(limit) = filter.limit {
            approved.truncate(limit);
        }
        Ok(approved)
    }

    async fn set_moderation_status(
        &self,
        contribution_id: Uuid,
        status: ModerationStatus,
    ) -> StoreResult<()> {
        let mut contributions = self.contributions.write().unwrap();
        let contribution = contributions
            .get_mut(&contribution_id)
            .ok_or_else(|| StoreError::NotFound(format!("contribution {}", contribution_id)))?;
        contribution.moderation_status = status;
        Ok(())
    }
}

#[async_trait]
impl VariantStore for MemoryStore {
    async fn list_variants(
        &self,
        trade_type: &str,
        stage: PipelineStage,
    ) -> StoreResult<Vec<PromptVariant>> {
        Ok(self
            .variants
            .read()
            .unwrap()
            .values()
            .filter(|v| v.stage == stage && v.trade_type.eq_ignore_ascii_case(trade_type))
            .cloned()
            .collect())
    }

    async fn get_variant(&self, variant_id: Uuid) -> StoreResult<Option<PromptVariant>> {
        Ok(self.variants.read().unwrap().get(&variant_id).cloned())
    }

    async fn save_variant(&self, variant: &PromptVariant) -> StoreResult<()> {
        self.insert_variant(variant.clone());
        Ok(())
    }
}

#[async_trait]
impl PatternStore for MemoryStore {
    async fn list_active_patterns(
        &self,
        trade_type: &str,
        limit: usize,
    ) -> StoreResult<Vec<LearnedPattern>> {
        let mut active: Vec<LearnedPattern> = self
            .patterns
            .read()
            .unwrap()
            .values()
            .filter(|p| p.is_active && p.trade_type.eq_ignore_ascii_case(trade_type))
            .cloned()
            .collect();

        // Stable sort keeps insertion order among equal counts
        active.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
        active.truncate(limit);
        Ok(active)
    }

    async fn list_patterns(&self, trade_type: &str) -> StoreResult<Vec<LearnedPattern>> {
        Ok(self
            .patterns
            .read()
            .unwrap()
            .values()
            .filter(|p| p.trade_type.eq_ignore_ascii_case(trade_type))
            .cloned()
            .collect())
    }

    async fn save_pattern(&self, pattern: &LearnedPattern) -> StoreResult<()> {
        self.insert_pattern(pattern.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leveling::ItemBaseline;
    use crate::types::training::CorrectionType;
    use serde_json::json;

    #[tokio::test]
    async fn test_baseline_version_conflict() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let set = BaselineSet::new().with_baseline(ItemBaseline::new("Drywall", Uuid::new_v4(), 10.0));

        assert_eq!(store.save_baselines(project, &set, 0).await.unwrap(), 1);
        assert!(matches!(
            store.save_baselines(project, &set, 0).await,
            Err(StoreError::Conflict { expected: 0, found: 1 })
        ));
        assert_eq!(store.load_baselines(project).await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_list_approved_filters_status() {
        let store = MemoryStore::new();
        let pending = TrainingContribution::new(
            "drywall",
            CorrectionType::Category,
            json!({"category": "a"}),
            json!({"category": "b"}),
        );
        let approved = pending.clone();
        let approved = TrainingContribution {
            id: Uuid::new_v4(),
            ..approved
        }
        .approved();

        store.insert_contribution(pending.clone());
        store.insert_contribution(approved.clone());

        let listed = store
            .list_approved(&ContributionFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, approved.id);

        store
            .set_moderation_status(pending.id, ModerationStatus::Approved)
            .await
            .unwrap();
        assert_eq!(
            store
                .list_approved(&ContributionFilter::default())
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_missing_text_is_an_error() {
        let store = MemoryStore::new();
        let document = BidDocument::new(Uuid::new_v4(), "Acme");
        let id = document.id;
        store.insert_document(document);

        assert!(store.load_document_text(id).await.is_err());
    }
}
