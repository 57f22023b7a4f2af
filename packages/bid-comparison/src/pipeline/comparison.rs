//! Comparison pipeline orchestration.
//!
//! One run takes a project's uploaded bids through extraction,
//! normalization and recommendation, persisting as it goes. The stored
//! comparison status is the single source of truth for callers:
//! `processing` while running, then `complete` or `error`.

use futures::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ai::RetryingCompletion;
use crate::error::{ComparisonError, Result};
use crate::learning::{ExampleLibrary, PatternLibrary, RunObservation, VariantSelector};
use crate::leveling::ContractorBid;
use crate::pipeline::extract::extract_document;
use crate::pipeline::normalize::normalize_scope;
use crate::pipeline::prompts::PromptAugmentation;
use crate::pipeline::recommend::recommend;
use crate::traits::completion::Completion;
use crate::traits::metrics::{
    ExtractionMetrics, MetricsSink, NoopMetrics, NormalizationMetrics, RecommendationMetrics,
};
use crate::traits::store::BidStore;
use crate::types::comparison::{ComparisonResult, ComparisonStatus};
use crate::types::config::{PipelineConfig, VariantConfig};
use crate::types::document::{BidDocument, DocumentStatus, ExtractedItem};
use crate::types::learning::{PipelineStage, PromptVariant};

/// "Start analysis for project X".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub project_id: Uuid,
    /// Trade label used to pick examples, patterns and variants
    pub trade_type: String,
}

impl AnalysisRequest {
    pub fn new(project_id: Uuid, trade_type: impl Into<String>) -> Self {
        Self {
            project_id,
            trade_type: trade_type.into(),
        }
    }
}

/// Outcome of extracting one document.
struct DocumentOutcome {
    document: BidDocument,
    /// `None` when the document failed
    items: Option<Vec<ExtractedItem>>,
}

/// Prompt variants chosen for one run.
#[derive(Default)]
struct SelectedVariants {
    extraction: Option<PromptVariant>,
    normalization: Option<PromptVariant>,
    recommendation: Option<PromptVariant>,
}

/// The bid comparison pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use bid_comparison::{AnalysisRequest, ComparisonPipeline, MemoryStore, OpenAI};
///
/// let pipeline = ComparisonPipeline::new(MemoryStore::new(), OpenAI::from_env()?);
/// let result = pipeline
///     .run(&AnalysisRequest::new(project_id, "drywall"))
///     .await?;
/// println!("{:?}", result.recommendation);
/// ```
pub struct ComparisonPipeline<S, C, M = NoopMetrics> {
    store: S,
    completion: RetryingCompletion<C>,
    metrics: M,
    config: PipelineConfig,
    examples: ExampleLibrary,
    patterns: PatternLibrary,
    variants: VariantSelector,
}

impl<S: BidStore, C: Completion> ComparisonPipeline<S, C, NoopMetrics> {
    /// Create a pipeline with default configuration and no metrics.
    pub fn new(store: S, completion: C) -> Self {
        let config = PipelineConfig::default();
        Self {
            store,
            completion: RetryingCompletion::with_policy(completion, config.retry.clone()),
            metrics: NoopMetrics,
            examples: ExampleLibrary::new(config.max_examples),
            patterns: PatternLibrary::new(config.max_patterns),
            variants: VariantSelector::default(),
            config,
        }
    }
}

impl<S: BidStore, C: Completion, M: MetricsSink> ComparisonPipeline<S, C, M> {
    /// Replace the metrics sink.
    pub fn with_metrics<M2: MetricsSink>(self, metrics: M2) -> ComparisonPipeline<S, C, M2> {
        ComparisonPipeline {
            store: self.store,
            completion: self.completion,
            metrics,
            config: self.config,
            examples: self.examples,
            patterns: self.patterns,
            variants: self.variants,
        }
    }

    /// Replace the configuration (retry policy included).
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.completion =
            RetryingCompletion::with_policy(self.completion.into_inner(), config.retry.clone());
        self.examples = ExampleLibrary::new(config.max_examples);
        self.patterns = PatternLibrary::new(config.max_patterns);
        self.config = config;
        self
    }

    pub fn with_variant_config(mut self, config: VariantConfig) -> Self {
        self.variants = VariantSelector::new(config);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Release the store, e.g. to hand it to a `LevelingService`.
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run a full comparison for one project.
    ///
    /// Any failure is also written to the stored comparison as status
    /// `error` with a message.
    pub async fn run(&self, request: &AnalysisRequest) -> Result<ComparisonResult> {
        let project_id = request.project_id;
        info!(%project_id, trade_type = %request.trade_type, "Starting bid comparison");

        match self.run_stages(request).await {
            Ok(result) => {
                info!(
                    %project_id,
                    contractors = result.contractors.len(),
                    scope_gaps = result.scope_gaps_count,
                    match_rate = result.match_rate,
                    "Bid comparison complete"
                );
                Ok(result)
            }
            Err(e) => {
                error!(%project_id, error = %e, "Bid comparison failed");
                let mut failed = ComparisonResult::new(project_id, ComparisonStatus::Error);
                failed.error_message = Some(e.to_string());
                if let Err(store_err) = self.store.upsert_comparison(&failed).await {
                    error!(%project_id, error = %store_err, "Failed to record comparison error");
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&self, request: &AnalysisRequest) -> Result<ComparisonResult> {
        let project_id = request.project_id;
        let trade_type = request.trade_type.as_str();

        self.completion
            .ensure_ready()
            .await
            .map_err(|e| ComparisonError::Precondition(e.to_string()))?;

        let documents = self.store.list_documents(project_id).await?;
        if documents.is_empty() {
            return Err(ComparisonError::Precondition(format!(
                "project {} has no bid documents",
                project_id
            )));
        }

        self.store
            .upsert_comparison(&ComparisonResult::new(project_id, ComparisonStatus::Processing))
            .await?;

        // Learned augmentation
        let examples = self.examples.render(&self.store, trade_type).await;
        let patterns = self.patterns.render(&self.store, trade_type).await;
        let selected = SelectedVariants {
            extraction: self.select_variant(trade_type, PipelineStage::Extraction).await,
            normalization: self.select_variant(trade_type, PipelineStage::Normalization).await,
            recommendation: self.select_variant(trade_type, PipelineStage::Recommendation).await,
        };
        let variant_content = |v: &Option<PromptVariant>| v.as_ref().map(|v| v.content.clone());

        // Extraction
        let extraction_augmentation = PromptAugmentation {
            examples,
            patterns: patterns.clone(),
            variant: variant_content(&selected.extraction),
        };
        let start = Instant::now();
        let documents_total = documents.len();
        let concurrency = self.config.extraction_concurrency.max(1);

        let mut outcomes: Vec<(usize, DocumentOutcome)> = stream::iter(documents.into_iter().enumerate())
            .map(|(index, document)| {
                let augmentation = &extraction_augmentation;
                async move {
                    (
                        index,
                        self.process_document(document, trade_type, augmentation).await,
                    )
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut bids: Vec<ContractorBid> = Vec::new();
        let mut extraction_metrics = ExtractionMetrics {
            documents_total,
            variant_id: selected.extraction.as_ref().map(|v| v.id),
            ..Default::default()
        };
        for (_, outcome) in outcomes {
            match outcome.items {
                Some(items) => {
                    extraction_metrics.total_items += items.len();
                    extraction_metrics
                        .confidence_scores
                        .extend(items.iter().map(|i| i.confidence_score));
                    extraction_metrics.items_needing_review +=
                        items.iter().filter(|i| i.needs_review).count();
                    bids.push(ContractorBid {
                        contractor_id: outcome.document.contractor_id(),
                        contractor_name: outcome.document.contractor_name,
                        items,
                    });
                }
                None => extraction_metrics.documents_failed += 1,
            }
        }
        extraction_metrics.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            %project_id,
            documents = documents_total,
            failed = extraction_metrics.documents_failed,
            items = extraction_metrics.total_items,
            "Extraction complete"
        );
        if let Err(e) = self.metrics.record_extraction(project_id, &extraction_metrics).await {
            warn!(%project_id, error = %e, "Failed to record extraction metrics");
        }

        if bids.is_empty() {
            return Err(ComparisonError::Precondition(format!(
                "all {} bid documents failed extraction",
                documents_total
            )));
        }

        // Normalization
        let normalization_augmentation = PromptAugmentation {
            examples: String::new(),
            patterns,
            variant: variant_content(&selected.normalization),
        };
        let normalization = normalize_scope(
            &self.completion,
            &self.config,
            trade_type,
            &bids,
            &normalization_augmentation,
        )
        .await?;

        self.store
            .replace_scope_items(project_id, &normalization.items)
            .await?;

        let labels = normalization.labels();
        for bid in bids.iter_mut() {
            for item in bid.items.iter_mut() {
                item.normalized_category = labels.get(&item.id).cloned();
            }
            self.store.update_items(&bid.items).await?;
        }

        let normalization_metrics = NormalizationMetrics {
            groups: normalization.items.len(),
            scope_gaps: normalization.scope_gaps_count,
            match_rate: normalization.match_rate,
            used_fallback: normalization.used_fallback,
            duration_ms: normalization.duration_ms,
        };
        if let Err(e) = self
            .metrics
            .record_normalization(project_id, &normalization_metrics)
            .await
        {
            warn!(%project_id, error = %e, "Failed to record normalization metrics");
        }

        // Recommendation
        let recommendation_augmentation = PromptAugmentation {
            variant: variant_content(&selected.recommendation),
            ..Default::default()
        };
        let recommendation = recommend(
            &self.completion,
            &self.config,
            trade_type,
            &bids,
            &normalization.items,
            &recommendation_augmentation,
        )
        .await?;

        let recommendation_metrics = RecommendationMetrics {
            recommended_contractor_id: recommendation.recommendation.recommended_contractor_id,
            confidence: recommendation.recommendation.confidence,
            used_fallback: recommendation.used_fallback,
            duration_ms: recommendation.duration_ms,
        };
        if let Err(e) = self
            .metrics
            .record_recommendation(project_id, &recommendation_metrics)
            .await
        {
            warn!(%project_id, error = %e, "Failed to record recommendation metrics");
        }

        // Persist
        let mut result = ComparisonResult::new(project_id, ComparisonStatus::Complete);
        result.contractors = recommendation.summaries;
        result = result.with_price_band();
        result.total_items = normalization.total_items;
        result.scope_gaps_count = normalization.scope_gaps_count;
        result.common_items_count = normalization.common_items_count;
        result.match_rate = normalization.match_rate;
        result.recommendation = Some(recommendation.recommendation);

        self.store.upsert_comparison(&result).await?;

        // Best-effort learning bookkeeping
        let confidence = extraction_metrics.average_confidence();
        for (variant, duration_ms) in [
            (&selected.extraction, extraction_metrics.duration_ms),
            (&selected.normalization, normalization.duration_ms),
            (&selected.recommendation, recommendation.duration_ms),
        ] {
            let Some(variant) = variant else { continue };
            let observation = RunObservation {
                confidence,
                duration_ms,
                corrected: false,
            };
            if let Err(e) = self
                .variants
                .record_run(&self.store, variant.id, observation)
                .await
            {
                warn!(variant = %variant.name, error = %e, "Failed to record variant performance");
            }
        }
        if let Err(e) = self.metrics.flush().await {
            warn!(%project_id, error = %e, "Failed to flush metrics");
        }

        Ok(result)
    }

    async fn select_variant(&self, trade_type: &str, stage: PipelineStage) -> Option<PromptVariant> {
        self.variants.select(&self.store, trade_type, stage).await
    }

    /// Extract one document; failures are recorded on the document and
    /// never propagate.
    async fn process_document(
        &self,
        mut document: BidDocument,
        trade_type: &str,
        augmentation: &PromptAugmentation,
    ) -> DocumentOutcome {
        let document_id = document.id;
        info!(%document_id, contractor = %document.contractor_name, "Extracting bid document");

        match self
            .try_process_document(&mut document, trade_type, augmentation)
            .await
        {
            Ok(items) => {
                info!(
                    %document_id,
                    items = items.len(),
                    needs_review = items.iter().filter(|i| i.needs_review).count(),
                    "Bid document processed"
                );
                DocumentOutcome {
                    document,
                    items: Some(items),
                }
            }
            Err(e) => {
                warn!(%document_id, error = %e, "Bid document failed, continuing with the rest");
                document.status = DocumentStatus::Error;
                document.error_message = Some(e.to_string());

                if let Err(store_err) = self.store.replace_items(document_id, &[]).await {
                    warn!(%document_id, error = %store_err, "Failed to clear items of failed document");
                }
                if let Err(store_err) = self.store.update_document(&document).await {
                    error!(%document_id, error = %store_err, "Failed to mark document as errored");
                }
                DocumentOutcome {
                    document,
                    items: None,
                }
            }
        }
    }

    async fn try_process_document(
        &self,
        document: &mut BidDocument,
        trade_type: &str,
        augmentation: &PromptAugmentation,
    ) -> Result<Vec<ExtractedItem>> {
        document.status = DocumentStatus::Processing;
        document.error_message = None;
        self.store.update_document(document).await?;

        let text = self.store.load_document_text(document.id).await?;
        let extraction = extract_document(
            &self.completion,
            &self.config,
            document.id,
            &text,
            trade_type,
            augmentation,
        )
        .await?;

        self.store
            .replace_items(document.id, &extraction.items)
            .await?;

        if let Some(name) = extraction.contractor_name {
            document.contractor_name = name;
        }
        document.base_bid_total = extraction.base_bid_total;
        document.status = DocumentStatus::Processed;
        self.store.update_document(document).await?;

        Ok(extraction.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::MockCompletion;
    use crate::traits::store::{ComparisonStore, DocumentStore};

    #[tokio::test]
    async fn test_unavailable_completion_fails_before_touching_documents() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let document = BidDocument::new(project, "Acme").with_text("Hang board $100");
        let document_id = document.id;
        store.insert_document(document);

        let mock = MockCompletion::new().unavailable();
        let pipeline = ComparisonPipeline::new(store, mock.clone());

        let err = pipeline
            .run(&AnalysisRequest::new(project, "drywall"))
            .await
            .unwrap_err();

        assert!(matches!(err, ComparisonError::Precondition(_)));
        assert_eq!(mock.call_count(), 0);

        let stored = pipeline.store().get_document(document_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Uploading);

        let comparison = pipeline.store().get_comparison(project).await.unwrap().unwrap();
        assert_eq!(comparison.status, ComparisonStatus::Error);
        assert!(comparison.error_message.is_some());
    }

    #[tokio::test]
    async fn test_empty_project_is_rejected() {
        let pipeline = ComparisonPipeline::new(MemoryStore::new(), MockCompletion::new());
        let err = pipeline
            .run(&AnalysisRequest::new(Uuid::new_v4(), "drywall"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no bid documents"));
    }
}
