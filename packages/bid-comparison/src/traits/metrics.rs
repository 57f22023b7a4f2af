//! Metrics sink for pipeline telemetry.
//!
//! Sinks are best-effort: the pipeline logs and drops every error a sink
//! returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BoxError;
use crate::types::comparison::ConfidenceLevel;

/// Aggregate of one extraction pass over all documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    pub documents_total: usize,
    pub documents_failed: usize,
    pub total_items: usize,

    /// Confidence of every extracted item, in document order
    pub confidence_scores: Vec<f64>,

    pub items_needing_review: usize,
    pub duration_ms: u64,

    #[serde(default)]
    pub variant_id: Option<Uuid>,
}

impl ExtractionMetrics {
    /// Mean confidence over all items (0 with no items).
    pub fn average_confidence(&self) -> f64 {
        if self.confidence_scores.is_empty() {
            return 0.0;
        }
        self.confidence_scores.iter().sum::<f64>() / self.confidence_scores.len() as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationMetrics {
    pub groups: usize,
    pub scope_gaps: usize,
    pub match_rate: f64,
    pub used_fallback: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationMetrics {
    pub recommended_contractor_id: Option<Uuid>,
    pub confidence: ConfidenceLevel,
    pub used_fallback: bool,
    pub duration_ms: u64,
}

/// Destination for per-run pipeline metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_extraction(
        &self,
        project_id: Uuid,
        metrics: &ExtractionMetrics,
    ) -> Result<(), BoxError>;

    async fn record_normalization(
        &self,
        project_id: Uuid,
        metrics: &NormalizationMetrics,
    ) -> Result<(), BoxError>;

    async fn record_recommendation(
        &self,
        project_id: Uuid,
        metrics: &RecommendationMetrics,
    ) -> Result<(), BoxError>;

    /// Push anything buffered.
    async fn flush(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

#[async_trait]
impl MetricsSink for NoopMetrics {
    async fn record_extraction(&self, _: Uuid, _: &ExtractionMetrics) -> Result<(), BoxError> {
        Ok(())
    }

    async fn record_normalization(&self, _: Uuid, _: &NormalizationMetrics) -> Result<(), BoxError> {
        Ok(())
    }

    async fn record_recommendation(
        &self,
        _: Uuid,
        _: &RecommendationMetrics,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Sink that emits structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

#[async_trait]
impl MetricsSink for TracingMetrics {
    async fn record_extraction(
        &self,
        project_id: Uuid,
        metrics: &ExtractionMetrics,
    ) -> Result<(), BoxError> {
        tracing::info!(
            %project_id,
            documents = metrics.documents_total,
            failed = metrics.documents_failed,
            items = metrics.total_items,
            needs_review = metrics.items_needing_review,
            avg_confidence = metrics.average_confidence(),
            duration_ms = metrics.duration_ms,
            "extraction metrics"
        );
        Ok(())
    }

    async fn record_normalization(
        &self,
        project_id: Uuid,
        metrics: &NormalizationMetrics,
    ) -> Result<(), BoxError> {
        tracing::info!(
            %project_id,
            groups = metrics.groups,
            scope_gaps = metrics.scope_gaps,
            match_rate = metrics.match_rate,
            fallback = metrics.used_fallback,
            duration_ms = metrics.duration_ms,
            "normalization metrics"
        );
        Ok(())
    }

    async fn record_recommendation(
        &self,
        project_id: Uuid,
        metrics: &RecommendationMetrics,
    ) -> Result<(), BoxError> {
        tracing::info!(
            %project_id,
            recommended = ?metrics.recommended_contractor_id,
            confidence = ?metrics.confidence,
            fallback = metrics.used_fallback,
            duration_ms = metrics.duration_ms,
            "recommendation metrics"
        );
        Ok(())
    }
}
