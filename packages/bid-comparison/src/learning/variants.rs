//! Prompt variant selection, performance tracking and promotion.

use chrono::Utc;
use rand::Rng;
use std::cmp::Ordering;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::VariantStore;
use crate::types::config::VariantConfig;
use crate::types::learning::{PipelineStage, PromptVariant};

/// Observed outcome of one pipeline run under a variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunObservation {
    pub confidence: f64,
    pub duration_ms: u64,
    /// The run's output was later corrected by a user
    pub corrected: bool,
}

/// Pick a variant given two uniform draws in `[0, 1)`.
///
/// `roll < share` prefers active experimental variants, otherwise the
/// active control; `pick` chooses within the pool. An empty preferred pool
/// falls back to the other one.
pub fn choose_variant(
    variants: &[PromptVariant],
    share: f64,
    roll: f64,
    pick: f64,
) -> Option<&PromptVariant> {
    let (experimental, control): (Vec<&PromptVariant>, Vec<&PromptVariant>) = variants
        .iter()
        .filter(|v| v.is_active)
        .partition(|v| !v.is_control);

    let (preferred, other) = if roll < share {
        (experimental, control)
    } else {
        (control, experimental)
    };
    let pool = if preferred.is_empty() { other } else { preferred };
    if pool.is_empty() {
        return None;
    }

    let index = ((pick.clamp(0.0, 1.0) * pool.len() as f64) as usize).min(pool.len() - 1);
    Some(pool[index])
}

/// Selects variants and maintains their running statistics.
#[derive(Debug, Clone, Default)]
pub struct VariantSelector {
    config: VariantConfig,
}

impl VariantSelector {
    pub fn new(config: VariantConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VariantConfig {
        &self.config
    }

    /// Variant to use for one run, or `None` when none are configured or the
    /// lookup fails.
    pub async fn select<S: VariantStore + ?Sized>(
        &self,
        store: &S,
        trade_type: &str,
        stage: PipelineStage,
    ) -> Option<PromptVariant> {
        let variants = match store.list_variants(trade_type, stage).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, trade_type, stage = stage.as_str(), "Failed to load prompt variants");
                return None;
            }
        };

        let (roll, pick) = {
            let mut rng = rand::thread_rng();
            (rng.gen::<f64>(), rng.gen::<f64>())
        };

        let chosen = choose_variant(&variants, self.config.variant_share, roll, pick).cloned();
        if let Some(v) = &chosen {
            debug!(variant = %v.name, control = v.is_control, stage = stage.as_str(), "Selected prompt variant");
        }
        chosen
    }

    /// Fold one run into the variant's running averages.
    pub async fn record_run<S: VariantStore + ?Sized>(
        &self,
        store: &S,
        variant_id: Uuid,
        observation: RunObservation,
    ) -> StoreResult<PromptVariant> {
        let mut variant = store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("variant {}", variant_id)))?;

        variant.total_runs += 1;
        let n = variant.total_runs as f64;
        let corrected = if observation.corrected { 1.0 } else { 0.0 };
        variant.avg_confidence += (observation.confidence - variant.avg_confidence) / n;
        variant.correction_rate += (corrected - variant.correction_rate) / n;
        variant.avg_extraction_ms += (observation.duration_ms as f64 - variant.avg_extraction_ms) / n;
        variant.updated_at = Utc::now();

        store.save_variant(&variant).await?;
        Ok(variant)
    }

    /// Count one already-recorded run as corrected.
    pub async fn mark_run_corrected<S: VariantStore + ?Sized>(
        &self,
        store: &S,
        variant_id: Uuid,
    ) -> StoreResult<PromptVariant> {
        let mut variant = store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("variant {}", variant_id)))?;

        if variant.total_runs > 0 {
            let runs = variant.total_runs as f64;
            let corrected = (variant.correction_rate * runs).round() + 1.0;
            variant.correction_rate = corrected.min(runs) / runs;
            variant.updated_at = Utc::now();
            store.save_variant(&variant).await?;
        }
        Ok(variant)
    }

    /// Activate the best-scoring experimental variant with enough runs.
    ///
    /// Other experimental variants of the pair are deactivated. Returns the
    /// promoted variant, or `None` when nothing qualifies or the winner is
    /// already the only active one.
    pub async fn auto_promote<S: VariantStore + ?Sized>(
        &self,
        store: &S,
        trade_type: &str,
        stage: PipelineStage,
    ) -> StoreResult<Option<PromptVariant>> {
        let variants = store.list_variants(trade_type, stage).await?;

        let Some(best) = variants
            .iter()
            .filter(|v| !v.is_control && v.total_runs >= self.config.min_runs_for_promotion)
            .max_by(|a, b| {
                a.performance_score()
                    .partial_cmp(&b.performance_score())
                    .unwrap_or(Ordering::Equal)
            })
            .cloned()
        else {
            return Ok(None);
        };

        let others_active = variants
            .iter()
            .any(|v| !v.is_control && v.id != best.id && v.is_active);
        if best.is_active && !others_active {
            return Ok(None);
        }

        for mut variant in variants.into_iter().filter(|v| !v.is_control) {
            let should_be_active = variant.id == best.id;
            if variant.is_active != should_be_active {
                variant.is_active = should_be_active;
                variant.updated_at = Utc::now();
                store.save_variant(&variant).await?;
            }
        }

        info!(
            variant = %best.name,
            trade_type,
            stage = stage.as_str(),
            score = best.performance_score(),
            "Promoted prompt variant"
        );

        Ok(Some(PromptVariant {
            is_active: true,
            ..best
        }))
    }
}
