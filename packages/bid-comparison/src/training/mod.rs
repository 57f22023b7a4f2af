//! Correction quality scoring and fine-tuning export.

pub mod export;
pub mod quality;

pub use export::{build_export, validate_jsonl, ExportManager, ExportStats, JsonlValidation, TrainingExport};
pub use quality::{
    filter_high_quality, score_batch, score_correction, similarity, QualityFactors, QualityScore,
    HIGH_QUALITY_THRESHOLD,
};
