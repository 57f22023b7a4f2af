//! Learning substrate: few-shot examples, learned patterns and prompt
//! variants that adapt the pipeline over time.
//!
//! Everything here degrades quietly: a failed fetch renders as empty prompt
//! text or no variant, never as a pipeline error.

pub mod examples;
pub mod patterns;
pub mod variants;

pub use examples::{render_examples, ExampleLibrary};
pub use patterns::{learn_patterns, render_patterns, PatternLibrary};
pub use variants::{choose_variant, RunObservation, VariantSelector};
