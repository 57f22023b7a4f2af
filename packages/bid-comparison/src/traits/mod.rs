//! Core trait abstractions for the comparison pipeline.
//!
//! These traits define the interfaces that applications implement
//! to provide completions, storage and metrics.

pub mod completion;
pub mod metrics;
pub mod store;
