//! Domain types for bid comparison.

pub mod comparison;
pub mod config;
pub mod document;
pub mod learning;
pub mod scope;
pub mod training;
