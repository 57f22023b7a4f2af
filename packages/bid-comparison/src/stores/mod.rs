//! Storage implementations for the comparison library.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage (always available)
//!
//! Production deployments implement the store traits over their own
//! database; the core only needs read/write/upsert semantics.

pub mod memory;

pub use memory::MemoryStore;
