//! Completion gateway implementations.
//!
//! - `OpenAI`: chat completions over the OpenAI REST API
//! - `RetryingCompletion`: retry/backoff decorator for any `Completion`

pub mod openai;
pub mod retry;

pub use openai::OpenAI;
pub use retry::RetryingCompletion;
