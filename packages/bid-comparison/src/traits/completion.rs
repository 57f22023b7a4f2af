//! Completion trait for LLM calls.
//!
//! Every LLM-backed stage sends role-tagged messages and receives the text
//! of exactly one completion. Parsing that text is the caller's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CompletionResult;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Requested response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
}

impl CompletionOptions {
    /// JSON-object output with the given temperature and token cap.
    pub fn json(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            response_format: Some(ResponseFormat::JsonObject),
        }
    }
}

/// A text-completion service.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Return the text of one completion.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> CompletionResult<String>;

    /// Check credentials/quota before any work starts.
    async fn ensure_ready(&self) -> CompletionResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: Completion + ?Sized> Completion for Arc<T> {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> CompletionResult<String> {
        (**self).complete(messages, options).await
    }

    async fn ensure_ready(&self) -> CompletionResult<()> {
        (**self).ensure_ready().await
    }
}
