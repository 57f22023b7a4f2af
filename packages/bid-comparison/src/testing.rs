//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the comparison library
//! without making real LLM calls.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{BoxError, CompletionError, CompletionResult};
use crate::traits::completion::{ChatMessage, Completion, CompletionOptions, Role};
use crate::traits::metrics::{
    ExtractionMetrics, MetricsSink, NormalizationMetrics, RecommendationMetrics,
};

enum Scripted {
    Respond(String),
    Fail(CompletionError),
}

#[derive(Default)]
struct MockState {
    /// Responses keyed by a substring of the last user message
    rules: Vec<(String, String)>,

    /// FIFO responses used when no rule matches
    queue: VecDeque<Scripted>,

    /// Every message list received
    calls: Vec<Vec<ChatMessage>>,

    unavailable: bool,
}

/// A scripted completion service.
///
/// Rules (`respond_when`) are checked first against the last user message;
/// otherwise the next queued response or failure is returned. With nothing
/// left to return it fails with a non-retryable `Unavailable` error.
/// Clones share state, so a test can keep a handle for assertions.
#[derive(Clone, Default)]
pub struct MockCompletion {
    state: Arc<Mutex<MockState>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn then_respond(self, text: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back(Scripted::Respond(text.into()));
        self
    }

    /// Queue a failure.
    pub fn then_fail(self, error: CompletionError) -> Self {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back(Scripted::Fail(error));
        self
    }

    /// Always answer `text` when the last user message contains `needle`.
    pub fn respond_when(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .rules
            .push((needle.into(), text.into()));
        self
    }

    /// Fail `ensure_ready`, as with a missing credential.
    pub fn unavailable(self) -> Self {
        self.state.lock().unwrap().unavailable = true;
        self
    }

    /// Number of `complete` calls received.
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Messages of every call, in order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Completion for MockCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> CompletionResult<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(messages.to_vec());

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if let Some((_, text)) = state
            .rules
            .iter()
            .find(|(needle, _)| last_user.contains(needle.as_str()))
        {
            return Ok(text.clone());
        }

        match state.queue.pop_front() {
            Some(Scripted::Respond(text)) => Ok(text),
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(CompletionError::Unavailable(
                "no scripted response left".into(),
            )),
        }
    }

    async fn ensure_ready(&self) -> CompletionResult<()> {
        if self.state.lock().unwrap().unavailable {
            return Err(CompletionError::Unavailable("mock marked unavailable".into()));
        }
        Ok(())
    }
}

/// Record of a call made to the recording sink.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsCall {
    Extraction(Uuid, ExtractionMetrics),
    Normalization(Uuid, NormalizationMetrics),
    Recommendation(Uuid, RecommendationMetrics),
    Flush,
}

/// Metrics sink that records calls, optionally failing each one.
#[derive(Clone, Default)]
pub struct RecordingMetrics {
    calls: Arc<Mutex<Vec<MetricsCall>>>,
    failing: bool,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record, then return an error from every call.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<MetricsCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The recorded extraction metrics, if any.
    pub fn extraction(&self) -> Option<ExtractionMetrics> {
        self.calls().into_iter().find_map(|c| match c {
            MetricsCall::Extraction(_, m) => Some(m),
            _ => None,
        })
    }

    fn record(&self, call: MetricsCall) -> Result<(), BoxError> {
        self.calls.lock().unwrap().push(call);
        if self.failing {
            return Err("metrics backend down".into());
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn record_extraction(
        &self,
        project_id: Uuid,
        metrics: &ExtractionMetrics,
    ) -> Result<(), BoxError> {
        self.record(MetricsCall::Extraction(project_id, metrics.clone()))
    }

    async fn record_normalization(
        &self,
        project_id: Uuid,
        metrics: &NormalizationMetrics,
    ) -> Result<(), BoxError> {
        self.record(MetricsCall::Normalization(project_id, metrics.clone()))
    }

    async fn record_recommendation(
        &self,
        project_id: Uuid,
        metrics: &RecommendationMetrics,
    ) -> Result<(), BoxError> {
        self.record(MetricsCall::Recommendation(project_id, metrics.clone()))
    }

    async fn flush(&self) -> Result<(), BoxError> {
        self.record(MetricsCall::Flush)
    }
}
