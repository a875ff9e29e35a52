//! The seam between the engine and the LLM host.
//!
//! The engine never interprets natural language. It hands a rendered prompt
//! to an [`AgentDispatcher`] and gets back the text the agent produced plus
//! the files it reports having written.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("agent host failed: {0}")]
    Host(String),

    #[error("agent dispatch timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("agent task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchRequest {
    /// Short name used in logs and reports, e.g. `plan-feature` or `variant-2`.
    pub label: String,
    pub prompt: String,
    pub allowed_tools: Vec<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub text: String,
    pub files_written: Vec<PathBuf>,
}

#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError>;
}

/// Run one dispatch, bounded by `timeout` when set.
pub async fn dispatch_with_timeout(
    dispatcher: &dyn AgentDispatcher,
    request: DispatchRequest,
    timeout: Option<Duration>,
) -> Result<DispatchResult, DispatchError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, dispatcher.dispatch(request))
            .await
            .map_err(|_| DispatchError::TimedOut(limit))?,
        None => dispatcher.dispatch(request).await,
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct FanOutOptions {
    pub max_parallel: usize,
    pub timeout: Option<Duration>,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            timeout: None,
        }
    }
}

/// Outcome of one request in a batch, in the order the requests were given.
#[derive(Debug)]
pub struct FanOutItem {
    pub label: String,
    pub result: Result<DispatchResult, DispatchError>,
}

/// Dispatch every request concurrently, at most `max_parallel` at a time.
///
/// A failed request never cancels the others; every outcome is returned in
/// input order.
pub async fn fan_out(
    dispatcher: Arc<dyn AgentDispatcher>,
    requests: Vec<DispatchRequest>,
    options: FanOutOptions,
) -> Vec<FanOutItem> {
    let batch = uuid::Uuid::new_v4();
    let semaphore = Arc::new(Semaphore::new(options.max_parallel.max(1)));
    let labels: Vec<String> = requests.iter().map(|r| r.label.clone()).collect();
    let mut set = JoinSet::new();

    tracing::debug!(%batch, count = requests.len(), max_parallel = options.max_parallel, "fan-out start");

    for (index, request) in requests.into_iter().enumerate() {
        let dispatcher = Arc::clone(&dispatcher);
        let semaphore = Arc::clone(&semaphore);
        let timeout = options.timeout;
        set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    dispatch_with_timeout(dispatcher.as_ref(), request, timeout).await
                }
                Err(e) => Err(DispatchError::Aborted(e.to_string())),
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<DispatchResult, DispatchError>>> =
        labels.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Err(e) = &result {
                    tracing::warn!(%batch, label = %labels[index], error = %e, "dispatch failed");
                }
                results[index] = Some(result);
            }
            Err(e) => tracing::warn!(%batch, error = %e, "dispatch task panicked"),
        }
    }

    labels
        .into_iter()
        .zip(results)
        .map(|(label, result)| FanOutItem {
            label,
            result: result
                .unwrap_or_else(|| Err(DispatchError::Aborted("task did not complete".into()))),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
