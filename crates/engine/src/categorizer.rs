//! Transaction categorization.
//!
//! [`Categorizer::categorize`] asks the configured [`Classifier`] with a
//! bounded number of retries. [`Categorizer::categorize_batch`] fans a batch
//! out over a small pool of tokio tasks sharing one job queue; every result
//! is tagged with its input index so the output order matches the input
//! order whatever the completion order.
//!
//! Failures are returned, not hidden: callers decide whether to fall back to
//! [`CategorizationResponse::fallback`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Category, MoneyCents};

/// Upper bound on concurrent classifier calls per batch.
pub const MAX_WORKERS: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Request(String),
    #[error("classifier returned an invalid answer: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CategorizerError {
    #[error("no classifier configured")]
    NotConfigured,
    #[error("categorization cancelled")]
    Cancelled,
    #[error("categorization failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: ClassifierError,
    },
    #[error("categorizer worker stopped before answering")]
    WorkerLost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategorizationRequest {
    pub merchant_name: Option<String>,
    pub description: String,
    pub amount: MoneyCents,
    /// Raw category hints from the aggregator, most general first.
    pub hints: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CategorizationResponse {
    pub category: Category,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl CategorizationResponse {
    /// Keyword classification of the raw hints, always low confidence.
    pub fn fallback<S: AsRef<str>>(hints: &[S]) -> Self {
        Self {
            category: Category::from_hints(hints),
            confidence: Confidence::Low,
            reasoning: "keyword fallback on aggregator categories".to_string(),
        }
    }
}

/// External classification capability (an LLM behind a strict schema in
/// production).
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &CategorizationRequest,
    ) -> Result<CategorizationResponse, ClassifierError>;
}

#[derive(Clone, Debug)]
pub struct CategorizerConfig {
    /// Batch pool size, capped at [`MAX_WORKERS`].
    pub workers: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Attempt `n` waits `n * retry_delay` first.
    pub retry_delay: Duration,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct Categorizer {
    classifier: Option<Arc<dyn Classifier>>,
    config: CategorizerConfig,
}

impl std::fmt::Debug for Categorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Categorizer")
            .field("configured", &self.classifier.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new(CategorizerConfig::default())
    }
}

impl Categorizer {
    /// A categorizer without a classifier: every call fails with
    /// [`CategorizerError::NotConfigured`].
    pub fn new(config: CategorizerConfig) -> Self {
        Self {
            classifier: None,
            config,
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &CategorizerConfig {
        &self.config
    }

    pub async fn categorize(
        &self,
        request: &CategorizationRequest,
        cancel: &CancellationToken,
    ) -> Result<CategorizationResponse, CategorizerError> {
        let Some(classifier) = &self.classifier else {
            return Err(CategorizerError::NotConfigured);
        };
        if cancel.is_cancelled() {
            return Err(CategorizerError::Cancelled);
        }

        let mut attempt: u32 = 0;
        loop {
            match classifier.classify(request).await {
                Ok(response) => return Ok(response),
                Err(last) if attempt >= self.config.max_retries => {
                    return Err(CategorizerError::Exhausted {
                        attempts: attempt + 1,
                        last,
                    });
                }
                Err(err) => {
                    warn!(attempt, error = %err, description = %request.description, "classifier failed");
                }
            }
            attempt += 1;
            let delay = self.config.retry_delay * attempt;
            tokio::select! {
                () = cancel.cancelled() => return Err(CategorizerError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Categorizes every request, returning one outcome per request in input
    /// order.
    pub async fn categorize_batch(
        &self,
        requests: Vec<CategorizationRequest>,
        cancel: &CancellationToken,
    ) -> Vec<Result<CategorizationResponse, CategorizerError>> {
        let len = requests.len();
        if len == 0 {
            return Vec::new();
        }
        let workers = self.config.workers.clamp(1, MAX_WORKERS).min(len);
        debug!(requests = len, workers, "categorizing batch");

        let (job_tx, job_rx) = mpsc::channel(len);
        for job in requests.into_iter().enumerate() {
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
        drop(job_tx);
        let jobs = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::channel(len);
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let jobs = Arc::clone(&jobs);
            let results = result_tx.clone();
            let categorizer = self.clone();
            let cancel = cancel.clone();
            pool.spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some((index, request)) = next else {
                        break;
                    };
                    let outcome = if cancel.is_cancelled() {
                        Err(CategorizerError::Cancelled)
                    } else {
                        categorizer.categorize(&request, &cancel).await
                    };
                    if results.send((index, outcome)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "categorizer worker died");
            }
        }

        let mut outcomes: Vec<Option<Result<CategorizationResponse, CategorizerError>>> =
            (0..len).map(|_| None).collect();
        while let Some((index, outcome)) = result_rx.recv().await {
            outcomes[index] = Some(outcome);
        }
        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(Err(CategorizerError::WorkerLost)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn request(description: &str) -> CategorizationRequest {
        CategorizationRequest {
            merchant_name: None,
            description: description.to_string(),
            amount: MoneyCents::new(1000),
            hints: vec!["Food and Drink".to_string()],
        }
    }

    fn config() -> CategorizerConfig {
        CategorizerConfig {
            workers: 3,
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
        }
    }

    /// Answers `Dining`, sleeping on requests named "slow".
    struct Echo;

    #[async_trait]
    impl Classifier for Echo {
        async fn classify(
            &self,
            request: &CategorizationRequest,
        ) -> Result<CategorizationResponse, ClassifierError> {
            if request.description == "slow" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(CategorizationResponse {
                category: Category::Dining,
                confidence: Confidence::High,
                reasoning: request.description.clone(),
            })
        }
    }

    /// Fails the first `failures` calls.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Classifier for Flaky {
        async fn classify(
            &self,
            _request: &CategorizationRequest,
        ) -> Result<CategorizationResponse, ClassifierError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ClassifierError::Request(format!("call {call}")));
            }
            Ok(CategorizationResponse {
                category: Category::Bills,
                confidence: Confidence::Medium,
                reasoning: "ok".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let categorizer = Categorizer::new(config()).with_classifier(Arc::new(Echo));
        let requests = vec![request("first"), request("slow"), request("third")];

        let outcomes = categorizer
            .categorize_batch(requests, &CancellationToken::new())
            .await;

        let reasons: Vec<_> = outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap().reasoning)
            .collect();
        assert_eq!(reasons, vec!["first", "slow", "third"]);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let categorizer = Categorizer::new(config()).with_classifier(flaky.clone());

        let response = categorizer
            .categorize(&request("bill"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.category, Category::Bills);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let flaky = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let categorizer = Categorizer::new(config()).with_classifier(flaky);

        let err = categorizer
            .categorize(&request("bill"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CategorizerError::Exhausted {
                attempts: 3,
                last: ClassifierError::Request("call 2".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn unconfigured_categorizer_fails_every_request() {
        let outcomes = Categorizer::default()
            .categorize_batch(vec![request("a"), request("b")], &CancellationToken::new())
            .await;
        assert!(
            outcomes
                .iter()
                .all(|outcome| *outcome == Err(CategorizerError::NotConfigured))
        );
    }

    #[tokio::test]
    async fn cancelled_batch_reports_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let categorizer = Categorizer::new(config()).with_classifier(Arc::new(Echo));

        let outcomes = categorizer
            .categorize_batch(vec![request("a"), request("b")], &cancel)
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(
            outcomes
                .iter()
                .all(|outcome| *outcome == Err(CategorizerError::Cancelled))
        );
    }

    #[test]
    fn fallback_is_low_confidence() {
        let response = CategorizationResponse::fallback(&["Groceries"]);
        assert_eq!(response.category, Category::Groceries);
        assert_eq!(response.confidence, Confidence::Low);
    }
}
