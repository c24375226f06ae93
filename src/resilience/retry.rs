//! Retry logic with exponential backoff and jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{GatewayError, GatewayResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Context passed to retry observers.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-indexed).
    pub attempt: u32,
    /// Total attempts allowed.
    pub max_attempts: u32,
    /// The error that triggered the retry.
    pub error: String,
    /// Stable label of the error.
    pub error_kind: &'static str,
    /// Delay before the next attempt; zero when exhausted.
    pub delay: Duration,
    /// The operation being retried.
    pub operation: String,
}

/// Observer notified on retries.
pub trait RetryObserver: Send + Sync {
    /// Called before sleeping ahead of another attempt.
    fn on_retry(&self, context: &RetryContext);

    /// Called when the last allowed attempt failed with a retryable error.
    fn on_exhausted(&self, _context: &RetryContext) {}
}

/// Logs retries through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, context: &RetryContext) {
        tracing::warn!(
            operation = %context.operation,
            attempt = context.attempt,
            max_attempts = context.max_attempts,
            delay_ms = u64::try_from(context.delay.as_millis()).unwrap_or(u64::MAX),
            error_kind = context.error_kind,
            error = %context.error,
            "Retrying after failure"
        );
    }

    fn on_exhausted(&self, context: &RetryContext) {
        tracing::error!(
            operation = %context.operation,
            attempts = context.attempt,
            error_kind = context.error_kind,
            error = %context.error,
            "Retries exhausted"
        );
    }
}

type RetryPredicate = Arc<dyn Fn(&GatewayError) -> bool + Send + Sync>;

/// Retry executor with exponential backoff.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    observer: Arc<dyn RetryObserver>,
    retry_if: Option<RetryPredicate>,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingRetryObserver),
            retry_if: None,
        }
    }

    /// Sets the retry observer.
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replaces the default retryability check.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&GatewayError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an operation with retry logic.
    pub async fn execute<F, Fut, T>(&self, operation: &str, f: F) -> GatewayResult<T>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = GatewayResult<T>> + Send,
        T: Send,
    {
        self.run(operation, None, f).await
    }

    /// Executes with retry, aborting backoff sleeps when `cancel` fires.
    pub async fn execute_cancellable<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> GatewayResult<T>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = GatewayResult<T>> + Send,
        T: Send,
    {
        self.run(operation, Some(cancel), f).await
    }

    async fn run<F, Fut, T>(
        &self,
        operation: &str,
        cancel: Option<&CancellationToken>,
        mut f: F,
    ) -> GatewayResult<T>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = GatewayResult<T>> + Send,
        T: Send,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(GatewayError::Cancelled {
                    operation: operation.to_string(),
                });
            }

            let error = match f(attempt).await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if !self.should_retry(&error) {
                return Err(error);
            }

            let mut context = RetryContext {
                attempt,
                max_attempts,
                error: error.to_string(),
                error_kind: error.kind().as_str(),
                delay: Duration::ZERO,
                operation: operation.to_string(),
            };

            if attempt >= max_attempts {
                self.observer.on_exhausted(&context);
                return Err(error);
            }

            // A server hint beyond our cap is handed back rather than waited on.
            if let Some(hint) = error.retry_after() {
                if hint > self.config.max_backoff {
                    tracing::debug!(
                        operation,
                        retry_after_ms = u64::try_from(hint.as_millis()).unwrap_or(u64::MAX),
                        "Retry-after exceeds max backoff, surfacing error"
                    );
                    return Err(error);
                }
            }

            context.delay = self.calculate_backoff(attempt - 1, error.retry_after());
            self.observer.on_retry(&context);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        () = token.cancelled() => {
                            return Err(GatewayError::Cancelled {
                                operation: operation.to_string(),
                            });
                        }
                        () = tokio::time::sleep(context.delay) => {}
                    }
                }
                None => tokio::time::sleep(context.delay).await,
            }

            attempt += 1;
        }
    }

    fn should_retry(&self, error: &GatewayError) -> bool {
        // Never retried, whatever the predicate says.
        if matches!(
            error,
            GatewayError::CircuitOpen { .. } | GatewayError::Cancelled { .. }
        ) {
            return false;
        }
        match &self.retry_if {
            Some(predicate) => predicate(error),
            None => error.is_retryable(),
        }
    }

    /// Calculates the backoff delay with jitter.
    fn calculate_backoff(&self, retry: u32, server_retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = server_retry_after {
            return retry_after;
        }

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base_delay =
            self.config.initial_backoff.as_secs_f64() * self.config.backoff_multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.config.max_backoff.as_secs_f64());

        let jitter_range = capped_delay * self.config.jitter.clamp(0.0, 1.0);
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_delay = (capped_delay + jitter).clamp(0.0, self.config.max_backoff.as_secs_f64());

        Duration::from_secs_f64(final_delay)
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("retry_if", &self.retry_if.is_some())
            .finish_non_exhaustive()
    }
}
