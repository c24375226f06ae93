//! Provider client lifecycle.
//!
//! [`ProviderClient`] runs every call through the same pipeline: validation,
//! fingerprinting, cache lookup, then a retry loop of rate-limiter admission,
//! circuit-breaker gate, a bounded network call and classification. Adapters
//! supply only what differs between providers.

mod cost;
mod health;

pub use cost::{CostEstimate, CostLine, CostModel, Usage};
pub use health::HealthReport;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheStore, MemoryCache, RequestFingerprint};
use crate::config::{GatewayConfig, Operation, ProviderSettings, DEFAULT_CACHE_MAX_ENTRIES};
use crate::errors::{GatewayError, GatewayResult};
use crate::observability::{UsageMetrics, UsageTracker};
use crate::providers::{ExpansionRequest, KeywordSuggestion};
use crate::resilience::{
    local_rate_limit, CircuitBreaker, CircuitBreakerConfig, RateLimiter, RetryConfig,
    RetryExecutor, TokenBucketLimiter,
};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// A parsed provider response.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    /// The typed result.
    pub value: T,
    /// Billable usage reported or counted from the response.
    pub usage: Usage,
    /// Cost the provider reported for this call, in USD.
    pub reported_cost: Option<f64>,
}

impl<T> Parsed<T> {
    /// Wraps a value with usage.
    pub fn new(value: T, usage: Usage) -> Self {
        Self {
            value,
            usage,
            reported_cost: None,
        }
    }

    /// Sets the provider-reported cost.
    pub fn with_reported_cost(mut self, cost: Option<f64>) -> Self {
        self.reported_cost = cost.filter(|c| c.is_finite() && *c >= 0.0);
        self
    }
}

/// What differs between providers.
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Request type.
    type Request: Send + Sync;
    /// Result type; must round-trip through the cache.
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Provider name.
    fn provider(&self) -> &str;

    /// Operation served.
    fn operation(&self) -> Operation;

    /// Rejects requests that must not reach the network.
    fn validate(&self, request: &Self::Request) -> GatewayResult<()>;

    /// Cache key for a request.
    fn fingerprint(&self, request: &Self::Request) -> RequestFingerprint;

    /// Builds the HTTP request, credentials included.
    fn build_request(&self, request: &Self::Request) -> GatewayResult<HttpRequest>;

    /// Parses a 2xx response.
    fn parse_response(
        &self,
        request: &Self::Request,
        response: &HttpResponse,
    ) -> GatewayResult<Parsed<Self::Output>>;

    /// Pricing used when the provider does not report a cost.
    fn cost_model(&self) -> CostModel;

    /// Expected usage for `item_count` items, for cost estimates.
    fn estimate_usage(&self, item_count: usize) -> Usage;

    /// Largest batch one call accepts, if bounded.
    fn max_items_per_call(&self) -> Option<usize> {
        None
    }

    /// Usage the provider billed for a 2xx response that could not be parsed.
    fn billed_usage(&self, _response: &HttpResponse) -> Option<Usage> {
        None
    }
}

/// Result of a client call.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    /// The typed result.
    pub value: T,
    /// Served from cache.
    pub cached: bool,
    /// Cost of this call in USD; zero when cached.
    pub cost: f64,
    /// Network attempts made; zero when cached.
    pub attempts: u32,
    /// Cache key of the request.
    pub fingerprint: RequestFingerprint,
}

/// Resilient client for one provider.
pub struct ProviderClient<A: ProviderAdapter> {
    adapter: A,
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<dyn RateLimiter>,
    breaker: CircuitBreaker,
    cache: Arc<dyn CacheStore>,
    retry: RetryExecutor,
    usage: UsageTracker,
    cache_ttl: Duration,
    timeout: Duration,
}

impl<A: ProviderAdapter> ProviderClient<A> {
    /// Creates a client with defaults for the adapter's operation.
    pub fn new(adapter: A, transport: Arc<dyn HttpTransport>) -> Self {
        let operation = adapter.operation();
        let name = adapter.provider().to_string();
        Self {
            transport,
            limiter: Arc::new(TokenBucketLimiter::per_minute(60)),
            breaker: CircuitBreaker::new(name, CircuitBreakerConfig::default()),
            cache: Arc::new(MemoryCache::new(DEFAULT_CACHE_MAX_ENTRIES)),
            retry: RetryExecutor::new(RetryConfig::default()),
            usage: UsageTracker::new(),
            cache_ttl: operation.default_cache_ttl(),
            timeout: operation.default_timeout(),
            adapter,
        }
    }

    /// Creates a client from gateway and provider settings.
    pub fn from_settings(
        adapter: A,
        transport: Arc<dyn HttpTransport>,
        settings: &ProviderSettings,
        config: &GatewayConfig,
    ) -> Self {
        Self::new(adapter, transport)
            .with_rate_limiter(Arc::new(TokenBucketLimiter::per_minute(
                settings.effective_requests_per_minute(),
            )))
            .with_circuit_breaker(config.circuit_breaker.clone())
            .with_cache(Arc::new(MemoryCache::new(config.cache_max_entries)))
            .with_retry(RetryExecutor::new(config.retry.clone()))
            .with_cache_ttl(settings.effective_cache_ttl())
            .with_timeout(settings.effective_timeout())
    }

    /// Replaces the rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Replaces the circuit breaker.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(self.adapter.provider().to_string(), config);
        self
    }

    /// Replaces the cache store.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the retry executor.
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Returns the circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns a usage snapshot.
    pub fn usage(&self) -> UsageMetrics {
        let mut metrics = self.usage.snapshot();
        metrics.circuit_breaker_trips = self.breaker.trips();
        metrics
    }

    /// Executes a request.
    pub async fn execute(&self, request: A::Request) -> GatewayResult<Outcome<A::Output>> {
        self.run(&request, None).await
    }

    /// Executes a request that `cancel` can abort.
    ///
    /// Cancellation interrupts the in-flight call or backoff sleep and yields
    /// [`GatewayError::Cancelled`].
    pub async fn execute_with_cancel(
        &self,
        request: A::Request,
        cancel: &CancellationToken,
    ) -> GatewayResult<Outcome<A::Output>> {
        self.run(&request, Some(cancel)).await
    }

    async fn run(
        &self,
        request: &A::Request,
        cancel: Option<&CancellationToken>,
    ) -> GatewayResult<Outcome<A::Output>> {
        let span = tracing::info_span!(
            "provider_call",
            provider = self.adapter.provider(),
            operation = %self.adapter.operation(),
            call_id = %Uuid::new_v4(),
        );
        self.run_in_span(request, cancel).instrument(span).await
    }

    async fn run_in_span(
        &self,
        request: &A::Request,
        cancel: Option<&CancellationToken>,
    ) -> GatewayResult<Outcome<A::Output>> {
        let provider = self.adapter.provider();
        let operation = self.adapter.operation();

        self.adapter.validate(request)?;
        let fingerprint = self.adapter.fingerprint(request);

        if let Some(value) = self.cached(&fingerprint).await {
            return Ok(Outcome {
                value,
                cached: true,
                cost: 0.0,
                attempts: 0,
                fingerprint,
            });
        }

        let attempts = AtomicU32::new(0);
        let label = format!("{provider}.{operation}");
        let call = |attempt: u32| {
            attempts.store(attempt, Ordering::Relaxed);
            self.attempt(request, attempt, cancel)
        };
        let (value, cost) = match cancel {
            Some(token) => self.retry.execute_cancellable(&label, token, call).await?,
            None => self.retry.execute(&label, call).await?,
        };

        let attempts = attempts.load(Ordering::Relaxed);
        match serde_json::to_value(&value) {
            Ok(serialized) => {
                self.cache
                    .set(fingerprint.as_str(), serialized, self.cache_ttl)
                    .await;
            }
            Err(e) => {
                tracing::warn!(provider, error = %e, "Result not cacheable");
            }
        }

        tracing::info!(
            provider,
            operation = %operation,
            fingerprint = %fingerprint,
            attempts,
            cost,
            "Provider call succeeded"
        );

        Ok(Outcome {
            value,
            cached: false,
            cost,
            attempts,
            fingerprint,
        })
    }

    async fn cached(&self, fingerprint: &RequestFingerprint) -> Option<A::Output> {
        let value = self.cache.get(fingerprint.as_str()).await?;
        match serde_json::from_value(value) {
            Ok(output) => {
                self.usage.record_cache_hit();
                tracing::debug!(
                    provider = self.adapter.provider(),
                    fingerprint = %fingerprint,
                    "Cache hit"
                );
                Some(output)
            }
            Err(e) => {
                tracing::warn!(
                    provider = self.adapter.provider(),
                    fingerprint = %fingerprint,
                    error = %e,
                    "Discarding undecodable cache entry"
                );
                self.cache.remove(fingerprint.as_str()).await;
                None
            }
        }
    }

    async fn attempt(
        &self,
        request: &A::Request,
        attempt: u32,
        cancel: Option<&CancellationToken>,
    ) -> GatewayResult<(A::Output, f64)> {
        let provider = self.adapter.provider();

        if !self.limiter.try_consume(1).await {
            let wait = self.limiter.time_until_available(1).await;
            self.usage.record_rate_limit();
            tracing::debug!(provider, attempt, "Local rate limit reached");
            return Err(local_rate_limit(provider, wait));
        }

        let guard = self.breaker.acquire()?;

        let http_request = match self.adapter.build_request(request) {
            Ok(http_request) => http_request,
            Err(e) => {
                guard.ignore();
                return Err(e);
            }
        };

        self.usage.record_request();
        let started = Instant::now();
        let result = match self.send_bounded(http_request, cancel).await {
            Ok(response) => {
                let classified = self.classify(request, &response);
                if matches!(classified, Err(GatewayError::Parse { .. })) {
                    self.record_billed(&response);
                }
                classified
            }
            Err(error) => Err(error),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(parsed) => {
                guard.success();
                let cost = parsed
                    .reported_cost
                    .unwrap_or_else(|| self.adapter.cost_model().cost(&parsed.usage));
                self.usage.record_success(
                    elapsed,
                    cost,
                    parsed.usage.input_tokens,
                    parsed.usage.output_tokens,
                );
                Ok((parsed.value, cost))
            }
            Err(error) => {
                if error.should_circuit_break() {
                    guard.failure();
                } else {
                    guard.ignore();
                }
                if matches!(error, GatewayError::RateLimit { .. }) {
                    self.usage.record_rate_limit();
                }
                self.usage.record_failure(Some(elapsed));
                tracing::warn!(
                    provider,
                    attempt,
                    error_kind = error.kind().as_str(),
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Provider call failed"
                );
                Err(error)
            }
        }
    }

    fn record_billed(&self, response: &HttpResponse) {
        if let Some(usage) = self.adapter.billed_usage(response) {
            let cost = self.adapter.cost_model().cost(&usage);
            self.usage
                .record_cost(cost, usage.input_tokens, usage.output_tokens);
            tracing::debug!(
                provider = self.adapter.provider(),
                cost,
                "Recorded cost of unparseable response"
            );
        }
    }

    async fn send_bounded(
        &self,
        request: HttpRequest,
        cancel: Option<&CancellationToken>,
    ) -> GatewayResult<HttpResponse> {
        let operation = self.adapter.operation();
        let bounded = tokio::time::timeout(self.timeout, self.transport.send(request));

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => {
                        return Err(GatewayError::Cancelled {
                            operation: operation.to_string(),
                        });
                    }
                    outcome = bounded => outcome,
                }
            }
            None => bounded.await,
        };

        outcome.map_err(|_| GatewayError::Timeout {
            provider: self.adapter.provider().to_string(),
            operation: operation.to_string(),
            elapsed: self.timeout,
        })?
    }

    fn classify(
        &self,
        request: &A::Request,
        response: &HttpResponse,
    ) -> GatewayResult<Parsed<A::Output>> {
        if response.is_success() {
            self.adapter.parse_response(request, response)
        } else {
            Err(GatewayError::from_status(
                self.adapter.provider(),
                response.status,
                response.error_message(),
                response.retry_after(),
            ))
        }
    }

    /// Reports provider health from local state; makes no network call.
    pub async fn health_check(&self) -> HealthReport {
        HealthReport::assess(
            self.adapter.provider(),
            self.adapter.operation(),
            self.usage(),
            self.breaker.state(),
            self.limiter.remaining_tokens().await,
            self.timeout,
        )
    }

    /// Estimates the cost of processing `item_count` items.
    pub fn estimate_cost(&self, item_count: usize) -> CostEstimate {
        let usage = self.adapter.estimate_usage(item_count);
        let model = self.adapter.cost_model();
        let calls = self
            .adapter
            .max_items_per_call()
            .map_or(1, |limit| item_count.div_ceil(limit.max(1)).max(1));
        CostEstimate::new(
            self.adapter.operation(),
            self.adapter.provider(),
            item_count,
            &model,
            &usage,
            calls,
        )
    }
}

impl<A: ProviderAdapter> std::fmt::Debug for ProviderClient<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.adapter.provider())
            .field("operation", &self.adapter.operation())
            .field("cache_ttl", &self.cache_ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Object-safe view of a client for health and cost aggregation.
#[async_trait]
pub trait ManagedProvider: Send + Sync {
    /// Provider name.
    fn provider_name(&self) -> &str;

    /// Operation served.
    fn operation(&self) -> Operation;

    /// Health report.
    async fn health_check(&self) -> HealthReport;

    /// Cost estimate for `item_count` items.
    fn estimate_cost(&self, item_count: usize) -> CostEstimate;
}

#[async_trait]
impl<A: ProviderAdapter> ManagedProvider for ProviderClient<A> {
    fn provider_name(&self) -> &str {
        self.adapter.provider()
    }

    fn operation(&self) -> Operation {
        self.adapter.operation()
    }

    async fn health_check(&self) -> HealthReport {
        ProviderClient::health_check(self).await
    }

    fn estimate_cost(&self, item_count: usize) -> CostEstimate {
        ProviderClient::estimate_cost(self, item_count)
    }
}

/// An LLM client that expands seed keywords.
#[async_trait]
pub trait KeywordExpander: Send + Sync {
    /// Provider name.
    fn provider_name(&self) -> &str;

    /// Expands seed keywords.
    async fn expand(
        &self,
        request: ExpansionRequest,
    ) -> GatewayResult<Outcome<Vec<KeywordSuggestion>>>;

    /// Expands seed keywords; `cancel` aborts the call.
    async fn expand_with_cancel(
        &self,
        request: ExpansionRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<Outcome<Vec<KeywordSuggestion>>>;
}

#[async_trait]
impl<A> KeywordExpander for ProviderClient<A>
where
    A: ProviderAdapter<Request = ExpansionRequest, Output = Vec<KeywordSuggestion>>,
{
    fn provider_name(&self) -> &str {
        self.adapter.provider()
    }

    async fn expand(
        &self,
        request: ExpansionRequest,
    ) -> GatewayResult<Outcome<Vec<KeywordSuggestion>>> {
        self.execute(request).await
    }

    async fn expand_with_cancel(
        &self,
        request: ExpansionRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<Outcome<Vec<KeywordSuggestion>>> {
        self.execute_with_cancel(request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RateLimitOrigin;
    use crate::mocks::{MockResponse, MockTransport};
    use crate::resilience::{CircuitState, RateLimiterConfig};

    /// Echoes the response body back as the output.
    struct EchoAdapter;

    impl ProviderAdapter for EchoAdapter {
        type Request = String;
        type Output = String;

        fn provider(&self) -> &str {
            "echo"
        }

        fn operation(&self) -> Operation {
            Operation::KeywordMetrics
        }

        fn validate(&self, request: &String) -> GatewayResult<()> {
            if request.is_empty() {
                return Err(GatewayError::invalid_field("request", "empty"));
            }
            Ok(())
        }

        fn fingerprint(&self, request: &String) -> RequestFingerprint {
            RequestFingerprint::builder("echo", "keyword_metrics")
                .param("q", request)
                .build()
        }

        fn build_request(&self, request: &String) -> GatewayResult<HttpRequest> {
            Ok(HttpRequest::new(
                crate::transport::Method::GET,
                format!("https://echo.test/{request}"),
            ))
        }

        fn parse_response(
            &self,
            _request: &String,
            response: &HttpResponse,
        ) -> GatewayResult<Parsed<String>> {
            let text = response.text();
            if text == "unparseable" {
                return Err(GatewayError::parse("echo", "no usable output", &text));
            }
            Ok(Parsed::new(text, Usage::rows(1)))
        }

        fn cost_model(&self) -> CostModel {
            CostModel::PerRequest { per_request: 0.5 }
        }

        fn estimate_usage(&self, item_count: usize) -> Usage {
            Usage::rows(item_count as u64)
        }

        fn max_items_per_call(&self) -> Option<usize> {
            Some(10)
        }

        fn billed_usage(&self, _response: &HttpResponse) -> Option<Usage> {
            Some(Usage::rows(1))
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        })
    }

    fn client(transport: &Arc<MockTransport>) -> ProviderClient<EchoAdapter> {
        ProviderClient::new(EchoAdapter, transport.clone()).with_retry(fast_retry(3))
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::new(200, "hello"));
        let client = client(&transport);

        let first = client.execute("a".to_string()).await.unwrap();
        let second = client.execute("a".to_string()).await.unwrap();

        assert_eq!(first.value, "hello");
        assert!(!first.cached);
        assert_eq!(first.attempts, 1);
        assert!((first.cost - 0.5).abs() < f64::EPSILON);

        assert_eq!(second.value, "hello");
        assert!(second.cached);
        assert_eq!(second.attempts, 0);
        assert_eq!(second.cost, 0.0);
        assert_eq!(first.fingerprint, second.fingerprint);

        assert_eq!(transport.request_count(), 1);
        let usage = client.usage();
        assert_eq!(usage.cache_hits, 1);
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.successes, 1);
    }

    #[tokio::test]
    async fn test_validation_touches_nothing() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);

        let err = client.execute(String::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
        assert_eq!(transport.request_count(), 0);
        assert_eq!(client.usage(), UsageMetrics::default());
    }

    #[tokio::test]
    async fn test_local_rate_limit_rejects_without_network() {
        let transport = Arc::new(MockTransport::new().set_default_response(MockResponse::new(200, "ok")));
        let limiter = TokenBucketLimiter::new(RateLimiterConfig::per_minute(1));
        let client = client(&transport).with_rate_limiter(Arc::new(limiter));

        client.execute("a".to_string()).await.unwrap();
        let err = client.execute("b".to_string()).await.unwrap_err();

        match err {
            GatewayError::RateLimit { origin, retry_after, .. } => {
                assert_eq!(origin, RateLimitOrigin::Local);
                assert!(retry_after.unwrap() > Duration::from_secs(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
        assert_eq!(client.usage().rate_limit_hits, 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::error(503, "overloaded"));
        transport.enqueue_response(MockResponse::new(200, "ok"));
        let client = client(&transport);

        let outcome = client.execute("a".to_string()).await.unwrap();
        assert_eq!(outcome.attempts, 2);

        let usage = client.usage();
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.failures, 1);
        assert_eq!(usage.successes, 1);
    }

    #[tokio::test]
    async fn test_auth_failure_is_final_and_spares_breaker() {
        let transport = Arc::new(MockTransport::new().set_default_response(MockResponse::error(401, "bad key")));
        let client = client(&transport);

        let err = client.execute("a".to_string()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication { .. }));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(client.circuit_breaker().window_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_breaker_failure() {
        let transport = Arc::new(MockTransport::new().set_default_response(
            MockResponse::new(200, "late").with_delay(Duration::from_millis(200)),
        ));
        let client = ProviderClient::new(EchoAdapter, transport.clone())
            .with_retry(fast_retry(1))
            .with_timeout(Duration::from_millis(20));

        let err = client.execute("a".to_string()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
        assert_eq!(client.circuit_breaker().window_counts(), (1, 0));
        assert_eq!(client.usage().failures, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_blocks_network() {
        let transport = Arc::new(MockTransport::new().set_default_response(MockResponse::error(500, "boom")));
        let client = client(&transport)
            .with_retry(fast_retry(1))
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            });

        for _ in 0..2 {
            let err = client.execute("a".to_string()).await.unwrap_err();
            assert!(matches!(err, GatewayError::Upstream { .. }));
        }
        let err = client.execute("a".to_string()).await.unwrap_err();

        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(transport.request_count(), 2);
        assert_eq!(client.circuit_breaker().state(), CircuitState::Open);
        assert_eq!(client.usage().circuit_breaker_trips, 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let transport = Arc::new(MockTransport::new().set_default_response(
            MockResponse::new(200, "late").with_delay(Duration::from_secs(5)),
        ));
        let client = client(&transport);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = client
            .execute_with_cancel("a".to_string(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled { .. }));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(client.circuit_breaker().window_counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_dropped_call_trip_is_reported() {
        let transport = Arc::new(MockTransport::new().set_default_response(
            MockResponse::new(200, "late").with_delay(Duration::from_secs(5)),
        ));
        let client = client(&transport)
            .with_retry(fast_retry(1))
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            });

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), client.execute("a".to_string())).await;
        assert!(abandoned.is_err());

        assert_eq!(client.circuit_breaker().state(), CircuitState::Open);
        assert_eq!(client.usage().circuit_breaker_trips, 1);
        assert_eq!(client.health_check().await.metrics.circuit_breaker_trips, 1);
    }

    #[tokio::test]
    async fn test_unparseable_success_is_still_billed() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::new(200, "unparseable"));
        let client = client(&transport).with_retry(fast_retry(1));

        let err = client.execute("a".to_string()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Parse { .. }));

        let usage = client.usage();
        assert_eq!(usage.failures, 1);
        assert_eq!(usage.successes, 0);
        assert!((usage.total_cost - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_network() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        let token = CancellationToken::new();
        token.cancel();

        let err = client
            .execute_with_cancel("a".to_string(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_cache_entry_is_replaced() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::new(200, "fresh"));
        let cache = Arc::new(MemoryCache::new(10));
        let client = client(&transport).with_cache(cache.clone());

        let key = EchoAdapter.fingerprint(&"a".to_string());
        cache
            .set(key.as_str(), serde_json::json!({"not": "a string"}), Duration::from_secs(60))
            .await;

        let outcome = client.execute("a".to_string()).await.unwrap();
        assert!(!outcome.cached);
        assert_eq!(outcome.value, "fresh");
        assert_eq!(cache.get(key.as_str()).await, Some(serde_json::json!("fresh")));
    }

    #[tokio::test]
    async fn test_health_and_estimate() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);

        let report = client.health_check().await;
        assert!(report.healthy);
        assert_eq!(report.provider, "echo");
        assert_eq!(report.circuit_state, CircuitState::Closed);

        let estimate = client.estimate_cost(25);
        assert_eq!(estimate.item_count, 25);
        // Three calls of at most ten items.
        assert!((estimate.estimated_dollars - 1.5).abs() < 1e-9);
    }
}
