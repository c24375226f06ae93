//! Keyword Gateway
//!
//! A resilient gateway in front of the external APIs a keyword research tool
//! depends on: LLM providers for keyword expansion, SEO data providers for
//! keyword metrics and a scraping provider for page content.
//!
//! # Features
//!
//! - **Resilience**: token-bucket rate limiting, sliding-window circuit
//!   breakers and retries with exponential backoff, per provider
//! - **Caching**: fingerprinted responses with per-operation TTLs
//! - **Fallback**: priority cascades across providers with normalized records
//! - **Tolerant parsing**: keyword lists recovered from fenced, wrapped or
//!   truncated model output
//! - **Observability**: structured `tracing` logs and per-provider usage metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use keyword_gateway::{ExpansionRequest, GatewayConfig, KeywordGateway, Locale};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::from_env()?;
//!     config.logging.clone().init()?;
//!     let gateway = KeywordGateway::new(config)?;
//!
//!     let expansion = gateway
//!         .expand(ExpansionRequest::new(["espresso machine"], 25))
//!         .await?;
//!     let keywords: Vec<String> = expansion.value.into_iter().map(|s| s.keyword).collect();
//!
//!     let metrics = gateway.keyword_metrics(&keywords, &Locale::default()).await?;
//!     for record in metrics.records {
//!         println!("{} {:?} ({})", record.keyword, record.volume, record.source.as_str());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod cascade;
pub mod client;
pub mod config;
pub mod errors;
pub mod extract;
pub mod gateway;
pub mod observability;
pub mod providers;
pub mod resilience;
pub mod transport;

// Re-exports for convenience
pub use cascade::{CascadeResult, ProviderCascade, RecordSource, UnifiedRecord};
pub use client::{CostEstimate, HealthReport, Outcome, ProviderAdapter, ProviderClient};
pub use config::{DataMode, GatewayConfig, Operation, ProviderKind, ProviderSettings};
pub use errors::{GatewayError, GatewayResult};
pub use gateway::KeywordGateway;
pub use providers::{ExpansionRequest, KeywordSuggestion, Locale, MetricsQuery};

/// Mock implementations for testing.
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
