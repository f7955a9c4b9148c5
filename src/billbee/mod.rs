/*!
 * # Marketplace Stock API
 *
 * [`StockApi`] is the seam every job talks to. [`client::BillbeeClient`] is the
 * production implementation; tests substitute scripted fakes or mocks.
 *
 * HTTP 429 is the only error retried inside the client ([`RateLimitPolicy`]).
 * Everything else surfaces to the caller, which decides whether a failure skips
 * a row or aborts the job.
 */
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::errors::ServiceError;
use crate::retry::RetryPolicy;

pub mod client;
pub mod models;

pub use client::BillbeeClient;
pub use models::{BomLine, MalformedProduct, Product, ProductPage, StockUpdate};

/// Errors raised by the marketplace client
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiClientError {
    #[error("rate limited by marketplace API (retry after {retry_after:?})")]
    TooManyRequests { retry_after: Option<Duration> },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiClientError::Decode(err.to_string())
        } else {
            ApiClientError::Transport(err.to_string())
        }
    }
}

impl From<ApiClientError> for ServiceError {
    fn from(err: ApiClientError) -> Self {
        match err {
            ApiClientError::TooManyRequests { .. } => ServiceError::RateLimitExceeded,
            other => ServiceError::ExternalApiError(other.to_string()),
        }
    }
}

/// Retries HTTP 429 only, honouring `Retry-After` when the server sends one.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub default_retry_after: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            default_retry_after: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy<ApiClientError> for RateLimitPolicy {
    fn is_retryable(&self, error: &ApiClientError) -> bool {
        matches!(error, ApiClientError::TooManyRequests { .. })
    }

    fn retry_after(&self, error: &ApiClientError) -> Option<Duration> {
        match error {
            ApiClientError::TooManyRequests { retry_after } => {
                Some(retry_after.unwrap_or(self.default_retry_after))
            }
            _ => None,
        }
    }
}

/// Operations the pipeline needs from the marketplace.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StockApi: Send + Sync {
    /// One catalog page; `page` is 1-based.
    async fn list_products(&self, page: u32, page_size: u32)
        -> Result<ProductPage, ApiClientError>;

    /// Units reserved by open orders for one product.
    async fn get_reserved_amount(&self, product_id: i64) -> Result<f64, ApiClientError>;

    /// Current absolute stock of one product.
    async fn get_product_stock(&self, product_id: i64) -> Result<f64, ApiClientError>;

    /// Sets the absolute stock of one product.
    async fn update_stock(&self, update: StockUpdate) -> Result<(), ApiClientError>;

    /// Sets the absolute stock of several products in one call.
    async fn update_stock_multiple(&self, updates: Vec<StockUpdate>)
        -> Result<(), ApiClientError>;
}
