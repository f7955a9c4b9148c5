use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{header::HeaderMap, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::models::{
    decode_products, ApiEnvelope, Product, ProductPage, ReservedAmount, StockUpdate,
    StockUpdateMultiple,
};
use super::{ApiClientError, RateLimitPolicy, StockApi};
use crate::config::BillbeeConfig;
use crate::retry::{with_retry, RetryConfig};

const API_KEY_HEADER: &str = "X-Billbee-Api-Key";
/// Upper bound of error body text carried into error messages.
const MAX_ERROR_BODY: usize = 2_000;

/// reqwest-backed marketplace client.
///
/// Every request carries basic auth plus the API-key header and goes through
/// [`with_retry`] with a [`RateLimitPolicy`].
#[derive(Clone)]
pub struct BillbeeClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    api_password: String,
    api_key: String,
    retry: RetryConfig,
    policy: RateLimitPolicy,
}

impl std::fmt::Debug for BillbeeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillbeeClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("max_attempts", &self.retry.max_attempts)
            .finish_non_exhaustive()
    }
}

impl BillbeeClient {
    pub fn new(config: &BillbeeConfig) -> Result<Self, ApiClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .build()?;

        let default_retry_after = Duration::from_secs(config.default_retry_after_secs);
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_password: config.api_password.clone(),
            api_key: config.api_key.clone(),
            retry: RetryConfig {
                max_attempts: config.max_attempts,
                initial_delay: default_retry_after,
                ..RetryConfig::default()
            },
            policy: RateLimitPolicy {
                default_retry_after,
            },
        })
    }

    /// Overrides the backoff schedule.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the wait used when a 429 carries no `Retry-After`.
    pub fn with_default_retry_after(mut self, wait: Duration) -> Self {
        self.policy.default_retry_after = wait;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.api_password))
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn send_once(&self, builder: RequestBuilder, endpoint: &str) -> Result<Response, ApiClientError> {
        let started = Instant::now();
        let response = builder.send().await?;
        histogram!("inventory_sync.billbee.request_duration", started.elapsed(), "endpoint" => endpoint.to_string());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            counter!("inventory_sync.billbee.throttled", 1, "endpoint" => endpoint.to_string());
            let retry_after = parse_retry_after(response.headers());
            warn!(endpoint, ?retry_after, "Marketplace API throttled request");
            return Err(ApiClientError::TooManyRequests { retry_after });
        }

        if !status.is_success() {
            counter!("inventory_sync.billbee.errors", 1, "endpoint" => endpoint.to_string());
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            return Err(ApiClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiClientError> {
        with_retry(&self.retry, &self.policy, || async move {
            let response = self
                .send_once(self.request(Method::GET, path).query(query), path)
                .await?;
            response
                .json::<T>()
                .await
                .map_err(|e| ApiClientError::Decode(e.to_string()))
        })
        .await
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ApiClientError> {
        with_retry(&self.retry, &self.policy, || async move {
            let response = self
                .send_once(self.request(Method::POST, path).json(body), path)
                .await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            check_envelope(status, &text)
        })
        .await
    }
}

/// The API answers some failed writes with 200 and an error envelope.
fn check_envelope(status: u16, text: &str) -> Result<(), ApiClientError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let envelope: ApiEnvelope<serde_json::Value> = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(_) => return Ok(()),
    };
    match (envelope.error_code, envelope.error_message) {
        (Some(code), message) if code != 0 => Err(ApiClientError::Status {
            status,
            body: message.unwrap_or_else(|| format!("error code {}", code)),
        }),
        _ => Ok(()),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl StockApi for BillbeeClient {
    #[instrument(skip(self))]
    async fn list_products(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<ProductPage, ApiClientError> {
        let envelope: ApiEnvelope<Vec<serde_json::Value>> = self
            .get_json(
                "/products",
                &[("page", page.to_string()), ("pageSize", page_size.to_string())],
            )
            .await?;

        let (items, malformed) = decode_products(envelope.data.unwrap_or_default());
        let paging = envelope.paging.unwrap_or_default();
        if !malformed.is_empty() {
            counter!("inventory_sync.billbee.malformed_items", malformed.len() as u64);
        }
        debug!(
            page,
            items = items.len(),
            malformed = malformed.len(),
            total_pages = paging.total_pages,
            "Fetched catalog page"
        );
        Ok(ProductPage {
            items,
            malformed,
            page: if paging.page == 0 { page } else { paging.page },
            total_pages: paging.total_pages,
        })
    }

    #[instrument(skip(self))]
    async fn get_reserved_amount(&self, product_id: i64) -> Result<f64, ApiClientError> {
        let envelope: ApiEnvelope<ReservedAmount> = self
            .get_json("/products/reservedamount", &[("id", product_id.to_string())])
            .await?;
        envelope
            .data
            .and_then(|d| d.reserved_amount)
            .ok_or_else(|| {
                ApiClientError::Decode(format!(
                    "missing Data.ReservedAmount for product {}",
                    product_id
                ))
            })
    }

    #[instrument(skip(self))]
    async fn get_product_stock(&self, product_id: i64) -> Result<f64, ApiClientError> {
        let envelope: ApiEnvelope<Product> = self
            .get_json(
                &format!("/products/{}", product_id),
                &[("lookupBy", "id".to_string())],
            )
            .await?;
        envelope
            .data
            .and_then(|p| p.current_stock())
            .ok_or_else(|| {
                ApiClientError::Decode(format!("no stock figure for product {}", product_id))
            })
    }

    #[instrument(skip(self), fields(product_id = ?update.product_id, amount = update.amount))]
    async fn update_stock(&self, update: StockUpdate) -> Result<(), ApiClientError> {
        self.post_json("/products/updatestock", &update).await
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_stock_multiple(&self, updates: Vec<StockUpdate>) -> Result<(), ApiClientError> {
        let body = StockUpdateMultiple { products: updates };
        self.post_json("/products/updatestockmultiple", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_parses_seconds_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn error_envelope_on_success_status_is_an_error() {
        assert!(check_envelope(200, "").is_ok());
        assert!(check_envelope(200, r#"{"ErrorCode":0,"Data":null}"#).is_ok());
        assert_eq!(
            check_envelope(200, r#"{"ErrorCode":3,"ErrorMessage":"unknown product"}"#),
            Err(ApiClientError::Status {
                status: 200,
                body: "unknown product".into()
            })
        );
    }
}
