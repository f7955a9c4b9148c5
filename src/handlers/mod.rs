pub mod jobs;
pub mod outbox_admin;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Query, Request},
    http::Method,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::ServiceError;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Success body: `{ "ok": true, ...metrics }`.
#[derive(Debug, Serialize)]
pub struct JobResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T: Serialize> JobResponse<T> {
    pub fn ok(body: T) -> Self {
        Self { ok: true, body }
    }
}

/// Optional job parameters.
///
/// GET reads the query string. POST reads a JSON body and falls back to the
/// query string when the body is empty. Malformed input is a 400.
#[derive(Debug, Clone, Default)]
pub struct JobInput<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JobInput<T>
where
    T: DeserializeOwned + Default + Send,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let from_query = |uri: &axum::http::Uri| -> Result<T, ServiceError> {
            if uri.query().map_or(true, |q| q.trim().is_empty()) {
                return Ok(T::default());
            }
            Query::<T>::try_from_uri(uri)
                .map(|Query(value)| value)
                .map_err(|e| ServiceError::BadRequest(format!("invalid query string: {}", e)))
        };

        if req.method() != Method::POST {
            return from_query(req.uri()).map(JobInput);
        }

        let uri = req.uri().clone();
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ServiceError::BadRequest(format!("unreadable body: {}", e)))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return from_query(&uri).map(JobInput);
        }

        serde_json::from_slice::<T>(&bytes)
            .map(JobInput)
            .map_err(|e| ServiceError::BadRequest(format!("invalid JSON body: {}", e)))
    }
}
