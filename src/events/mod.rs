//! Side effects queued for delivery to the marketplace.

use serde::{Deserialize, Serialize};

pub mod outbox;

pub use outbox::{enqueue_stock_delta, DispatchReport, DispatchRequest, OutboxDispatcher};

/// Topic of a signed stock change for one marketplace product.
pub const STOCK_DELTA_TOPIC: &str = "stock.delta";

/// Payload of a `stock.delta` outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDelta {
    pub product_id: i64,
    /// Signed quantity change applied on top of the current marketplace stock
    pub delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StockDelta {
    /// Reads a payload, rejecting unknown shapes and non-finite deltas.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, String> {
        let delta: StockDelta = serde_json::from_value(payload.clone())
            .map_err(|e| format!("malformed stock.delta payload: {}", e))?;
        if !delta.delta.is_finite() {
            return Err(format!("non-finite delta for product {}", delta.product_id));
        }
        if delta.product_id <= 0 {
            return Err(format!("invalid product id {}", delta.product_id));
        }
        Ok(delta)
    }
}
