//! Stock-out request model.
//!
//! A stock-out request is one fulfillment obligation: remove N units of a
//! product from the warehouse. Requests are owned by the hosted backend;
//! this terminal only reads them, fulfills them through the reconciliation
//! engine, and reports completion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{value_i64, value_str};

/// Lifecycle status of a stock-out request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
}

impl RequestStatus {
    fn parse(s: &str) -> Self {
        match s {
            "processing" => RequestStatus::Processing,
            "completed" => RequestStatus::Completed,
            _ => RequestStatus::Pending,
        }
    }
}

/// One fulfillment obligation, as fetched from the backend.
///
/// `quantity_requested` is immutable after creation; the remaining quantity
/// is always derived from the deduction ledger, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockOutRequest {
    pub id: String,
    pub product_id: Option<String>,
    pub product_name: String,
    pub quantity_requested: i64,
    pub status: RequestStatus,
    /// Backend revision counter for optimistic concurrency: the completion
    /// write sends the revision it was based on, and a stale writer is
    /// rejected with a conflict.
    pub revision: i64,
}

impl StockOutRequest {
    /// Parse from a backend JSON object. Field names tolerate both
    /// camelCase and snake_case. Returns `None` for rows without an id or
    /// with a non-positive requested quantity.
    pub fn from_value(v: &Value) -> Option<Self> {
        let id = value_str(v, &["id", "requestId", "request_id"])?;
        let quantity_requested =
            value_i64(v, &["quantityRequested", "quantity_requested", "quantity"])?;
        if quantity_requested <= 0 {
            return None;
        }

        let status = value_str(v, &["status"])
            .map(|s| RequestStatus::parse(&s))
            .unwrap_or(RequestStatus::Pending);

        Some(Self {
            id,
            product_id: value_str(v, &["productId", "product_id"]),
            product_name: value_str(v, &["productName", "product_name"])
                .unwrap_or_else(|| "Unknown Product".to_string()),
            quantity_requested,
            status,
            revision: value_i64(v, &["revision", "version"]).unwrap_or(0),
        })
    }

    /// Quantity still to be fulfilled given the ledger's running total,
    /// clamped at zero.
    pub fn remaining(&self, total_deducted: i64) -> i64 {
        (self.quantity_requested - total_deducted).max(0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_camel_case() {
        let v = serde_json::json!({
            "id": "so-1",
            "productId": "p-1",
            "productName": "Blue Widget",
            "quantityRequested": 10,
            "status": "pending",
            "revision": 3,
        });
        let req = StockOutRequest::from_value(&v).expect("should parse");
        assert_eq!(req.id, "so-1");
        assert_eq!(req.product_id.as_deref(), Some("p-1"));
        assert_eq!(req.quantity_requested, 10);
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(req.revision, 3);
    }

    #[test]
    fn test_from_value_snake_case_and_defaults() {
        let v = serde_json::json!({
            "id": "so-2",
            "quantity_requested": 4,
            "status": "processing",
        });
        let req = StockOutRequest::from_value(&v).expect("should parse");
        assert_eq!(req.product_name, "Unknown Product");
        assert_eq!(req.status, RequestStatus::Processing);
        assert_eq!(req.revision, 0);
    }

    #[test]
    fn test_from_value_rejects_non_positive_quantity() {
        let v = serde_json::json!({ "id": "so-3", "quantityRequested": 0 });
        assert!(StockOutRequest::from_value(&v).is_none());

        let v = serde_json::json!({ "id": "so-4", "quantityRequested": -2 });
        assert!(StockOutRequest::from_value(&v).is_none());
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        let v = serde_json::json!({ "id": "so-5", "quantityRequested": 5 });
        let req = StockOutRequest::from_value(&v).unwrap();
        assert_eq!(req.remaining(0), 5);
        assert_eq!(req.remaining(3), 2);
        assert_eq!(req.remaining(5), 0);
        assert_eq!(req.remaining(9), 0);
    }
}
