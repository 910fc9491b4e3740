//! Barcode resolution: raw scanned string -> candidate inventory item.
//!
//! Lookup strategies are tried in a fixed order, each only when the
//! previous one yields nothing:
//!
//! 1. Consolidated item-lookup view by exact barcode (single round trip,
//!    authoritative).
//! 2. Barcode registry by exact match, then the batch-item table by the
//!    registered box id, then the product catalog for the display name.
//! 3. Demo namespace: barcodes with the `DEMO-` prefix synthesize a
//!    candidate from the request's own product data. Only honored when the
//!    terminal explicitly enables demo fixtures.
//!
//! Resolution performs no mutation and is idempotent; the scan session
//! guarantees at most one outstanding resolution per session.

use tracing::{debug, info};

use crate::inventory::InventoryBackend;
use crate::reconcile::types::{CandidateItem, ReconcileError, UNKNOWN_LOCATION, UNKNOWN_PRODUCT};
use crate::stockout::StockOutRequest;

/// Barcodes in this namespace are demo/training fixtures, not inventory.
pub const DEMO_BARCODE_PREFIX: &str = "DEMO-";

/// Resolve a raw scanned string to a candidate item.
///
/// Backend transport failures propagate as [`ReconcileError::Backend`];
/// an exhausted strategy chain is [`ReconcileError::NotFound`].
pub async fn resolve(
    backend: &dyn InventoryBackend,
    raw_barcode: &str,
    request: &StockOutRequest,
    allow_demo: bool,
) -> Result<CandidateItem, ReconcileError> {
    let barcode = raw_barcode.trim();

    // Strategy 1: consolidated view
    if let Some(row) = backend
        .lookup_item_by_barcode(barcode)
        .await
        .map_err(ReconcileError::Backend)?
    {
        debug!(barcode, "resolved via consolidated view");
        return Ok(CandidateItem {
            barcode: row.barcode.unwrap_or_else(|| barcode.to_string()),
            batch_item_id: row.batch_item_id,
            product_id: row.product_id,
            product_name: normalize_name(row.product_name),
            batch_number: row.batch_number,
            location_name: normalize_location(row.location_name),
            available_quantity: normalize_quantity(row.quantity),
            status: row.status,
        });
    }

    // Strategy 2: barcode registry -> batch item -> product name
    if let Some(reg) = backend
        .lookup_barcode_registry(barcode)
        .await
        .map_err(ReconcileError::Backend)?
    {
        if let Some(batch) = backend
            .lookup_batch_item_by_box(&reg.box_id)
            .await
            .map_err(ReconcileError::Backend)?
        {
            let product_id = batch.product_id.clone().or(reg.product_id);
            let product_name = match &product_id {
                Some(pid) => backend
                    .lookup_product(pid)
                    .await
                    .map_err(ReconcileError::Backend)?
                    .and_then(|p| p.name),
                None => None,
            };

            debug!(barcode, box_id = %reg.box_id, "resolved via barcode registry");
            return Ok(CandidateItem {
                barcode: barcode.to_string(),
                batch_item_id: batch.id,
                product_id,
                product_name: normalize_name(product_name),
                batch_number: batch.batch_number,
                location_name: normalize_location(batch.location_name),
                available_quantity: normalize_quantity(batch.quantity),
                status: batch.status,
            });
        }
    }

    // Strategy 3: demo namespace, synthesized from the request itself
    if allow_demo && barcode.starts_with(DEMO_BARCODE_PREFIX) {
        info!(barcode, "synthesizing demo candidate");
        return Ok(CandidateItem {
            barcode: barcode.to_string(),
            batch_item_id: format!("demo-{barcode}"),
            product_id: request.product_id.clone(),
            product_name: request.product_name.clone(),
            batch_number: Some("DEMO".to_string()),
            location_name: "Demo Location".to_string(),
            available_quantity: request.quantity_requested.max(1),
            status: None,
        });
    }

    Err(ReconcileError::NotFound {
        barcode: barcode.to_string(),
    })
}

/// Missing product name -> "Unknown Product".
fn normalize_name(name: Option<String>) -> String {
    name.filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string())
}

/// Missing location -> "Unknown Location".
fn normalize_location(name: Option<String>) -> String {
    name.filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string())
}

/// Missing or negative quantity floors at 1; an explicit zero is kept so
/// validation can reject the empty box.
fn normalize_quantity(quantity: Option<i64>) -> i64 {
    match quantity {
        Some(q) if q >= 0 => q,
        _ => 1,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::mock::MockInventory;
    use crate::inventory::{BarcodeRegistryRow, BatchItemRow, ConsolidatedItemRow, ProductRow};

    fn request() -> StockOutRequest {
        StockOutRequest::from_value(&serde_json::json!({
            "id": "so-1",
            "productId": "p-1",
            "productName": "Blue Widget",
            "quantityRequested": 10,
        }))
        .unwrap()
    }

    fn consolidated(batch_item_id: &str, quantity: Option<i64>) -> ConsolidatedItemRow {
        ConsolidatedItemRow {
            batch_item_id: batch_item_id.to_string(),
            barcode: None,
            product_id: Some("p-1".to_string()),
            product_name: Some("Blue Widget".to_string()),
            batch_number: Some("B-001".to_string()),
            location_name: Some("Aisle 3".to_string()),
            quantity,
            status: Some("active".to_string()),
        }
    }

    #[tokio::test]
    async fn test_consolidated_view_wins() {
        let backend =
            MockInventory::new().with_consolidated("BC-1", consolidated("bi-1", Some(6)));

        let c = resolve(&backend, "BC-1", &request(), false).await.unwrap();
        assert_eq!(c.batch_item_id, "bi-1");
        assert_eq!(c.barcode, "BC-1");
        assert_eq!(c.available_quantity, 6);
        assert_eq!(c.product_name, "Blue Widget");
    }

    #[tokio::test]
    async fn test_registry_fallback_chains_box_and_product() {
        let mut backend = MockInventory::new();
        backend.registry.insert(
            "BC-2".to_string(),
            BarcodeRegistryRow {
                box_id: "box-9".to_string(),
                product_id: None,
            },
        );
        backend.batch_items.insert(
            "box-9".to_string(),
            BatchItemRow {
                id: "bi-9".to_string(),
                product_id: Some("p-1".to_string()),
                batch_number: Some("B-009".to_string()),
                location_name: None,
                quantity: Some(4),
                status: None,
            },
        );
        backend.products.insert(
            "p-1".to_string(),
            ProductRow {
                id: "p-1".to_string(),
                name: Some("Blue Widget".to_string()),
            },
        );

        let c = resolve(&backend, "BC-2", &request(), false).await.unwrap();
        assert_eq!(c.batch_item_id, "bi-9");
        assert_eq!(c.product_name, "Blue Widget");
        assert_eq!(c.location_name, UNKNOWN_LOCATION);
        assert_eq!(c.available_quantity, 4);
    }

    #[tokio::test]
    async fn test_unresolvable_barcode_is_not_found() {
        let backend = MockInventory::new();
        let err = resolve(&backend, "BC-3", &request(), false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReconcileError::NotFound {
                barcode: "BC-3".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_demo_prefix_requires_opt_in() {
        let backend = MockInventory::new();
        let req = request();

        let err = resolve(&backend, "DEMO-1", &req, false).await.unwrap_err();
        assert!(matches!(err, ReconcileError::NotFound { .. }));

        let c = resolve(&backend, "DEMO-1", &req, true).await.unwrap();
        assert_eq!(c.product_id.as_deref(), Some("p-1"));
        assert_eq!(c.product_name, "Blue Widget");
        assert_eq!(c.available_quantity, 10);
    }

    #[tokio::test]
    async fn test_normalization_of_missing_fields() {
        let row = ConsolidatedItemRow {
            batch_item_id: "bi-1".to_string(),
            barcode: None,
            product_id: None,
            product_name: None,
            batch_number: None,
            location_name: Some("  ".to_string()),
            quantity: None,
            status: None,
        };
        let backend = MockInventory::new().with_consolidated("BC-4", row);

        let c = resolve(&backend, "BC-4", &request(), false).await.unwrap();
        assert_eq!(c.product_name, UNKNOWN_PRODUCT);
        assert_eq!(c.location_name, UNKNOWN_LOCATION);
        assert_eq!(c.available_quantity, 1, "missing quantity floors at 1");
    }

    #[tokio::test]
    async fn test_zero_quantity_is_preserved_for_validation() {
        let backend =
            MockInventory::new().with_consolidated("BC-5", consolidated("bi-5", Some(0)));
        let c = resolve(&backend, "BC-5", &request(), false).await.unwrap();
        assert_eq!(c.available_quantity, 0);
    }

    #[test]
    fn test_negative_quantity_floors_at_one() {
        assert_eq!(normalize_quantity(Some(-3)), 1);
        assert_eq!(normalize_quantity(None), 1);
        assert_eq!(normalize_quantity(Some(5)), 5);
    }
}
