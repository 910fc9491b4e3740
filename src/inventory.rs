//! Inventory backend trait and row types.
//!
//! The reconciliation engine never talks to the hosted backend directly; it
//! goes through [`InventoryBackend`], which names exactly the operations the
//! engine consumes (item lookup, barcode registry, batch-item reads/writes,
//! request completion). The production implementation is
//! [`crate::api::WarehouseApi`]; tests substitute an in-memory double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{value_i64, value_str};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One row of the consolidated item-lookup view: a batch item joined with
/// its product, barcode, and location. Authoritative single-round-trip
/// lookup for a scanned barcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedItemRow {
    pub batch_item_id: String,
    pub barcode: Option<String>,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub batch_number: Option<String>,
    pub location_name: Option<String>,
    pub quantity: Option<i64>,
    pub status: Option<String>,
}

impl ConsolidatedItemRow {
    /// Parse from a backend JSON object. Field names tolerate both
    /// camelCase and snake_case.
    pub fn from_value(v: &Value) -> Option<Self> {
        let batch_item_id = value_str(v, &["batchItemId", "batch_item_id", "id"])?;
        Some(Self {
            batch_item_id,
            barcode: value_str(v, &["barcode"]),
            product_id: value_str(v, &["productId", "product_id"]),
            product_name: value_str(v, &["productName", "product_name"]),
            batch_number: value_str(v, &["batchNumber", "batch_number"]),
            location_name: value_str(v, &["locationName", "location_name"]),
            quantity: value_i64(v, &["quantity", "availableQuantity", "available_quantity"]),
            status: value_str(v, &["status"]),
        })
    }
}

/// A raw barcode-registry row: maps a printed barcode to its box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarcodeRegistryRow {
    pub box_id: String,
    pub product_id: Option<String>,
}

impl BarcodeRegistryRow {
    pub fn from_value(v: &Value) -> Option<Self> {
        let box_id = value_str(v, &["boxId", "box_id"])?;
        Some(Self {
            box_id,
            product_id: value_str(v, &["productId", "product_id"]),
        })
    }
}

/// A batch-item table row (one physical box of a product).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemRow {
    pub id: String,
    pub product_id: Option<String>,
    pub batch_number: Option<String>,
    pub location_name: Option<String>,
    pub quantity: Option<i64>,
    pub status: Option<String>,
}

impl BatchItemRow {
    pub fn from_value(v: &Value) -> Option<Self> {
        let id = value_str(v, &["id", "batchItemId", "batch_item_id"])?;
        Some(Self {
            id,
            product_id: value_str(v, &["productId", "product_id"]),
            batch_number: value_str(v, &["batchNumber", "batch_number"]),
            location_name: value_str(v, &["locationName", "location_name"]),
            quantity: value_i64(v, &["quantity", "availableQuantity", "available_quantity"]),
            status: value_str(v, &["status"]),
        })
    }
}

/// A product catalog row (only what resolution needs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRow {
    pub id: String,
    pub name: Option<String>,
}

impl ProductRow {
    pub fn from_value(v: &Value) -> Option<Self> {
        let id = value_str(v, &["id", "productId", "product_id"])?;
        Some(Self {
            id,
            name: value_str(v, &["name", "productName", "product_name"]),
        })
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Operations the reconciliation engine consumes from the hosted backend.
///
/// All lookups are read-only and idempotent. The two writes
/// (`write_batch_item_quantity`, `mark_request_completed`) are only ever
/// issued by the commit coordinator.
#[async_trait]
pub trait InventoryBackend: Send + Sync {
    /// Consolidated item-lookup view by exact barcode.
    async fn lookup_item_by_barcode(
        &self,
        barcode: &str,
    ) -> Result<Option<ConsolidatedItemRow>, String>;

    /// Raw barcode-registry table by exact barcode.
    async fn lookup_barcode_registry(
        &self,
        barcode: &str,
    ) -> Result<Option<BarcodeRegistryRow>, String>;

    /// Batch-item table by box identifier.
    async fn lookup_batch_item_by_box(&self, box_id: &str)
        -> Result<Option<BatchItemRow>, String>;

    /// Product catalog by product id.
    async fn lookup_product(&self, product_id: &str) -> Result<Option<ProductRow>, String>;

    /// Current stored quantity of a batch item.
    async fn read_batch_item_quantity(&self, batch_item_id: &str) -> Result<i64, String>;

    /// Overwrite the stored quantity of a batch item.
    async fn write_batch_item_quantity(
        &self,
        batch_item_id: &str,
        new_quantity: i64,
    ) -> Result<(), String>;

    /// Mark a stock-out request completed. `expected_revision` lets the
    /// backend reject a stale writer when two terminals raced on the same
    /// request.
    async fn mark_request_completed(
        &self,
        request_id: &str,
        actor_id: &str,
        completed_at: &str,
        expected_revision: i64,
    ) -> Result<(), String>;
}

// ===========================================================================
// Test double
// ===========================================================================
