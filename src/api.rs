//! Warehouse backend API client.
//!
//! Provides authenticated HTTP communication with the hosted warehouse
//! backend: connectivity testing, stock-out request fetches, item lookups,
//! and the inventory writes issued at commit time.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::inventory::{
    BarcodeRegistryRow, BatchItemRow, ConsolidatedItemRow, InventoryBackend, ProductRow,
};
use crate::stockout::StockOutRequest;
use crate::value_i64;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the admin dashboard URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Connection-string decoding
// ---------------------------------------------------------------------------

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

pub fn extract_api_key_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("key")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_admin_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("url")
                .and_then(Value::as_str)
                .map(normalize_admin_url)
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_warehouse_id_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("wid")
                .or_else(|| v.get("warehouseId"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach warehouse backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid warehouse backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Warehouse backend endpoint not found".to_string(),
        409 => "Request was modified by another terminal".to_string(),
        s if s >= 500 => format!("Warehouse backend server error (HTTP {s})"),
        s => format!("Unexpected response from warehouse backend (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Test connectivity to the warehouse backend with a lightweight health-check.
pub async fn test_connectivity(admin_url: &str, api_key: &str) -> ConnectivityResult {
    let url = normalize_admin_url(admin_url);
    let resolved_api_key =
        extract_api_key_from_connection_string(api_key).unwrap_or_else(|| api_key.to_string());
    let health_url = format!("{url}/api/health");

    let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(format!("Failed to create HTTP client: {e}")),
            };
        }
    };

    let start = Instant::now();

    let resp = match client
        .get(&health_url)
        .header("X-WMS-API-Key", resolved_api_key)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(friendly_error(&url, &e)),
            };
        }
    };

    let latency = start.elapsed().as_millis() as u64;
    let status = resp.status();

    if status.is_success() {
        info!(latency_ms = latency, "connectivity test passed");
        ConnectivityResult {
            success: true,
            latency_ms: Some(latency),
            error: None,
        }
    } else {
        ConnectivityResult {
            success: false,
            latency_ms: Some(latency),
            error: Some(status_error(status)),
        }
    }
}

// ---------------------------------------------------------------------------
// Generic authenticated fetch
// ---------------------------------------------------------------------------

/// Perform an authenticated HTTP request to the warehouse backend.
///
/// `path` should include the leading slash, e.g. `/api/wms/stockouts`.
/// `method` is an HTTP verb string: "GET", "POST", "PUT", "PATCH", "DELETE".
pub async fn fetch_from_admin(
    admin_url: &str,
    api_key: &str,
    path: &str,
    method: &str,
    body: Option<Value>,
) -> Result<Value, String> {
    let base = normalize_admin_url(admin_url);
    let resolved_api_key =
        extract_api_key_from_connection_string(api_key).unwrap_or_else(|| api_key.to_string());
    let full_url = format!("{base}{path}");

    let http_method: Method = method
        .to_uppercase()
        .parse()
        .map_err(|_| format!("Invalid HTTP method: {method}"))?;

    let client = Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

    // Include warehouse_id header — required by verifyWmsAuth on the admin side
    let mut warehouse_id = crate::storage::get_credential("warehouse_id").unwrap_or_default();
    if let Some(decoded_wid) = extract_warehouse_id_from_connection_string(api_key) {
        let existing = warehouse_id.trim();
        if existing.is_empty() || existing != decoded_wid {
            if !existing.is_empty() && existing != decoded_wid {
                warn!(
                    stored_warehouse_id = existing,
                    decoded_warehouse_id = %decoded_wid,
                    "warehouse_id mismatch detected, preferring decoded id from connection string"
                );
            }
            warehouse_id = decoded_wid.clone();
            let _ = crate::storage::set_credential("warehouse_id", &decoded_wid);
        }
    }

    let mut req = client
        .request(http_method, &full_url)
        .header("X-WMS-API-Key", resolved_api_key)
        .header("x-warehouse-id", &warehouse_id)
        .header("Content-Type", "application/json");

    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = req.send().await.map_err(|e| friendly_error(&base, &e))?;
    let status = resp.status();

    if !status.is_success() {
        // Preserve validation details for diagnostics.
        let body_text = resp.text().await.unwrap_or_default();
        let detail = if let Ok(json) = serde_json::from_str::<Value>(&body_text) {
            let message = json
                .get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| status_error(status));
            format!("{message} (HTTP {})", status.as_u16())
        } else if !body_text.trim().is_empty() {
            format!(
                "{} (HTTP {}): {}",
                status_error(status),
                status.as_u16(),
                body_text.trim()
            )
        } else {
            format!("{} (HTTP {})", status_error(status), status.as_u16())
        };
        return Err(detail);
    }

    // Return the JSON body, or null for empty 204 responses.
    let body_text = resp.text().await.unwrap_or_default();
    if body_text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body_text).map_err(|e| format!("Invalid JSON from warehouse backend: {e}"))
}

// ---------------------------------------------------------------------------
// Warehouse API client
// ---------------------------------------------------------------------------

/// Authenticated client for the hosted warehouse backend.
///
/// Lookup endpoints always answer 200 with an envelope (`{"item": null}`
/// when nothing matches), so a missing row is `Ok(None)` rather than an
/// HTTP error.
pub struct WarehouseApi {
    admin_url: String,
    api_key: String,
}

impl WarehouseApi {
    pub fn new(admin_url: &str, api_key: &str) -> Self {
        Self {
            admin_url: normalize_admin_url(admin_url),
            api_key: api_key.to_string(),
        }
    }

    /// Build a client from the credential store. `None` when the terminal
    /// has not been onboarded yet.
    pub fn from_storage() -> Option<Self> {
        let admin_url = crate::storage::get_credential("admin_dashboard_url")?;
        let api_key = crate::storage::get_credential("wms_api_key")?;
        Some(Self::new(&admin_url, &api_key))
    }

    async fn get(&self, path: &str) -> Result<Value, String> {
        fetch_from_admin(&self.admin_url, &self.api_key, path, "GET", None).await
    }

    /// Fetch the pending stock-out requests assigned to this warehouse.
    pub async fn list_pending_requests(&self) -> Result<Vec<StockOutRequest>, String> {
        let resp = self.get("/api/wms/stockouts?status=pending").await?;
        let rows = resp
            .get("requests")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows.iter().filter_map(StockOutRequest::from_value).collect())
    }

    /// Fetch a single stock-out request by id.
    pub async fn fetch_request(&self, request_id: &str) -> Result<Option<StockOutRequest>, String> {
        let resp = self
            .get(&format!("/api/wms/stockouts/{request_id}"))
            .await?;
        Ok(resp
            .get("request")
            .filter(|v| !v.is_null())
            .and_then(StockOutRequest::from_value))
    }
}

#[async_trait::async_trait]
impl InventoryBackend for WarehouseApi {
    async fn lookup_item_by_barcode(
        &self,
        barcode: &str,
    ) -> Result<Option<ConsolidatedItemRow>, String> {
        let resp = self
            .get(&format!("/api/wms/items/lookup?barcode={barcode}"))
            .await?;
        Ok(resp
            .get("item")
            .filter(|v| !v.is_null())
            .and_then(ConsolidatedItemRow::from_value))
    }

    async fn lookup_barcode_registry(
        &self,
        barcode: &str,
    ) -> Result<Option<BarcodeRegistryRow>, String> {
        let resp = self.get(&format!("/api/wms/barcodes/{barcode}")).await?;
        Ok(resp
            .get("entry")
            .filter(|v| !v.is_null())
            .and_then(BarcodeRegistryRow::from_value))
    }

    async fn lookup_batch_item_by_box(
        &self,
        box_id: &str,
    ) -> Result<Option<BatchItemRow>, String> {
        let resp = self
            .get(&format!("/api/wms/batch-items/by-box/{box_id}"))
            .await?;
        Ok(resp
            .get("batchItem")
            .filter(|v| !v.is_null())
            .and_then(BatchItemRow::from_value))
    }

    async fn lookup_product(&self, product_id: &str) -> Result<Option<ProductRow>, String> {
        let resp = self.get(&format!("/api/wms/products/{product_id}")).await?;
        Ok(resp
            .get("product")
            .filter(|v| !v.is_null())
            .and_then(ProductRow::from_value))
    }

    async fn read_batch_item_quantity(&self, batch_item_id: &str) -> Result<i64, String> {
        let resp = self
            .get(&format!("/api/wms/batch-items/{batch_item_id}/quantity"))
            .await?;
        value_i64(&resp, &["quantity"])
            .ok_or_else(|| format!("Batch item not found: {batch_item_id}"))
    }

    async fn write_batch_item_quantity(
        &self,
        batch_item_id: &str,
        new_quantity: i64,
    ) -> Result<(), String> {
        let body = serde_json::json!({ "quantity": new_quantity });
        fetch_from_admin(
            &self.admin_url,
            &self.api_key,
            &format!("/api/wms/batch-items/{batch_item_id}/quantity"),
            "PATCH",
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn mark_request_completed(
        &self,
        request_id: &str,
        actor_id: &str,
        completed_at: &str,
        expected_revision: i64,
    ) -> Result<(), String> {
        let body = serde_json::json!({
            "processedBy": actor_id,
            "completedAt": completed_at,
            "expectedRevision": expected_revision,
        });
        fetch_from_admin(
            &self.admin_url,
            &self.api_key,
            &format!("/api/wms/stockouts/{request_id}/complete"),
            "POST",
            Some(body),
        )
        .await?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_admin_url() {
        assert_eq!(
            normalize_admin_url("admin.thesmall.app"),
            "https://admin.thesmall.app"
        );
        assert_eq!(
            normalize_admin_url("https://admin.thesmall.app/"),
            "https://admin.thesmall.app"
        );
        assert_eq!(
            normalize_admin_url("https://admin.thesmall.app/api/"),
            "https://admin.thesmall.app"
        );
        assert_eq!(
            normalize_admin_url("localhost:3000"),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_connection_string_plain_json() {
        let raw = r#"{"key": "abc123", "url": "admin.thesmall.app", "wid": "wh-9"}"#;
        assert_eq!(
            extract_api_key_from_connection_string(raw).as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_admin_url_from_connection_string(raw).as_deref(),
            Some("https://admin.thesmall.app")
        );
        assert_eq!(
            extract_warehouse_id_from_connection_string(raw).as_deref(),
            Some("wh-9")
        );
    }

    #[test]
    fn test_connection_string_base64() {
        let payload = r#"{"key":"abc123","url":"https://admin.thesmall.app","wid":"wh-9"}"#;
        let encoded = BASE64_STANDARD.encode(payload);
        // URL-safe variant without padding, as pasted from the dashboard
        let url_safe = encoded.replace('+', "-").replace('/', "_").replace('=', "");

        assert_eq!(
            extract_api_key_from_connection_string(&url_safe).as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_warehouse_id_from_connection_string(&url_safe).as_deref(),
            Some("wh-9")
        );
    }

    #[test]
    fn test_connection_string_rejects_garbage() {
        assert_eq!(extract_api_key_from_connection_string("short"), None);
        assert_eq!(extract_api_key_from_connection_string(""), None);
        assert_eq!(
            extract_api_key_from_connection_string("not-base64-at-all!!!!!"),
            None
        );
    }

    #[test]
    fn test_status_error_messages() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED),
            "API key is invalid or expired"
        );
        assert_eq!(
            status_error(StatusCode::CONFLICT),
            "Request was modified by another terminal"
        );
        assert!(status_error(StatusCode::INTERNAL_SERVER_ERROR).contains("HTTP 500"));
    }
}
