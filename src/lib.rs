//! The Small WMS - Warehouse backend
//!
//! Backend library for the warehouse terminal: the barcode-driven
//! stock-out reconciliation engine ([`reconcile`]), the hosted-backend API
//! client ([`api`]), the local SQLite cache that makes sessions survive a
//! restart ([`db`]), credential storage ([`storage`]), and the serial
//! scanner driver ([`scanner`]). The desktop shell renders state and calls
//! into [`reconcile::ScanSession`]; everything stateful lives here.

use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod db;
pub mod inventory;
pub mod reconcile;
pub mod scanner;
pub mod stockout;
pub mod storage;

pub use api::WarehouseApi;
pub use reconcile::{
    CandidateItem, CommitSummary, DeductedBatch, DeductionLedger, ReconcileError, ScanOutcome,
    ScanSession, SessionState,
};
pub use stockout::{RequestStatus, StockOutRequest};

/// Initialize structured logging (console + rolling daily file).
///
/// Call once at shell startup, before anything else logs. The flush guard
/// is intentionally leaked since the process logs until exit.
pub fn init_logging(log_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,the_small_wms_lib=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "wms");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    std::mem::forget(guard);

    info!("Starting The Small WMS v{}", env!("CARGO_PKG_VERSION"));
}

// ---------------------------------------------------------------------------
// JSON payload helpers
// ---------------------------------------------------------------------------

/// First non-empty string under any of `keys`.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First integer under any of `keys`.
pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_str_tries_keys_in_order() {
        let v = serde_json::json!({ "productId": "p-1", "product_id": "p-2" });
        assert_eq!(
            value_str(&v, &["productId", "product_id"]).as_deref(),
            Some("p-1")
        );
        assert_eq!(value_str(&v, &["missing", "product_id"]).as_deref(), Some("p-2"));
        assert_eq!(value_str(&v, &["missing"]), None);
    }

    #[test]
    fn test_value_str_skips_blank_strings() {
        let v = serde_json::json!({ "name": "   ", "fallback": "ok" });
        assert_eq!(value_str(&v, &["name", "fallback"]).as_deref(), Some("ok"));
    }

    #[test]
    fn test_value_i64() {
        let v = serde_json::json!({ "quantity": 7, "text": "8" });
        assert_eq!(value_i64(&v, &["quantity"]), Some(7));
        assert_eq!(value_i64(&v, &["text"]), None, "strings are not coerced");
    }
}
