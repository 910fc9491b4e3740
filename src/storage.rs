//! Secure terminal config storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Holds everything the terminal needs
//! to talk to the hosted warehouse backend: admin URL, warehouse id, and
//! the WMS API key.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};

const SERVICE_NAME: &str = "the-small-wms";

// Credential keys
const KEY_ADMIN_URL: &str = "admin_dashboard_url";
const KEY_WAREHOUSE_ID: &str = "warehouse_id";
const KEY_API_KEY: &str = "wms_api_key";
const KEY_ORG_ID: &str = "organization_id";
const KEY_SUPABASE_URL: &str = "supabase_url";
const KEY_SUPABASE_ANON_KEY: &str = "supabase_anon_key";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_ADMIN_URL,
    KEY_WAREHOUSE_ID,
    KEY_API_KEY,
    KEY_ORG_ID,
    KEY_SUPABASE_URL,
    KEY_SUPABASE_ANON_KEY,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The terminal is considered configured when admin URL, warehouse ID, and
/// API key are all present in the credential store.
pub fn is_configured() -> bool {
    has_credential(KEY_ADMIN_URL) && has_credential(KEY_WAREHOUSE_ID) && has_credential(KEY_API_KEY)
}

/// Return all stored terminal config as a JSON value that matches the shape
/// the frontend expects.
pub fn get_full_config() -> Value {
    serde_json::json!({
        "warehouse_id":      get_credential(KEY_WAREHOUSE_ID),
        "organization_id":   get_credential(KEY_ORG_ID),
        "admin_url":         get_credential(KEY_ADMIN_URL),
        "api_key":           get_credential(KEY_API_KEY),
        "supabase_url":      get_credential(KEY_SUPABASE_URL),
        "supabase_anon_key": get_credential(KEY_SUPABASE_ANON_KEY),
    })
}

/// Store warehouse credentials received during onboarding.
///
/// Expected JSON shape (camelCase, matching the admin dashboard payload):
/// ```json
/// {
///   "warehouseId": "...",
///   "apiKey": "...",
///   "adminUrl": "...",      // optional
///   "organizationId": "..." // optional
/// }
/// ```
///
/// The `apiKey` field may also be a pasted connection string (JSON or
/// base64-encoded JSON with `key`/`url`/`wid` fields), in which case the
/// embedded URL and warehouse id take precedence.
pub fn update_warehouse_credentials(payload: &Value) -> Result<Value, String> {
    let raw_api_key = payload
        .get("apiKey")
        .or_else(|| payload.get("wms_api_key"))
        .and_then(Value::as_str)
        .ok_or("Missing required field: apiKey")?;
    let mut warehouse_id = payload
        .get("warehouseId")
        .or_else(|| payload.get("warehouse_id"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let mut admin_url = payload
        .get("adminDashboardUrl")
        .or_else(|| payload.get("adminUrl"))
        .or_else(|| payload.get("admin_dashboard_url"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut api_key = raw_api_key.trim().to_string();
    if let Some(decoded_key) = crate::api::extract_api_key_from_connection_string(raw_api_key) {
        api_key = decoded_key;
        if let Some(decoded_wid) =
            crate::api::extract_warehouse_id_from_connection_string(raw_api_key)
        {
            warehouse_id = Some(decoded_wid);
        }
        if let Some(decoded_url) = crate::api::extract_admin_url_from_connection_string(raw_api_key)
        {
            admin_url = Some(decoded_url);
        }
    }

    let warehouse_id = warehouse_id.ok_or("Missing required field: warehouseId")?;
    if api_key.trim().is_empty() {
        return Err("Missing required field: apiKey".to_string());
    }

    set_credential(KEY_WAREHOUSE_ID, &warehouse_id)?;
    set_credential(KEY_API_KEY, api_key.trim())?;

    if let Some(url) = admin_url.as_deref() {
        let normalized = crate::api::normalize_admin_url(url);
        if !normalized.trim().is_empty() {
            set_credential(KEY_ADMIN_URL, normalized.trim())?;
        }
    }
    if let Some(oid) = payload
        .get("organizationId")
        .or_else(|| payload.get("organization_id"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_ORG_ID, oid)?;
    }
    if let Some(surl) = payload
        .get("supabaseUrl")
        .or_else(|| payload.get("supabase_url"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_SUPABASE_URL, surl)?;
    }
    if let Some(skey) = payload
        .get("supabaseAnonKey")
        .or_else(|| payload.get("supabase_anon_key"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_SUPABASE_ANON_KEY, skey)?;
    }

    info!(warehouse_id = %warehouse_id, "warehouse credentials updated");
    Ok(serde_json::json!({ "success": true }))
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset – deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;

    static MOCK_STORE: Once = Once::new();

    /// Route all keyring calls to the in-memory mock store. Process-global,
    /// so every test here is `#[serial]`.
    fn use_mock_store() {
        MOCK_STORE.call_once(|| {
            keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        });
    }

    #[test]
    #[serial]
    fn test_unconfigured_by_default() {
        use_mock_store();
        factory_reset().unwrap();
        assert!(!is_configured());
        assert_eq!(get_credential(KEY_API_KEY), None);
    }

    #[test]
    #[serial]
    fn test_update_credentials_plain_fields() {
        use_mock_store();
        factory_reset().unwrap();

        let payload = serde_json::json!({
            "warehouseId": "wh-42",
            "apiKey": "secret-key",
            "adminUrl": "admin.thesmall.app",
        });
        update_warehouse_credentials(&payload).unwrap();

        assert!(is_configured());
        assert_eq!(get_credential(KEY_WAREHOUSE_ID).as_deref(), Some("wh-42"));
        assert_eq!(get_credential(KEY_API_KEY).as_deref(), Some("secret-key"));
        assert_eq!(
            get_credential(KEY_ADMIN_URL).as_deref(),
            Some("https://admin.thesmall.app")
        );
    }

    #[test]
    #[serial]
    fn test_update_credentials_requires_warehouse_id() {
        use_mock_store();
        factory_reset().unwrap();

        let payload = serde_json::json!({ "apiKey": "secret-key" });
        let result = update_warehouse_credentials(&payload);
        assert!(result.is_err());
        assert!(!is_configured());
    }

    #[test]
    #[serial]
    fn test_update_credentials_from_connection_string() {
        use_mock_store();
        factory_reset().unwrap();

        // Connection string as raw JSON (the base64 path is covered in api.rs)
        let conn_str = serde_json::json!({
            "key": "embedded-key",
            "url": "https://admin.thesmall.app",
            "wid": "wh-7",
        })
        .to_string();
        let payload = serde_json::json!({ "apiKey": conn_str });
        update_warehouse_credentials(&payload).unwrap();

        assert_eq!(get_credential(KEY_API_KEY).as_deref(), Some("embedded-key"));
        assert_eq!(get_credential(KEY_WAREHOUSE_ID).as_deref(), Some("wh-7"));
    }

    #[test]
    #[serial]
    fn test_factory_reset_clears_everything() {
        use_mock_store();
        let payload = serde_json::json!({
            "warehouseId": "wh-42",
            "apiKey": "secret-key",
        });
        update_warehouse_credentials(&payload).unwrap();
        assert!(has_credential(KEY_API_KEY));

        factory_reset().unwrap();
        assert!(!has_credential(KEY_API_KEY));
        assert!(!has_credential(KEY_WAREHOUSE_ID));
        assert!(!is_configured());
    }
}
