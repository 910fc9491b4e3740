//! Shared types for the reconciliation engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fallback product name when the backend row has none.
pub const UNKNOWN_PRODUCT: &str = "Unknown Product";

/// Fallback location name when the backend row has none.
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

// ---------------------------------------------------------------------------
// Candidate item
// ---------------------------------------------------------------------------

/// The resolved representation of a single scanned physical box.
///
/// Transient: exists only between resolution and confirmation (or
/// rejection), and is never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub barcode: String,
    pub batch_item_id: String,
    pub product_id: Option<String>,
    pub product_name: String,
    pub batch_number: Option<String>,
    pub location_name: String,
    /// Quantity physically present in the box at resolution time. May be
    /// stale by confirmation time; the commit coordinator re-reads.
    pub available_quantity: i64,
    pub status: Option<String>,
}

impl CandidateItem {
    /// Ledger key for this candidate: the barcode, or the batch item id
    /// when the row carries no barcode.
    pub fn entry_key(&self) -> &str {
        if self.barcode.is_empty() {
            &self.batch_item_id
        } else {
            &self.barcode
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger entry
// ---------------------------------------------------------------------------

/// A confirmed, operator-approved deduction against one box.
///
/// Created only via confirmation. Re-confirming the same barcode merges
/// into the existing entry (quantity accumulates, timestamp refreshes);
/// an entry is removed only by explicit operator undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductedBatch {
    pub id: String,
    pub batch_item_id: String,
    pub barcode: String,
    pub product_name: String,
    pub batch_number: Option<String>,
    pub location_name: String,
    pub quantity_deducted: i64,
    /// RFC-3339 UTC time of the latest confirmation merged into this entry.
    pub timestamp: String,
}

impl DeductedBatch {
    /// Ledger key: barcode, falling back to the batch item id.
    pub fn entry_key(&self) -> &str {
        if self.barcode.is_empty() {
            &self.batch_item_id
        } else {
            &self.barcode
        }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Errors surfaced by the reconciliation engine.
///
/// Every variant carries a message specific enough for an operator to act
/// on mid-scan (the mismatched product names, the exact exceeded quantity,
/// the count of malformed entries) rather than a generic failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// The scanned barcode matched nothing in the consolidated view, the
    /// barcode registry, or the demo namespace.
    #[error("No item found for barcode {barcode}")]
    NotFound { barcode: String },

    /// A validation rule rejected the candidate. Recovered locally: the
    /// reason is shown and the session returns to idle with no mutation.
    #[error("{0}")]
    Invalid(String),

    /// Confirming this quantity would push the ledger past the requested
    /// total. Rejected before any entry is written.
    #[error("Deducting {attempted} would exceed the requested quantity {requested} (already deducted {deducted})")]
    QuantityExceeded {
        attempted: i64,
        deducted: i64,
        requested: i64,
    },

    /// A commit precondition failed; nothing was written.
    #[error("Cannot complete request: {0}")]
    CommitPrecondition(String),

    /// The commit loop failed partway through its inventory writes. The
    /// applied entries are durable on the backend; the request stays open
    /// and a retry re-stages from current quantities.
    #[error("Commit failed after {applied} of {total} inventory writes: {reason}")]
    CommitPartialFailure {
        applied: usize,
        total: usize,
        reason: String,
    },

    /// Local ledger storage failed.
    #[error("Ledger storage error: {0}")]
    Storage(String),

    /// The hosted backend returned an error.
    #[error("Warehouse backend error: {0}")]
    Backend(String),
}

// ===========================================================================
// Tests
// ===========================================================================
