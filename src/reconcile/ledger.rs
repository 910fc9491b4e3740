//! Deduction ledger: the record of confirmed deductions for one request.
//!
//! Entries are keyed by barcode (falling back to batch item id) and kept in
//! confirmation order for display. Every mutation is appended to the
//! `ledger_events` table as a session-recovery log, so closing and
//! reopening the reconciliation screen for the same request reconstructs
//! the ledger without loss — and the log doubles as an audit trail.
//!
//! The ledger is the last line of defense for the quantity invariant:
//! `confirm` re-checks `sum(quantities) <= quantityRequested` before
//! touching storage or memory, regardless of what the caller validated.

use chrono::Utc;
use rusqlite::params;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;
use crate::reconcile::types::{
    CandidateItem, DeductedBatch, ReconcileError, UNKNOWN_LOCATION, UNKNOWN_PRODUCT,
};
use crate::stockout::StockOutRequest;

/// Confirmed deductions for one stock-out request.
#[derive(Debug, Clone)]
pub struct DeductionLedger {
    request_id: String,
    entries: Vec<DeductedBatch>,
}

impl DeductionLedger {
    /// Empty ledger for a request.
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            entries: Vec::new(),
        }
    }

    /// Rebuild the ledger for a request by replaying its persisted event
    /// log in insertion order.
    pub fn load(db: &DbState, request_id: &str) -> Result<Self, ReconcileError> {
        let conn = db
            .conn
            .lock()
            .map_err(|e| ReconcileError::Storage(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT event_type, entry_key, barcode, batch_item_id, product_name,
                        batch_number, location_name, quantity, created_at
                 FROM ledger_events
                 WHERE request_id = ?1
                 ORDER BY id",
            )
            .map_err(|e| ReconcileError::Storage(format!("prepare replay: {e}")))?;

        type EventRow = (
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            i64,
            String,
        );

        let rows = stmt
            .query_map(params![request_id], |row| {
                Ok::<EventRow, _>((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })
            .map_err(|e| ReconcileError::Storage(format!("replay query: {e}")))?;

        let mut ledger = Self::new(request_id);
        for row in rows {
            let (
                event_type,
                entry_key,
                barcode,
                batch_item_id,
                product_name,
                batch_number,
                location_name,
                quantity,
                created_at,
            ) = row.map_err(|e| ReconcileError::Storage(format!("replay row: {e}")))?;

            match event_type.as_str() {
                "confirm" => {
                    if let Some(entry) = ledger.entries.iter_mut().find(|e| e.entry_key() == entry_key)
                    {
                        entry.quantity_deducted += quantity;
                        entry.timestamp = created_at;
                    } else {
                        ledger.entries.push(DeductedBatch {
                            id: Uuid::new_v4().to_string(),
                            batch_item_id: batch_item_id.unwrap_or_default(),
                            barcode: barcode.unwrap_or_default(),
                            product_name: product_name
                                .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
                            batch_number,
                            location_name: location_name
                                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
                            quantity_deducted: quantity,
                            timestamp: created_at,
                        });
                    }
                }
                "remove" => {
                    ledger.entries.retain(|e| e.entry_key() != entry_key);
                }
                other => {
                    return Err(ReconcileError::Storage(format!(
                        "unknown ledger event type: {other}"
                    )));
                }
            }
        }

        Ok(ledger)
    }

    // -----------------------------------------------------------------------
    // Read API
    // -----------------------------------------------------------------------

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Entries in confirmation order.
    pub fn entries(&self) -> &[DeductedBatch] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&DeductedBatch> {
        self.entries.iter().find(|e| e.entry_key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all confirmed deductions.
    pub fn total_deducted(&self) -> i64 {
        self.entries.iter().map(|e| e.quantity_deducted).sum()
    }

    /// Quantity still to fulfill for `request`, clamped at zero.
    pub fn remaining_for(&self, request: &StockOutRequest) -> i64 {
        request.remaining(self.total_deducted())
    }

    /// The set of keys already confirmed in this session.
    pub fn scanned_barcodes(&self) -> HashSet<String> {
        self.entries
            .iter()
            .map(|e| e.entry_key().to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Record a confirmed deduction of `quantity` units from `candidate`'s
    /// box, merging into an existing entry for the same key.
    ///
    /// Rejects before any mutation when the quantity is out of range for
    /// the box or would push the ledger past the requested total. The
    /// event row is persisted before memory is updated, so a storage
    /// failure leaves the ledger unchanged.
    pub fn confirm(
        &mut self,
        db: &DbState,
        candidate: &CandidateItem,
        quantity: i64,
        request: &StockOutRequest,
    ) -> Result<&DeductedBatch, ReconcileError> {
        if quantity < 1 {
            return Err(ReconcileError::Invalid(
                "Quantity must be at least 1".to_string(),
            ));
        }
        if quantity > candidate.available_quantity {
            return Err(ReconcileError::Invalid(format!(
                "Only {} available in this box",
                candidate.available_quantity
            )));
        }
        let total = self.total_deducted();
        if total + quantity > request.quantity_requested {
            return Err(ReconcileError::QuantityExceeded {
                attempted: quantity,
                deducted: total,
                requested: request.quantity_requested,
            });
        }

        let now = Utc::now().to_rfc3339();
        self.append_event(db, "confirm", candidate.entry_key(), candidate, quantity, &now)?;

        let key = candidate.entry_key().to_string();
        let idx = match self.entries.iter().position(|e| e.entry_key() == key) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.quantity_deducted += quantity;
                entry.timestamp = now;
                idx
            }
            None => {
                self.entries.push(DeductedBatch {
                    id: Uuid::new_v4().to_string(),
                    batch_item_id: candidate.batch_item_id.clone(),
                    barcode: candidate.barcode.clone(),
                    product_name: candidate.product_name.clone(),
                    batch_number: candidate.batch_number.clone(),
                    location_name: candidate.location_name.clone(),
                    quantity_deducted: quantity,
                    timestamp: now,
                });
                self.entries.len() - 1
            }
        };

        let entry = &self.entries[idx];
        info!(
            request_id = %self.request_id,
            key = %entry.entry_key(),
            quantity = quantity,
            entry_total = entry.quantity_deducted,
            "Deduction recorded"
        );
        Ok(entry)
    }

    /// Reverse one entry (operator undo). Returns the removed entry so the
    /// caller can report the quantity returned to the request.
    pub fn remove(&mut self, db: &DbState, key: &str) -> Result<DeductedBatch, ReconcileError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.entry_key() == key)
            .ok_or_else(|| {
                ReconcileError::Invalid(format!("No ledger entry for barcode {key}"))
            })?;

        let now = Utc::now().to_rfc3339();
        {
            let entry = &self.entries[idx];
            self.append_removal_event(db, entry, &now)?;
        }
        let entry = self.entries.remove(idx);

        info!(
            request_id = %self.request_id,
            key = %entry.entry_key(),
            quantity = entry.quantity_deducted,
            "Deduction removed"
        );
        Ok(entry)
    }

    /// Delete the persisted event log for a request (after a successful
    /// commit, or when the operator abandons the session).
    pub fn clear_persisted(db: &DbState, request_id: &str) -> Result<(), ReconcileError> {
        let conn = db
            .conn
            .lock()
            .map_err(|e| ReconcileError::Storage(e.to_string()))?;
        conn.execute(
            "DELETE FROM ledger_events WHERE request_id = ?1",
            params![request_id],
        )
        .map_err(|e| ReconcileError::Storage(format!("clear ledger: {e}")))?;
        Ok(())
    }

    fn append_event(
        &self,
        db: &DbState,
        event_type: &str,
        entry_key: &str,
        candidate: &CandidateItem,
        quantity: i64,
        created_at: &str,
    ) -> Result<(), ReconcileError> {
        let conn = db
            .conn
            .lock()
            .map_err(|e| ReconcileError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO ledger_events (
                request_id, event_type, entry_key, barcode, batch_item_id,
                product_name, batch_number, location_name, quantity, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.request_id,
                event_type,
                entry_key,
                candidate.barcode,
                candidate.batch_item_id,
                candidate.product_name,
                candidate.batch_number,
                candidate.location_name,
                quantity,
                created_at,
            ],
        )
        .map_err(|e| ReconcileError::Storage(format!("append ledger event: {e}")))?;
        Ok(())
    }

    fn append_removal_event(
        &self,
        db: &DbState,
        entry: &DeductedBatch,
        created_at: &str,
    ) -> Result<(), ReconcileError> {
        let conn = db
            .conn
            .lock()
            .map_err(|e| ReconcileError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO ledger_events (
                request_id, event_type, entry_key, barcode, batch_item_id,
                product_name, batch_number, location_name, quantity, created_at
            ) VALUES (?1, 'remove', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.request_id,
                entry.entry_key(),
                entry.barcode,
                entry.batch_item_id,
                entry.product_name,
                entry.batch_number,
                entry.location_name,
                entry.quantity_deducted,
                created_at,
            ],
        )
        .map_err(|e| ReconcileError::Storage(format!("append removal event: {e}")))?;
        Ok(())
    }

    /// Insert an entry directly, bypassing persistence. Test-only seam for
    /// validation tests that need a pre-populated ledger.
    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, candidate: &CandidateItem, quantity: i64) {
        self.entries.push(DeductedBatch {
            id: Uuid::new_v4().to_string(),
            batch_item_id: candidate.batch_item_id.clone(),
            barcode: candidate.barcode.clone(),
            product_name: candidate.product_name.clone(),
            batch_number: candidate.batch_number.clone(),
            location_name: candidate.location_name.clone(),
            quantity_deducted: quantity,
            timestamp: Utc::now().to_rfc3339(),
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
