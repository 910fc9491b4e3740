//! Commit coordinator: writes the ledger back into inventory and closes
//! the request.
//!
//! The commit runs in two phases. **Stage**: re-read the current stored
//! quantity of every ledger entry's batch item and compute the new
//! quantity — never trusting the quantities cached at resolution time.
//! **Apply**: write all staged quantities, then mark the request completed
//! with the revision this terminal was working from, so the backend rejects
//! a stale writer.
//!
//! A failure during apply leaves entries `1..k` durably written; the
//! request stays open, the ledger is untouched, and the error reports
//! exactly how far the loop got. A retry stages again from the then-current
//! stored quantities.

use chrono::Utc;
use tracing::{info, warn};

use crate::inventory::InventoryBackend;
use crate::reconcile::ledger::DeductionLedger;
use crate::reconcile::types::ReconcileError;
use crate::stockout::StockOutRequest;

/// Result of a successful commit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommitSummary {
    pub request_id: String,
    pub total_deducted: i64,
    pub entries_applied: usize,
    pub completed_at: String,
}

/// One staged inventory write.
struct StagedWrite {
    batch_item_id: String,
    current: i64,
    new_quantity: i64,
}

/// Execute the completion transaction for `request`.
pub async fn commit(
    backend: &dyn InventoryBackend,
    request: &StockOutRequest,
    ledger: &DeductionLedger,
    actor_id: &str,
) -> Result<CommitSummary, ReconcileError> {
    // Preconditions — checked before any write
    let total = ledger.total_deducted();
    if total < request.quantity_requested {
        return Err(ReconcileError::CommitPrecondition(format!(
            "insufficient quantity: {total} of {} deducted",
            request.quantity_requested
        )));
    }

    let missing_barcodes = ledger
        .entries()
        .iter()
        .filter(|e| e.barcode.trim().is_empty())
        .count();
    if missing_barcodes > 0 {
        return Err(ReconcileError::CommitPrecondition(format!(
            "missing barcode on {missing_barcodes} entries"
        )));
    }

    // Stage: read current quantities and compute the new ones
    let mut staged: Vec<StagedWrite> = Vec::with_capacity(ledger.len());
    for entry in ledger.entries() {
        let current = backend
            .read_batch_item_quantity(&entry.batch_item_id)
            .await
            .map_err(|e| {
                ReconcileError::Backend(format!(
                    "failed to read current quantity for {}: {e}",
                    entry.batch_item_id
                ))
            })?;

        if current < entry.quantity_deducted {
            // Physical count drifted below the ledger since resolution;
            // the write clamps at zero rather than going negative.
            warn!(
                batch_item_id = %entry.batch_item_id,
                current = current,
                deducting = entry.quantity_deducted,
                "stored quantity below ledger deduction, clamping at zero"
            );
        }

        staged.push(StagedWrite {
            batch_item_id: entry.batch_item_id.clone(),
            current,
            new_quantity: (current - entry.quantity_deducted).max(0),
        });
    }

    // Apply: write every staged quantity
    let staged_total = staged.len();
    for (applied, write) in staged.iter().enumerate() {
        backend
            .write_batch_item_quantity(&write.batch_item_id, write.new_quantity)
            .await
            .map_err(|reason| ReconcileError::CommitPartialFailure {
                applied,
                total: staged_total,
                reason,
            })?;

        info!(
            batch_item_id = %write.batch_item_id,
            from = write.current,
            to = write.new_quantity,
            "inventory quantity written"
        );
    }

    // Close the request
    let completed_at = Utc::now().to_rfc3339();
    backend
        .mark_request_completed(&request.id, actor_id, &completed_at, request.revision)
        .await
        .map_err(|e| ReconcileError::CommitPartialFailure {
            applied: staged_total,
            total: staged_total,
            reason: format!("inventory updated but completion write failed: {e}"),
        })?;

    info!(
        request_id = %request.id,
        total_deducted = total,
        entries = staged_total,
        processed_by = %actor_id,
        "stock-out request committed"
    );

    Ok(CommitSummary {
        request_id: request.id.clone(),
        total_deducted: total,
        entries_applied: staged_total,
        completed_at,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::mock::MockInventory;
    use crate::reconcile::types::CandidateItem;

    fn request(quantity: i64) -> StockOutRequest {
        StockOutRequest::from_value(&serde_json::json!({
            "id": "so-1",
            "productId": "p-1",
            "productName": "Blue Widget",
            "quantityRequested": quantity,
            "revision": 4,
        }))
        .unwrap()
    }

    fn candidate(barcode: &str, batch_item_id: &str) -> CandidateItem {
        CandidateItem {
            barcode: barcode.to_string(),
            batch_item_id: batch_item_id.to_string(),
            product_id: Some("p-1".to_string()),
            product_name: "Blue Widget".to_string(),
            batch_number: None,
            location_name: "Aisle 3".to_string(),
            available_quantity: 100,
            status: None,
        }
    }

    fn ledger_with(entries: &[(&str, &str, i64)]) -> DeductionLedger {
        let mut ledger = DeductionLedger::new("so-1");
        for (barcode, batch_item_id, qty) in entries {
            ledger.insert_for_test(&candidate(barcode, batch_item_id), *qty);
        }
        ledger
    }

    fn backend_with_quantities(quantities: &[(&str, i64)]) -> MockInventory {
        let backend = MockInventory::new();
        {
            let mut q = backend.quantities.lock().unwrap();
            for (id, qty) in quantities {
                q.insert(id.to_string(), *qty);
            }
        }
        backend
    }

    #[tokio::test]
    async fn test_insufficient_total_aborts_before_any_write() {
        let backend = backend_with_quantities(&[("bi-1", 50)]);
        let ledger = ledger_with(&[("B1", "bi-1", 8)]);

        let err = commit(&backend, &request(10), &ledger, "staff-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::CommitPrecondition(_)));
        assert!(err.to_string().contains("8 of 10"));

        assert_eq!(backend.quantity_of("bi-1"), Some(50), "no write applied");
        assert!(backend.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_barcodes_abort_with_count() {
        let backend = backend_with_quantities(&[("bi-1", 50), ("bi-2", 50)]);
        let ledger = ledger_with(&[("", "bi-1", 5), ("", "bi-2", 5)]);

        let err = commit(&backend, &request(10), &ledger, "staff-1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing barcode on 2 entries"));
    }

    #[tokio::test]
    async fn test_successful_commit_writes_and_completes() {
        let backend = backend_with_quantities(&[("bi-1", 20), ("bi-2", 7)]);
        let ledger = ledger_with(&[("B1", "bi-1", 6), ("B2", "bi-2", 4)]);

        let summary = commit(&backend, &request(10), &ledger, "staff-1")
            .await
            .unwrap();

        assert_eq!(summary.total_deducted, 10);
        assert_eq!(summary.entries_applied, 2);
        assert_eq!(backend.quantity_of("bi-1"), Some(14));
        assert_eq!(backend.quantity_of("bi-2"), Some(3));

        let completed = backend.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        let (req_id, actor, revision) = &completed[0];
        assert_eq!(req_id, "so-1");
        assert_eq!(actor, "staff-1");
        assert_eq!(*revision, 4, "completion carries the working revision");
    }

    #[tokio::test]
    async fn test_drifted_quantity_clamps_at_zero() {
        // The box physically lost stock between resolution and commit
        let backend = backend_with_quantities(&[("bi-1", 3)]);
        let ledger = ledger_with(&[("B1", "bi-1", 5)]);

        commit(&backend, &request(5), &ledger, "staff-1")
            .await
            .unwrap();
        assert_eq!(backend.quantity_of("bi-1"), Some(0));
    }

    #[tokio::test]
    async fn test_partial_failure_reports_progress() {
        let mut backend = backend_with_quantities(&[("bi-1", 20), ("bi-2", 20), ("bi-3", 20)]);
        backend.fail_writes_after = Some(1);
        let ledger = ledger_with(&[("B1", "bi-1", 4), ("B2", "bi-2", 3), ("B3", "bi-3", 3)]);

        let err = commit(&backend, &request(10), &ledger, "staff-1")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReconcileError::CommitPartialFailure {
                applied: 1,
                total: 3,
                reason: "simulated write failure".to_string(),
            }
        );

        // First write landed, the rest did not, and the request stays open
        assert_eq!(backend.quantity_of("bi-1"), Some(16));
        assert_eq!(backend.quantity_of("bi-2"), Some(20));
        assert!(backend.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_restages_from_current_quantities() {
        // First attempt fails at the completion write; the retry must not
        // reuse quantities staged before the first attempt.
        let mut backend = backend_with_quantities(&[("bi-1", 20)]);
        backend.fail_mark_completed = true;
        let ledger = ledger_with(&[("B1", "bi-1", 5)]);

        let err = commit(&backend, &request(5), &ledger, "staff-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::CommitPartialFailure { applied: 1, total: 1, .. }
        ));
        assert_eq!(backend.quantity_of("bi-1"), Some(15));

        // Simulate outside restock before the retry; staging re-reads it.
        backend
            .quantities
            .lock()
            .unwrap()
            .insert("bi-1".to_string(), 40);
        backend.fail_mark_completed = false;

        commit(&backend, &request(5), &ledger, "staff-1")
            .await
            .unwrap();
        assert_eq!(
            backend.quantity_of("bi-1"),
            Some(35),
            "retry stages from the then-current stored quantity"
        );
    }
}
