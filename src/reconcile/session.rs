//! Scan session state machine.
//!
//! Orchestrates one reconciliation session for one stock-out request:
//! gates incoming scans, runs resolution and validation, holds the single
//! pending candidate while the operator confirms a quantity, and hands the
//! finished ledger to the commit coordinator.
//!
//! Session states: idle (scanning enabled) -> resolving (one in-flight
//! lookup) -> awaiting confirmation (scanning disabled) -> back to idle on
//! confirm/cancel; completing while the commit runs. The session is torn
//! down after a successful commit — a new one is started by reopening the
//! screen.

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::inventory::InventoryBackend;
use crate::reconcile::commit::{commit, CommitSummary};
use crate::reconcile::ledger::DeductionLedger;
use crate::reconcile::resolve::resolve;
use crate::reconcile::types::{CandidateItem, DeductedBatch, ReconcileError};
use crate::reconcile::validate;
use crate::stockout::{RequestStatus, StockOutRequest};

/// Window in which a repeated decode of the same barcode is treated as a
/// duplicate hardware emission, not a new scan. Camera and laser scanners
/// commonly fire the same decode several times per trigger pull.
pub const SCAN_DEBOUNCE_MS: i64 = 3000;

/// Where the session currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Resolving,
    AwaitingConfirmation,
    Completing,
}

/// What a call to [`ScanSession::on_scan`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Candidate resolved and validated; the operator must now confirm a
    /// quantity. `max_quantity` is how far the confirmation spinner goes.
    Candidate {
        candidate: CandidateItem,
        default_quantity: i64,
        max_quantity: i64,
    },
    /// The scan was dropped by a session guard without touching state.
    Ignored { reason: String },
}

/// Per-session toggles, read from terminal settings by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    /// Allow a barcode already in the ledger to be scanned again (the new
    /// quantity merges into the existing entry).
    pub allow_rescan: bool,
    /// Honor the `DEMO-` barcode namespace (training mode).
    pub allow_demo_barcodes: bool,
}

#[derive(Debug, Clone)]
struct LastScan {
    barcode: String,
    at_ms: i64,
}

/// One scanning session for one stock-out request.
pub struct ScanSession {
    request: StockOutRequest,
    config: SessionConfig,
    ledger: DeductionLedger,
    state: SessionState,
    scanning_enabled: bool,
    in_flight: bool,
    pending: Option<CandidateItem>,
    last_processed: Option<LastScan>,
    completed: bool,
}

impl ScanSession {
    /// Open a session for `request`, rehydrating any ledger persisted by a
    /// previous session for the same request (page reload, navigation).
    pub fn start(
        db: &DbState,
        request: StockOutRequest,
        config: SessionConfig,
    ) -> Result<Self, ReconcileError> {
        let ledger = DeductionLedger::load(db, &request.id)?;
        if !ledger.is_empty() {
            info!(
                request_id = %request.id,
                entries = ledger.len(),
                total = ledger.total_deducted(),
                "rehydrated ledger from previous session"
            );
        }
        Ok(Self {
            request,
            config,
            ledger,
            state: SessionState::Idle,
            scanning_enabled: true,
            in_flight: false,
            pending: None,
            last_processed: None,
            completed: false,
        })
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Feed one raw scan into the session.
    ///
    /// Guard misses (empty input, scanning disabled, resolution in flight,
    /// duplicate emission) return [`ScanOutcome::Ignored`] without touching
    /// state. Resolution and validation failures are errors; the session
    /// returns to idle with scanning still enabled and no mutation.
    pub async fn on_scan(
        &mut self,
        backend: &dyn InventoryBackend,
        raw_barcode: &str,
    ) -> Result<ScanOutcome, ReconcileError> {
        let barcode = raw_barcode.trim().to_string();
        let now_ms = Utc::now().timestamp_millis();

        if barcode.is_empty() {
            return Ok(ScanOutcome::Ignored {
                reason: "empty barcode".to_string(),
            });
        }
        if !self.scanning_enabled {
            return Ok(ScanOutcome::Ignored {
                reason: "scanning is disabled while a confirmation is pending".to_string(),
            });
        }
        if self.in_flight {
            return Ok(ScanOutcome::Ignored {
                reason: "a resolution is already in flight".to_string(),
            });
        }
        if is_duplicate_emission(self.last_processed.as_ref(), &barcode, now_ms) {
            debug!(barcode = %barcode, "duplicate scanner emission dropped");
            return Ok(ScanOutcome::Ignored {
                reason: "duplicate scanner emission".to_string(),
            });
        }

        // Stamp the debounce guard at scan time, not at resolution
        // completion, so rapid repeats are dropped while the lookup is
        // still pending.
        self.last_processed = Some(LastScan {
            barcode: barcode.clone(),
            at_ms: now_ms,
        });
        self.in_flight = true;
        self.state = SessionState::Resolving;

        let resolved = resolve(
            backend,
            &barcode,
            &self.request,
            self.config.allow_demo_barcodes,
        )
        .await;
        self.in_flight = false;

        let candidate = match resolved {
            Ok(c) => c,
            Err(e) => {
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        if let Err(e) = validate::validate_candidate(
            Some(&candidate),
            Some(&self.request),
            &self.ledger,
            self.config.allow_rescan,
        ) {
            self.state = SessionState::Idle;
            return Err(e);
        }

        let remaining = self.ledger.remaining_for(&self.request);
        let default_quantity = validate::default_quantity(remaining);
        let max_quantity = candidate.available_quantity.min(remaining);

        self.pending = Some(candidate.clone());
        self.scanning_enabled = false;
        self.state = SessionState::AwaitingConfirmation;

        info!(
            request_id = %self.request.id,
            barcode = %candidate.entry_key(),
            available = candidate.available_quantity,
            max_quantity = max_quantity,
            "candidate awaiting confirmation"
        );
        Ok(ScanOutcome::Candidate {
            candidate,
            default_quantity,
            max_quantity,
        })
    }

    /// Confirm the pending candidate with the operator's quantity.
    ///
    /// On a rejected quantity the candidate stays pending so the operator
    /// can adjust and retry; on success scanning re-enables.
    pub fn on_confirm(
        &mut self,
        db: &DbState,
        quantity: i64,
    ) -> Result<DeductedBatch, ReconcileError> {
        let candidate = self
            .pending
            .clone()
            .ok_or_else(|| {
                ReconcileError::Invalid("No candidate awaiting confirmation".to_string())
            })?;

        let entry = self
            .ledger
            .confirm(db, &candidate, quantity, &self.request)?
            .clone();

        self.pending = None;
        self.scanning_enabled = true;
        self.state = SessionState::Idle;
        Ok(entry)
    }

    /// Discard the pending candidate without touching the ledger.
    pub fn on_cancel(&mut self) {
        if let Some(candidate) = self.pending.take() {
            debug!(barcode = %candidate.entry_key(), "pending candidate discarded");
        }
        self.scanning_enabled = true;
        self.state = SessionState::Idle;
    }

    /// Operator undo: remove one ledger entry, returning its quantity to
    /// the request. Re-enables scanning; any pending candidate is
    /// discarded so the session cannot hold a stale confirmation.
    pub fn on_remove(&mut self, db: &DbState, key: &str) -> Result<DeductedBatch, ReconcileError> {
        let entry = self.ledger.remove(db, key)?;
        self.pending = None;
        self.scanning_enabled = true;
        self.state = SessionState::Idle;
        Ok(entry)
    }

    /// Commit the ledger to inventory and close the request.
    ///
    /// On failure the session returns to idle with the ledger unchanged so
    /// the operator can retry. On success the persisted ledger is cleared
    /// and the session is torn down.
    pub async fn on_complete_request(
        &mut self,
        db: &DbState,
        backend: &dyn InventoryBackend,
        actor_id: &str,
    ) -> Result<CommitSummary, ReconcileError> {
        if self.pending.is_some() {
            return Err(ReconcileError::Invalid(
                "Confirm or cancel the pending scan before completing".to_string(),
            ));
        }
        if self.completed {
            return Err(ReconcileError::Invalid(
                "Request is already completed".to_string(),
            ));
        }

        self.state = SessionState::Completing;
        self.scanning_enabled = false;

        match commit(backend, &self.request, &self.ledger, actor_id).await {
            Ok(summary) => {
                // The backend is authoritative from here on; local cleanup
                // failures are logged, not surfaced.
                if let Err(e) = DeductionLedger::clear_persisted(db, &self.request.id) {
                    warn!(request_id = %self.request.id, error = %e, "failed to clear persisted ledger after commit");
                }
                if let Err(e) = record_completed_stockout(db, &self.request, &summary, actor_id) {
                    warn!(request_id = %self.request.id, error = %e, "failed to record completed stock-out locally");
                }

                self.request.status = RequestStatus::Completed;
                self.completed = true;
                self.state = SessionState::Idle;
                Ok(summary)
            }
            Err(e) => {
                self.state = SessionState::Idle;
                self.scanning_enabled = true;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> &StockOutRequest {
        &self.request
    }

    pub fn ledger(&self) -> &DeductionLedger {
        &self.ledger
    }

    pub fn pending_candidate(&self) -> Option<&CandidateItem> {
        self.pending.as_ref()
    }

    pub fn scanning_enabled(&self) -> bool {
        self.scanning_enabled
    }

    pub fn total_deducted(&self) -> i64 {
        self.ledger.total_deducted()
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.ledger.remaining_for(&self.request)
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Progress snapshot in the shape the frontend renders.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "requestId": self.request.id,
            "productName": self.request.product_name,
            "quantityRequested": self.request.quantity_requested,
            "totalDeducted": self.total_deducted(),
            "remainingQuantity": self.remaining_quantity(),
            "entries": self.ledger.entries(),
            "state": self.state,
            "scanningEnabled": self.scanning_enabled,
            "pendingCandidate": self.pending,
            "completed": self.completed,
        })
    }
}

/// True when `barcode` is a repeat of the last processed scan inside the
/// debounce window.
fn is_duplicate_emission(last: Option<&LastScan>, barcode: &str, now_ms: i64) -> bool {
    match last {
        Some(l) => l.barcode == barcode && now_ms - l.at_ms < SCAN_DEBOUNCE_MS,
        None => false,
    }
}

/// Record a committed stock-out in the local history table.
fn record_completed_stockout(
    db: &DbState,
    request: &StockOutRequest,
    summary: &CommitSummary,
    actor_id: &str,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT OR REPLACE INTO completed_stockouts (
            request_id, product_name, total_deducted, entry_count, processed_by, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            request.id,
            request.product_name,
            summary.total_deducted,
            summary.entries_applied as i64,
            actor_id,
            summary.completed_at,
        ],
    )
    .map_err(|e| format!("record completed stock-out: {e}"))?;
    Ok(())
}

/// Recently committed stock-outs for the history panel, newest first.
pub fn completed_history(db: &DbState, limit: i64) -> Result<Vec<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT request_id, product_name, total_deducted, entry_count, processed_by, completed_at
             FROM completed_stockouts
             ORDER BY completed_at DESC
             LIMIT ?1",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(serde_json::json!({
                "requestId": row.get::<_, String>(0)?,
                "productName": row.get::<_, Option<String>>(1)?,
                "totalDeducted": row.get::<_, i64>(2)?,
                "entryCount": row.get::<_, i64>(3)?,
                "processedBy": row.get::<_, Option<String>>(4)?,
                "completedAt": row.get::<_, String>(5)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ===========================================================================
// Tests
// ===========================================================================
