//! Barcode-driven stock-out reconciliation engine.
//!
//! Turns a sequence of physical barcode scans into a verified,
//! quantity-accurate fulfillment of a stock-out request. The flow:
//!
//! raw scan -> [`resolve`] -> candidate item -> [`validate`] (against the
//! request and ledger) -> session holds the candidate, scanning disabled ->
//! operator confirms a quantity -> [`ledger`] append (persisted) -> scanning
//! re-enabled -> ... -> operator completes -> [`commit`] writes inventory
//! and closes the request.
//!
//! Key design goals:
//! - **One candidate at a time**: scanning is disabled while a candidate
//!   awaits confirmation, and at most one resolution is in flight.
//! - **Double-scan safe**: hardware scanners emit the same decode several
//!   times in quick succession; a 3-second same-barcode window drops the
//!   repeats.
//! - **Reload safe**: every confirm/remove is appended to a durable event
//!   log keyed by request id, and reopening the screen replays it.
//! - **Retry-safe commit**: inventory writes are staged from freshly read
//!   quantities, so retrying a half-failed commit never double-deducts.

pub mod commit;
pub mod ledger;
pub mod resolve;
pub mod session;
pub mod types;
pub mod validate;

pub use commit::CommitSummary;
pub use ledger::DeductionLedger;
pub use session::{ScanOutcome, ScanSession, SessionState};
pub use types::{CandidateItem, DeductedBatch, ReconcileError};
