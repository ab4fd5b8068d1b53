//! # Election Domain Module
//!
//! This module groups the election-specific data model: the typed upstream
//! payload, the derived snapshot analytics, the phase of the voting window and
//! the calendar constants the projections depend on.
//!
//! ## Contained Modules:
//!
//! - **`calendar`**: The voting window boundaries and the projection policy
//!   (stable-numbers wait and first-round fallback constants).
//! - **`phase`**: The pure `before` / `polling` / `after` state function.
//! - **`snapshot`**: The raw feed record, its locale-aware parsing and the
//!   derived analytics (expected valid votes, votes to clinch a majority).
//! - **`locale`**: Decimal-comma parsing and display-name capitalization.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Voting window boundaries and projection constants.
pub mod calendar;
/// Decimal-comma parsing helpers for the feed's string fields.
pub mod locale;
/// The voting phase state function.
pub mod phase;
/// Typed snapshot of one upstream pull with derived analytics.
pub mod snapshot;

// --- Public API Re-exports ---
pub use calendar::{ElectionCalendar, ProjectionPolicy};
pub use phase::Phase;
pub use snapshot::{CandidateResult, Snapshot, SnapshotRaw, SnapshotRawCandidate};
