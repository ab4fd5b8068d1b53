//! # Data Ingestors Module
//!
//! Clients that bring external data into the relay. Each submodule owns the
//! lifecycle of one upstream source: connecting, fetching and deciding when to
//! hand fresh data to the rest of the system.
//!
//! ## Contained Modules:
//! - **`source_poller`**: A self-scheduling poller for the simplified-results
//!   feed, with an interval that tightens as polls approach closing time.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The adaptive, self-rescheduling poller for the results feed.
pub mod source_poller;

// --- Public API Re-exports ---
pub use source_poller::{target_interval, PollOutcome, ResultsSource, SourcePoller};
#[cfg(feature = "retrieve")]
pub use source_poller::HttpResultsSource;
