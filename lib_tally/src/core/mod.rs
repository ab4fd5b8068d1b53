//! # Core Engine Module
//!
//! The in-process plumbing between the results feed and the subscribers. The
//! poller writes into the snapshot store; the phase monitor and the socket
//! handlers read from it and push notifications through the registry.
//!
//! ## Core Components:
//!
//! - **`registry`**: The set of live subscriber connections, keyed by
//!   generated identifiers, with addressed and broadcast hand-off.
//!
//! - **`snapshot_store`**: The single current snapshot plus the change channel
//!   that fires whenever the poller publishes a different one.
//!
//! - **`notification`**: The outbound message envelope (`sync`, `polling`,
//!   `touch`), the client-facing aggregation view and inbound touch parsing.
//!
//! - **`phase_monitor`**: Watches the clock and the change channel and decides
//!   when a notification goes out to everyone.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Live subscriber connections and message hand-off.
pub mod registry;
/// The current snapshot and its change channel.
pub mod snapshot_store;
/// Outbound notifications and inbound touch messages.
pub mod notification;
/// Phase transition and post-close result broadcasting.
pub mod phase_monitor;

// --- Public API Re-exports ---
pub use registry::{ClientId, ClientReceiver, ClientSender, ConnectionRegistry, Payload};
pub use snapshot_store::SnapshotStore;
pub use notification::{current_notification, AggregationView, CandidateView, Notification, NotificationKind, TouchMessage};
pub use phase_monitor::PhaseMonitor;
