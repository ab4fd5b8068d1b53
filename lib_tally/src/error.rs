//! # Tally Error Taxonomy
//!
//! Every fallible operation in `lib_tally` reports through [`TallyError`].
//! None of these conditions is fatal to the process: the poller keeps serving
//! the last good snapshot and the registry keeps serving the remaining clients.

use thiserror::Error;

use crate::core::registry::ClientId;

/// Errors raised by the tally core.
#[derive(Debug, Error)]
pub enum TallyError {
    /// The upstream feed could not be fetched (network failure, HTTP status,
    /// undecodable body). Retried on the next tick.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A numeric field of the upstream payload could not be parsed.
    #[error("malformed source field `{field}`: {value:?}")]
    MalformedSource {
        /// Short field code as named by the feed (e.g. `pvv`).
        field: &'static str,
        /// The raw string that failed to parse.
        value: String,
    },

    /// A subscriber sent something that is not a `{x, y}` touch.
    #[error("malformed inbound message: {0}")]
    MalformedInboundMessage(String),

    /// A projection was requested for a candidate absent from the snapshot.
    #[error("candidate not found: {0}")]
    CandidateNotFound(String),

    /// An addressed send targeted an identifier that is not registered.
    #[error("unknown subscriber: {0}")]
    UnknownSubscriber(ClientId),

    /// A notification could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TallyError>;
