//! # lib_tally
//!
//! Election results relay core: the snapshot model built from the official
//! simplified-results feed, the voting-phase state machine, the adaptive feed
//! poller and the subscriber registry the server fans notifications out
//! through.

#![forbid(unsafe_code)]

pub mod core;
pub mod election;
pub mod error;
pub mod ingestors;
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use error::{Result, TallyError};
