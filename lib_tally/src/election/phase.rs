//! # Voting Phase
//!
//! The phase carries no state of its own. Callers detect transitions by
//! comparing successive evaluations (see `core::phase_monitor`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of the monitored voting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Polls have not opened yet.
    Before,
    /// Polls are open.
    Polling,
    /// Polls are closed; results are being counted.
    After,
}

/// Maps `now` onto the window `[poll_open, poll_close]`. Both ends are inclusive.
pub fn phase(now: DateTime<Utc>, poll_open: DateTime<Utc>, poll_close: DateTime<Utc>) -> Phase {
    if now < poll_open {
        Phase::Before
    } else if now <= poll_close {
        Phase::Polling
    } else {
        Phase::After
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Before => "before",
            Phase::Polling => "polling",
            Phase::After => "after",
        };
        f.write_str(label)
    }
}
