//! # Notifications
//!
//! Outbound messages share one envelope, `{type, now, state}`:
//!
//! - `sync`: heartbeat / phase change, no payload.
//! - `polling`: carries the aggregation view of the current snapshot.
//! - `touch`: a 2D coordinate relayed from one subscriber to the others.
//!
//! Inbound subscriber messages are touches only. Anything that is not an
//! object with numeric `x` and `y` is rejected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::registry::Payload;
use crate::core::snapshot_store::SnapshotStore;
use crate::election::calendar::ElectionCalendar;
use crate::election::locale::capitalize;
use crate::election::phase::Phase;
use crate::election::snapshot::{PercentageTotal, Snapshot};
use crate::error::{Result, TallyError};

/// Variant-specific part of a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationKind {
    /// Heartbeat or phase change.
    Sync,
    /// Current results.
    Polling {
        /// Derived view of the current snapshot.
        aggregation: AggregationView,
    },
    /// A relayed touch.
    Touch {
        /// Horizontal coordinate.
        x: f64,
        /// Vertical coordinate.
        y: f64,
    },
}

/// One outbound unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Kind and payload.
    #[serde(flatten)]
    pub kind: NotificationKind,
    /// Issue time, epoch milliseconds.
    pub now: i64,
    /// Phase at issue time.
    pub state: Phase,
}

impl Notification {
    fn new(kind: NotificationKind, calendar: &ElectionCalendar, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            now: now.timestamp_millis(),
            state: calendar.phase_at(now),
        }
    }

    /// A `sync` notification.
    pub fn sync(calendar: &ElectionCalendar, now: DateTime<Utc>) -> Self {
        Self::new(NotificationKind::Sync, calendar, now)
    }

    /// A `polling` notification for `snapshot`.
    ///
    /// # Errors
    /// Propagates `CandidateNotFound` from the projection.
    pub fn polling(snapshot: &Snapshot, calendar: &ElectionCalendar, now: DateTime<Utc>) -> Result<Self> {
        let aggregation = AggregationView::from_snapshot(snapshot, now)?;
        Ok(Self::new(NotificationKind::Polling { aggregation }, calendar, now))
    }

    /// A `touch` notification.
    pub fn touch(touch: TouchMessage, calendar: &ElectionCalendar, now: DateTime<Utc>) -> Self {
        Self::new(NotificationKind::Touch { x: touch.x, y: touch.y }, calendar, now)
    }

    /// JSON text of the notification.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// JSON text ready for registry fan-out.
    pub fn to_payload(&self) -> Result<Payload> {
        Ok(Arc::from(self.to_json()?))
    }
}

/// The notification a subscriber should see right now: results once polls
/// have closed and a snapshot exists, a bare `sync` otherwise.
pub fn current_notification(
    calendar: &ElectionCalendar,
    store: &SnapshotStore,
    now: DateTime<Utc>,
) -> Result<Notification> {
    match (calendar.phase_at(now), store.current()) {
        (Phase::After, Some(snapshot)) => Notification::polling(&snapshot, calendar, now),
        _ => Ok(Notification::sync(calendar, now)),
    }
}

/// # Aggregation View
///
/// The client-facing projection of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationView {
    /// Capture instant, epoch milliseconds.
    pub time: i64,
    /// Totalized sections.
    pub sections_totalized: PercentageTotal,
    /// Cleared sections.
    pub sections_cleared: PercentageTotal,
    /// Total votes cast.
    pub votes: u64,
    /// Valid votes.
    pub valid_votes: PercentageTotal,
    /// Blank votes.
    pub blank_votes: PercentageTotal,
    /// Null votes.
    pub null_votes: PercentageTotal,
    /// Candidates in feed order.
    pub candidates: Vec<CandidateView>,
}

/// Client-facing projection of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    /// Sequential position.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Elected flag.
    pub elected: bool,
    /// Vote percentage and count.
    pub votes: PercentageTotal,
    /// Votes still needed for an absolute majority.
    pub votes_to_be_elected: u64,
}

impl AggregationView {
    /// Projects `snapshot` at `now`.
    ///
    /// # Errors
    /// Propagates `CandidateNotFound` from the projection.
    pub fn from_snapshot(snapshot: &Snapshot, now: DateTime<Utc>) -> Result<Self> {
        let candidates = snapshot
            .candidates
            .iter()
            .map(|candidate| {
                Ok(CandidateView {
                    id: candidate.id,
                    name: capitalize(&candidate.name),
                    elected: candidate.is_elected,
                    votes: PercentageTotal(candidate.vote_percentage, candidate.vote_count),
                    votes_to_be_elected: snapshot.votes_remaining_to_clinch(&candidate.source_id, now)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            time: snapshot.captured_at.timestamp_millis(),
            sections_totalized: snapshot.sections_totalized,
            sections_cleared: snapshot.sections_cleared,
            votes: snapshot.total_votes_cast,
            valid_votes: snapshot.valid_votes,
            blank_votes: snapshot.blank_votes,
            null_votes: snapshot.null_votes,
            candidates,
        })
    }
}

/// Inbound touch from a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TouchMessage {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl TouchMessage {
    /// Parses an inbound text frame.
    ///
    /// # Errors
    /// `MalformedInboundMessage` unless `text` is a JSON object with numeric
    /// `x` and `y`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| TallyError::MalformedInboundMessage(e.to_string()))?;

        if !value.is_object() {
            return Err(TallyError::MalformedInboundMessage("touch must be a JSON object".into()));
        }

        Self::deserialize(value).map_err(|e| TallyError::MalformedInboundMessage(e.to_string()))
    }
}
