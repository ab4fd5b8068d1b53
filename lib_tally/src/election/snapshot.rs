//! # Results Snapshot Data Model
//!
//! This module defines the strongly-typed representation of one pull of the
//! simplified-results feed and the analytics derived from it.
//!
//! ## Key Features:
//! - **Tolerant Data Modeling**: `SnapshotRaw` names the feed fields the model
//!   reads and keeps every other field as loose JSON. Absent or `null` fields
//!   read as empty strings, and the record compares structurally with
//!   `PartialEq`; that comparison is the poller's change-detection gate.
//! - **Locale-aware Parsing**: `Snapshot::from_raw` converts the string fields
//!   into numbers once, failing with `MalformedSource` on the first bad field.
//! - **Projections**: expected total valid votes and votes remaining for an
//!   absolute majority, both governed by a `ProjectionPolicy`.
//!
//! Percentages are kept exactly as the feed reports them. They are never
//! recomputed from counts, even when the feed is internally inconsistent.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::election::calendar::ProjectionPolicy;
use crate::election::locale::{parse_count, parse_percentage};
use crate::error::{Result, TallyError};

/// Source local time is UTC-3 (Brasília, no daylight saving in 2022).
const SOURCE_UTC_OFFSET_SECS: i32 = -3 * 3600;

/// Literal cleared-sections percentage reported once every section is counted.
const TABULATION_COMPLETE: &str = "100,00";

const DEFAULT_DAY: u32 = 30;
const DEFAULT_MONTH: u32 = 10;
const DEFAULT_YEAR: i32 = 2022;
const DEFAULT_HOUR: u32 = 17;

/// # Snapshot Raw
///
/// The feed document as published. The fields the model reads are typed as
/// strings; a `null` in any of them reads as empty. Everything else the feed
/// carries is kept verbatim in `rest`, whatever its JSON type, so it still
/// takes part in change detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotRaw {
    /// Generation date (`dd/mm/yyyy`).
    #[serde(deserialize_with = "null_as_empty")]
    pub dg: String,
    /// Generation time (`hh:mm:ss`).
    #[serde(deserialize_with = "null_as_empty")]
    pub hg: String,
    /// Totalization date (`dd/mm/yyyy`).
    #[serde(deserialize_with = "null_as_empty")]
    pub dt: String,
    /// Totalization time (`hh:mm:ss`).
    #[serde(deserialize_with = "null_as_empty")]
    pub ht: String,
    /// Totalized sections.
    #[serde(deserialize_with = "null_as_empty")]
    pub st: String,
    /// Totalized sections percentage.
    #[serde(deserialize_with = "null_as_empty")]
    pub pst: String,
    /// Cleared sections.
    #[serde(deserialize_with = "null_as_empty")]
    pub sa: String,
    /// Cleared sections percentage.
    #[serde(deserialize_with = "null_as_empty")]
    pub psa: String,
    /// Total electorate.
    #[serde(deserialize_with = "null_as_empty")]
    pub e: String,
    /// Abstentions.
    #[serde(deserialize_with = "null_as_empty")]
    pub a: String,
    /// Blank votes.
    #[serde(deserialize_with = "null_as_empty")]
    pub vb: String,
    /// Blank votes percentage.
    #[serde(deserialize_with = "null_as_empty")]
    pub pvb: String,
    /// Total null votes percentage.
    #[serde(deserialize_with = "null_as_empty")]
    pub ptvn: String,
    /// Null votes.
    #[serde(deserialize_with = "null_as_empty")]
    pub vn: String,
    /// Valid votes.
    #[serde(deserialize_with = "null_as_empty")]
    pub vv: String,
    /// Valid votes percentage.
    #[serde(deserialize_with = "null_as_empty")]
    pub pvv: String,
    /// Total votes.
    #[serde(deserialize_with = "null_as_empty")]
    pub tv: String,
    /// Candidates, in feed order.
    #[serde(deserialize_with = "null_as_default")]
    pub cand: Vec<SnapshotRawCandidate>,
    /// Remaining feed fields (`ele`, `md`, `esae`, `mnae`, `vnom`, ...).
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

/// One candidate record of the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotRawCandidate {
    /// Sequential position.
    #[serde(deserialize_with = "null_as_empty")]
    pub seq: String,
    /// Candidate identifier.
    #[serde(deserialize_with = "null_as_empty")]
    pub sqcand: String,
    /// Name.
    #[serde(deserialize_with = "null_as_empty")]
    pub nm: String,
    /// Elected flag, `"s"` or `"n"`.
    #[serde(deserialize_with = "null_as_empty")]
    pub e: String,
    /// Counted votes.
    #[serde(deserialize_with = "null_as_empty")]
    pub vap: String,
    /// Counted votes percentage.
    #[serde(deserialize_with = "null_as_empty")]
    pub pvap: String,
    /// Remaining candidate fields (`n`, `cc`, `nv`, `st`, `dvt`, ...).
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D>(deserializer: D) -> std::result::Result<Vec<SnapshotRawCandidate>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<SnapshotRawCandidate>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A `(percentage, count)` pair. Serializes as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PercentageTotal(pub f64, pub u64);

impl PercentageTotal {
    fn parse(pct_field: &'static str, pct: &str, count_field: &'static str, count: &str) -> Result<Self> {
        Ok(Self(parse_percentage(pct_field, pct)?, parse_count(count_field, count)?))
    }

    /// Percentage as reported by the feed.
    pub fn percentage(&self) -> f64 {
        self.0
    }

    /// Absolute count.
    pub fn count(&self) -> u64 {
        self.1
    }
}

/// Parsed result of one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    /// Sequential position in the feed.
    pub id: u32,
    /// Identifier used by the feed (`sqcand`); projections are keyed on it.
    pub source_id: String,
    /// Name as published (upper case).
    pub name: String,
    /// Whether the feed marks the candidate as elected.
    pub is_elected: bool,
    /// Counted votes.
    pub vote_count: u64,
    /// Counted votes percentage.
    pub vote_percentage: f64,
}

/// # Snapshot
///
/// Immutable, fully parsed view of one pull. A newer pull replaces it as a
/// whole; nothing mutates it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    raw: SnapshotRaw,
    policy: ProjectionPolicy,
    /// Instant of the last totalization event reported by the feed.
    pub captured_at: DateTime<Utc>,
    /// Total electorate.
    pub total_electorate: u64,
    /// Live abstention count.
    pub total_abstentions: u64,
    /// Total votes cast.
    pub total_votes_cast: u64,
    /// Valid votes.
    pub valid_votes: PercentageTotal,
    /// Blank votes.
    pub blank_votes: PercentageTotal,
    /// Null votes: total-null percentage with the plain null count, as the feed pairs them.
    pub null_votes: PercentageTotal,
    /// Totalized sections.
    pub sections_totalized: PercentageTotal,
    /// Cleared sections.
    pub sections_cleared: PercentageTotal,
    /// Candidates in feed order.
    pub candidates: Vec<CandidateResult>,
}

impl Snapshot {
    /// Parses `raw` under `policy`.
    ///
    /// # Errors
    /// `MalformedSource` naming the first field that is not a number.
    pub fn from_raw(raw: SnapshotRaw, policy: ProjectionPolicy) -> Result<Self> {
        let candidates = raw
            .cand
            .iter()
            .map(|candidate| {
                Ok(CandidateResult {
                    id: u32::try_from(parse_count("seq", &candidate.seq)?).map_err(|_| {
                        TallyError::MalformedSource {
                            field: "seq",
                            value: candidate.seq.clone(),
                        }
                    })?,
                    source_id: candidate.sqcand.clone(),
                    name: candidate.nm.clone(),
                    is_elected: candidate.e == "s",
                    vote_count: parse_count("vap", &candidate.vap)?,
                    vote_percentage: parse_percentage("pvap", &candidate.pvap)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            captured_at: resolve_captured_at(&raw),
            total_electorate: parse_count("e", &raw.e)?,
            total_abstentions: parse_count("a", &raw.a)?,
            total_votes_cast: parse_count("tv", &raw.tv)?,
            valid_votes: PercentageTotal::parse("pvv", &raw.pvv, "vv", &raw.vv)?,
            blank_votes: PercentageTotal::parse("pvb", &raw.pvb, "vb", &raw.vb)?,
            null_votes: PercentageTotal::parse("ptvn", &raw.ptvn, "vn", &raw.vn)?,
            sections_totalized: PercentageTotal::parse("pst", &raw.pst, "st", &raw.st)?,
            sections_cleared: PercentageTotal::parse("psa", &raw.psa, "sa", &raw.sa)?,
            candidates,
            raw,
            policy,
        })
    }

    /// The feed record this snapshot was built from.
    pub fn raw(&self) -> &SnapshotRaw {
        &self.raw
    }

    /// The projection policy in force for this snapshot.
    pub fn policy(&self) -> &ProjectionPolicy {
        &self.policy
    }

    /// True if any candidate is flagged as elected.
    pub fn is_someone_elected(&self) -> bool {
        self.candidates.iter().any(|candidate| candidate.is_elected)
    }

    /// True once the feed reports every section cleared. Compares the feed's
    /// own formatted string so formatting precision cannot introduce drift.
    pub fn is_tabulation_complete(&self) -> bool {
        self.raw.psa == TABULATION_COMPLETE
    }

    /// Projected number of valid votes at the end of the count.
    ///
    /// `ceil((electorate - abstentions) * valid% / 100)`, where abstentions and
    /// valid% come from the first round while the policy deems live figures
    /// unreliable at `now`, or when the feed has no valid percentage yet.
    pub fn expected_total_valid_votes(&self, now: DateTime<Utc>) -> u64 {
        let live_percentage = self.valid_votes.percentage();

        let (percentage, abstentions) =
            if self.policy.within_unstable_window(now) || live_percentage <= 0.0 {
                (self.policy.fallback_valid_percentage, self.policy.fallback_abstentions)
            } else {
                (live_percentage, self.total_abstentions)
            };

        let attended = self.total_electorate as f64 - abstentions as f64;
        let expected = (attended * (percentage / 100.0)).ceil();

        if expected > 0.0 { expected as u64 } else { 0 }
    }

    /// Votes `source_id` still needs for an absolute majority:
    /// `ceil(expected / 2) - counted + 1`, never below zero.
    ///
    /// # Errors
    /// `CandidateNotFound` if no candidate carries `source_id`.
    pub fn votes_remaining_to_clinch(&self, source_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let candidate = self
            .candidates
            .iter()
            .find(|candidate| candidate.source_id == source_id)
            .ok_or_else(|| TallyError::CandidateNotFound(source_id.to_string()))?;

        let half = self.expected_total_valid_votes(now).div_ceil(2);

        Ok((half + 1).saturating_sub(candidate.vote_count))
    }
}

/// Composes the capture instant from the totalization pair, falling back to
/// the generation pair, then to election-day defaults, read at UTC-3.
fn resolve_captured_at(raw: &SnapshotRaw) -> DateTime<Utc> {
    let date = if raw.dt.is_empty() { &raw.dg } else { &raw.dt };
    let time = if raw.ht.is_empty() { &raw.hg } else { &raw.ht };

    let mut date_parts = date.split('/');
    let day = component(date_parts.next(), DEFAULT_DAY);
    let month = component(date_parts.next(), DEFAULT_MONTH);
    let year = component(date_parts.next(), DEFAULT_YEAR);

    let mut time_parts = time.split(':');
    let hour = component(time_parts.next(), DEFAULT_HOUR);
    let minute = component(time_parts.next(), 0);
    let second = component(time_parts.next(), 0);

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(DEFAULT_YEAR, DEFAULT_MONTH, DEFAULT_DAY))
        .unwrap_or_default();
    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .or_else(|| NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0))
        .unwrap_or_default();

    let local = date.and_time(time);

    FixedOffset::east_opt(SOURCE_UTC_OFFSET_SECS)
        .and_then(|offset| offset.from_local_datetime(&local).single())
        .map(|captured| captured.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

fn component<T: std::str::FromStr>(part: Option<&str>, default: T) -> T {
    part.map(str::trim)
        .filter(|part| !part.is_empty())
        .and_then(|part| part.parse().ok())
        .unwrap_or(default)
}
