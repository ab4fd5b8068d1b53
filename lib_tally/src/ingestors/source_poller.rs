//! # Results Source Poller
//!
//! A self-scheduling ingestor for the simplified-results feed, which offers no
//! streaming interface. It fetches the feed, converts it into a `Snapshot`
//! and publishes it to the `SnapshotStore` only when the payload changed.
//!
//! ## Key Design Principles:
//! - **Self-Scheduling**: the poller owns a single timer task. Each tick
//!   spawns the poll as its own task, so a slow fetch never delays the timer.
//! - **Dynamic Intervals**: after every poll the target interval is derived
//!   from the time left until polls close. When it differs from the armed
//!   interval the timer is aborted and re-armed in the same tick.
//! - **One Poll at a Time**: an in-flight guard makes a tick that lands on a
//!   running poll a no-op.
//! - **Diff Gate**: the typed raw payload is compared structurally with the
//!   current one; identical payloads never reach listeners.
//! - **Resilience**: a failed fetch or a malformed payload is logged and the
//!   last good snapshot keeps being served.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::snapshot_store::SnapshotStore;
use crate::election::calendar::{ElectionCalendar, ProjectionPolicy};
use crate::election::snapshot::{Snapshot, SnapshotRaw};
use crate::error::Result;

/// Anything that can produce the raw results document.
#[async_trait]
pub trait ResultsSource: Send + Sync {
    /// Fetches and decodes one copy of the feed.
    async fn fetch(&self) -> Result<SnapshotRaw>;
}

/// The feed over HTTP.
#[cfg(feature = "retrieve")]
pub struct HttpResultsSource {
    client: crate::retrieve::ky_http::ApiClient,
}

#[cfg(feature = "retrieve")]
impl HttpResultsSource {
    /// Source reading `feed_url`, retrying transient failures `max_retries` times.
    pub fn new(feed_url: &str, max_retries: u32) -> Result<Self> {
        Ok(Self {
            client: crate::retrieve::ky_http::ApiClient::new(feed_url, max_retries)?,
        })
    }
}

#[cfg(feature = "retrieve")]
#[async_trait]
impl ResultsSource for HttpResultsSource {
    async fn fetch(&self) -> Result<SnapshotRaw> {
        self.client.get_json::<SnapshotRaw>("").await
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll was still running.
    Skipped,
    /// First snapshot installed; no change event.
    Adopted,
    /// A different payload replaced the current snapshot and was published.
    Changed,
    /// Same payload as the current snapshot.
    Unchanged,
    /// Fetch or parse failed; the previous snapshot is kept.
    Failed,
}

/// Poll interval for the given time left until polls close.
///
/// Minutes are floored: up to 5 minutes polls every second, up to 30 every
/// 30 seconds, up to 60 every minute, and anything further away (or an
/// already closed window) every 5 minutes.
pub fn target_interval(remaining: chrono::Duration) -> Duration {
    let minutes = remaining.num_seconds().div_euclid(60);
    let secs = match minutes {
        m if m < 0 => 300,
        0..=5 => 1,
        6..=30 => 30,
        31..=60 => 60,
        _ => 300,
    };
    Duration::from_secs(secs)
}

/// Clears the in-flight flag when the poll ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wall-clock source the interval rule is evaluated against.
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Default)]
struct Schedule {
    interval: Option<Duration>,
    timer: Option<JoinHandle<()>>,
}

/// # Source Poller
///
/// Owns the polling timer and is the only writer of the `SnapshotStore`.
pub struct SourcePoller<S> {
    source: S,
    store: SnapshotStore,
    calendar: ElectionCalendar,
    policy: ProjectionPolicy,
    in_flight: AtomicBool,
    schedule: Mutex<Schedule>,
    clock: Clock,
}

impl<S: ResultsSource + 'static> SourcePoller<S> {
    /// Creates an idle poller. Nothing is fetched until [`SourcePoller::start`].
    pub fn new(source: S, store: SnapshotStore, calendar: ElectionCalendar, policy: ProjectionPolicy) -> Self {
        Self {
            source,
            store,
            calendar,
            policy,
            in_flight: AtomicBool::new(false),
            schedule: Mutex::new(Schedule::default()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock used by [`SourcePoller::start`] and timer ticks.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The interval the timer is armed with, `None` while stopped.
    pub fn current_interval(&self) -> Option<Duration> {
        self.schedule().interval
    }

    /// True while a poll is running.
    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Polls immediately if no snapshot exists yet, then arms the timer at the
    /// interval for the current time. Returns that interval.
    pub async fn start(self: &Arc<Self>) -> Duration {
        if !self.store.is_populated() {
            let outcome = self.poll_once().await;
            log::info!("initial poll: {:?}", outcome);
        }

        let every = target_interval(self.calendar.remaining_until_close((self.clock)()));
        let mut schedule = self.schedule();
        self.arm(&mut schedule, every);
        log::info!("source poller started, polling every {}s", every.as_secs());
        every
    }

    /// Aborts the pending timer. A poll already running completes on its own.
    pub fn stop(&self) {
        let mut schedule = self.schedule();
        if let Some(timer) = schedule.timer.take() {
            timer.abort();
            log::info!("source poller stopped");
        }
        schedule.interval = None;
    }

    /// One fetch, diff and publish cycle, without touching the timer.
    pub async fn poll_once(&self) -> PollOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            log::warn!("previous poll still running, skipping tick");
            return PollOutcome::Skipped;
        };
        self.fetch_and_apply().await
    }

    /// A timer tick: poll, then re-arm the timer if the interval must change.
    /// The in-flight guard covers both steps.
    pub async fn tick(self: &Arc<Self>) -> PollOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            log::warn!("previous poll still running, skipping tick");
            return PollOutcome::Skipped;
        };
        let outcome = self.fetch_and_apply().await;
        self.reschedule((self.clock)());
        outcome
    }

    /// Re-arms the timer when the target interval at `now` differs from the
    /// armed one. Does nothing while stopped. Returns the target interval.
    pub fn reschedule(self: &Arc<Self>, now: DateTime<Utc>) -> Duration {
        let target = target_interval(self.calendar.remaining_until_close(now));
        let mut schedule = self.schedule();

        if schedule.timer.is_some() && schedule.interval != Some(target) {
            log::info!(
                "poll interval {}s -> {}s",
                schedule.interval.map_or(0, |d| d.as_secs()),
                target.as_secs()
            );
            self.arm(&mut schedule, target);
        }
        target
    }

    async fn fetch_and_apply(&self) -> PollOutcome {
        let raw = match self.source.fetch().await {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("poll failed, keeping last snapshot: {}", e);
                return PollOutcome::Failed;
            }
        };

        let current = self.store.current();
        if current.as_ref().is_some_and(|snapshot| snapshot.raw() == &raw) {
            log::debug!("feed unchanged");
            return PollOutcome::Unchanged;
        }

        let snapshot = match Snapshot::from_raw(raw, self.policy) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                log::error!("discarding feed payload: {}", e);
                return PollOutcome::Failed;
            }
        };

        if current.is_none() {
            log::info!("first snapshot adopted (captured {})", snapshot.captured_at);
            self.store.adopt(snapshot);
            PollOutcome::Adopted
        } else {
            log::info!("feed changed (captured {})", snapshot.captured_at);
            let listeners = self.store.publish(snapshot);
            log::debug!("change published to {} listener(s)", listeners);
            PollOutcome::Changed
        }
    }

    fn arm(self: &Arc<Self>, schedule: &mut Schedule, every: Duration) {
        if let Some(previous) = schedule.timer.take() {
            previous.abort();
        }

        let poller = Arc::downgrade(self);
        schedule.timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(poller) = poller.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    poller.tick().await;
                });
            }
        }));
        schedule.interval = Some(every);
    }
}

impl<S> Drop for SourcePoller<S> {
    fn drop(&mut self) {
        if let Some(timer) = self.schedule.get_mut().unwrap_or_else(PoisonError::into_inner).timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TallyError;
    use chrono::Duration as ChronoDuration;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn raw(valid: &str) -> SnapshotRaw {
        SnapshotRaw {
            e: "1000".into(),
            a: "150".into(),
            pvv: "85,00".into(),
            vv: valid.into(),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<SnapshotRaw>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<SnapshotRaw>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ResultsSource for ScriptedSource {
        async fn fetch(&self) -> Result<SnapshotRaw> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TallyError::SourceUnavailable("script exhausted".into())))
        }
    }

    fn poller<S: ResultsSource + 'static>(source: S, calendar: ElectionCalendar) -> (Arc<SourcePoller<S>>, SnapshotStore) {
        let store = SnapshotStore::new();
        let policy = ProjectionPolicy::new(&calendar, 10);
        (Arc::new(SourcePoller::new(source, store.clone(), calendar, policy)), store)
    }

    fn closing_in(minutes: i64) -> ElectionCalendar {
        let now = Utc::now();
        ElectionCalendar::new(now - ChronoDuration::hours(8), now + ChronoDuration::minutes(minutes))
    }

    #[test]
    fn intervals_follow_time_to_close() {
        assert_eq!(target_interval(ChronoDuration::minutes(45)), Duration::from_secs(60));
        assert_eq!(target_interval(ChronoDuration::minutes(60)), Duration::from_secs(60));
        assert_eq!(target_interval(ChronoDuration::minutes(25)), Duration::from_secs(30));
        assert_eq!(target_interval(ChronoDuration::minutes(30)), Duration::from_secs(30));
        assert_eq!(target_interval(ChronoDuration::minutes(4)), Duration::from_secs(1));
        assert_eq!(target_interval(ChronoDuration::seconds(5 * 60 + 59)), Duration::from_secs(1));
        assert_eq!(target_interval(ChronoDuration::zero()), Duration::from_secs(1));
        assert_eq!(target_interval(ChronoDuration::minutes(61)), Duration::from_secs(300));
        assert_eq!(target_interval(ChronoDuration::hours(9)), Duration::from_secs(300));
    }

    #[test]
    fn closed_window_polls_slowly() {
        assert_eq!(target_interval(ChronoDuration::seconds(-1)), Duration::from_secs(300));
        assert_eq!(target_interval(ChronoDuration::hours(-3)), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn identical_payload_is_adopted_once() {
        let (poller, store) = poller(ScriptedSource::new(vec![Ok(raw("723")), Ok(raw("723"))]), closing_in(120));
        let mut changes = store.subscribe();

        assert_eq!(poller.poll_once().await, PollOutcome::Adopted);
        let first = store.current().unwrap();
        assert_eq!(poller.poll_once().await, PollOutcome::Unchanged);

        assert!(Arc::ptr_eq(&first, &store.current().unwrap()));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn different_payload_is_published() {
        let (poller, store) = poller(ScriptedSource::new(vec![Ok(raw("700")), Ok(raw("723"))]), closing_in(120));
        let mut changes = store.subscribe();

        poller.poll_once().await;
        assert_eq!(poller.poll_once().await, PollOutcome::Changed);

        let published = changes.try_recv().unwrap();
        assert_eq!(published.valid_votes.count(), 723);
        assert_eq!(store.current().unwrap().valid_votes.count(), 723);
    }

    #[tokio::test]
    async fn failures_keep_the_last_snapshot() {
        let malformed = SnapshotRaw {
            e: "many".into(),
            ..raw("1")
        };
        let (poller, store) = poller(
            ScriptedSource::new(vec![
                Ok(raw("723")),
                Err(TallyError::SourceUnavailable("HTTP 503".into())),
                Ok(malformed),
            ]),
            closing_in(120),
        );

        poller.poll_once().await;
        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(store.current().unwrap().valid_votes.count(), 723);
    }

    struct GatedSource {
        gate: Notify,
    }

    #[async_trait]
    impl ResultsSource for GatedSource {
        async fn fetch(&self) -> Result<SnapshotRaw> {
            self.gate.notified().await;
            Ok(raw("723"))
        }
    }

    #[tokio::test]
    async fn overlapping_poll_is_skipped() {
        let (poller, _store) = poller(GatedSource { gate: Notify::new() }, closing_in(120));

        let running = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.poll_once().await })
        };
        while !poller.is_polling() {
            tokio::task::yield_now().await;
        }

        assert_eq!(poller.poll_once().await, PollOutcome::Skipped);
        poller.source.gate.notify_one();
        assert_eq!(running.await.unwrap(), PollOutcome::Adopted);
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn start_polls_once_then_on_the_timer() {
        let source = ScriptedSource::new(vec![Ok(raw("700")), Ok(raw("723"))]);
        let (poller, store) = poller(source, closing_in(120));

        assert_eq!(poller.start().await, Duration::from_secs(300));
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_populated());

        tokio::time::sleep(Duration::from_secs(301)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.current().unwrap().valid_votes.count(), 723);

        poller.stop();
        assert_eq!(poller.current_interval(), None);
        tokio::time::sleep(Duration::from_secs(900)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_skips_initial_poll_when_populated() {
        let calendar = closing_in(45);
        let store = SnapshotStore::new();
        let policy = ProjectionPolicy::new(&calendar, 10);
        store.adopt(Arc::new(Snapshot::from_raw(raw("723"), policy).unwrap()));
        let poller = Arc::new(SourcePoller::new(ScriptedSource::default(), store, calendar, policy));

        assert_eq!(poller.start().await, Duration::from_secs(60));
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 0);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_rearms_on_interval_change() {
        let calendar = closing_in(45);
        let (poller, _store) = poller(ScriptedSource::new(vec![Ok(raw("723"))]), calendar);

        poller.start().await;
        assert_eq!(poller.current_interval(), Some(Duration::from_secs(60)));

        let near_close = calendar.poll_close - ChronoDuration::minutes(4);
        assert_eq!(poller.reschedule(near_close), Duration::from_secs(1));
        assert_eq!(poller.current_interval(), Some(Duration::from_secs(1)));

        poller.stop();
        assert_eq!(poller.reschedule(calendar.poll_close + ChronoDuration::minutes(1)), Duration::from_secs(300));
        assert_eq!(poller.current_interval(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_rearm_across_interval_boundaries() {
        let origin = Instant::now();
        let base = Utc::now();
        let clock = move || base + ChronoDuration::from_std(origin.elapsed()).unwrap_or_default();

        let calendar = ElectionCalendar::new(base - ChronoDuration::hours(8), base + ChronoDuration::minutes(61));
        let store = SnapshotStore::new();
        let policy = ProjectionPolicy::new(&calendar, 10);
        let source = ScriptedSource::new(vec![Ok(raw("700")), Ok(raw("723"))]);
        let poller = Arc::new(SourcePoller::new(source, store.clone(), calendar, policy).with_clock(clock));

        assert_eq!(poller.start().await, Duration::from_secs(300));

        // First timer tick at +5 min: 56 minutes left.
        tokio::time::sleep(Duration::from_secs(301)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.current().unwrap().valid_votes.count(), 723);
        assert_eq!(poller.current_interval(), Some(Duration::from_secs(60)));

        // Minute ticks until 30 minutes are left, failing on an exhausted script.
        tokio::time::sleep(Duration::from_secs(31 * 60 - 301 + 5)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(poller.current_interval(), Some(Duration::from_secs(30)));
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 2 + 26);
        assert_eq!(store.current().unwrap().valid_votes.count(), 723);

        poller.stop();
    }
}
