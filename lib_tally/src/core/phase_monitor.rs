//! # Phase Monitor
//!
//! The listener side of the pipeline. It decides what subscribers see and
//! when, by combining two event sources:
//!
//! - a fixed tick that re-evaluates the voting phase and broadcasts exactly
//!   once per transition (`before -> polling`, `polling -> after`, ...);
//! - the snapshot change channel, which triggers a results broadcast only once
//!   polls have closed.
//!
//! A transition that lands on `after` while a snapshot exists broadcasts the
//! final results instead of a bare `sync`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::core::notification::Notification;
use crate::core::registry::ConnectionRegistry;
use crate::core::snapshot_store::SnapshotStore;
use crate::election::calendar::ElectionCalendar;
use crate::election::phase::Phase;
use crate::election::snapshot::Snapshot;
use crate::error::Result;

/// Broadcasts phase transitions and post-close result changes.
pub struct PhaseMonitor {
    calendar: ElectionCalendar,
    registry: Arc<ConnectionRegistry>,
    store: SnapshotStore,
    last_phase: Mutex<Option<Phase>>,
}

impl PhaseMonitor {
    /// Creates a monitor that has not observed any phase yet.
    pub fn new(calendar: ElectionCalendar, registry: Arc<ConnectionRegistry>, store: SnapshotStore) -> Self {
        Self {
            calendar,
            registry,
            store,
            last_phase: Mutex::new(None),
        }
    }

    /// Records the phase at `now` and returns it if it differs from the
    /// previous observation. The first observation only seeds the state.
    pub fn observe(&self, now: DateTime<Utc>) -> Option<Phase> {
        let current = self.calendar.phase_at(now);
        let mut last = self.last_phase.lock().unwrap_or_else(PoisonError::into_inner);

        match last.replace(current) {
            Some(previous) if previous != current => {
                log::info!("phase changed: {} -> {}", previous, current);
                Some(current)
            }
            _ => None,
        }
    }

    /// One tick: on a phase transition, broadcast the matching notification.
    /// Returns the number of subscribers reached, `None` when nothing changed.
    pub fn on_tick(&self, now: DateTime<Utc>) -> Result<Option<usize>> {
        let Some(phase) = self.observe(now) else {
            return Ok(None);
        };

        let notification = match (phase, self.store.current()) {
            (Phase::After, Some(snapshot)) => Notification::polling(&snapshot, &self.calendar, now)?,
            _ => Notification::sync(&self.calendar, now),
        };

        Ok(Some(self.registry.broadcast(notification.to_payload()?, &[])))
    }

    /// A new snapshot arrived: broadcast it if polls have closed.
    /// Returns the number of subscribers reached, `None` when gated out.
    pub fn on_snapshot_changed(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Result<Option<usize>> {
        if self.calendar.phase_at(now) != Phase::After {
            log::debug!("snapshot changed before polls closed, not broadcasting");
            return Ok(None);
        }

        let notification = Notification::polling(snapshot, &self.calendar, now)?;
        Ok(Some(self.registry.broadcast(notification.to_payload()?, &[])))
    }

    /// Drives both event sources until `shutdown` fires.
    pub async fn run(self: Arc<Self>, tick: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut changes = self.store.subscribe();

        log::info!("phase monitor started (tick {}ms)", tick.as_millis());

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("phase monitor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.on_tick(Utc::now()) {
                        log::error!("phase broadcast failed: {}", e);
                    }
                }
                change = changes.recv() => {
                    match change {
                        Ok(snapshot) => {
                            if let Err(e) = self.on_snapshot_changed(&snapshot, Utc::now()) {
                                log::error!("results broadcast failed: {}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("phase monitor lagged, {} snapshot change(s) skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            log::warn!("snapshot change channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::calendar::ProjectionPolicy;
    use crate::election::snapshot::SnapshotRaw;
    use chrono::Duration as ChronoDuration;

    fn monitor() -> (PhaseMonitor, Arc<ConnectionRegistry>, SnapshotStore) {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = SnapshotStore::new();
        let monitor = PhaseMonitor::new(ElectionCalendar::default(), Arc::clone(&registry), store.clone());
        (monitor, registry, store)
    }

    fn snapshot() -> Snapshot {
        let raw = SnapshotRaw {
            e: "1000".into(),
            a: "150".into(),
            pvv: "85,00".into(),
            ..Default::default()
        };
        Snapshot::from_raw(raw, ProjectionPolicy::default()).unwrap()
    }

    #[test]
    fn first_observation_only_seeds() {
        let (monitor, registry, _store) = monitor();
        let (_id, mut rx) = registry.register();
        let open = ElectionCalendar::default().poll_open;

        assert_eq!(monitor.on_tick(open - ChronoDuration::seconds(2)).unwrap(), None);
        assert_eq!(monitor.on_tick(open - ChronoDuration::seconds(1)).unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn transition_broadcasts_sync_once() {
        let (monitor, registry, _store) = monitor();
        let (_id, mut rx) = registry.register();
        let open = ElectionCalendar::default().poll_open;

        monitor.on_tick(open - ChronoDuration::seconds(1)).unwrap();
        assert_eq!(monitor.on_tick(open).unwrap(), Some(1));
        assert_eq!(monitor.on_tick(open + ChronoDuration::seconds(1)).unwrap(), None);

        let message: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(message["type"], "sync");
        assert_eq!(message["state"], "polling");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closing_with_snapshot_broadcasts_results() {
        let (monitor, registry, store) = monitor();
        let (_id, mut rx) = registry.register();
        store.adopt(Arc::new(snapshot()));
        let close = ElectionCalendar::default().poll_close;

        monitor.on_tick(close).unwrap();
        assert_eq!(monitor.on_tick(close + ChronoDuration::seconds(1)).unwrap(), Some(1));

        let message: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(message["type"], "polling");
        assert_eq!(message["state"], "after");
    }

    #[test]
    fn closing_without_snapshot_broadcasts_sync() {
        let (monitor, registry, _store) = monitor();
        let (_id, mut rx) = registry.register();
        let close = ElectionCalendar::default().poll_close;

        monitor.on_tick(close).unwrap();
        monitor.on_tick(close + ChronoDuration::seconds(1)).unwrap();

        let message: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(message["type"], "sync");
        assert_eq!(message["state"], "after");
    }

    #[test]
    fn changes_are_gated_until_after() {
        let (monitor, registry, _store) = monitor();
        let (_id, mut rx) = registry.register();
        let close = ElectionCalendar::default().poll_close;

        assert_eq!(monitor.on_snapshot_changed(&snapshot(), close).unwrap(), None);
        assert!(rx.try_recv().is_err());

        assert_eq!(
            monitor.on_snapshot_changed(&snapshot(), close + ChronoDuration::minutes(1)).unwrap(),
            Some(1)
        );
        let message: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(message["type"], "polling");
    }
}
