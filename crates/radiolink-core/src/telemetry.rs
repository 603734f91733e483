//! Telemetry history and periodic report polling.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use radiolink_config::AppConfig;

use crate::ipc::Dispatcher;
use crate::report::ReportEntry;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Dispatcher shared by the poller and the HTTP bridge.
pub type SharedDispatcher = Arc<Mutex<Dispatcher>>;

/// History shared between the poller (writer) and readers.
pub type SharedHistory = Arc<std::sync::Mutex<TelemetryHistory>>;

/// Bounded per-record time series, keyed by [`ReportEntry::key`].
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryHistory {
    #[serde(skip)]
    capacity: usize,
    #[serde(flatten)]
    series: BTreeMap<String, VecDeque<ReportEntry>>,
}

impl TelemetryHistory {
    /// `capacity` samples per key; at least one is always kept.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `entries`, evicting the oldest samples past capacity.
    pub fn record(&mut self, entries: impl IntoIterator<Item = ReportEntry>) {
        for entry in entries {
            let series = self.series.entry(entry.key()).or_default();
            if series.len() == self.capacity {
                series.pop_front();
            }
            series.push_back(entry);
        }
    }

    /// Samples for one key, oldest first.
    pub fn series(&self, key: &str) -> Option<&VecDeque<ReportEntry>> {
        self.series.get(key)
    }

    /// Most recent sample for one key.
    pub fn latest(&self, key: &str) -> Option<&ReportEntry> {
        self.series.get(key).and_then(VecDeque::back)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}

/// Requests a report on a fixed interval and records it.
pub struct Poller {
    dispatcher: SharedDispatcher,
    history: SharedHistory,
    interval: Duration,
    latest_tx: watch::Sender<Vec<ReportEntry>>,
}

impl Poller {
    pub fn new(dispatcher: SharedDispatcher, history: SharedHistory, interval: Duration) -> Self {
        let (latest_tx, _) = watch::channel(Vec::new());
        Self {
            dispatcher,
            history,
            interval,
            latest_tx,
        }
    }

    /// Poller with the `[poller]` interval and a fresh history.
    pub fn from_config(dispatcher: SharedDispatcher, config: &AppConfig) -> Self {
        let history = Arc::new(std::sync::Mutex::new(TelemetryHistory::new(
            config.poller.history_len,
        )));
        Self::new(dispatcher, history, config.poller.interval())
    }

    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.history)
    }

    /// Receives the latest non-empty report after every successful poll.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ReportEntry>> {
        self.latest_tx.subscribe()
    }

    /// Poll once. A failed report records nothing.
    pub async fn poll_once(&self) -> usize {
        let entries = self.dispatcher.lock().await.report().await;
        if entries.is_empty() {
            debug!("Report empty or failed; nothing recorded");
            return 0;
        }
        let count = entries.len();
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(entries.iter().cloned());
        self.latest_tx.send_replace(entries);
        trace!(entries = count, "Recorded report");
        count
    }

    /// Poll until a shutdown signal arrives.
    pub async fn run(self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Telemetry poller starting");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping poller");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}

/// Lock a shared history, recovering from a poisoned lock.
pub fn lock_history(history: &SharedHistory) -> std::sync::MutexGuard<'_, TelemetryHistory> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{StatusReport, StatusStats};
    use pretty_assertions::assert_eq;

    fn usage(id: i32, usage: f64, t: f64) -> ReportEntry {
        ReportEntry::Status(StatusReport {
            id,
            stats: StatusStats {
                usage,
                captured_at: t,
            },
        })
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = TelemetryHistory::new(3);
        history.record((0..5).map(|i| usage(0, i as f64, i as f64)));
        let series = history.series("U0").unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.front().unwrap().captured_at(), 2.0);
        assert_eq!(history.latest("U0").unwrap().captured_at(), 4.0);
    }

    #[test]
    fn test_history_keys_are_per_record() {
        let mut history = TelemetryHistory::new(50);
        history.record([usage(0, 1.0, 1.0), usage(1, 2.0, 1.0)]);
        assert_eq!(history.keys().collect::<Vec<_>>(), vec!["U0", "U1"]);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut history = TelemetryHistory::new(0);
        history.record([usage(0, 1.0, 1.0), usage(0, 2.0, 2.0)]);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.series("U0").unwrap().len(), 1);
    }

    #[test]
    fn test_history_serializes_by_key() {
        let mut history = TelemetryHistory::new(2);
        history.record([usage(3, 12.5, 10.0)]);
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json["U3"][0]["kind"], "status");
        assert_eq!(json["U3"][0]["stats"]["usage"], 12.5);
        assert!(json.get("capacity").is_none());
    }

    #[tokio::test]
    async fn test_failed_poll_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(dir.path().join("absent.sock"))));
        let poller = Poller::from_config(dispatcher, &AppConfig::default());
        assert_eq!(poller.poll_once().await, 0);
        assert!(lock_history(&poller.history()).is_empty());
        assert!(poller.subscribe().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(dir.path().join("absent.sock"))));
        let poller = Poller::new(
            Arc::clone(&dispatcher),
            Arc::new(std::sync::Mutex::new(TelemetryHistory::new(5))),
            Duration::from_millis(10),
        );
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(poller.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(ShutdownSignal).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(dispatcher.lock().await.last_id() >= 1);
    }
}
