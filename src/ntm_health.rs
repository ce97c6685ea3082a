// Feed staleness, health classification and the one-second clock tick
use crate::ntm_feed::ConnectionState;
use crate::ntm_models::{NTMError, Result};
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const LAGGING_THRESHOLD_SECS: i64 = 13;

/// True when more than `LAGGING_THRESHOLD_SECS` whole seconds have elapsed.
pub fn is_lagging(now: DateTime<Utc>, last_update: DateTime<Utc>) -> bool {
    StalenessMonitor::default().is_lagging(now, last_update)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessMonitor {
    threshold_secs: i64,
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        StalenessMonitor { threshold_secs: LAGGING_THRESHOLD_SECS }
    }
}

impl StalenessMonitor {
    pub fn new(threshold_secs: i64) -> Self {
        StalenessMonitor { threshold_secs }
    }

    pub fn threshold_secs(&self) -> i64 {
        self.threshold_secs
    }

    pub fn is_lagging(&self, now: DateTime<Utc>, last_update: DateTime<Utc>) -> bool {
        let elapsed_ms = (now - last_update).num_milliseconds();
        elapsed_ms.div_euclid(1000) > self.threshold_secs
    }
}

/// `now` is refreshed by the clock tick, `last_update` by accepted snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockState {
    pub last_update: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl ClockState {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        ClockState { last_update: now, now }
    }

    pub fn seconds_since_update(&self) -> i64 {
        (self.now - self.last_update).num_milliseconds().div_euclid(1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    Healthy,
    Degraded,
    Down,
}

impl FeedHealth {
    pub fn classify(state: ConnectionState, lagging: bool) -> Self {
        match (state, lagging) {
            (ConnectionState::Connected, false) => FeedHealth::Healthy,
            (ConnectionState::Connected, true) => FeedHealth::Degraded,
            _ => FeedHealth::Down,
        }
    }

    pub fn indicator(self) -> &'static str {
        match self {
            FeedHealth::Healthy => "✅",
            FeedHealth::Degraded => "⚠",
            FeedHealth::Down => "❌",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeedHealth::Healthy => "healthy",
            FeedHealth::Degraded => "degraded",
            FeedHealth::Down => "down",
        }
    }
}

/// Background clock calling `on_tick` once per period until stopped or until
/// `on_tick` returns false.
pub struct Ticker {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Ticker {
    pub const PERIOD: Duration = Duration::from_secs(1);

    pub fn start<F>(period: Duration, mut on_tick: F) -> Result<Self>
    where
        F: FnMut(DateTime<Utc>) -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name("ntm-clock".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !on_tick(Utc::now()) {
                            break;
                        }
                    }
                    _ => break,
                }
            })
            .map_err(|e| NTMError::TeardownError(format!("Failed to start clock thread: {}", e)))?;

        Ok(Ticker { stop: Some(stop_tx), worker: Some(worker) })
    }

    pub fn stop(&mut self) -> Result<()> {
        // dropping the sender wakes the worker
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| NTMError::TeardownError("clock thread panicked".to_string()))?;
            debug!("Clock stopped");
        }
        Ok(())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 14, 31, 0).unwrap()
    }

    fn after_ms(ms: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::milliseconds(ms)
    }

    #[test]
    fn lagging_boundary_is_strict() {
        assert!(!is_lagging(after_ms(0), t0()));
        assert!(!is_lagging(after_ms(13_000), t0()));
        assert!(!is_lagging(after_ms(13_999), t0()));
        assert!(is_lagging(after_ms(14_000), t0()));
    }

    #[test]
    fn clock_skew_is_not_lagging() {
        assert!(!is_lagging(t0(), after_ms(60_000)));
    }

    #[test]
    fn custom_threshold() {
        let monitor = StalenessMonitor::new(5);
        assert!(!monitor.is_lagging(after_ms(5_999), t0()));
        assert!(monitor.is_lagging(after_ms(6_000), t0()));
    }

    #[test]
    fn classifies_health() {
        assert_eq!(FeedHealth::classify(ConnectionState::Connected, false), FeedHealth::Healthy);
        assert_eq!(FeedHealth::classify(ConnectionState::Connected, true), FeedHealth::Degraded);
        assert_eq!(FeedHealth::classify(ConnectionState::Disconnected, false), FeedHealth::Down);
        assert_eq!(FeedHealth::classify(ConnectionState::Disconnected, true), FeedHealth::Down);
        assert_eq!(FeedHealth::classify(ConnectionState::Connecting, false), FeedHealth::Down);
        assert_eq!(
            FeedHealth::classify(ConnectionState::Reconnecting { attempt: 2 }, false),
            FeedHealth::Down
        );
        assert_eq!(FeedHealth::Degraded.indicator(), "⚠");
    }

    #[test]
    fn clock_state_counts_whole_seconds() {
        let mut clock = ClockState::starting_at(t0());
        clock.now = after_ms(12_500);
        assert_eq!(clock.seconds_since_update(), 12);
    }

    #[test]
    fn ticker_ticks_and_stops() {
        let ticks = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&ticks);
        let mut ticker = Ticker::start(Duration::from_millis(10), move |_| {
            *counter.lock().unwrap() += 1;
            true
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        ticker.stop().unwrap();
        let seen = *ticks.lock().unwrap();
        assert!(seen >= 1);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(*ticks.lock().unwrap(), seen);
    }

    #[test]
    fn ticker_exits_when_sink_refuses() {
        let mut ticker = Ticker::start(Duration::from_millis(5), |_| false).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(ticker.stop().is_ok());
    }
}
