//! Multi-window request quota tracking.
//!
//! The upstream API meters calls per second, per minute and per calendar day.
//! [`QuotaTracker`] keeps one sliding window of send timestamps for each of the
//! short limits plus a daily counter that resets at local midnight, and answers
//! whether another attempt may be sent and how long to wait otherwise.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::{error, info, warn};

const SECOND_WINDOW: time::Duration = time::Duration::SECOND;
const MINUTE_WINDOW: time::Duration = time::Duration::MINUTE;

/// Request limits, fixed for the lifetime of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    pub per_second_limit: u32,
    pub per_minute_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 250,
            per_second_limit: 5,
            per_minute_limit: 300,
        }
    }
}

/// Wall-clock source. Quota days follow the clock's UTC offset.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> OffsetDateTime;
}

/// Local wall clock, falling back to UTC when the local offset cannot be
/// determined (multi-threaded processes on some platforms).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().expect("manual clock lock is not poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock is not poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("manual clock lock is not poisoned")
    }
}

/// Point-in-time view of quota usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub daily_count: u32,
    pub daily_limit: u32,
    pub minute_count: usize,
    pub per_minute_limit: u32,
    pub second_count: usize,
    pub per_second_limit: u32,
    pub reset_date: Date,
    pub server_rejections: u64,
}

#[derive(Debug)]
struct QuotaState {
    daily_count: u32,
    reset_date: Date,
    second_window: VecDeque<OffsetDateTime>,
    minute_window: VecDeque<OffsetDateTime>,
    server_rejections: u64,
}

impl QuotaState {
    fn new(today: Date) -> Self {
        Self {
            daily_count: 0,
            reset_date: today,
            second_window: VecDeque::new(),
            minute_window: VecDeque::new(),
            server_rejections: 0,
        }
    }

    /// Resets the day on rollover and drops timestamps that left their window.
    fn refresh(&mut self, now: OffsetDateTime) {
        if now.date() > self.reset_date {
            self.daily_count = 0;
            self.reset_date = now.date();
        }

        let second_cutoff = now - SECOND_WINDOW;
        self.second_window.retain(|ts| *ts > second_cutoff);
        let minute_cutoff = now - MINUTE_WINDOW;
        self.minute_window.retain(|ts| *ts > minute_cutoff);
    }

    fn saturated_window(&self, config: &QuotaConfig) -> Option<&'static str> {
        if self.daily_count >= config.daily_limit {
            Some("daily")
        } else if self.minute_window.len() >= config.per_minute_limit as usize {
            Some("per-minute")
        } else if self.second_window.len() >= config.per_second_limit as usize {
            Some("per-second")
        } else {
            None
        }
    }

    fn wait_time(&self, config: &QuotaConfig, now: OffsetDateTime) -> Duration {
        let mut wait = Duration::ZERO;

        if self.second_window.len() >= config.per_second_limit as usize {
            if let Some(oldest) = self.second_window.iter().min() {
                wait = wait.max(positive(*oldest + SECOND_WINDOW - now));
            }
        }

        if self.minute_window.len() >= config.per_minute_limit as usize {
            if let Some(oldest) = self.minute_window.iter().min() {
                wait = wait.max(positive(*oldest + MINUTE_WINDOW - now));
            }
        }

        if self.daily_count >= config.daily_limit {
            wait = wait.max(until_next_midnight(now));
        }

        wait
    }
}

fn positive(delta: time::Duration) -> Duration {
    if delta.is_positive() {
        Duration::try_from(delta).unwrap_or_default()
    } else {
        Duration::ZERO
    }
}

fn until_next_midnight(now: OffsetDateTime) -> Duration {
    match now.date().next_day() {
        Some(tomorrow) => positive(tomorrow.midnight().assume_offset(now.offset()) - now),
        None => Duration::MAX,
    }
}

/// Thread-safe tracker of per-second, per-minute and daily request counts.
///
/// All reads and writes go through one mutex so concurrent callers observe
/// a consistent view of the windows.
#[derive(Debug)]
pub struct QuotaTracker {
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now().date();
        Self {
            config,
            clock,
            state: Mutex::new(QuotaState::new(today)),
        }
    }

    pub const fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Returns `false` when any of the three windows is at capacity.
    pub fn should_allow(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota state lock is not poisoned");
        state.refresh(now);

        match state.saturated_window(&self.config) {
            Some(window) => {
                warn!(window, "{window} rate limit reached");
                false
            }
            None => true,
        }
    }

    /// Records one attempt that is about to go over the wire.
    pub fn record(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota state lock is not poisoned");
        state.refresh(now);
        state.daily_count = state.daily_count.saturating_add(1);
        state.second_window.push_back(now);
        state.minute_window.push_back(now);
    }

    /// Minimum delay until the next attempt would be allowed; zero when no
    /// window is saturated.
    pub fn wait_time(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota state lock is not poisoned");
        state.refresh(now);
        state.wait_time(&self.config, now)
    }

    /// Combined [`should_allow`](Self::should_allow) and
    /// [`wait_time`](Self::wait_time) evaluated under a single lock.
    pub fn check(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota state lock is not poisoned");
        state.refresh(now);

        match state.saturated_window(&self.config) {
            Some(window) => {
                let wait = state.wait_time(&self.config, now);
                warn!(
                    window,
                    wait_secs = wait.as_secs_f64(),
                    "{window} rate limit reached"
                );
                Err(wait)
            }
            None => Ok(()),
        }
    }

    /// Admits and records one attempt under a single lock, or returns the
    /// wait time without recording anything.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota state lock is not poisoned");
        state.refresh(now);

        if let Some(window) = state.saturated_window(&self.config) {
            let wait = state.wait_time(&self.config, now);
            warn!(
                window,
                wait_secs = wait.as_secs_f64(),
                "{window} rate limit reached"
            );
            return Err(wait);
        }

        state.daily_count = state.daily_count.saturating_add(1);
        state.second_window.push_back(now);
        state.minute_window.push_back(now);
        Ok(())
    }

    /// Notes a 429 rejection reported by the server.
    pub fn note_rejection(&self, body: &str) {
        let server_message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
            });

        match server_message {
            Some(message) => error!(server_message = %message, "rate limit exceeded"),
            None => error!("rate limit exceeded (no details available)"),
        }

        let mut state = self.state.lock().expect("quota state lock is not poisoned");
        state.server_rejections = state.server_rejections.saturating_add(1);
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota state lock is not poisoned");
        state.refresh(now);

        QuotaSnapshot {
            daily_count: state.daily_count,
            daily_limit: self.config.daily_limit,
            minute_count: state.minute_window.len(),
            per_minute_limit: self.config.per_minute_limit,
            second_count: state.second_window.len(),
            per_second_limit: self.config.per_second_limit,
            reset_date: state.reset_date,
            server_rejections: state.server_rejections,
        }
    }

    pub fn log_status(&self) {
        let snapshot = self.snapshot();
        info!(
            daily = snapshot.daily_count,
            daily_limit = snapshot.daily_limit,
            per_minute = snapshot.minute_count,
            per_minute_limit = snapshot.per_minute_limit,
            per_second = snapshot.second_count,
            per_second_limit = snapshot.per_second_limit,
            "rate limit status"
        );
    }
}
