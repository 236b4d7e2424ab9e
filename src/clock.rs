// src/clock.rs
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of "now" for services that depend on the current date.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock used by tests and one-off CLI runs.
#[derive(Debug, Clone)]
pub struct FixedClock {
    current_time: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn at(current_time: NaiveDateTime) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(current_time)),
        }
    }

    pub fn on_date(date: NaiveDate) -> Self {
        Self::at(date.and_time(chrono::NaiveTime::MIN))
    }

    pub fn set_time(&self, current_time: NaiveDateTime) {
        *self.guard() = current_time;
    }

    pub fn advance(&self, duration: Duration) {
        *self.guard() += duration;
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        self.current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.guard().and_utc()
    }

    fn today(&self) -> NaiveDate {
        self.guard().date()
    }
}
