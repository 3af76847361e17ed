// Wall clock in the engine's configured timezone

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};

/// Source of "now" for derivation, catch-up and check-in decisions.
/// All reminder wall-clock reasoning happens in `timezone()`.
pub trait Clock: Send + Sync {
    fn timezone(&self) -> Tz;

    fn now(&self) -> DateTime<Tz>;

    /// Calendar day in the configured zone
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Real time, viewed through a single IANA zone
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn timezone(&self) -> Tz {
        self.tz
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug, Clone)]
pub struct FixedClock {
    tz: Tz,
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            tz: now.timezone(),
            now: Arc::new(Mutex::new(now.with_timezone(&Utc))),
        }
    }

    /// Build from zone-local wall-clock components. Returns `None` for
    /// nonexistent local times (DST gaps).
    pub fn at_local(
        tz: Tz,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    ) -> Option<Self> {
        tz.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .map(Self::new)
    }

    pub fn set(&self, now: DateTime<Tz>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now.with_timezone(&Utc);
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn timezone(&self) -> Tz {
        self.tz
    }

    fn now(&self) -> DateTime<Tz> {
        let utc = self
            .now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner());
        utc.with_timezone(&self.tz)
    }
}
