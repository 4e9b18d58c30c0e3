//! Backing-store session credentials and the wall clock used to expire them.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use time::OffsetDateTime;

/// An opaque session credential issued by the backing store.
///
/// The mediator never inspects it. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wraps a raw credential value.
    #[must_use]
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"[REDACTED]").finish()
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Source of wall-clock time, compared against assertion `exp` claims.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> OffsetDateTime;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    /// Creates a clock frozen at the given Unix timestamp.
    ///
    /// Timestamps outside the representable range fall back to the epoch.
    #[must_use]
    pub fn at(unix_seconds: i64) -> Self {
        let now = OffsetDateTime::from_unix_timestamp(unix_seconds)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Sets the clock to the given Unix timestamp.
    pub fn set(&self, unix_seconds: i64) {
        if let Ok(at) = OffsetDateTime::from_unix_timestamp(unix_seconds) {
            *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
