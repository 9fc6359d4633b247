use serde::Serialize;
use std::time::{Duration, Instant};

/// Monotonic instant at which a request entered the pipeline.
///
/// Stored in the request's extensions so an outer layer that already
/// timestamps requests can share its token with the metrics middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartToken(Instant);

impl StartToken {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    /// Wrap an instant captured elsewhere (e.g. by an outer timing layer).
    pub fn from_instant(at: Instant) -> Self {
        Self(at)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time since the token was taken. Never negative: `Instant` saturates.
    pub fn elapsed(&self) -> Delay {
        Delay::from_duration(self.0.elapsed())
    }
}

/// A duration in both wire representations.
///
/// `ms` is a string so the collector receives exactly three fractional
/// digits regardless of how its JSON parser treats floats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delay {
    pub ns: u64,
    pub ms: String,
}

impl Delay {
    pub fn from_nanos(ns: u64) -> Self {
        Self {
            ns,
            ms: format!("{:.3}", ns as f64 / 1e6),
        }
    }

    pub fn from_duration(d: Duration) -> Self {
        // u64 nanoseconds covers ~584 years
        Self::from_nanos(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn as_micros(&self) -> u64 {
        self.ns / 1_000
    }
}
