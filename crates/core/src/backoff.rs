#![forbid(unsafe_code)]

//! Delay between archival attempts of a finished trace.
//!
//! Live chunks expire after `chunks_ttl`, so every retry has to happen before
//! that. The per-attempt step is `chunks_ttl / (3.5 * max_attempts)` floored
//! to whole hours, so the delays of attempts `1..=n` add up to at most
//! `chunks_ttl * (n + 1) / 7`, which stays below the TTL for any
//! `max_attempts` up to five.

use rand::Rng;
use std::time::Duration;

use crate::limits::{CHUNKS_TTL, MAX_ARCHIVAL_ATTEMPTS};

/// Divisor that keeps `sum(value(1..=max_attempts))` under `chunks_ttl`.
/// Not a tuning knob: lowering it breaks that bound for the default five attempts.
pub const TTL_SAFETY_DIVISOR: f64 = 3.5;
pub const MAX_JITTER: Duration = Duration::from_secs(4 * 60 * 60);

const HOUR_SECS: u64 = 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    archival_attempts: u32,
    chunks_ttl: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(archival_attempts: u32) -> Self {
        Self::with_limits(archival_attempts, CHUNKS_TTL, MAX_ARCHIVAL_ATTEMPTS)
    }

    pub fn with_limits(archival_attempts: u32, chunks_ttl: Duration, max_attempts: u32) -> Self {
        Self {
            archival_attempts,
            chunks_ttl,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn archival_attempts(&self) -> u32 {
        self.archival_attempts
    }

    /// Whole hours of the per-attempt step, times the attempt count.
    pub fn value(&self) -> Duration {
        let ttl_hours = self.chunks_ttl.as_secs_f64() / HOUR_SECS as f64;
        let step_hours =
            (ttl_hours / (TTL_SAFETY_DIVISOR * f64::from(self.max_attempts))).floor() as u64;
        Duration::from_secs(step_hours * u64::from(self.archival_attempts) * HOUR_SECS)
    }

    pub fn value_with_jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.value() + Duration::from_secs(rng.gen_range(0..MAX_JITTER.as_secs()))
    }
}
