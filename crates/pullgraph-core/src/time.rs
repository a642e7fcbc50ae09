//! Render timestamps.
//!
//! A [`Time`] carries a host time (nanoseconds on the process monotonic
//! clock), a sample time, or both. Devices stamp each render cycle; offline
//! rendering stamps sample time only.

use std::sync::OnceLock;
use std::time::Instant;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

static HOST_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current host time in nanoseconds since the first call in this process
#[must_use]
pub fn host_time_now() -> u64 {
    let epoch = HOST_EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Convert seconds to host time units
#[must_use]
pub fn host_time_for_seconds(seconds: f64) -> u64 {
    (seconds * NANOS_PER_SECOND).round() as u64
}

/// Convert host time units to seconds
#[must_use]
pub fn seconds_for_host_time(host_time: u64) -> f64 {
    host_time as f64 / NANOS_PER_SECOND
}

/// Timestamp of a render cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Time {
    host_time: Option<u64>,
    sample_time: Option<i64>,
    sample_rate: f64,
}

impl Time {
    /// Timestamp with both host and sample time
    #[must_use]
    pub const fn new(host_time: u64, sample_time: i64, sample_rate: f64) -> Self {
        Self {
            host_time: Some(host_time),
            sample_time: Some(sample_time),
            sample_rate,
        }
    }

    #[must_use]
    pub const fn from_host_time(host_time: u64) -> Self {
        Self {
            host_time: Some(host_time),
            sample_time: None,
            sample_rate: 0.0,
        }
    }

    #[must_use]
    pub const fn from_sample_time(sample_time: i64, sample_rate: f64) -> Self {
        Self {
            host_time: None,
            sample_time: Some(sample_time),
            sample_rate,
        }
    }

    #[must_use]
    pub const fn host_time(&self) -> Option<u64> {
        self.host_time
    }

    #[must_use]
    pub const fn sample_time(&self) -> Option<i64> {
        self.sample_time
    }

    #[must_use]
    pub const fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[must_use]
    pub const fn is_host_time_valid(&self) -> bool {
        self.host_time.is_some()
    }

    #[must_use]
    pub const fn is_sample_time_valid(&self) -> bool {
        self.sample_time.is_some()
    }

    /// Fill in the missing half of this timestamp from a fully specified anchor.
    ///
    /// Returns `None` if the anchor lacks host or sample time, has no sample
    /// rate, or this timestamp carries neither.
    #[must_use]
    pub fn extrapolate_from_anchor(&self, anchor: &Self) -> Option<Self> {
        let (anchor_host, anchor_sample) = (anchor.host_time?, anchor.sample_time?);
        let rate = anchor.sample_rate;
        if rate <= 0.0 {
            return None;
        }

        if let Some(sample_time) = self.sample_time {
            let seconds = (sample_time - anchor_sample) as f64 / rate;
            let host = anchor_host as f64 + seconds * NANOS_PER_SECOND;
            return Some(Self::new(host.max(0.0).round() as u64, sample_time, rate));
        }

        let host_time = self.host_time?;
        let seconds = (host_time as f64 - anchor_host as f64) / NANOS_PER_SECOND;
        let sample = anchor_sample + (seconds * rate).round() as i64;
        Some(Self::new(host_time, sample, rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_time_conversion() {
        assert_eq!(host_time_for_seconds(1.5), 1_500_000_000);
        assert!((seconds_for_host_time(250_000_000) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_host_time_is_monotonic() {
        let a = host_time_now();
        let b = host_time_now();
        assert!(b >= a);
    }

    #[test]
    fn test_extrapolate_sample_to_host() {
        let anchor = Time::new(1_000_000_000, 48000, 48000.0);
        let later = Time::from_sample_time(96000, 48000.0);

        let time = later.extrapolate_from_anchor(&anchor).unwrap();
        assert_eq!(time.host_time(), Some(2_000_000_000));
        assert_eq!(time.sample_time(), Some(96000));
    }

    #[test]
    fn test_extrapolate_host_to_sample() {
        let anchor = Time::new(0, 0, 44100.0);
        let later = Time::from_host_time(500_000_000);

        let time = later.extrapolate_from_anchor(&anchor).unwrap();
        assert_eq!(time.sample_time(), Some(22050));
        assert_eq!(time.sample_rate(), 44100.0);
    }

    #[test]
    fn test_extrapolate_requires_full_anchor() {
        let partial = Time::from_sample_time(0, 48000.0);
        assert!(Time::from_sample_time(10, 48000.0)
            .extrapolate_from_anchor(&partial)
            .is_none());
        assert!(Time::default()
            .extrapolate_from_anchor(&Time::new(0, 0, 48000.0))
            .is_none());
    }
}
