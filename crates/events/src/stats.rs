//! Sliding-window throughput.

use std::collections::VecDeque;

use chrono::Duration;
use gridworker_core::status::Throughput;
use gridworker_core::types::Timestamp;

/// Samples older than this many seconds are dropped from the rate calculation.
const WINDOW_SECS: i64 = 3600;

/// Rates are reported as zero until the samples span at least this long.
const MIN_PERIOD_SECS: i64 = 10;

/// Kudos and job rates over the last hour plus lifetime totals.
#[derive(Debug, Clone, Default)]
pub struct ThroughputWindow {
    samples: VecDeque<(Timestamp, f64)>,
    total_kudos: f64,
    total_tokens: u64,
    last_job_at: Option<Timestamp>,
    last_job_kudos: f64,
}

impl ThroughputWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed job that earned `kudos`.
    pub fn record(&mut self, kudos: f64, tokens: u64, at: Timestamp) {
        self.samples.push_back((at, kudos));
        self.total_kudos += kudos;
        self.total_tokens += tokens;
        self.last_job_at = Some(at);
        self.last_job_kudos = kudos;
        self.prune(at);
    }

    pub fn kudos_per_hour(&self, now: Timestamp) -> f64 {
        match self.period_hours(now) {
            Some(hours) => self.in_window(now).map(|(_, k)| k).sum::<f64>() / hours,
            None => 0.0,
        }
    }

    pub fn jobs_per_hour(&self, now: Timestamp) -> f64 {
        match self.period_hours(now) {
            Some(hours) => self.in_window(now).count() as f64 / hours,
            None => 0.0,
        }
    }

    pub fn summary(&self, now: Timestamp) -> Throughput {
        Throughput {
            total_kudos: self.total_kudos,
            total_tokens: self.total_tokens,
            kudos_per_hour: round1(self.kudos_per_hour(now)),
            jobs_per_hour: round1(self.jobs_per_hour(now)),
            last_job_at: self.last_job_at,
            last_job_kudos: self.last_job_kudos,
        }
    }

    // ---- private helpers ----

    fn prune(&mut self, now: Timestamp) {
        let cutoff = now - Duration::seconds(WINDOW_SECS);
        while self.samples.front().is_some_and(|(at, _)| *at < cutoff) {
            self.samples.pop_front();
        }
    }

    fn in_window(&self, now: Timestamp) -> impl Iterator<Item = &(Timestamp, f64)> {
        let cutoff = now - Duration::seconds(WINDOW_SECS);
        self.samples.iter().filter(move |(at, _)| *at >= cutoff)
    }

    /// Length of the sampled period in hours, if long enough to report.
    fn period_hours(&self, now: Timestamp) -> Option<f64> {
        let mut samples = self.in_window(now);
        let (oldest, _) = samples.next()?;
        samples.next()?;
        let period = now - *oldest;
        if period < Duration::seconds(MIN_PERIOD_SECS) {
            return None;
        }
        Some(period.num_milliseconds() as f64 / 3_600_000.0)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
