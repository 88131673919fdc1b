use core::time::Duration;
use std::{collections::BTreeMap, time::SystemTime};

use http::StatusCode;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Aggregator usage errors.
///
/// These are contract violations between the dispatcher and the
/// [`ResultSet`], never network conditions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("outcome recorded after the result set was sealed")]
    Sealed,
    #[error("result set is already sealed")]
    AlreadySealed,
    #[error("result set is not sealed yet")]
    NotSealed,
}

/// The result of one request attempt.
#[derive(Debug)]
pub enum Outcome {
    Success { code: StatusCode, duration: Duration },
    Failure(anyhow::Error),
}

/// A point in time, both monotonic and wall-clock.
///
/// The monotonic part is used for all arithmetic, the wall-clock part only
/// for display.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    mono: Instant,
    wall: SystemTime,
}

impl Timestamp {
    #[inline]
    pub fn now() -> Self {
        Self { mono: Instant::now(), wall: SystemTime::now() }
    }

    #[inline]
    pub fn mono(&self) -> Instant {
        self.mono
    }

    /// Seconds since the Unix epoch.
    #[inline]
    pub fn unix_secs(&self) -> f64 {
        self.wall
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|v| v.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Elapsed time since `earlier`, zero if the clock went backwards.
    #[inline]
    pub fn since(&self, earlier: &Timestamp) -> Duration {
        self.mono.saturating_duration_since(earlier.mono)
    }
}

#[derive(Debug, Default)]
struct State {
    by_code: BTreeMap<u16, Vec<Duration>>,
    errors: Vec<anyhow::Error>,
    window: Option<(Timestamp, Timestamp)>,
}

/// Concurrency-safe sink for request outcomes.
///
/// Shared by every request task of a single run. Both collections are
/// append-only; once sealed no further outcome is accepted.
#[derive(Debug, Default)]
pub struct ResultSet {
    state: Mutex<State>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the given outcome.
    ///
    /// The lock is held for the append only.
    pub fn record(&self, outcome: Outcome) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.window.is_some() {
            return Err(Error::Sealed);
        }

        match outcome {
            Outcome::Success { code, duration } => {
                state.by_code.entry(code.as_u16()).or_default().push(duration);
            }
            Outcome::Failure(err) => {
                state.errors.push(err);
            }
        }

        Ok(())
    }

    /// Stamps the run boundary, turning this set read-only.
    pub fn seal(&self, start: Timestamp, end: Timestamp) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.window.is_some() {
            return Err(Error::AlreadySealed);
        }

        state.window = Some((start, end));
        Ok(())
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.state.lock().window.is_some()
    }

    /// Computes the run summary.
    ///
    /// Only valid after [`ResultSet::seal`]. Calling this repeatedly yields
    /// identical results, because nothing can be recorded after sealing.
    pub fn summarize(&self) -> Result<Summary, Error> {
        let state = self.state.lock();
        let (start, end) = state.window.ok_or(Error::NotSealed)?;

        let total_time = end.since(&start);

        let mut code_counts = BTreeMap::new();
        let mut total_requests = 0u64;
        let mut total_latency = Duration::ZERO;
        for (code, durations) in &state.by_code {
            code_counts.insert(*code, durations.len() as u64);
            total_requests += durations.len() as u64;
            total_latency += durations.iter().sum::<Duration>();
        }

        let mut error_counts = BTreeMap::new();
        for err in &state.errors {
            *error_counts.entry(format!("{err:#}")).or_default() += 1;
        }

        let rps = if total_time.is_zero() {
            0.0
        } else {
            total_requests as f64 / total_time.as_secs_f64()
        };
        let avg_latency = if total_requests == 0 {
            0.0
        } else {
            total_latency.as_secs_f64() / total_requests as f64
        };

        let m = Summary {
            start_time: start.unix_secs(),
            end_time: end.unix_secs(),
            total_time: total_time.as_secs_f64(),
            total_requests,
            num_errors: state.errors.len() as u64,
            code_counts,
            error_counts,
            avg_latency,
            rps,
        };

        Ok(m)
    }
}

/// Read-only statistics of a finished run.
///
/// All times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub start_time: f64,
    pub end_time: f64,
    pub total_time: f64,
    /// Number of successful requests, failures excluded.
    pub total_requests: u64,
    pub num_errors: u64,
    pub code_counts: BTreeMap<u16, u64>,
    /// Failures grouped by their message.
    pub error_counts: BTreeMap<String, u64>,
    /// Mean latency of successful requests.
    pub avg_latency: f64,
    pub rps: f64,
}

#[cfg(test)]
mod test {
    use super::*;

    fn ok(code: u16, ms: u64) -> Outcome {
        Outcome::Success {
            code: StatusCode::from_u16(code).unwrap(),
            duration: Duration::from_millis(ms),
        }
    }

    fn window(secs: u64) -> (Timestamp, Timestamp) {
        let start = Timestamp::now();
        let end = Timestamp {
            mono: start.mono + Duration::from_secs(secs),
            wall: start.wall + Duration::from_secs(secs),
        };
        (start, end)
    }

    #[test]
    fn test_summarize() {
        let set = ResultSet::new();
        set.record(ok(200, 100)).unwrap();
        set.record(ok(200, 300)).unwrap();
        set.record(ok(404, 200)).unwrap();
        set.record(Outcome::Failure(anyhow::anyhow!("connection refused"))).unwrap();

        let (start, end) = window(2);
        set.seal(start, end).unwrap();
        let s = set.summarize().unwrap();

        assert_eq!(3, s.total_requests);
        assert_eq!(1, s.num_errors);
        assert_eq!(BTreeMap::from([(200, 2), (404, 1)]), s.code_counts);
        assert!((s.avg_latency - 0.2).abs() < 1e-9);
        assert!((s.rps - 1.5).abs() < 1e-9);
        assert!((s.total_time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_idempotent() {
        let set = ResultSet::new();
        set.record(ok(200, 17)).unwrap();
        set.record(ok(500, 3)).unwrap();
        let (start, end) = window(1);
        set.seal(start, end).unwrap();

        assert_eq!(set.summarize().unwrap(), set.summarize().unwrap());
    }

    #[test]
    fn test_zero_total_time() {
        let set = ResultSet::new();
        set.record(ok(200, 1)).unwrap();
        let now = Timestamp::now();
        set.seal(now, now).unwrap();

        let s = set.summarize().unwrap();
        assert_eq!(0.0, s.total_time);
        assert_eq!(0.0, s.rps);
        assert_eq!(1, s.total_requests);
    }

    #[test]
    fn test_all_failed() {
        let set = ResultSet::new();
        set.record(Outcome::Failure(anyhow::anyhow!("dns"))).unwrap();
        set.record(Outcome::Failure(anyhow::anyhow!("reset"))).unwrap();
        let (start, end) = window(1);
        set.seal(start, end).unwrap();

        let s = set.summarize().unwrap();
        assert_eq!(0, s.total_requests);
        assert_eq!(2, s.num_errors);
        assert_eq!(BTreeMap::from([("dns".to_string(), 1), ("reset".to_string(), 1)]), s.error_counts);
        assert_eq!(0.0, s.avg_latency);
        assert_eq!(0.0, s.rps);
        assert!(s.code_counts.is_empty());
    }

    #[test]
    fn test_record_after_seal() {
        let set = ResultSet::new();
        let (start, end) = window(1);
        set.seal(start, end).unwrap();

        assert_eq!(Err(Error::Sealed), set.record(ok(200, 1)));
        assert_eq!(0, set.summarize().unwrap().total_requests);
    }

    #[test]
    fn test_seal_twice() {
        let set = ResultSet::new();
        let (start, end) = window(1);
        set.seal(start, end).unwrap();

        assert_eq!(Err(Error::AlreadySealed), set.seal(start, end));
    }

    #[test]
    fn test_summarize_unsealed() {
        let set = ResultSet::new();
        set.record(ok(200, 1)).unwrap();

        assert_eq!(Err(Error::NotSealed), set.summarize());
    }

    #[test]
    fn test_concurrent_record() {
        let set = std::sync::Arc::new(ResultSet::new());

        let threads: Vec<_> = (0..8)
            .map(|idx| {
                let set = set.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if idx % 2 == 0 {
                            set.record(ok(200, 1)).unwrap();
                        } else {
                            set.record(Outcome::Failure(anyhow::anyhow!("boom"))).unwrap();
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let (start, end) = window(1);
        set.seal(start, end).unwrap();
        let s = set.summarize().unwrap();
        assert_eq!(4000, s.total_requests);
        assert_eq!(4000, s.num_errors);
    }
}
