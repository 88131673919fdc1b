use core::{future::Future, num::NonZero, time::Duration};
use std::sync::Arc;

use http::StatusCode;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
    time::Instant,
};

use crate::stat::{Outcome, ResultSet, Timestamp};

/// HTTP execution capability.
///
/// Performs exactly one HTTP request per call. The dispatcher never looks
/// inside, it only measures the time around the call.
pub trait Client: Send + Sync + 'static {
    fn execute(&self) -> impl Future<Output = Result<StatusCode, anyhow::Error>> + Send;
}

/// Termination condition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Dispatch exactly this number of requests and wait for all of them.
    Requests(NonZero<u64>),
    /// Keep dispatching until this much time has elapsed since the start.
    Duration(Duration),
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub limit: Limit,
    /// Maximum number of requests in flight.
    pub concurrency: NonZero<usize>,
    /// Per-request timeout, after which the attempt counts as failed.
    pub request_timeout: Option<Duration>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Completed,
    Interrupted,
}

/// Bounded-concurrency request dispatcher.
///
/// Consumed by [`Engine::run`], so every instance drives at most one run.
#[derive(Debug)]
pub struct Engine<C> {
    cfg: Config,
    client: Arc<C>,
    results: Arc<ResultSet>,
}

impl<C> Engine<C>
where
    C: Client,
{
    pub fn new(cfg: Config, client: C) -> Self {
        Self {
            cfg,
            client: Arc::new(client),
            results: Arc::new(ResultSet::new()),
        }
    }

    /// Returns the shared result set this engine writes into.
    #[inline]
    pub fn results(&self) -> Arc<ResultSet> {
        self.results.clone()
    }

    /// Runs the load until the configured limit is reached or `stop`
    /// resolves, whichever comes first.
    ///
    /// The result set is sealed before returning, regardless of how the run
    /// ended.
    pub async fn run<F>(self, stop: F) -> Status
    where
        F: Future<Output = ()>,
    {
        let concurrency = self.cfg.concurrency.get();
        let slots = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut stop = core::pin::pin!(stop);

        let start = Timestamp::now();
        log::info!("running {:?} with concurrency {}", self.cfg.limit, concurrency);

        let (status, end) = match self.cfg.limit {
            Limit::Requests(num) => {
                let mut status = Status::Completed;

                for _ in 0..num.get() {
                    let permit = tokio::select! {
                        biased;
                        _ = &mut stop => {
                            status = Status::Interrupted;
                            break;
                        }
                        Ok(permit) = slots.clone().acquire_owned() => permit,
                    };
                    self.spawn(&mut tasks, permit);
                    reap(&mut tasks);
                }

                if status == Status::Completed {
                    tokio::select! {
                        biased;
                        _ = &mut stop => status = Status::Interrupted,
                        _ = drain(&mut tasks) => {}
                    }
                }

                (status, Timestamp::now())
            }
            Limit::Duration(duration) => {
                let deadline = start.mono().checked_add(duration).unwrap_or_else(|| far_future(start.mono()));
                let mut expired = core::pin::pin!(tokio::time::sleep_until(deadline));

                let status = loop {
                    let permit = tokio::select! {
                        biased;
                        _ = &mut stop => break Status::Interrupted,
                        _ = &mut expired => break Status::Completed,
                        Ok(permit) = slots.clone().acquire_owned() => permit,
                    };
                    // A slot may free up exactly at the deadline.
                    if Instant::now() >= deadline {
                        break Status::Completed;
                    }
                    self.spawn(&mut tasks, permit);
                    reap(&mut tasks);
                };

                (status, Timestamp::now())
            }
        };

        // Requests still in flight are abandoned. Whatever completed before
        // this point has already been recorded.
        tasks.shutdown().await;

        if let Err(err) = self.results.seal(start, end) {
            log::error!("failed to seal results: {err}");
        }
        log::info!("run {:?} after {:?}", status, end.since(&start));

        status
    }

    fn spawn(&self, tasks: &mut JoinSet<()>, permit: OwnedSemaphorePermit) {
        let client = self.client.clone();
        let results = self.results.clone();
        let timeout = self.cfg.request_timeout;

        tasks.spawn(async move {
            let outcome = execute(client.as_ref(), timeout).await;
            // Release the slot before touching the shared state.
            drop(permit);

            if let Err(err) = results.record(outcome) {
                log::error!("{err}");
            }
        });
    }
}

/// Executes a single request, measuring its duration.
async fn execute<C>(client: &C, timeout: Option<Duration>) -> Outcome
where
    C: Client,
{
    let now = Instant::now();

    let rc = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, client.execute()).await {
            Ok(rc) => rc,
            Err(..) => Err(anyhow::anyhow!("request timed out after {timeout:?}")),
        },
        None => client.execute().await,
    };

    match rc {
        Ok(code) => {
            let duration = now.elapsed();
            log::debug!("response code: {}, elapsed: {:?}", code.as_u16(), duration);
            Outcome::Success { code, duration }
        }
        Err(err) => {
            log::debug!("request failed: {err:#}");
            Outcome::Failure(err)
        }
    }
}

/// A deadline that is never reached in practice, for durations that do not
/// fit into an `Instant`.
#[inline]
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86400 * 365 * 30)
}

/// Collects finished tasks without waiting, so the set does not grow
/// unbounded on long runs.
#[inline]
fn reap(tasks: &mut JoinSet<()>) {
    while let Some(rc) = tasks.try_join_next() {
        on_joined(rc);
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(rc) = tasks.join_next().await {
        on_joined(rc);
    }
}

#[inline]
fn on_joined(rc: Result<(), tokio::task::JoinError>) {
    if let Err(err) = rc {
        if err.is_panic() {
            log::error!("request task panicked: {err}");
        }
    }
}

#[cfg(test)]
mod test {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::collections::BTreeMap;

    use super::*;

    /// Client that sleeps for a fixed time and tracks the peak number of
    /// concurrent calls.
    #[derive(Debug)]
    struct SleepClient {
        delay: Duration,
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl SleepClient {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: Arc::new(AtomicUsize::new(0)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Client for SleepClient {
        async fn execute(&self) -> Result<StatusCode, anyhow::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let curr = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(curr, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(StatusCode::OK)
        }
    }

    /// Client that fails every second call.
    #[derive(Debug, Default)]
    struct FlakyClient {
        calls: AtomicUsize,
    }

    impl Client for FlakyClient {
        async fn execute(&self) -> Result<StatusCode, anyhow::Error> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;

            if idx % 2 == 0 {
                Ok(StatusCode::OK)
            } else {
                Err(anyhow::anyhow!("connection reset"))
            }
        }
    }

    fn cfg(limit: Limit, concurrency: usize) -> Config {
        Config {
            limit,
            concurrency: NonZero::new(concurrency).unwrap(),
            request_timeout: None,
        }
    }

    fn requests(n: u64) -> Limit {
        Limit::Requests(NonZero::new(n).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_mode() {
        let client = SleepClient::new(Duration::from_millis(100));
        let peak = client.peak.clone();
        let engine = Engine::new(cfg(requests(10), 2), client);
        let results = engine.results();

        let status = engine.run(core::future::pending()).await;
        assert_eq!(Status::Completed, status);
        assert!(results.is_sealed());

        let s = results.summarize().unwrap();
        assert_eq!(BTreeMap::from([(200, 10)]), s.code_counts);
        assert_eq!(10, s.total_requests);
        assert_eq!(0, s.num_errors);
        assert!((s.avg_latency - 0.1).abs() < 1e-3, "{}", s.avg_latency);
        assert!((s.total_time - 0.5).abs() < 1e-2, "{}", s.total_time);
        assert!((s.rps - 20.0).abs() < 0.5, "{}", s.rps);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_mode_accounts_every_request() {
        for (num, concurrency) in [(1, 1), (7, 3), (32, 4), (50, 64)] {
            let engine = Engine::new(cfg(requests(num), concurrency), FlakyClient::default());
            let results = engine.results();

            engine.run(core::future::pending()).await;

            let s = results.summarize().unwrap();
            assert_eq!(num, s.total_requests + s.num_errors);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_alternating_failures() {
        let engine = Engine::new(cfg(requests(5), 1), FlakyClient::default());
        let results = engine.results();

        engine.run(core::future::pending()).await;

        let s = results.summarize().unwrap();
        assert_eq!(2, s.num_errors);
        assert_eq!(3, s.total_requests);
        assert_eq!(BTreeMap::from([(200, 3)]), s.code_counts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap() {
        let client = SleepClient::new(Duration::from_millis(5));
        let peak = client.peak.clone();
        let calls = client.calls.clone();
        let engine = Engine::new(cfg(requests(200), 8), client);

        engine.run(core::future::pending()).await;

        assert_eq!(200, calls.load(Ordering::SeqCst));
        assert_eq!(8, peak.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_mode() {
        let client = SleepClient::new(Duration::from_millis(50));
        let peak = client.peak.clone();
        let engine = Engine::new(cfg(Limit::Duration(Duration::from_secs(1)), 4), client);
        let results = engine.results();

        let status = engine.run(core::future::pending()).await;
        assert_eq!(Status::Completed, status);

        let s = results.summarize().unwrap();
        assert!((s.total_time - 1.0).abs() < 1e-2, "{}", s.total_time);
        assert!((76..=80).contains(&s.total_requests), "{}", s.total_requests);
        assert!((s.rps - s.total_requests as f64).abs() < 1.0, "{}", s.rps);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_timeout_mode() {
        let client = SleepClient::new(Duration::from_millis(50));
        let engine = Engine::new(cfg(Limit::Duration(Duration::from_secs(10)), 4), client);
        let results = engine.results();

        let stop = tokio::time::sleep(Duration::from_millis(275));
        let status = engine.run(stop).await;
        assert_eq!(Status::Interrupted, status);

        let s = results.summarize().unwrap();
        assert!(s.end_time >= s.start_time);
        assert!((s.total_time - 0.275).abs() < 1e-2, "{}", s.total_time);
        assert_eq!(20, s.total_requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_waiting_for_slot() {
        // A single slot held by a call that never finishes in time.
        let client = SleepClient::new(Duration::from_secs(3600));
        let engine = Engine::new(cfg(requests(10), 1), client);
        let results = engine.results();

        let stop = tokio::time::sleep(Duration::from_millis(10));
        let status = engine.run(stop).await;
        assert_eq!(Status::Interrupted, status);

        let s = results.summarize().unwrap();
        assert_eq!(0, s.total_requests);
        assert!(s.total_time < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_duration() {
        for duration in [Duration::MAX, Duration::from_secs(u64::MAX)] {
            let client = SleepClient::new(Duration::from_millis(3));
            let engine = Engine::new(cfg(Limit::Duration(duration), 1), client);
            let results = engine.results();

            let stop = tokio::time::sleep(Duration::from_millis(10));
            let status = engine.run(stop).await;
            assert_eq!(Status::Interrupted, status);
            assert!(results.is_sealed());

            let s = results.summarize().unwrap();
            assert_eq!(3, s.total_requests);
            assert!((s.total_time - 0.01).abs() < 1e-3, "{}", s.total_time);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_draining() {
        let client = SleepClient::new(Duration::from_millis(100));
        let calls = client.calls.clone();
        // All requests fit into the pool at once, so dispatch finishes
        // immediately and the stop hits the drain.
        let engine = Engine::new(cfg(requests(4), 8), client);
        let results = engine.results();

        let stop = tokio::time::sleep(Duration::from_millis(50));
        let status = engine.run(stop).await;
        assert_eq!(Status::Interrupted, status);
        assert!(results.is_sealed());
        assert_eq!(4, calls.load(Ordering::SeqCst));

        let s = results.summarize().unwrap();
        assert!(s.total_requests + s.num_errors < 4);
        assert_eq!(0, s.total_requests);
        assert!((s.total_time - 0.05).abs() < 1e-3, "{}", s.total_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let client = SleepClient::new(Duration::from_secs(5));
        let mut cfg = cfg(requests(3), 3);
        cfg.request_timeout = Some(Duration::from_secs(1));
        let engine = Engine::new(cfg, client);
        let results = engine.results();

        engine.run(core::future::pending()).await;

        let s = results.summarize().unwrap();
        assert_eq!(0, s.total_requests);
        assert_eq!(3, s.num_errors);
        assert_eq!(
            BTreeMap::from([("request timed out after 1s".to_string(), 3)]),
            s.error_counts
        );
    }
}
