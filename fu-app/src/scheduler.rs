//! Fixed-interval loop driving dispatch passes.
//!
//! One owned instance per process. `start` is a no-op while a loop is running,
//! so at most one timer exists. Ticks of the same loop never overlap; a manual
//! `trigger_once` may run alongside a tick and relies on the store's claims.

use crate::dispatcher::{DispatchPass, DispatchReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub interval_seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub next_check_estimate: Option<DateTime<Utc>>,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub last_report: Option<DispatchReport>,
    pub ticks: u64,
    pub manual_runs: u64,
}

struct RunningLoop {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct FollowUpScheduler {
    dispatcher: Arc<dyn DispatchPass>,
    default_interval: Duration,
    state: Arc<RwLock<SchedulerStatus>>,
    running: Mutex<Option<RunningLoop>>,
}

impl FollowUpScheduler {
    pub fn new(dispatcher: Arc<dyn DispatchPass>, default_interval: Duration) -> Self {
        let default_interval = if default_interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            default_interval
        };
        let status = SchedulerStatus {
            interval_seconds: default_interval.as_secs(),
            ..SchedulerStatus::default()
        };
        Self {
            dispatcher,
            default_interval,
            state: Arc::new(RwLock::new(status)),
            running: Mutex::new(None),
        }
    }

    /// Start the loop; the first pass runs immediately. `false` if already running.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn start(&self, interval: Option<Duration>) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::info!("follow-up scheduler already running; start ignored");
            return false;
        }

        let interval = interval
            .filter(|d| !d.is_zero())
            .unwrap_or(self.default_interval);
        {
            let mut guard = self.state.write().await;
            let now = Utc::now();
            guard.is_running = true;
            guard.interval_seconds = interval.as_secs();
            guard.started_at = Some(now);
            guard.next_check_estimate = Some(now);
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.state),
            interval,
            shutdown.clone(),
        ));
        *running = Some(RunningLoop { shutdown, handle });
        tracing::info!(interval_seconds = interval.as_secs(), "follow-up scheduler started");
        true
    }

    /// Stop the loop and wait for an in-flight pass to finish. `false` if it
    /// was not running. The slot stays occupied until the join completes, so a
    /// concurrent `start` waits instead of spawning a second loop.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(current) = running.as_mut() else {
            return false;
        };
        current.shutdown.cancel();
        if let Err(error) = (&mut current.handle).await {
            tracing::warn!(?error, "follow-up scheduler task join failed");
        }
        *running = None;

        let mut guard = self.state.write().await;
        guard.is_running = false;
        guard.next_check_estimate = None;
        tracing::info!("follow-up scheduler stopped");
        true
    }

    /// Run one pass now, outside the timer cadence.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn trigger_once(&self) -> DispatchReport {
        let started = Utc::now();
        let report = self.dispatcher.run_pass().await;
        let mut guard = self.state.write().await;
        guard.manual_runs = guard.manual_runs.saturating_add(1);
        record_run(&mut guard, started, report);
        report
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.state.read().await.clone()
    }
}

fn record_run(status: &mut SchedulerStatus, started: DateTime<Utc>, report: DispatchReport) {
    status.last_run_started_at = Some(started);
    status.last_run_finished_at = Some(Utc::now());
    status.last_report = Some(report);
}

async fn run_loop(
    dispatcher: Arc<dyn DispatchPass>,
    state: Arc<RwLock<SchedulerStatus>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let step = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::seconds(60));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let started = Utc::now();
                {
                    let mut guard = state.write().await;
                    guard.ticks = guard.ticks.saturating_add(1);
                    guard.next_check_estimate = Some(started + step);
                }
                let report = dispatcher.run_pass().await;
                let mut guard = state.write().await;
                record_run(&mut guard, started, report);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPass {
        runs: AtomicUsize,
    }

    impl CountingPass {
        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl DispatchPass for CountingPass {
        async fn run_pass(&self) -> DispatchReport {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            DispatchReport {
                processed: n,
                sent: n,
                failed: 0,
                skipped: 0,
            }
        }
    }

    /// Each pass takes `delay`; tracks how many passes overlap.
    struct SlowPass {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SlowPass {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl DispatchPass for SlowPass {
        async fn run_pass(&self) -> DispatchReport {
            self.started.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            DispatchReport {
                processed: 1,
                sent: 1,
                ..DispatchReport::default()
            }
        }
    }

    fn scheduler(pass: &Arc<CountingPass>, interval: Duration) -> FollowUpScheduler {
        FollowUpScheduler::new(pass.clone(), interval)
    }

    #[tokio::test]
    async fn second_start_is_ignored_and_only_one_timer_runs() {
        let pass = Arc::new(CountingPass::default());
        let s = scheduler(&pass, Duration::from_secs(3600));

        assert!(s.start(None).await);
        assert!(!s.start(None).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(pass.runs(), 1, "only the immediate first tick ran");
        let status = s.status().await;
        assert!(status.is_running);
        assert_eq!(status.ticks, 1);
        assert_eq!(status.interval_seconds, 3600);
        assert!(status.next_check_estimate.is_some());
        assert!(s.stop().await);
    }

    #[tokio::test]
    async fn stop_halts_ticks_and_allows_restart() {
        let pass = Arc::new(CountingPass::default());
        let s = scheduler(&pass, Duration::from_millis(20));

        assert!(s.start(None).await);
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(s.stop().await);
        let after_stop = pass.runs();
        assert!(after_stop >= 2, "ticks ran while started: {after_stop}");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(pass.runs(), after_stop);
        let status = s.status().await;
        assert!(!status.is_running);
        assert!(status.next_check_estimate.is_none());
        assert!(!s.stop().await);

        assert!(s.start(Some(Duration::from_secs(3600))).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pass.runs(), after_stop + 1);
        assert!(s.stop().await);
    }

    #[tokio::test]
    async fn trigger_once_runs_without_a_timer_and_records_the_report() {
        let pass = Arc::new(CountingPass::default());
        let s = scheduler(&pass, DEFAULT_INTERVAL);

        let report = s.trigger_once().await;
        assert_eq!(report.sent, 1);
        let status = s.status().await;
        assert!(!status.is_running);
        assert_eq!(status.manual_runs, 1);
        assert_eq!(status.ticks, 0);
        assert_eq!(status.last_report, Some(report));
        assert!(status.last_run_finished_at >= status.last_run_started_at);
    }

    #[tokio::test]
    async fn zero_interval_falls_back_to_default() {
        let pass = Arc::new(CountingPass::default());
        let s = scheduler(&pass, Duration::ZERO);
        assert_eq!(s.status().await.interval_seconds, 60);
    }

    #[tokio::test]
    async fn stop_waits_for_the_in_flight_pass_to_finish() {
        let pass = SlowPass::new(Duration::from_millis(300));
        let s = FollowUpScheduler::new(pass.clone(), Duration::from_secs(3600));

        assert!(s.start(None).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pass.started.load(Ordering::SeqCst), 1);
        assert_eq!(pass.finished.load(Ordering::SeqCst), 0);

        assert!(s.stop().await);
        assert_eq!(
            pass.finished.load(Ordering::SeqCst),
            1,
            "the pass ran to completion before stop returned"
        );
        let status = s.status().await;
        assert!(!status.is_running);
        assert_eq!(status.last_report.map(|r| r.sent), Some(1));
    }

    #[tokio::test]
    async fn start_during_stop_waits_for_the_old_loop() {
        let pass = SlowPass::new(Duration::from_millis(200));
        let s = Arc::new(FollowUpScheduler::new(
            pass.clone(),
            Duration::from_secs(3600),
        ));

        assert!(s.start(None).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let (stopped, restarted) = tokio::join!(s.stop(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            s.start(None).await
        });
        assert!(stopped);
        assert!(restarted);
        assert_eq!(pass.finished.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(s.stop().await);
        assert_eq!(pass.started.load(Ordering::SeqCst), 2);
        assert_eq!(pass.finished.load(Ordering::SeqCst), 2);
        assert_eq!(pass.max_active.load(Ordering::SeqCst), 1, "loops never overlapped");
    }
}
