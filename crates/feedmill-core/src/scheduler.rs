//! Dual-loop schedule handler
//!
//! One process owns two independent loops:
//! - the subscription-sync loop: a fixed repeating interval, where an
//!   overlapping tick is dropped rather than queued;
//! - the article-fetch loop: a single-shot timer rescheduled after
//!   every execution, whose interval grows by 1.5^k on consecutive
//!   failures and snaps back to base on success.
//!
//! Both loops hang off one parent cancellation token and delay their
//! first execution so dependencies can warm up.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::backoff_interval;
use crate::error::{CoreError, Result};

/// Future type produced by a job callback.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// A schedulable job. The returned string is a human-readable result
/// line recorded in the status snapshot.
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Which loop produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    SubscriptionSync,
    ArticleFetch,
}

impl JobKind {
    /// Label used in logs and API payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SubscriptionSync => "subscription_sync",
            JobKind::ArticleFetch => "article_fetch",
        }
    }
}

/// Result of one job execution, delivered to registered callbacks.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: JobKind,
    pub success: bool,
    pub detail: String,
    pub finished_at: DateTime<Utc>,
}

/// Callback invoked after every job execution, on its own task.
pub type ResultCallback = Arc<dyn Fn(JobReport) + Send + Sync>;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base interval of the subscription-sync loop
    pub sync_interval: std::time::Duration,
    /// Base interval of the article-fetch loop
    pub fetch_base_interval: std::time::Duration,
    /// Backoff ceiling for the article-fetch loop
    pub fetch_max_interval: std::time::Duration,
    /// Delay before the first sync
    pub sync_startup_delay: std::time::Duration,
    /// Delay before the first fetch
    pub fetch_startup_delay: std::time::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: std::time::Duration::from_secs(8 * 60 * 60),
            fetch_base_interval: std::time::Duration::from_secs(30 * 60),
            fetch_max_interval: std::time::Duration::from_secs(6 * 60 * 60),
            sync_startup_delay: std::time::Duration::from_secs(30),
            fetch_startup_delay: std::time::Duration::from_secs(90),
        }
    }
}

/// Status of one scheduled job.
#[derive(Debug, Clone, Default)]
pub struct JobStatus {
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Cancellations are tracked separately and never feed backoff
    pub canceled_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_result: Option<String>,
}

/// Snapshot of both loops.
#[derive(Debug, Clone, Default)]
pub struct ScheduleStatus {
    pub subscription_sync: JobStatus,
    pub article_fetch: JobStatus,
}

struct HandlerInner {
    config: SchedulerConfig,
    sync_job: JobFn,
    fetch_job: JobFn,
    sync_state: Mutex<JobStatus>,
    fetch_state: Mutex<JobStatus>,
    callbacks: RwLock<Vec<ResultCallback>>,
}

/// Owns the two scheduling loops. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ScheduleHandler {
    inner: Arc<HandlerInner>,
}

impl ScheduleHandler {
    /// Create a handler around the two job callbacks.
    #[must_use]
    pub fn new(config: SchedulerConfig, sync_job: JobFn, fetch_job: JobFn) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                config,
                sync_job,
                fetch_job,
                sync_state: Mutex::new(JobStatus::default()),
                fetch_state: Mutex::new(JobStatus::default()),
                callbacks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a job-result callback.
    pub async fn register_result_callback(&self, callback: ResultCallback) {
        self.inner.callbacks.write().await.push(callback);
    }

    /// Spawn both loops. They exit when `shutdown` is canceled.
    pub fn start(&self, shutdown: CancellationToken) {
        let sync = self.clone();
        let sync_shutdown = shutdown.clone();
        tokio::spawn(async move { sync.run_sync_loop(sync_shutdown).await });

        let fetch = self.clone();
        tokio::spawn(async move { fetch.run_fetch_loop(shutdown).await });
    }

    /// Manually trigger a subscription sync. Refused while one runs.
    pub async fn trigger_sync(&self) -> bool {
        if self.inner.sync_state.lock().await.running {
            return false;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_sync_once().await;
        });
        true
    }

    /// Manually trigger a rotation tick. Refused while one runs.
    pub async fn trigger_fetch(&self) -> bool {
        if self.inner.fetch_state.lock().await.running {
            return false;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_fetch_once().await;
        });
        true
    }

    /// Snapshot of both loops.
    pub async fn status(&self) -> ScheduleStatus {
        ScheduleStatus {
            subscription_sync: self.inner.sync_state.lock().await.clone(),
            article_fetch: self.inner.fetch_state.lock().await.clone(),
        }
    }

    async fn run_sync_loop(self, shutdown: CancellationToken) {
        info!(
            delay_secs = self.inner.config.sync_startup_delay.as_secs(),
            "subscription-sync loop starting"
        );
        tokio::select! {
            () = tokio::time::sleep(self.inner.config.sync_startup_delay) => {}
            () = shutdown.cancelled() => return,
        }

        loop {
            self.run_sync_once().await;
            {
                let mut state = self.inner.sync_state.lock().await;
                state.next_run_at =
                    Some(Utc::now() + chrono_duration(self.inner.config.sync_interval));
            }
            tokio::select! {
                () = tokio::time::sleep(self.inner.config.sync_interval) => {}
                () = shutdown.cancelled() => break,
            }
        }
        info!("subscription-sync loop stopped");
    }

    async fn run_fetch_loop(self, shutdown: CancellationToken) {
        info!(
            delay_secs = self.inner.config.fetch_startup_delay.as_secs(),
            "article-fetch loop starting"
        );
        tokio::select! {
            () = tokio::time::sleep(self.inner.config.fetch_startup_delay) => {}
            () = shutdown.cancelled() => return,
        }

        loop {
            self.run_fetch_once().await;

            // Single-shot reschedule: the delay reflects the failure
            // streak recorded by the run that just finished.
            let delay = {
                let mut state = self.inner.fetch_state.lock().await;
                let delay = backoff_interval(
                    self.inner.config.fetch_base_interval,
                    state.consecutive_failures,
                    self.inner.config.fetch_max_interval,
                );
                state.next_run_at = Some(Utc::now() + chrono_duration(delay));
                delay
            };
            debug!(delay_secs = delay.as_secs(), "article fetch rescheduled");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => break,
            }
        }
        info!("article-fetch loop stopped");
    }

    /// Run one sync. Returns `false` when dropped due to overlap.
    pub async fn run_sync_once(&self) -> bool {
        {
            let mut state = self.inner.sync_state.lock().await;
            if state.running {
                warn!("subscription sync already running, dropping tick");
                return false;
            }
            state.running = true;
        }
        let result = (self.inner.sync_job)().await;
        self.finish(JobKind::SubscriptionSync, &self.inner.sync_state, result)
            .await;
        true
    }

    /// Run one rotation tick. Returns `false` when dropped due to overlap.
    pub async fn run_fetch_once(&self) -> bool {
        {
            let mut state = self.inner.fetch_state.lock().await;
            if state.running {
                warn!("article fetch already running, dropping tick");
                return false;
            }
            state.running = true;
        }
        let result = (self.inner.fetch_job)().await;
        self.finish(JobKind::ArticleFetch, &self.inner.fetch_state, result)
            .await;
        true
    }

    async fn finish(&self, kind: JobKind, state: &Mutex<JobStatus>, result: Result<String>) {
        let finished_at = Utc::now();
        let report = {
            let mut state = state.lock().await;
            state.running = false;
            state.last_run_at = Some(finished_at);
            state.run_count += 1;

            match result {
                Ok(detail) => {
                    state.success_count += 1;
                    state.consecutive_failures = 0;
                    state.last_error = None;
                    state.last_result = Some(detail.clone());
                    JobReport {
                        job: kind,
                        success: true,
                        detail,
                        finished_at,
                    }
                }
                Err(CoreError::Canceled) => {
                    state.canceled_count += 1;
                    JobReport {
                        job: kind,
                        success: false,
                        detail: "canceled".to_string(),
                        finished_at,
                    }
                }
                Err(e) => {
                    state.failure_count += 1;
                    state.consecutive_failures += 1;
                    let detail = e.to_string();
                    state.last_error = Some(detail.clone());
                    warn!(
                        job = kind.as_str(),
                        consecutive = state.consecutive_failures,
                        "scheduled job failed: {detail}"
                    );
                    JobReport {
                        job: kind,
                        success: false,
                        detail,
                        finished_at,
                    }
                }
            }
        };

        let callbacks = self.inner.callbacks.read().await.clone();
        for callback in callbacks {
            let report = report.clone();
            tokio::spawn(async move { callback(report) });
        }
    }
}

fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(0))
}
