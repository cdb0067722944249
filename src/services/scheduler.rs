//! In-process periodic job scheduler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::utils::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub period: Duration,
    /// Fire once right away instead of after the first period.
    pub immediate: bool,
    /// Allow a new run to start while the previous one is still executing.
    pub concurrent: bool,
}

impl ScheduleOptions {
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            immediate: true,
            concurrent: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobContext {
    pub name: String,
    pub fire_count: u64,
    pub fired_at: DateTime<Utc>,
}

#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> Result<(), MirrorError>;
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    options: ScheduleOptions,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    master: CancellationToken,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            master: CancellationToken::new(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Starts `job` under `name`, replacing any job already using that name.
    pub fn schedule(
        &self,
        name: &str,
        job: Arc<dyn Job>,
        options: ScheduleOptions,
    ) -> Result<(), MirrorError> {
        if options.period.is_zero() {
            return Err(MirrorError::InvalidData(format!(
                "Job '{}' needs a non-zero period",
                name
            )));
        }
        if self.master.is_cancelled() {
            return Err(MirrorError::ServiceNotAvailable("Scheduler is shut down".to_string()));
        }

        let token = self.master.child_token();
        let handle = tokio::spawn(run_job(name.to_string(), job.clone(), options, token.clone()));
        let previous = self.jobs.lock().map_err(|_| MirrorError::LockError)?.insert(
            name.to_string(),
            ScheduledJob {
                job,
                options,
                token,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            debug!("Replaced job '{}'", name);
        }

        info!("⏱️  Scheduled job '{}' every {:?}", name, options.period);
        Ok(())
    }

    /// Restarts an existing job with new options.
    pub fn reschedule(&self, name: &str, options: ScheduleOptions) -> Result<(), MirrorError> {
        let job = self
            .jobs
            .lock()
            .map_err(|_| MirrorError::LockError)?
            .get(name)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| MirrorError::InvalidData(format!("No job named '{}'", name)))?;
        self.schedule(name, job, options)
    }

    pub fn unschedule(&self, name: &str) -> bool {
        let removed = match self.jobs.lock() {
            Ok(mut jobs) => jobs.remove(name),
            Err(_) => None,
        };
        match removed {
            Some(entry) => {
                entry.token.cancel();
                info!("🗑️  Unscheduled job '{}'", name);
                true
            }
            None => false,
        }
    }

    pub fn options(&self, name: &str) -> Option<ScheduleOptions> {
        self.jobs.lock().ok()?.get(name).map(|entry| entry.options)
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .jobs
            .lock()
            .map(|jobs| jobs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Cancels every job and waits for their loops to exit.
    pub async fn shutdown(&self) {
        self.master.cancel();
        let entries: Vec<ScheduledJob> = match self.jobs.lock() {
            Ok(mut jobs) => jobs.drain().map(|(_, entry)| entry).collect(),
            Err(_) => Vec::new(),
        };
        for entry in entries {
            if let Err(e) = entry.handle.await {
                error!("❌ Scheduled job ended abnormally: {}", e);
            }
        }
        info!("🛑 Scheduler stopped");
    }
}

async fn run_job(name: String, job: Arc<dyn Job>, options: ScheduleOptions, token: CancellationToken) {
    let start = if options.immediate {
        Instant::now()
    } else {
        Instant::now() + options.period
    };
    let mut ticker = interval_at(start, options.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut fire_count = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        fire_count += 1;
        let ctx = JobContext {
            name: name.clone(),
            fire_count,
            fired_at: Utc::now(),
        };

        if options.concurrent {
            let job = job.clone();
            tokio::spawn(async move {
                if let Err(e) = job.execute(&ctx).await {
                    warn!("⚠️  Job '{}' run {} failed: {}", ctx.name, ctx.fire_count, e);
                }
            });
        } else if let Err(e) = job.execute(&ctx).await {
            warn!("⚠️  Job '{}' run {} failed: {}", name, fire_count, e);
        }
    }
    debug!("Job '{}' loop exited after {} runs", name, fire_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicU64,
    }

    #[async_trait]
    impl Job for CountingJob {
        async fn execute(&self, _ctx: &JobContext) -> Result<(), MirrorError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_jobs_fire_at_start() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());
        scheduler
            .schedule("fast", job.clone(), ScheduleOptions::every(Duration::from_millis(100)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 4);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_jobs_wait_one_period() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());
        let options = ScheduleOptions {
            immediate: false,
            ..ScheduleOptions::every(Duration::from_millis(100))
        };
        scheduler.schedule("slow", job.clone(), options).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unschedule_and_reschedule() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());
        scheduler
            .schedule("g", job.clone(), ScheduleOptions::every(Duration::from_millis(100)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        scheduler
            .reschedule("g", ScheduleOptions::every(Duration::from_millis(1_000)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        assert_eq!(
            scheduler.options("g").map(|o| o.period),
            Some(Duration::from_millis(1_000))
        );

        assert!(scheduler.unschedule("g"));
        assert!(!scheduler.unschedule("g"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.reschedule("g", ScheduleOptions::every(Duration::from_secs(1))).is_err());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());
        assert!(scheduler
            .schedule("bad", job, ScheduleOptions::every(Duration::ZERO))
            .is_err());
        assert!(scheduler.job_names().is_empty());
    }
}
