//! Poll loop, deduplication, concurrency gate and trigger fast path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use anistash_models::{Job, QueueStatus};
use anistash_queue::QueueStore;

use crate::active::ActiveJobs;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::{record_job_skipped, record_jobs_claimed, record_stale_reset};
use crate::processor::JobProcessor;

/// Return in-flight rows untouched for longer than `window` to `pending`.
///
/// Rows that were never stamped count as stale. Returns how many rows were reset.
pub async fn reset_stale_jobs(store: &dyn QueueStore, window: Duration) -> WorkerResult<usize> {
    let window = chrono::Duration::from_std(window)
        .map_err(|e| WorkerError::config_error(format!("Invalid staleness window: {}", e)))?;
    let cutoff = Utc::now() - window;

    let stale = store.list_stale(&QueueStatus::IN_FLIGHT, cutoff).await?;
    let mut reset = 0;
    for row in stale {
        match store.set_status(&row.job_id, QueueStatus::Pending, None).await {
            Ok(()) => {
                info!(
                    job_id = %row.job_id,
                    was = %row.status,
                    updated_at = ?row.updated_at,
                    "Reset stale job to pending"
                );
                reset += 1;
            }
            Err(e) => warn!(job_id = %row.job_id, "Failed to reset stale job: {}", e),
        }
    }

    record_stale_reset(reset);
    Ok(reset)
}

/// Result of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Queued,
    /// The identity is already in flight or done; carries its status.
    Declined { reason: String },
}

/// Cloneable handle for submitting jobs to a running [`Scheduler`].
#[derive(Clone)]
pub struct JobSubmitter {
    store: Arc<dyn QueueStore>,
    tx: mpsc::Sender<Job>,
    running: Arc<AtomicBool>,
}

impl JobSubmitter {
    /// Hand `job` to the scheduler unless its identity is already claimed or done.
    pub async fn trigger(&self, mut job: Job) -> WorkerResult<TriggerOutcome> {
        match self.store.get_status_by_identity(&job.identity()).await {
            Ok(Some(row)) if row.status.blocks_trigger() => {
                info!(
                    identity = %job.identity(),
                    status = %row.status,
                    "Job already in progress or done, declining trigger"
                );
                return Ok(TriggerOutcome::Declined {
                    reason: row.status.as_str().to_string(),
                });
            }
            Ok(Some(row)) => {
                if job.job_id.is_none() {
                    job.job_id = Some(row.job_id);
                }
            }
            Ok(None) => {}
            // The claim on the row still protects against duplicates
            Err(e) => warn!("Trigger status check failed, proceeding: {}", e),
        }

        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::Busy,
            mpsc::error::TrySendError::Closed(_) => WorkerError::SchedulerStopped,
        })?;
        Ok(TriggerOutcome::Queued)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Clears the running flag when the loop exits, however it exits.
struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    fn set(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag.clone())
    }
}

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the concurrency gate, the active set and the trigger channel.
///
/// Polled and triggered jobs share one gate and one dedup set.
pub struct Scheduler {
    config: WorkerConfig,
    store: Arc<dyn QueueStore>,
    processor: Arc<JobProcessor>,
    gate: Arc<Semaphore>,
    active: ActiveJobs,
    trigger_tx: mpsc::Sender<Job>,
    trigger_rx: Mutex<Option<mpsc::Receiver<Job>>>,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: WorkerConfig, store: Arc<dyn QueueStore>, processor: Arc<JobProcessor>) -> Self {
        let gate = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (trigger_tx, trigger_rx) = mpsc::channel(config.trigger_capacity);
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            store,
            processor,
            gate,
            active: ActiveJobs::new(),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter {
            store: Arc::clone(&self.store),
            tx: self.trigger_tx.clone(),
            running: Arc::clone(&self.running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run until [`Scheduler::shutdown`] is called. Can only run once.
    pub async fn run(&self) -> WorkerResult<()> {
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WorkerError::SchedulerStopped)?;
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let _running = RunningFlag::set(&self.running);
        info!(
            "Starting scheduler with {} max concurrent jobs, claiming {} every {:?}",
            self.config.max_concurrent_jobs, self.config.claim_batch, self.config.poll_interval
        );

        match reset_stale_jobs(self.store.as_ref(), self.config.stale_after).await {
            Ok(0) => debug!("No stale jobs to reset"),
            Ok(count) => info!("Reset {} stale jobs to pending", count),
            Err(e) => warn!("Stale job reset failed: {}", e),
        }

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut triggered = JoinSet::new();

        'outer: loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let batch = self.poll_once();
                    tokio::pin!(batch);
                    // Keep accepting triggers while the batch runs
                    loop {
                        tokio::select! {
                            _ = &mut batch => break,
                            Some(job) = trigger_rx.recv() => self.spawn_triggered(&mut triggered, job),
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break 'outer;
                                }
                            }
                        }
                    }
                }
                Some(job) = trigger_rx.recv() => self.spawn_triggered(&mut triggered, job),
                Some(result) = triggered.join_next(), if !triggered.is_empty() => {
                    if let Err(e) = result {
                        error!("Triggered job task failed: {}", e);
                    }
                }
            }
        }

        info!("Shutdown signal received, stopping scheduler");
        triggered.shutdown().await;
        info!("Scheduler stopped");
        Ok(())
    }

    /// Claim one batch and run it to completion through the gate.
    ///
    /// Returns how many claimed jobs were executed.
    pub async fn poll_once(&self) -> usize {
        let jobs = match self.store.claim_pending(self.config.claim_batch).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to claim pending jobs: {}", e);
                return 0;
            }
        };
        if jobs.is_empty() {
            return 0;
        }

        info!("Claimed {} pending jobs", jobs.len());
        record_jobs_claimed(jobs.len());

        let runs = jobs.into_iter().map(|job| {
            execute_job(
                job,
                Arc::clone(&self.processor),
                Arc::clone(&self.gate),
                self.active.clone(),
            )
        });
        join_all(runs).await.into_iter().filter(|ran| *ran).count()
    }

    fn spawn_triggered(&self, triggered: &mut JoinSet<bool>, job: Job) {
        debug!(identity = %job.identity(), "Scheduling triggered job");
        triggered.spawn(execute_job(
            job,
            Arc::clone(&self.processor),
            Arc::clone(&self.gate),
            self.active.clone(),
        ));
    }
}

/// Run one job behind the dedup set and the gate. Returns whether it ran.
async fn execute_job(
    job: Job,
    processor: Arc<JobProcessor>,
    gate: Arc<Semaphore>,
    active: ActiveJobs,
) -> bool {
    let key = job.identity().active_key();
    let Some(_active) = active.try_acquire(key.as_str()) else {
        info!(job_id = %job.log_id(), identity = %key, "Identity already in flight, skipping");
        record_job_skipped("duplicate");
        return false;
    };

    let _permit = match gate.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            warn!(job_id = %job.log_id(), "Concurrency gate closed");
            return false;
        }
    };

    // Outcome is recorded on the queue row by the processor
    let _ = processor.process(&job).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::{harness, job, FakeFetcher, Harness};
    use crate::replication::tests::FakeAccount;
    use anistash_queue::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn scheduler(h: &Harness, tweak: impl FnOnce(&mut WorkerConfig)) -> Arc<Scheduler> {
        let mut config = h.processor.config().clone();
        tweak(&mut config);
        Arc::new(Scheduler::new(config, h.store.clone(), h.processor.clone()))
    }

    fn accounts() -> Vec<Arc<FakeAccount>> {
        vec![Arc::new(FakeAccount::new(1, "alpha"))]
    }

    #[tokio::test]
    async fn test_stale_reset_old_vs_young() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = store.insert_with(job(1), QueueStatus::Downloading, Some(now - ChronoDuration::hours(3)));
        let young = store.insert_with(job(2), QueueStatus::Downloading, Some(now - ChronoDuration::minutes(10)));
        let unstamped = store.insert_with(job(3), QueueStatus::Uploading, None);
        let done = store.insert_with(job(4), QueueStatus::Ready, Some(now - ChronoDuration::hours(9)));

        let reset = reset_stale_jobs(&store, Duration::from_secs(2 * 60 * 60))
            .await
            .unwrap();

        assert_eq!(reset, 2);
        assert_eq!(store.status_of(&old), Some(QueueStatus::Pending));
        assert_eq!(store.status_of(&young), Some(QueueStatus::Downloading));
        assert_eq!(store.status_of(&unstamped), Some(QueueStatus::Pending));
        assert_eq!(store.status_of(&done), Some(QueueStatus::Ready));
    }

    #[tokio::test]
    async fn test_duplicate_identity_runs_once() {
        let h = harness(
            FakeFetcher {
                delay: Duration::from_millis(50),
                ..Default::default()
            },
            accounts(),
            |_| {},
        );
        h.store.insert(job(1));
        h.store.insert(job(1));
        let s = scheduler(&h, |_| {});

        let executed = s.poll_once().await;

        assert_eq!(executed, 1);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(s.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_gate_bounds_batch_concurrency() {
        let h = harness(
            FakeFetcher {
                delay: Duration::from_millis(20),
                ..Default::default()
            },
            accounts(),
            |_| {},
        );
        for ep in 1..=4 {
            h.store.insert(job(ep));
        }
        let s = scheduler(&h, |c| {
            c.max_concurrent_jobs = 2;
            c.claim_batch = 10;
        });

        assert_eq!(s.poll_once().await, 4);
        assert_eq!(h.fetcher.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(h.store.records().len(), 4);
    }

    #[tokio::test]
    async fn test_trigger_declined_while_uploading() {
        let h = harness(FakeFetcher::default(), accounts(), |_| {});
        h.store
            .insert_with(job(1), QueueStatus::Uploading, Some(Utc::now()));
        let s = scheduler(&h, |_| {});

        let outcome = s.submitter().trigger(job(1)).await.unwrap();

        assert_eq!(
            outcome,
            TriggerOutcome::Declined {
                reason: "uploading".into()
            }
        );
        let mut rx = s.trigger_rx.lock().unwrap().take().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trigger_attaches_row_id() {
        let h = harness(FakeFetcher::default(), accounts(), |_| {});
        let id = h.store.insert(job(1));
        let s = scheduler(&h, |_| {});

        let outcome = s.submitter().trigger(job(1)).await.unwrap();

        assert_eq!(outcome, TriggerOutcome::Queued);
        let mut rx = s.trigger_rx.lock().unwrap().take().unwrap();
        assert_eq!(rx.try_recv().unwrap().job_id, Some(id));
    }

    #[tokio::test]
    async fn test_trigger_busy_when_channel_full() {
        let h = harness(FakeFetcher::default(), accounts(), |_| {});
        let s = scheduler(&h, |c| c.trigger_capacity = 1);
        let submitter = s.submitter();

        submitter.trigger(job(1)).await.unwrap();
        let err = submitter.trigger(job(2)).await.unwrap_err();

        assert!(matches!(err, WorkerError::Busy));
    }

    #[tokio::test]
    async fn test_run_processes_polled_and_triggered_jobs() {
        let h = harness(FakeFetcher::default(), accounts(), |_| {});
        let polled = h.store.insert(job(1));
        let stale = h.store.insert_with(
            job(2),
            QueueStatus::Downloading,
            Some(Utc::now() - ChronoDuration::hours(5)),
        );
        let s = scheduler(&h, |c| c.poll_interval = Duration::from_millis(10));

        let runner = {
            let s = s.clone();
            tokio::spawn(async move { s.run().await })
        };

        let submitter = s.submitter();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !submitter.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        submitter
            .trigger(job(3).with_resolution("1080p"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.store.records().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(h.store.status_of(&polled), Some(QueueStatus::Ready));
        assert_eq!(h.store.status_of(&stale), Some(QueueStatus::Ready));

        s.shutdown();
        runner.await.unwrap().unwrap();
        assert!(!s.is_running());
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let h = harness(FakeFetcher::default(), accounts(), |_| {});
        let s = scheduler(&h, |_| {});
        s.shutdown();

        s.run().await.unwrap();
        assert!(matches!(s.run().await, Err(WorkerError::SchedulerStopped)));
    }
}
