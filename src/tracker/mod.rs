pub mod job;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{JobQueue, Submission};

pub use job::{artifact_urls, poll_once, GenerationJob, JobError, JobState, PollOutcome};

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// How long an unclaimed terminal job stays queryable.
    pub retention: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
            retention: Duration::from_secs(600),
        }
    }
}

struct TrackedJob {
    updates: watch::Receiver<GenerationJob>,
    stop: watch::Sender<bool>,
}

/// key: job-tracker -> one watcher task per job, bounded by a deadline
///
/// Watchers are in-process only. A restart abandons every job; the remote
/// work may still finish and bill at the provider.
#[derive(Clone)]
pub struct JobTracker {
    queue: Arc<dyn JobQueue>,
    settings: TrackerSettings,
    jobs: Arc<DashMap<Uuid, TrackedJob>>,
}

impl JobTracker {
    pub fn new(queue: Arc<dyn JobQueue>, settings: TrackerSettings) -> Self {
        Self {
            queue,
            settings,
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Starts watching a submitted job and returns a receiver of its snapshots.
    pub fn track(
        &self,
        job_id: Uuid,
        account_id: i32,
        submission: &Submission,
    ) -> watch::Receiver<GenerationJob> {
        self.start_watching(GenerationJob::from_submission(job_id, account_id, submission))
    }

    /// Like [`JobTracker::track`] for a job whose charge was booked against
    /// `batch_id`.
    pub fn track_in_batch(
        &self,
        job_id: Uuid,
        account_id: i32,
        batch_id: Uuid,
        submission: &Submission,
    ) -> watch::Receiver<GenerationJob> {
        let job = GenerationJob::from_submission(job_id, account_id, submission).in_batch(batch_id);
        self.start_watching(job)
    }

    fn start_watching(&self, job: GenerationJob) -> watch::Receiver<GenerationJob> {
        let job_id = job.job_id;
        let (updates_tx, updates_rx) = watch::channel(job.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        self.jobs.insert(
            job_id,
            TrackedJob {
                updates: updates_rx.clone(),
                stop: stop_tx,
            },
        );

        let jobs = self.jobs.clone();
        let queue = self.queue.clone();
        let settings = self.settings;
        tokio::spawn(async move {
            let mut stop = stop_rx;
            if watch_job(queue, settings, job, updates_tx, &mut stop).await {
                forget_after(&jobs, job_id, settings.retention, &mut stop).await;
            }
        });
        updates_rx
    }

    pub fn snapshot(&self, job_id: Uuid) -> Option<GenerationJob> {
        self.jobs
            .get(&job_id)
            .map(|tracked| tracked.updates.borrow().clone())
    }

    pub fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<GenerationJob>> {
        self.jobs.get(&job_id).map(|tracked| tracked.updates.clone())
    }

    /// Drops a job whose terminal state the caller has consumed.
    pub fn release(&self, job_id: Uuid) -> Option<GenerationJob> {
        let (_, tracked) = self.jobs.remove(&job_id)?;
        let snapshot = tracked.updates.borrow().clone();
        Some(snapshot)
    }

    /// Stops watching. Purely local: the remote job keeps running.
    pub fn stop(&self, job_id: Uuid) -> bool {
        match self.jobs.remove(&job_id) {
            Some((_, tracked)) => {
                let _ = tracked.stop.send(true);
                info!(%job_id, "stopped watching generation job");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Resolves once every listed job is terminal (or no longer watched).
    pub async fn wait_all(&self, job_ids: &[Uuid]) -> Vec<GenerationJob> {
        let receivers: Vec<_> = job_ids
            .iter()
            .filter_map(|job_id| self.subscribe(*job_id))
            .collect();

        let mut finished = Vec::with_capacity(receivers.len());
        for mut receiver in receivers {
            loop {
                if receiver.borrow().state.is_terminal() {
                    break;
                }
                if receiver.changed().await.is_err() {
                    break;
                }
            }
            let snapshot = receiver.borrow().clone();
            finished.push(snapshot);
        }
        finished
    }
}

enum Wake {
    Stopped,
    Deadline,
    Tick,
    Polled(PollOutcome),
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Drops an unclaimed terminal job once its retention passes.
async fn forget_after(
    jobs: &DashMap<Uuid, TrackedJob>,
    job_id: Uuid,
    retention: Duration,
    stop: &mut watch::Receiver<bool>,
) {
    tokio::select! {
        _ = stopped(stop) => {}
        _ = time::sleep(retention) => {
            if jobs.remove(&job_id).is_some() {
                debug!(%job_id, "unclaimed generation job dropped");
            }
        }
    }
}

/// Polls until the job is terminal (returns true) or watching is stopped.
async fn watch_job(
    queue: Arc<dyn JobQueue>,
    settings: TrackerSettings,
    mut job: GenerationJob,
    updates: watch::Sender<GenerationJob>,
    stop: &mut watch::Receiver<bool>,
) -> bool {
    let started = Instant::now();
    let deadline = started + settings.timeout;
    let mut ticker = time::interval_at(started + settings.poll_interval, settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let backend_id = job.backend_id.clone();
    let correlation_id = job.correlation_id.clone();

    loop {
        let wake = tokio::select! {
            biased;
            _ = stopped(stop) => Wake::Stopped,
            _ = time::sleep_until(deadline) => Wake::Deadline,
            _ = ticker.tick() => Wake::Tick,
        };

        let wake = match wake {
            Wake::Tick => tokio::select! {
                biased;
                _ = stopped(stop) => Wake::Stopped,
                _ = time::sleep_until(deadline) => Wake::Deadline,
                outcome = poll_once(queue.as_ref(), &backend_id, &correlation_id) => Wake::Polled(outcome),
            },
            other => other,
        };

        match wake {
            Wake::Stopped => {
                debug!(job_id = %job.job_id, %correlation_id, "watcher stopped");
                return false;
            }
            Wake::Deadline => {
                job.expire(settings.timeout.as_secs());
                updates.send_replace(job.clone());
                warn!(
                    job_id = %job.job_id,
                    %backend_id,
                    %correlation_id,
                    "generation job timed out; no longer polling"
                );
                return true;
            }
            Wake::Polled(outcome) => {
                if job.advance(outcome) {
                    updates.send_replace(job.clone());
                    if job.state.is_terminal() {
                        info!(
                            job_id = %job.job_id,
                            %backend_id,
                            %correlation_id,
                            state = ?job.state,
                            artifacts = job.result.len(),
                            "generation job finished"
                        );
                        return true;
                    }
                    debug!(job_id = %job.job_id, state = ?job.state, "generation job progressed");
                }
            }
            Wake::Tick => {}
        }
    }
}
