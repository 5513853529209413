//! Background scheduler for recurring backup jobs.
//!
//! The scheduler owns one OS thread with its own single-threaded tokio
//! runtime, so triggered jobs never compete with the caller's runtime.
//! Each registered job gets a trigger loop on that runtime:
//!
//! ```text
//! Stopped ──start()──► Running: sleep until next fire
//!                         │ fire
//!                         ▼
//!                      previous run still going? ── yes ──► skip (logged)
//!                         │ no
//!                         ▼
//!                      spawn run, reschedule ──► ... ──stop()──► Stopped
//! ```
//!
//! A failing or panicking job is logged and counted; its trigger keeps firing.

mod timer;
mod trigger;

pub use timer::{ManualTimer, SystemTimer, Timer};
pub use trigger::{Trigger, TriggerParseError};

use async_trait::async_trait;
use campusvault_core::{CoreError, CoreResult};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::watch;

/// Work executed when a trigger fires.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    async fn run(&self) -> CoreResult<()>;
}

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Next firing of one registered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextRun {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub next_run: DateTime<Local>,
}

/// Counters across all jobs since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
struct JobEntry {
    id: String,
    name: String,
    trigger: Trigger,
    job: Arc<dyn ScheduledJob>,
}

/// State shared between the scheduler handle and its thread.
struct Shared {
    timer: Arc<dyn Timer>,
    next_runs: Mutex<BTreeMap<String, NextRun>>,
    stats: StatsCounters,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

/// Runs [`ScheduledJob`]s at calendar [`Trigger`]s.
///
/// # Example
///
/// ```no_run
/// use campusvault_service::scheduler::{Scheduler, ScheduledJob, SystemTimer, Trigger};
/// use std::sync::Arc;
///
/// # async fn example(job: Arc<dyn ScheduledJob>) -> campusvault_core::CoreResult<()> {
/// let mut scheduler = Scheduler::new(Arc::new(SystemTimer));
/// scheduler.add_job("daily", "Daily backup", "03:00".parse().unwrap(), job)?;
/// scheduler.start()?;
/// // ...
/// scheduler.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    jobs: Vec<JobEntry>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl Scheduler {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            jobs: Vec::new(),
            shared: Arc::new(Shared {
                timer,
                next_runs: Mutex::new(BTreeMap::new()),
                stats: StatsCounters::default(),
            }),
            worker: None,
        }
    }

    /// Register `job` under `id`, replacing any job already registered
    /// with that id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidState` while the scheduler is running.
    pub fn add_job(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        trigger: Trigger,
        job: Arc<dyn ScheduledJob>,
    ) -> CoreResult<()> {
        if self.worker.is_some() {
            return Err(CoreError::invalid_state(
                "jobs cannot be added while the scheduler is running",
            ));
        }

        let entry = JobEntry {
            id: id.into(),
            name: name.into(),
            trigger,
            job,
        };

        match self.jobs.iter_mut().find(|j| j.id == entry.id) {
            Some(existing) => {
                tracing::info!(id = %entry.id, trigger = %trigger, "Replacing scheduled job");
                *existing = entry;
            }
            None => {
                tracing::debug!(id = %entry.id, trigger = %trigger, "Registered scheduled job");
                self.jobs.push(entry);
            }
        }
        Ok(())
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.worker.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Start the background thread.
    ///
    /// Next fire times are computed before this returns, so
    /// [`Scheduler::next_run_times`] is populated immediately.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidState` if already running, or
    /// `CoreError::Internal` if the thread or its runtime cannot be created.
    pub fn start(&mut self) -> CoreResult<()> {
        if self.worker.is_some() {
            return Err(CoreError::invalid_state("scheduler is already running"));
        }
        if self.jobs.is_empty() {
            tracing::warn!("Starting scheduler with no jobs");
        }

        let now = self.shared.timer.now();
        {
            let mut next_runs = self.shared.next_runs.lock();
            next_runs.clear();
            for entry in &self.jobs {
                if let Some(next) = entry.trigger.next_after(&now) {
                    next_runs.insert(entry.id.clone(), next_run(entry, next));
                }
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let jobs = self.jobs.clone();
        let shared = Arc::clone(&self.shared);

        let thread = std::thread::Builder::new()
            .name("campusvault-scheduler".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                runtime.block_on(async move {
                    let loops: Vec<_> = jobs
                        .into_iter()
                        .map(|entry| {
                            tokio::spawn(trigger_loop(
                                entry,
                                Arc::clone(&shared),
                                shutdown_rx.clone(),
                            ))
                        })
                        .collect();
                    for handle in loops {
                        if let Err(e) = handle.await {
                            tracing::error!(error = %e, "Trigger loop aborted");
                        }
                    }
                });
            })
            .map_err(|e| CoreError::internal(format!("failed to spawn scheduler thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(CoreError::internal(format!(
                    "failed to build scheduler runtime: {e}"
                )));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(CoreError::internal("scheduler thread exited during startup"));
            }
        }

        self.worker = Some(Worker { shutdown, thread });

        tracing::info!(jobs = self.jobs.len(), "Scheduler started");
        for run in self.next_run_times() {
            tracing::info!(
                job = %run.name,
                trigger = %run.trigger,
                next_run = %run.next_run.format("%Y-%m-%d %H:%M:%S"),
                "Next run scheduled"
            );
        }
        Ok(())
    }

    /// Stop the scheduler, waiting for running jobs to finish.
    ///
    /// Stopping a stopped scheduler is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Internal` if the scheduler thread panicked.
    pub async fn stop(&mut self) -> CoreResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        tracing::info!("Stopping scheduler");
        worker.shutdown.send_replace(true);

        let joined = tokio::task::spawn_blocking(move || worker.thread.join())
            .await
            .map_err(|e| CoreError::internal(format!("failed to join scheduler thread: {e}")))?;

        self.shared.next_runs.lock().clear();

        if joined.is_err() {
            return Err(CoreError::internal("scheduler thread panicked"));
        }

        let stats = self.stats();
        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            "Scheduler stopped"
        );
        Ok(())
    }

    /// Upcoming fire time of each job, soonest first. Empty when stopped.
    #[must_use]
    pub fn next_run_times(&self) -> Vec<NextRun> {
        let mut runs: Vec<_> = self.shared.next_runs.lock().values().cloned().collect();
        runs.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.id.cmp(&b.id)));
        runs
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // The thread exits on its own once signalled; it is not joined here.
        if let Some(worker) = &self.worker {
            worker.shutdown.send_replace(true);
        }
    }
}

fn next_run(entry: &JobEntry, next: DateTime<Local>) -> NextRun {
    NextRun {
        id: entry.id.clone(),
        name: entry.name.clone(),
        trigger: entry.trigger.to_string(),
        next_run: next,
    }
}

async fn trigger_loop(entry: JobEntry, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let now = shared.timer.now();
        let Some(next) = entry.trigger.next_after(&now) else {
            tracing::error!(job = %entry.name, "Trigger has no future fire time");
            break;
        };
        shared
            .next_runs
            .lock()
            .insert(entry.id.clone(), next_run(&entry, next));

        tokio::select! {
            _ = shared.timer.sleep_until(next) => {}
            _ = shutdown.changed() => break,
        }

        if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            shared.stats.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                job = %entry.name,
                fire_time = %next.format("%Y-%m-%d %H:%M:%S"),
                "Previous run still in progress, skipping this run"
            );
            continue;
        }

        in_flight = Some(tokio::spawn(execute(entry.clone(), Arc::clone(&shared))));
    }

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            tracing::info!(job = %entry.name, "Waiting for running job to finish");
        }
        if let Err(e) = handle.await {
            tracing::error!(job = %entry.name, error = %e, "Job task aborted");
        }
    }
}

async fn execute(entry: JobEntry, shared: Arc<Shared>) {
    let started = Instant::now();
    tracing::info!(job = %entry.name, "Job started");

    // Run in a child task so a panic in the job surfaces as a JoinError.
    let job = Arc::clone(&entry.job);
    let result = tokio::spawn(async move { job.run().await }).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(())) => {
            shared.stats.completed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(job = %entry.name, duration_ms, "Job completed");
        }
        Ok(Err(e)) => {
            shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(job = %entry.name, duration_ms, error = %e, "Job failed");
        }
        Err(e) => {
            shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(job = %entry.name, duration_ms, error = %e, "Job panicked");
        }
    }
}
