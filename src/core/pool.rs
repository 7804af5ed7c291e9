//! Process pool - runs queued jobs with a hard cap on live processes
//!
//! A single control loop admits queued jobs while slots are free, then polls
//! every running process without blocking and reaps the finished ones. Jobs
//! move queue -> running set -> outcomes and are never mutated in place.

use super::job::{JobQueue, JobState};
use super::process::{Launcher, ProcessHandle, ProcessStatus, ShellLauncher};
use super::report::{BatchReport, Outcome, OutcomeKind, PoolEvent, Reporter};
use crate::config::PoolSettings;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;

/// What one pass of the control loop did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tick {
    pub admitted: usize,
    pub spawn_failures: usize,
    pub reaped: usize,
}

/// Bounded-concurrency job runner
pub struct ProcessPool<L = ShellLauncher> {
    launcher: L,
    max_concurrency: usize,
    idle_interval: Duration,
    queue: JobQueue,
    running: HashMap<String, ProcessHandle>,
    outcomes: Vec<Outcome>,
    peak_running: usize,
}

impl ProcessPool<ShellLauncher> {
    /// Create a pool that runs jobs through the configured shell
    pub fn new(queue: JobQueue, settings: &PoolSettings) -> Self {
        let launcher = ShellLauncher::new(settings.shell.clone());
        Self::with_launcher(queue, settings, launcher)
    }
}

impl<L: Launcher> ProcessPool<L> {
    pub fn with_launcher(queue: JobQueue, settings: &PoolSettings, launcher: L) -> Self {
        Self {
            launcher,
            max_concurrency: settings.max_concurrency.get(),
            idle_interval: settings.idle_interval,
            queue,
            running: HashMap::new(),
            outcomes: Vec::new(),
            peak_running: 0,
        }
    }

    /// Run every queued job to completion
    pub async fn run(mut self, reporter: &mut dyn Reporter) -> BatchReport {
        let started_at = Utc::now();
        log::info!(
            "Running {} jobs (max {} concurrent)",
            self.queue.len(),
            self.max_concurrency
        );

        while !self.is_drained() {
            let tick = self.tick(reporter).await;

            // Reaping freed slots for queued work: admit it right away
            let can_progress = tick.reaped > 0 && !self.queue.is_empty();
            if !can_progress && !self.is_drained() {
                tokio::time::sleep(self.idle_interval).await;
            }
        }

        let report = BatchReport {
            started_at,
            finished_at: Utc::now(),
            max_concurrency: self.max_concurrency,
            peak_running: self.peak_running,
            outcomes: std::mem::take(&mut self.outcomes),
        };
        log::info!("Pool drained: {}", report.summary());
        report
    }

    /// One pass of the control loop: admission, then reaping
    pub async fn tick(&mut self, reporter: &mut dyn Reporter) -> Tick {
        let mut tick = self.admit(reporter);
        tick.reaped = self.reap(reporter).await;
        tick
    }

    fn admit(&mut self, reporter: &mut dyn Reporter) -> Tick {
        let mut tick = Tick::default();

        while self.running.len() < self.max_concurrency {
            let Some(job) = self.queue.pop() else {
                break;
            };

            match self.launcher.launch(job) {
                Ok(handle) => {
                    let job_id = handle.job().id().to_string();
                    log::info!("Started {} (pid {:?})", job_id, handle.pid());
                    log::debug!("{}: {}", job_id, handle.job().command());

                    self.running.insert(job_id.clone(), handle);
                    self.peak_running = self.peak_running.max(self.running.len());
                    tick.admitted += 1;

                    reporter.report(&PoolEvent::Started {
                        job_id,
                        running: self.running.len(),
                    });
                }
                Err(err) => {
                    log::error!("{}", err);
                    let job_id = err.job.id().to_string();

                    self.outcomes.push(Outcome {
                        job_id: job_id.clone(),
                        kind: OutcomeKind::SpawnFailed(err.source.to_string()),
                        started_at: None,
                        finished_at: Utc::now(),
                        stderr_tail: Vec::new(),
                    });
                    tick.spawn_failures += 1;

                    reporter.report(&PoolEvent::SpawnFailed {
                        job_id,
                        error: err.source.to_string(),
                    });
                }
            }
        }

        tick
    }

    async fn reap(&mut self, reporter: &mut dyn Reporter) -> usize {
        let mut finished = Vec::new();

        for (job_id, handle) in self.running.iter_mut() {
            match handle.poll().await {
                Ok(ProcessStatus::Running) => {}
                Ok(ProcessStatus::Exited(code)) => {
                    finished.push((job_id.clone(), OutcomeKind::Exited(code)));
                }
                Err(e) => {
                    log::error!("Failed to query status of {}: {}", job_id, e);
                    finished.push((job_id.clone(), OutcomeKind::WaitFailed(e.to_string())));
                }
            }
        }

        let reaped = finished.len();
        for (job_id, kind) in finished {
            let Some(mut handle) = self.running.remove(&job_id) else {
                continue;
            };
            handle.release();
            self.record(handle, kind, reporter);
        }

        reaped
    }

    fn record(&mut self, handle: ProcessHandle, kind: OutcomeKind, reporter: &mut dyn Reporter) {
        let job_id = handle.job().id().to_string();
        let success = kind == OutcomeKind::Exited(0);

        let stderr_tail = if success {
            Vec::new()
        } else {
            handle.stderr_tail().lines()
        };

        if success {
            log::info!("Finished {}", job_id);
            reporter.report(&PoolEvent::Completed {
                job_id: job_id.clone(),
            });
        } else {
            log::warn!("{} failed ({})", job_id, kind);
            for line in &stderr_tail {
                log::debug!("  {} | {}", job_id, line);
            }
            reporter.report(&PoolEvent::Failed {
                job_id: job_id.clone(),
                kind: kind.clone(),
            });
        }

        self.outcomes.push(Outcome {
            job_id,
            kind,
            started_at: Some(handle.started_at()),
            finished_at: Utc::now(),
            stderr_tail,
        });
    }

    /// Where `job_id` currently is, or `None` if the pool never saw it
    pub fn state_of(&self, job_id: &str) -> Option<JobState> {
        if self.queue.contains(job_id) {
            return Some(JobState::Queued);
        }
        if self.running.contains_key(job_id) {
            return Some(JobState::Running);
        }
        self.outcomes
            .iter()
            .find(|o| o.job_id == job_id)
            .map(|o| JobState::Finished(o.exit_code()))
    }

    /// True once nothing is queued or running
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}
