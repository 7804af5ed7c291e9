//! Outcome records, pool events and the batch report

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum OutcomeKind {
    /// The process ran and exited with this code
    Exited(i32),
    /// The process could not be created
    SpawnFailed(String),
    /// The process was created but its status could not be queried
    WaitFailed(String),
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code: {}", code),
            Self::SpawnFailed(reason) => write!(f, "spawn failed: {}", reason),
            Self::WaitFailed(reason) => write!(f, "wait failed: {}", reason),
        }
    }
}

/// Terminal result of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub job_id: String,
    pub kind: OutcomeKind,
    /// Unset when the job never started
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    /// Last stderr lines, kept for failed jobs only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr_tail: Vec<String>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            OutcomeKind::Exited(code) => Some(code),
            _ => None,
        }
    }
}

/// Progress notifications emitted by the pool
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Started { job_id: String, running: usize },
    SpawnFailed { job_id: String, error: String },
    Completed { job_id: String },
    Failed { job_id: String, kind: OutcomeKind },
}

/// Sink for pool progress
pub trait Reporter {
    fn report(&mut self, event: &PoolEvent);
}

impl<F> Reporter for F
where
    F: FnMut(&PoolEvent),
{
    fn report(&mut self, event: &PoolEvent) {
        self(event)
    }
}

/// Writes human-readable status lines, one per event worth showing
pub struct ConsoleReporter<W: Write> {
    out: W,
    verbose: bool,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(std::io::stdout(), verbose)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(event: &PoolEvent, verbose: bool) -> Option<String> {
        match event {
            PoolEvent::SpawnFailed { job_id, .. } => {
                Some(format!(" [Error] spawn failed for {}", job_id))
            }
            PoolEvent::Failed {
                job_id,
                kind: OutcomeKind::Exited(code),
            } => Some(format!(" [Failed] {} (exit code: {})", job_id, code)),
            PoolEvent::Failed { job_id, kind } => Some(format!(" [Failed] {} ({})", job_id, kind)),
            PoolEvent::Started { job_id, .. } if verbose => Some(format!(" [Started] {}", job_id)),
            PoolEvent::Completed { job_id } if verbose => Some(format!(" [Done] {}", job_id)),
            _ => None,
        }
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, event: &PoolEvent) {
        if let Some(line) = Self::line(event, self.verbose) {
            if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
                log::warn!("Failed to write status line: {}", e);
            }
        }
    }
}

/// Aggregate result of one pool run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub max_concurrency: usize,
    /// Largest running set observed
    pub peak_running: usize,
    /// In completion order
    pub outcomes: Vec<Outcome>,
}

impl BatchReport {
    /// True when every job exited with code 0
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_success)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn outcome(&self, job_id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.job_id == job_id)
    }

    /// One-line summary for the end of a run
    pub fn summary(&self) -> String {
        let total = self.outcomes.len();
        let failed = self.failures().count();
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        format!(
            "{} jobs, {} succeeded, {} failed in {:.1}s (max {} concurrent)",
            total,
            total - failed,
            failed,
            elapsed,
            self.max_concurrency
        )
    }

    /// Save report as JSON
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let report: Self = serde_json::from_str(&content)?;
        Ok(report)
    }
}
