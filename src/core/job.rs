//! Jobs and the FIFO queue the pool consumes

use crate::error::QueueError;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// An ordered chain of shell steps executed as a single process.
///
/// Steps are joined with `&&`, so a failing step stops the rest of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeCommand {
    steps: Vec<String>,
}

impl CompositeCommand {
    /// Build a command from its steps. Blank steps are dropped.
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = steps
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.trim().is_empty())
            .collect();
        Self { steps }
    }

    /// Wrap an already rendered shell command
    pub fn raw(command: impl Into<String>) -> Self {
        Self::new([command.into()])
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render as one shell-interpretable string
    pub fn render(&self) -> String {
        if self.steps.is_empty() {
            // `true` keeps an empty chain a valid, successful command
            return "true".to_string();
        }
        self.steps.join(" && ")
    }
}

impl fmt::Display for CompositeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// One independent unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    id: String,
    command: CompositeCommand,
}

impl Job {
    pub fn new(id: impl Into<String>, command: CompositeCommand) -> Self {
        Self {
            id: id.into(),
            command,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &CompositeCommand {
        &self.command
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Lifecycle state of a job, derived from which pool container holds it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    Running,
    /// Terminal state. `None` when the job never produced an exit code
    /// (spawn or wait failure).
    Finished(Option<i32>),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Finished(Some(code)) => write!(f, "finished ({})", code),
            Self::Finished(None) => write!(f, "finished (no exit code)"),
        }
    }
}

/// FIFO of queued jobs with unique identifiers
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
    ids: HashSet<String>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job, rejecting identifiers that were already queued
    pub fn push(&mut self, job: Job) -> Result<(), QueueError> {
        if !self.ids.insert(job.id().to_string()) {
            return Err(QueueError::DuplicateJob(job.id().to_string()));
        }
        self.jobs.push_back(job);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Job> {
        let job = self.jobs.pop_front()?;
        self.ids.remove(job.id());
        Some(job)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}

impl TryFrom<Vec<Job>> for JobQueue {
    type Error = QueueError;

    fn try_from(jobs: Vec<Job>) -> Result<Self, Self::Error> {
        let mut queue = Self::new();
        for job in jobs {
            queue.push(job)?;
        }
        Ok(queue)
    }
}
