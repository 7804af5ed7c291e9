//! extinstall - parallel installer for MediaWiki extensions and skins
//!
//! Resolves YAML manifests into per-package shell jobs and runs them through
//! a bounded-concurrency process pool.

pub mod compiler;
pub mod composer;
pub mod config;
pub mod core;
pub mod error;
pub mod manifest;

// Re-exports
pub use compiler::{JobCompiler, JobPlan};
pub use config::{InstallConfig, PoolSettings};
pub use crate::core::{
    BatchReport, CompositeCommand, ConsoleReporter, Job, JobQueue, JobState, Launcher, Outcome,
    OutcomeKind, PoolEvent, ProcessHandle, ProcessPool, ProcessStatus, Reporter, Shell,
    ShellLauncher,
};
pub use error::{CompileError, ManifestError, QueueError, SpawnError};
pub use manifest::{
    Fetcher, HttpFetcher, ManifestSource, PackageEntry, PackageKind, PackageSet, PackageSpec,
};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
