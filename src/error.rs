//! Error types for manifest loading, job compilation and queueing

use crate::core::Job;
use crate::manifest::ManifestSource;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving a manifest and its inheritance chain
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch manifest {url}: {source}")]
    Fetch {
        url: reqwest::Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to parse manifest {location}: {source}")]
    Parse {
        location: ManifestSource,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("manifest inheritance cycle through {0}")]
    InheritanceCycle(ManifestSource),

    #[error("invalid inherits '{target}' in {location}: {reason}")]
    InvalidInherit {
        location: ManifestSource,
        target: String,
        reason: String,
    },
}

/// Errors raised while turning packages into jobs
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0} has no repository or branch and MW_VERSION is not set")]
    MissingVersion(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} is already queued")]
    DuplicateJob(String),
}

/// A job whose process could not be created. The job is handed back to the
/// caller untouched.
#[derive(Debug, Error)]
#[error("spawn failed for {job}: {source}")]
pub struct SpawnError {
    pub job: Job,
    #[source]
    pub source: std::io::Error,
}
