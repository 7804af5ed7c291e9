//! Installer configuration - target paths and pool settings

use crate::core::Shell;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of concurrently running install jobs
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default pause between polling passes
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(100);

/// Where packages are installed and how their commands are built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// MediaWiki installation root (`MW_HOME`)
    pub mw_home: PathBuf,
    /// Release branch used for default clones, e.g. `REL1_43` (`MW_VERSION`)
    pub mw_version: Option<String>,
    /// Mounted volume persistent directories are linked to (`MW_VOLUME`)
    pub mw_volume: PathBuf,
    /// Where persistent directories are moved (`MW_ORIGIN_FILES`)
    pub mw_origin_files: PathBuf,
    /// Directory holding the patch files named in manifests
    pub patch_dir: PathBuf,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            mw_home: PathBuf::from("/var/www/mediawiki/w"),
            mw_version: None,
            mw_volume: PathBuf::from("/mediawiki"),
            mw_origin_files: PathBuf::from("/mw_origin_files"),
            patch_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Static settings of the process pool, fixed once a run starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_concurrency: NonZeroUsize,
    pub idle_interval: Duration,
    pub shell: Shell,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrency: NonZeroUsize::new(DEFAULT_MAX_CONCURRENCY)
                .unwrap_or(NonZeroUsize::MIN),
            idle_interval: DEFAULT_IDLE_INTERVAL,
            shell: Shell::default(),
        }
    }
}

impl PoolSettings {
    pub fn with_max_concurrency(mut self, max_concurrency: NonZeroUsize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }
}
