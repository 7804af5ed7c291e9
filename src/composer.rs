//! Composer batch install - one blocking `composer require` before the pool
//!
//! Composer locks `composer.json` in the MediaWiki root, so all packages go
//! through a single invocation instead of parallel jobs.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

/// Program used for the batch install
pub const COMPOSER: &str = "composer";

/// Arguments of `composer require` for `packages`
pub fn require_args(packages: &[String], working_dir: &Path) -> Vec<String> {
    let mut args = Vec::with_capacity(packages.len() + 4);
    args.push("require".to_string());
    args.extend(packages.iter().cloned());
    args.push(format!("--working-dir={}", working_dir.display()));
    args.push("--no-interaction".to_string());
    args.push("--update-no-dev".to_string());
    args
}

/// Run `composer require` with inherited stdio and wait for it.
///
/// Returns `Ok(false)` when composer ran but failed; errors only when it
/// could not be started.
pub fn install_batch(program: &str, packages: &[String], working_dir: &Path) -> Result<bool> {
    if packages.is_empty() {
        return Ok(true);
    }

    log::info!("Batch installing {} composer packages", packages.len());
    let status = Command::new(program)
        .args(require_args(packages, working_dir))
        .status()
        .with_context(|| format!("failed to run {}", program))?;

    if !status.success() {
        log::error!("composer require failed ({})", status);
    }
    Ok(status.success())
}
