//! extinstall CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use extinstall::{
    composer, ConsoleReporter, InstallConfig, JobCompiler, ManifestSource, PackageSet,
    PoolSettings, ProcessPool, Shell,
};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "extinstall", version, about = "Install MediaWiki extensions and skins in parallel")]
struct Cli {
    /// Manifest listing extensions and skins: a YAML file or an http(s) URL,
    /// may use `inherits`
    manifest: String,

    /// MediaWiki installation root
    #[arg(long, env = "MW_HOME")]
    mw_home: PathBuf,

    /// Release branch for default clones, e.g. REL1_43
    #[arg(long, env = "MW_VERSION")]
    mw_version: Option<String>,

    /// Volume that persistent directories are linked to
    #[arg(long, env = "MW_VOLUME", default_value = "/mediawiki")]
    mw_volume: PathBuf,

    /// Where persistent directories are moved
    #[arg(long, env = "MW_ORIGIN_FILES", default_value = "/mw_origin_files")]
    mw_origin_files: PathBuf,

    /// Maximum number of install jobs running at once
    #[arg(short, long, env = "EXTINSTALL_JOBS", default_value = "8")]
    jobs: NonZeroUsize,

    /// Pause between polling passes, in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Directory containing patch files
    #[arg(long, default_value = "/tmp")]
    patch_dir: PathBuf,

    /// Shell that runs each job
    #[arg(long, default_value = "/bin/sh")]
    shell: PathBuf,

    /// Do not run the composer batch install
    #[arg(long)]
    skip_composer: bool,

    /// Print the compiled jobs and exit
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON report of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also print started and finished jobs
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn install_config(&self) -> InstallConfig {
        InstallConfig {
            mw_home: self.mw_home.clone(),
            mw_version: self.mw_version.clone(),
            mw_volume: self.mw_volume.clone(),
            mw_origin_files: self.mw_origin_files.clone(),
            patch_dir: self.patch_dir.clone(),
        }
    }

    fn pool_settings(&self) -> PoolSettings {
        PoolSettings::default()
            .with_max_concurrency(self.jobs)
            .with_idle_interval(Duration::from_millis(self.poll_interval_ms))
            .with_shell(Shell::new(self.shell.clone()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::info!("extinstall v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.install_config();
    let settings = cli.pool_settings();

    let source = ManifestSource::parse(&cli.manifest);
    log::info!("Loading manifest from: {}", source);
    let packages = PackageSet::load(&source)
        .await
        .with_context(|| format!("failed to load {}", source))?;

    println!("Preparing installation list...");
    let plan = JobCompiler::new(&config).compile(&packages)?;
    log::info!(
        "Resolved {} packages: {} jobs, {} composer packages",
        packages.len(),
        plan.jobs.len(),
        plan.composer_packages.len()
    );

    if cli.dry_run {
        if !plan.composer_packages.is_empty() {
            println!(
                "composer {}",
                composer::require_args(&plan.composer_packages, &config.mw_home).join(" ")
            );
        }
        for job in plan.jobs.iter() {
            println!("{}: {}", job.id(), job.command());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut success = true;

    if !plan.composer_packages.is_empty() {
        if cli.skip_composer {
            log::info!("Skipping {} composer packages", plan.composer_packages.len());
        } else {
            println!(
                "Batch installing {} composer packages...",
                plan.composer_packages.len()
            );
            match composer::install_batch(
                composer::COMPOSER,
                &plan.composer_packages,
                &config.mw_home,
            ) {
                Ok(installed) => success &= installed,
                Err(e) => {
                    log::error!("{:#}", e);
                    success = false;
                }
            }
        }
    }

    if !plan.jobs.is_empty() {
        println!(
            "Installing {} extensions/skins in parallel (max {})...",
            plan.jobs.len(),
            settings.max_concurrency
        );

        let mut reporter = ConsoleReporter::stdout(cli.verbose);
        let report = ProcessPool::new(plan.jobs, &settings)
            .run(&mut reporter)
            .await;

        println!("{}", report.summary());
        if let Some(path) = &cli.report {
            report
                .save_to(path)
                .with_context(|| format!("failed to write report {}", path.display()))?;
        }
        success &= report.is_success();
    }

    println!("All extensions and skins processed.");

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
