use assert_cmd::Command;
use extinstall::core::ProcessHandle;
use extinstall::{
    BatchReport, CompositeCommand, InstallConfig, Job, JobCompiler, Launcher, PackageSet,
    PoolEvent, PoolSettings, ProcessPool, Shell, SpawnError,
};
use predicates::prelude::*;
use std::cell::RefCell;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const MANIFEST: &str = r#"
extensions:
  - Cite:
      bundled: true
  - Echo:
      commit: 5f1d2c3
  - SemanticMediaWiki:
      composer-name: mediawiki/semantic-media-wiki
      composer-version: "~4.1"
  - PageForms:
      commit: 7d6bc9a
      persistent directories:
        - images
skins:
  - Chameleon:
      repository: https://github.com/ProfessionalWiki/chameleon
"#;

fn write_manifest(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("wiki.yaml");
    fs::write(&path, MANIFEST).unwrap();
    path
}

fn extinstall(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("extinstall").unwrap();
    cmd.env("MW_HOME", home)
        .env("MW_VERSION", "REL1_43")
        .env_remove("EXTINSTALL_JOBS")
        .env("RUST_LOG", "warn");
    cmd
}

/// Records every command it is asked to run and runs `true` instead
struct Recording {
    commands: RefCell<Vec<(String, String)>>,
}

impl Launcher for Recording {
    fn launch(&self, job: Job) -> Result<ProcessHandle, SpawnError> {
        self.commands
            .borrow_mut()
            .push((job.id().to_string(), job.command().render()));
        ProcessHandle::spawn(
            Job::new(job.id(), CompositeCommand::raw("true")),
            &Shell::default(),
        )
    }
}

#[tokio::test]
async fn test_manifest_to_pool() {
    let set = PackageSet::from_yaml_str(MANIFEST).unwrap();
    let config = InstallConfig {
        mw_version: Some("REL1_43".to_string()),
        ..InstallConfig::default()
    };
    let plan = JobCompiler::new(&config).compile(&set).unwrap();
    assert_eq!(plan.composer_packages, vec!["mediawiki/semantic-media-wiki:~4.1"]);

    let settings = PoolSettings::default()
        .with_max_concurrency(NonZeroUsize::new(2).unwrap())
        .with_idle_interval(Duration::from_millis(10));
    let launcher = Recording {
        commands: RefCell::new(Vec::new()),
    };

    let mut started = Vec::new();
    let report = ProcessPool::with_launcher(plan.jobs, &settings, &launcher)
        .run(&mut |event: &PoolEvent| {
            if let PoolEvent::Started { job_id, .. } = event {
                started.push(job_id.clone());
            }
        })
        .await;

    assert!(report.is_success());
    assert_eq!(
        started,
        vec!["extensions/Echo", "extensions/PageForms", "skins/Chameleon"]
    );

    let commands = launcher.commands.borrow();
    let (_, page_forms) = &commands[1];
    assert!(page_forms.starts_with("git clone --single-branch -b REL1_43 "));
    assert!(page_forms.contains(" && mkdir -p /mw_origin_files/extensions/PageForms && "));
}

#[test]
fn test_cli_dry_run_lists_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let manifest = write_manifest(temp_dir.path());
    let home = temp_dir.path().join("w");

    extinstall(&home)
        .arg(&manifest)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "extensions/Echo: git clone --single-branch -b REL1_43 https://github.com/wikimedia/mediawiki-extensions-Echo {}/canasta-extensions/Echo",
            home.display()
        )))
        .stdout(predicate::str::contains("composer require mediawiki/semantic-media-wiki:~4.1"))
        .stdout(predicate::str::contains("skins/Chameleon: git clone https://github.com/ProfessionalWiki/chameleon"))
        .stdout(predicate::str::contains("extensions/Cite").not());
}

#[test]
fn test_cli_reports_spawn_failures() {
    let temp_dir = TempDir::new().unwrap();
    let manifest = write_manifest(temp_dir.path());

    extinstall(temp_dir.path())
        .arg(&manifest)
        .args(["--skip-composer", "--shell", "/nonexistent/sh", "-j", "2"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(" [Error] spawn failed for extensions/Echo"))
        .stdout(predicate::str::contains(" [Error] spawn failed for skins/Chameleon"))
        .stdout(predicate::str::contains("All extensions and skins processed."));
}

#[test]
fn test_cli_writes_report() {
    let temp_dir = TempDir::new().unwrap();
    let manifest = write_manifest(temp_dir.path());
    let report_path = temp_dir.path().join("out").join("report.json");

    // `true -c <command>` succeeds without touching the network
    extinstall(temp_dir.path())
        .arg(&manifest)
        .args(["--skip-composer", "--shell", "true", "--poll-interval-ms", "10"])
        .arg("--report")
        .arg(&report_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 jobs, 3 succeeded, 0 failed"));

    let report = BatchReport::load_from(&report_path).unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.max_concurrency, 8);
}

#[test]
fn test_cli_missing_manifest() {
    let temp_dir = TempDir::new().unwrap();

    extinstall(temp_dir.path())
        .arg(temp_dir.path().join("missing.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

/// Serves `body` to every request until the test exits
fn serve_page(body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{}/wiki/Setup?action=raw", addr)
}

#[test]
fn test_cli_loads_manifest_from_wiki_page() {
    let temp_dir = TempDir::new().unwrap();
    let page = format!(
        "== Extensions ==\n<syntaxhighlight lang=\"yaml\">{}</syntaxhighlight>\n",
        MANIFEST
    );
    let url = serve_page(page);

    extinstall(temp_dir.path())
        .env("NO_PROXY", "127.0.0.1")
        .env_remove("HTTP_PROXY")
        .env_remove("http_proxy")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy")
        .arg(&url)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("extensions/Echo: git clone"))
        .stdout(predicate::str::contains("skins/Chameleon: git clone"));
}
