//! Job compiler - turns resolved packages into shell jobs and composer packages

use crate::config::InstallConfig;
use crate::core::{CompositeCommand, Job, JobQueue};
use crate::error::CompileError;
use crate::manifest::{PackageEntry, PackageKind, PackageSet};
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Base URL of the default repositories, `<base>/mediawiki-<kind>-<name>`
pub const WIKIMEDIA_GITHUB: &str = "https://github.com/wikimedia";

/// Output of compilation
#[derive(Debug, Default)]
pub struct JobPlan {
    /// One job per package that needs a clone, in manifest order
    pub jobs: JobQueue,
    /// `name[:version]` arguments for one `composer require`
    pub composer_packages: Vec<String>,
    /// Problems worth telling the user about that do not stop the install
    pub warnings: Vec<String>,
}

impl JobPlan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.composer_packages.is_empty()
    }
}

pub struct JobCompiler<'a> {
    config: &'a InstallConfig,
}

impl<'a> JobCompiler<'a> {
    pub fn new(config: &'a InstallConfig) -> Self {
        Self { config }
    }

    pub fn compile(&self, packages: &PackageSet) -> Result<JobPlan, CompileError> {
        let mut plan = JobPlan::default();

        for entry in packages.iter() {
            let spec = &entry.spec;
            if spec.remove {
                log::debug!("Skipping removed {}/{}", entry.kind, entry.name);
                continue;
            }

            if let Some(name) = &spec.composer_name {
                let package = match &spec.composer_version {
                    Some(version) => format!("{}:{}", name, version),
                    None => name.clone(),
                };
                plan.composer_packages.push(package);
                continue;
            }

            if spec.bundled {
                continue;
            }

            let (command, warnings) = self.command_for(entry)?;
            plan.warnings.extend(warnings);
            plan.jobs
                .push(Job::new(format!("{}/{}", entry.kind, entry.name), command))?;
        }

        plan.warnings.extend(missing_requirements(packages));
        for warning in &plan.warnings {
            log::warn!("{}", warning);
        }

        Ok(plan)
    }

    /// Where a package is cloned to
    pub fn install_dir(&self, kind: PackageKind, name: &str) -> PathBuf {
        self.config
            .mw_home
            .join(format!("canasta-{}", kind))
            .join(name)
    }

    /// Build the clone-to-relocate step chain for one package
    pub fn command_for(&self, entry: &PackageEntry) -> Result<(CompositeCommand, Vec<String>), CompileError> {
        let PackageEntry { kind, name, spec } = entry;
        let dir = self.install_dir(*kind, name);
        let dir_arg = path_arg(&dir);
        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        let (repository, branch) = match &spec.repository {
            Some(repository) => (repository.clone(), spec.branch.clone()),
            None => {
                let repository = format!("{}/mediawiki-{}-{}", WIKIMEDIA_GITHUB, kind, name);
                let branch = match (&spec.branch, &self.config.mw_version) {
                    (Some(branch), _) => branch.clone(),
                    (None, Some(version)) => version.clone(),
                    (None, None) => return Err(CompileError::MissingVersion(format!("{}/{}", kind, name))),
                };
                (repository, Some(branch))
            }
        };

        let mut clone = String::from("git clone ");
        if let Some(branch) = &branch {
            clone.push_str(&format!("--single-branch -b {} ", quote(branch)));
        }
        clone.push_str(&format!("{} {}", quote(&repository), dir_arg));
        steps.push(clone);

        if let Some(commit) = &spec.commit {
            steps.push(format!("cd {} && git checkout -q {}", dir_arg, quote(commit)));
        }

        for patch in &spec.patches {
            let patch_path = self.config.patch_dir.join(patch);
            steps.push(format!("cd {} && git apply {}", dir_arg, path_arg(&patch_path)));
        }

        for step in &spec.additional_steps {
            match step.trim() {
                "composer update" => steps.push(format!(
                    "composer install --working-dir={} --no-interaction --no-dev",
                    dir_arg
                )),
                "git submodule update" => {
                    steps.push(format!("cd {} && git submodule update --init", dir_arg))
                }
                other => warnings.push(format!(
                    "{}/{}: ignoring unsupported additional step '{}'",
                    kind, name, other
                )),
            }
        }

        steps.push(format!("rm -rf {}", path_arg(&dir.join(".git"))));

        if !spec.persistent_directories.is_empty() {
            let origin = self
                .config
                .mw_origin_files
                .join(kind.dir_name())
                .join(name);
            let volume = self.config.mw_volume.join(kind.dir_name()).join(name);

            steps.push(format!("mkdir -p {}", path_arg(&origin)));
            for directory in &spec.persistent_directories {
                steps.push(format!(
                    "mv {} {}/",
                    path_arg(&dir.join(directory)),
                    path_arg(&origin)
                ));
                steps.push(format!(
                    "ln -s {} {}",
                    path_arg(&volume.join(directory)),
                    path_arg(&dir.join(directory))
                ));
            }
        }

        Ok((CompositeCommand::new(steps), warnings))
    }
}

/// Required extensions that will not be present after the install
fn missing_requirements(packages: &PackageSet) -> Vec<String> {
    let available: HashSet<&str> = packages
        .entries(PackageKind::Extension)
        .iter()
        .filter(|e| !e.spec.remove)
        .map(|e| e.name.as_str())
        .collect();

    let mut warnings = Vec::new();
    for entry in packages.iter().filter(|e| !e.spec.remove) {
        for required in &entry.spec.required_extensions {
            if !available.contains(required.as_str()) {
                warnings.push(format!(
                    "{}/{} requires extension {} which is not installed",
                    entry.kind, entry.name, required
                ));
            }
        }
    }
    warnings
}

fn path_arg(path: &Path) -> String {
    quote(&path.to_string_lossy()).into_owned()
}

/// Single-quote arguments that the shell would otherwise split or expand
fn quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InstallConfig {
        InstallConfig {
            mw_home: PathBuf::from("/var/www/mediawiki/w"),
            mw_version: Some("REL1_43".to_string()),
            mw_volume: PathBuf::from("/mediawiki"),
            mw_origin_files: PathBuf::from("/mw_origin_files"),
            patch_dir: PathBuf::from("/tmp"),
        }
    }

    fn packages(yaml: &str) -> PackageSet {
        PackageSet::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn test_default_repository_and_branch() {
        let set = packages("extensions:\n  - Echo:\n      commit: abc123\n");
        let config = config();
        let plan = JobCompiler::new(&config).compile(&set).unwrap();

        let job = plan.jobs.iter().next().unwrap();
        assert_eq!(job.id(), "extensions/Echo");
        assert_eq!(
            job.command().steps(),
            &[
                "git clone --single-branch -b REL1_43 https://github.com/wikimedia/mediawiki-extensions-Echo /var/www/mediawiki/w/canasta-extensions/Echo",
                "cd /var/www/mediawiki/w/canasta-extensions/Echo && git checkout -q abc123",
                "rm -rf /var/www/mediawiki/w/canasta-extensions/Echo/.git",
            ]
        );
    }

    #[test]
    fn test_explicit_repository_patches_steps_and_persistent_dirs() {
        let set = packages(
            r#"
skins:
  - Chameleon:
      repository: https://github.com/ProfessionalWiki/chameleon
      commit: f00d
      patches:
        - chameleon.patch
      additional steps:
        - composer update
        - git submodule update
        - npm install
      persistent directories:
        - cache
"#,
        );
        let config = config();
        let plan = JobCompiler::new(&config).compile(&set).unwrap();
        let job = plan.jobs.iter().next().unwrap();
        let dir = "/var/www/mediawiki/w/canasta-skins/Chameleon";

        assert_eq!(job.id(), "skins/Chameleon");
        assert_eq!(
            job.command().steps(),
            &[
                format!("git clone https://github.com/ProfessionalWiki/chameleon {}", dir),
                format!("cd {} && git checkout -q f00d", dir),
                format!("cd {} && git apply /tmp/chameleon.patch", dir),
                format!("composer install --working-dir={} --no-interaction --no-dev", dir),
                format!("cd {} && git submodule update --init", dir),
                format!("rm -rf {}/.git", dir),
                "mkdir -p /mw_origin_files/skins/Chameleon".to_string(),
                format!("mv {}/cache /mw_origin_files/skins/Chameleon/", dir),
                format!("ln -s /mediawiki/skins/Chameleon/cache {}/cache", dir),
            ]
        );
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("npm install"));
    }

    #[test]
    fn test_skip_rules_and_composer_collection() {
        let set = packages(
            r#"
extensions:
  - Cite:
      bundled: true
  - Old:
      remove: true
      composer-name: vendor/old
  - SemanticMediaWiki:
      composer-name: mediawiki/semantic-media-wiki
      composer-version: "~4.1"
  - Maps:
      composer-name: mediawiki/maps
  - Echo:
      commit: abc
skins:
  - Vector:
      bundled: true
"#,
        );
        let config = config();
        let plan = JobCompiler::new(&config).compile(&set).unwrap();

        assert_eq!(
            plan.composer_packages,
            vec!["mediawiki/semantic-media-wiki:~4.1", "mediawiki/maps"]
        );
        let ids: Vec<&str> = plan.jobs.iter().map(|j| j.id()).collect();
        assert_eq!(ids, vec!["extensions/Echo"]);
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let set = packages("extensions:\n  - Echo:\n      commit: abc\n");
        let config = InstallConfig {
            mw_version: None,
            ..config()
        };
        let err = JobCompiler::new(&config).compile(&set).unwrap_err();
        assert!(matches!(err, CompileError::MissingVersion(id) if id == "extensions/Echo"));

        // An explicit branch does not need MW_VERSION
        let set = packages("extensions:\n  - Echo:\n      branch: master\n");
        let plan = JobCompiler::new(&config).compile(&set).unwrap();
        assert!(plan.jobs.iter().next().unwrap().command().steps()[0].contains("-b master"));
    }

    #[test]
    fn test_missing_required_extension_warns() {
        let set = packages(
            r#"
extensions:
  - SemanticResultFormats:
      composer-name: mediawiki/semantic-result-formats
      required extensions:
        - SemanticMediaWiki
  - Cite:
      bundled: true
      required extensions:
        - ParserFunctions
  - ParserFunctions:
      bundled: true
"#,
        );
        let config = config();
        let plan = JobCompiler::new(&config).compile(&set).unwrap();
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("SemanticMediaWiki"));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("REL1_43"), "REL1_43");
        assert_eq!(quote("My Skin"), "'My Skin'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }
}
