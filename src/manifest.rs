//! Manifest parser - resolves YAML package lists and their `inherits` chain
//!
//! A manifest lists extensions and skins as single-key maps:
//!
//! ```yaml
//! inherits: base.yaml
//! extensions:
//!   - Cite:
//!       bundled: true
//!   - SemanticMediaWiki:
//!       composer-name: mediawiki/semantic-media-wiki
//!       composer-version: 4.1.3
//! skins:
//!   - Chameleon:
//!       commit: 2cbfa3d
//! ```
//!
//! The inherited manifest is applied first. Entries of the including file
//! replace inherited entries with the same name. Any manifest in the chain
//! may be an `http(s)://` URL, typically a wiki page; relative `inherits`
//! resolve against the including manifest's directory or URL.

use crate::error::ManifestError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use reqwest::Url;
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Package category, also the install subdirectory name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageKind {
    Extension,
    Skin,
}

impl PackageKind {
    pub const ALL: [PackageKind; 2] = [PackageKind::Extension, PackageKind::Skin];

    /// `extensions` or `skins`
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Extension => "extensions",
            Self::Skin => "skins",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Everything a manifest may say about one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSpec {
    #[serde(deserialize_with = "scalar_string")]
    pub repository: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub commit: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub branch: Option<String>,
    #[serde(deserialize_with = "string_list")]
    pub patches: Vec<String>,
    #[serde(rename = "persistent directories", deserialize_with = "string_list")]
    pub persistent_directories: Vec<String>,
    #[serde(rename = "additional steps", deserialize_with = "string_list")]
    pub additional_steps: Vec<String>,
    pub bundled: bool,
    pub remove: bool,
    #[serde(rename = "composer-name", deserialize_with = "scalar_string")]
    pub composer_name: Option<String>,
    #[serde(rename = "composer-version", deserialize_with = "scalar_string")]
    pub composer_version: Option<String>,
    #[serde(rename = "required extensions", deserialize_with = "string_list")]
    pub required_extensions: Vec<String>,
}

/// A named package after inheritance is resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub kind: PackageKind,
    pub name: String,
    pub spec: PackageSpec,
}

/// One `- Name: {...}` list item
#[derive(Debug)]
struct ListItem {
    name: String,
    spec: Option<PackageSpec>,
}

impl<'de> Deserialize<'de> for ListItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = BTreeMap::<String, Option<PackageSpec>>::deserialize(deserializer)?;
        if map.len() != 1 {
            let names: Vec<&str> = map.keys().map(String::as_str).collect();
            return Err(serde::de::Error::custom(format!(
                "expected exactly one package per list item, found [{}]",
                names.join(", ")
            )));
        }
        match map.into_iter().next() {
            Some((name, spec)) => Ok(Self { name, spec }),
            None => Err(serde::de::Error::custom("empty list item")),
        }
    }
}

type EntryList = Option<Vec<ListItem>>;

/// One manifest file as written
#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    inherits: Option<String>,
    #[serde(default)]
    extensions: EntryList,
    #[serde(default)]
    skins: EntryList,
}

/// Where a manifest is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    File(PathBuf),
    Remote(Url),
}

impl ManifestSource {
    /// `http://` and `https://` arguments are URLs, anything else a path
    pub fn parse(arg: &str) -> Self {
        if is_remote(arg) {
            if let Ok(url) = Url::parse(arg) {
                return Self::Remote(url);
            }
        }
        Self::File(PathBuf::from(arg))
    }

    /// Resolve an `inherits` value found in this manifest
    pub fn resolve(&self, target: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: String| ManifestError::InvalidInherit {
            location: self.clone(),
            target: target.to_string(),
            reason,
        };

        match self {
            Self::Remote(base) => base
                .join(target)
                .map(Self::Remote)
                .map_err(|e| invalid(e.to_string())),
            Self::File(_) if is_remote(target) => Url::parse(target)
                .map(Self::Remote)
                .map_err(|e| invalid(e.to_string())),
            Self::File(path) => {
                let target = Path::new(target);
                if target.is_absolute() {
                    return Ok(Self::File(target.to_path_buf()));
                }
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                Ok(Self::File(base.join(target)))
            }
        }
    }

    /// Identity used for cycle detection
    fn canonical(self) -> Result<Self, ManifestError> {
        match self {
            Self::File(path) => fs::canonicalize(&path)
                .map(Self::File)
                .map_err(|source| ManifestError::Read { path, source }),
            remote => Ok(remote),
        }
    }

    async fn read<F: Fetcher>(&self, fetcher: &F) -> Result<String, ManifestError> {
        log::debug!("Loading manifest {}", self);
        match self {
            Self::File(path) => fs::read_to_string(path).map_err(|source| ManifestError::Read {
                path: path.clone(),
                source,
            }),
            Self::Remote(url) => fetcher.fetch(url).await,
        }
    }
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{}", url),
        }
    }
}

fn is_remote(arg: &str) -> bool {
    let lower = arg.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Downloads remote manifests
pub trait Fetcher {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<String, ManifestError>>;
}

/// Fetches manifests with a plain GET
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, ManifestError> {
        let fetch_error = |source: reqwest::Error| ManifestError::Fetch {
            url: url.clone(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(fetch_error)?
            .error_for_status()
            .map_err(fetch_error)?;
        response.text().await.map_err(fetch_error)
    }
}

/// Resolved, ordered package lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    extensions: Vec<PackageEntry>,
    skins: Vec<PackageEntry>,
}

impl PackageSet {
    /// Load a manifest and everything it inherits from
    pub async fn load(source: &ManifestSource) -> Result<Self, ManifestError> {
        Self::load_with(source, &HttpFetcher::default()).await
    }

    /// Like [`PackageSet::load`], with remote manifests fetched by `fetcher`
    pub async fn load_with<F: Fetcher>(
        source: &ManifestSource,
        fetcher: &F,
    ) -> Result<Self, ManifestError> {
        let mut chain: Vec<ManifestSource> = Vec::new();
        let mut files = Vec::new();
        let mut next = Some(source.clone());

        while let Some(current) = next.take() {
            let current = current.canonical()?;
            if chain.contains(&current) {
                return Err(ManifestError::InheritanceCycle(current));
            }

            let text = current.read(fetcher).await?;
            let file = parse_document(&text).map_err(|source| ManifestError::Parse {
                location: current.clone(),
                source,
            })?;

            let parent = file.inherits.as_deref().map(str::trim).filter(|p| !p.is_empty());
            if let Some(parent) = parent {
                next = Some(current.resolve(parent)?);
            }
            chain.push(current);
            files.push(file);
        }

        // The root of the chain is applied first
        let mut set = Self::default();
        for file in files.into_iter().rev() {
            set.merge(file);
        }
        Ok(set)
    }

    /// Parse a single manifest document. `inherits` is not followed.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        let file = parse_document(text)?;
        let mut set = Self::default();
        set.merge(file);
        Ok(set)
    }

    fn merge(&mut self, file: ManifestFile) {
        let lists = [
            (PackageKind::Extension, file.extensions),
            (PackageKind::Skin, file.skins),
        ];

        for (kind, list) in lists {
            for ListItem { name, spec } in list.into_iter().flatten() {
                self.upsert(PackageEntry {
                    kind,
                    name,
                    spec: spec.unwrap_or_default(),
                });
            }
        }
    }

    /// Insert an entry, replacing one with the same kind and name in place
    pub fn upsert(&mut self, entry: PackageEntry) {
        let list = self.list_mut(entry.kind);
        match list.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => list.push(entry),
        }
    }

    fn list_mut(&mut self, kind: PackageKind) -> &mut Vec<PackageEntry> {
        match kind {
            PackageKind::Extension => &mut self.extensions,
            PackageKind::Skin => &mut self.skins,
        }
    }

    pub fn entries(&self, kind: PackageKind) -> &[PackageEntry] {
        match kind {
            PackageKind::Extension => &self.extensions,
            PackageKind::Skin => &self.skins,
        }
    }

    pub fn get(&self, kind: PackageKind, name: &str) -> Option<&PackageEntry> {
        self.entries(kind).iter().find(|e| e.name == name)
    }

    /// Extensions first, then skins, each in manifest order
    pub fn iter(&self) -> impl Iterator<Item = &PackageEntry> {
        self.extensions.iter().chain(self.skins.iter())
    }

    pub fn len(&self) -> usize {
        self.extensions.len() + self.skins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn yaml_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?si)<syntaxhighlight\s+lang=["']yaml["']>(.*?)</syntaxhighlight>"#)
            .expect("syntaxhighlight pattern is valid")
    })
}

/// Manifests exported from a wiki page wrap the YAML in a
/// `<syntaxhighlight lang="yaml">` block
fn extract_yaml(text: &str) -> &str {
    yaml_block_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

fn parse_document(text: &str) -> Result<ManifestFile, serde_yaml::Error> {
    let yaml = extract_yaml(text);
    if yaml.trim().is_empty() {
        return Ok(ManifestFile::default());
    }
    serde_yaml::from_str(yaml)
}

/// Accept any YAML scalar as a string: `composer-version: 4.1` is a float
/// to YAML but a version to us
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string, found {:?}",
            other
        ))),
    }
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_yaml::Value>>::deserialize(deserializer)?;
    values
        .unwrap_or_default()
        .into_iter()
        .map(|value| match value {
            serde_yaml::Value::String(s) => Ok(s),
            serde_yaml::Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected a list of strings, found {:?}",
                other
            ))),
        })
        .collect()
}
