use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::definition::DefinitionFile;
use crate::namespace::Namespace;

/// Mapping from namespace prefix to the base location of its modules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutoloadMap {
    prefixes: BTreeMap<String, PathBuf>,
}

/// Where an autoloaded module is expected to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoloadLocation {
    /// The mapped prefix that matched (`""` for the root fallback).
    pub prefix: String,
    /// Base location joined with the remaining name segments, no extension.
    pub path: PathBuf,
}

impl AutoloadMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `prefix` to `base`, returning the previous mapping.
    pub fn insert(&mut self, prefix: impl Into<String>, base: impl Into<PathBuf>) -> Option<PathBuf> {
        self.prefixes.insert(prefix.into(), base.into())
    }

    pub fn extend(&mut self, other: AutoloadMap) {
        self.prefixes.extend(other.prefixes);
    }

    pub fn get(&self, prefix: &str) -> Option<&Path> {
        self.prefixes.get(prefix).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.prefixes.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Longest mapped prefix of `name`, walking from the full name down to
    /// its root segment and finally the empty prefix.
    pub fn resolve(&self, name: &str) -> Option<AutoloadLocation> {
        let segments: Vec<&str> = name.split('.').collect();
        for split in (0..=segments.len()).rev() {
            let prefix = segments[..split].join(".");
            if let Some(base) = self.prefixes.get(&prefix) {
                let path = segments[split..]
                    .iter()
                    .fold(base.clone(), |path, segment| path.join(segment));
                return Some(AutoloadLocation { prefix, path });
            }
        }
        None
    }
}

impl<K, V> FromIterator<(K, V)> for AutoloadMap
where
    K: Into<String>,
    V: Into<PathBuf>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            prefixes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Request handed to a [`Loader`] for a name nobody has declared yet.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub name: String,
    pub location: Option<AutoloadLocation>,
}

/// Materializes undeclared modules on demand.
///
/// Implementations make `request.name` available by declaring or providing
/// it on `namespace`, synchronously or later. The namespace calls a loader at
/// most once per name.
pub trait Loader {
    fn load(&self, namespace: &Namespace, request: &LoadRequest) -> Result<()>;
}

/// What happens to dependents when a load fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LoadFailurePolicy {
    /// Log the failure; dependents stay pending.
    #[default]
    Warn,
    /// Fail every module waiting on the name, transitively.
    Abort,
}

/// Loads definition files from autoload locations.
///
/// For a location `base/a/B` the loader probes `base/a/B.<ext>` for each
/// configured extension in turn and applies the first file it finds.
#[derive(Debug, Clone)]
pub struct FileLoader {
    extensions: Vec<String>,
}

impl Default for FileLoader {
    fn default() -> Self {
        Self {
            extensions: vec!["toml".to_string(), "json".to_string()],
        }
    }
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    fn find(&self, location: &Path) -> Option<PathBuf> {
        self.extensions.iter().find_map(|extension| {
            let mut candidate = location.as_os_str().to_owned();
            candidate.push(".");
            candidate.push(extension);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })
    }
}

impl Loader for FileLoader {
    fn load(&self, namespace: &Namespace, request: &LoadRequest) -> Result<()> {
        let location = request.location.as_ref().ok_or_else(|| {
            anyhow::anyhow!("No autoload prefix matches '{}'", request.name)
        })?;
        let path = self.find(&location.path).ok_or_else(|| {
            anyhow::anyhow!(
                "No module file found at {}.{{{}}}",
                location.path.display(),
                self.extensions.join(",")
            )
        })?;
        tracing::debug!("Autoloading '{}' from {}", request.name, path.display());
        let file = DefinitionFile::read(&path)?;
        file.apply(namespace)?;
        Ok(())
    }
}
