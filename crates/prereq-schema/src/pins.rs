use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinSection {
    Branches,
    CommitVersions,
    PatchVersions,
    Configs,
}

impl PinSection {
    pub const ALL: [PinSection; 4] = [
        PinSection::Branches,
        PinSection::CommitVersions,
        PinSection::PatchVersions,
        PinSection::Configs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PinSection::Branches => "branches",
            PinSection::CommitVersions => "commit_versions",
            PinSection::PatchVersions => "patch_versions",
            PinSection::Configs => "configs",
        }
    }
}

impl fmt::Display for PinSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinSection {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branches" => Ok(PinSection::Branches),
            "commit_versions" => Ok(PinSection::CommitVersions),
            "patch_versions" => Ok(PinSection::PatchVersions),
            "configs" => Ok(PinSection::Configs),
            other => Err(SchemaError::UnknownSection(other.to_owned())),
        }
    }
}

/// Section-keyed pin configuration (`build.config`).
///
/// ```toml
/// [commit_versions]
/// mercury = "v2.2.0"
///
/// [patch_versions]
/// mercury = "https://example.com/fix.patch,src^local.patch"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PinConfig {
    #[serde(default)]
    branches: BTreeMap<String, String>,
    #[serde(default)]
    commit_versions: BTreeMap<String, String>,
    #[serde(default)]
    patch_versions: BTreeMap<String, String>,
    #[serde(default)]
    configs: BTreeMap<String, String>,
}

impl PinConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = fs::read_to_string(path)?;
        parse_pins_str(&content)
    }

    fn section(&self, section: PinSection) -> &BTreeMap<String, String> {
        match section {
            PinSection::Branches => &self.branches,
            PinSection::CommitVersions => &self.commit_versions,
            PinSection::PatchVersions => &self.patch_versions,
            PinSection::Configs => &self.configs,
        }
    }

    fn section_mut(&mut self, section: PinSection) -> &mut BTreeMap<String, String> {
        match section {
            PinSection::Branches => &mut self.branches,
            PinSection::CommitVersions => &mut self.commit_versions,
            PinSection::PatchVersions => &mut self.patch_versions,
            PinSection::Configs => &mut self.configs,
        }
    }

    /// Look up `name` in `section`. Empty values count as unset.
    pub fn get(&self, section: PinSection, name: &str) -> Option<&str> {
        self.section(section)
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, section: PinSection, name: &str, value: &str) {
        self.section_mut(section)
            .insert(name.to_owned(), value.to_owned());
    }

    #[inline]
    pub fn commit(&self, name: &str) -> Option<&str> {
        self.get(PinSection::CommitVersions, name)
    }

    #[inline]
    pub fn branch(&self, name: &str) -> Option<&str> {
        self.get(PinSection::Branches, name)
    }

    /// Extra pin file shipped inside a component's source tree, relative to it.
    #[inline]
    pub fn config_file(&self, name: &str) -> Option<&str> {
        self.get(PinSection::Configs, name)
    }

    /// Ordered patch list for `name`, parsed from the comma-separated entry.
    pub fn patches(&self, name: &str) -> Result<Vec<PatchRef>, SchemaError> {
        let Some(raw) = self.get(PinSection::PatchVersions, name) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PatchRef::parse)
            .collect()
    }

    /// Layer `other` on top of `self`; entries in `other` win.
    pub fn merge(&mut self, mut other: PinConfig) {
        for section in PinSection::ALL {
            let target = self.section_mut(section);
            for (name, value) in std::mem::take(other.section_mut(section)) {
                if let Some(previous) = target.get(&name).filter(|p| **p != value) {
                    tracing::debug!("pin {section}.{name} overridden: '{previous}' -> '{value}'");
                }
                target.insert(name, value);
            }
        }
    }

    /// Layer the pin file at `path` on top of `self`.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), SchemaError> {
        let other = Self::load(path)?;
        let entries: usize = PinSection::ALL
            .iter()
            .map(|section| other.section(*section).len())
            .sum();
        tracing::debug!("merging {entries} pin(s) from {}", path.display());
        self.merge(other);
        Ok(())
    }
}

pub fn parse_pins_str(input: &str) -> Result<PinConfig, SchemaError> {
    Ok(toml::from_str(input)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLocation {
    Local(PathBuf),
    Url(String),
}

/// One entry of a patch list: `patch` or `subdir^patch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRef {
    pub location: PatchLocation,
    /// Directory inside the source tree the patch applies to.
    pub subdir: Option<String>,
}

impl PatchRef {
    pub fn parse(entry: &str) -> Result<Self, SchemaError> {
        let (subdir, patch) = match entry.split_once('^') {
            Some((dir, patch)) => (Some(dir.trim()), patch.trim()),
            None => (None, entry.trim()),
        };
        if patch.is_empty() || subdir.is_some_and(str::is_empty) || patch.contains('^') {
            return Err(SchemaError::InvalidPatch(entry.to_owned()));
        }
        let location = if patch.starts_with("https://") || patch.starts_with("http://") {
            PatchLocation::Url(patch.to_owned())
        } else {
            PatchLocation::Local(PathBuf::from(patch))
        };
        Ok(Self {
            location,
            subdir: subdir.map(str::to_owned),
        })
    }
}
