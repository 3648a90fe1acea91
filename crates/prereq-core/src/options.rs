use prereq_fetch::RetryPolicy;
use prereq_schema::TemplateVars;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Sentinel accepted in the installed and include lists meaning every component.
pub const ALL: &str = "all";

/// What the resolver may do when a component is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildDeps {
    /// Download sources and build them.
    #[default]
    Yes,
    /// Neither download nor build.
    No,
    /// Build from sources already on disk, never download.
    BuildOnly,
}

impl BuildDeps {
    pub fn download(self) -> bool {
        matches!(self, BuildDeps::Yes)
    }

    pub fn build(self) -> bool {
        !matches!(self, BuildDeps::No)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildDeps::Yes => "yes",
            BuildDeps::No => "no",
            BuildDeps::BuildOnly => "build-only",
        }
    }
}

impl fmt::Display for BuildDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildDeps {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(BuildDeps::Yes),
            "no" => Ok(BuildDeps::No),
            "build-only" => Ok(BuildDeps::BuildOnly),
            other => Err(format!(
                "invalid build-deps value '{other}' (expected yes, no or build-only)"
            )),
        }
    }
}

/// Invocation mode. `Help` and `Clean` never retrieve or build anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Build,
    Help,
    Clean,
}

impl Mode {
    pub fn is_noop(self) -> bool {
        !matches!(self, Mode::Build)
    }
}

/// Policy for one resolve run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    pub build_deps: BuildDeps,
    /// Print retrieval and build commands instead of running them.
    pub dry_run: bool,
    /// Like `dry_run`, but target probes still execute.
    pub check_only: bool,
    pub mode: Mode,
    /// Make `check_available` propagate errors instead of reporting false.
    pub require_optional: bool,
    /// Components declared pre-installed; may contain [`ALL`].
    pub installed: BTreeSet<String>,
    /// Optional components enabled for this build; may contain [`ALL`].
    pub include: BTreeSet<String>,
    pub jobs: usize,
    /// Extra roots searched for prebuilt copies of retrievable components.
    pub alt_prefixes: Vec<PathBuf>,
    pub system_prefix: PathBuf,
    /// Accept existing archive source trees without re-validating them.
    pub trust_existing_sources: bool,
    pub retry: RetryPolicy,
    /// User-supplied template variables for build commands.
    pub vars: TemplateVars,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            build_deps: BuildDeps::default(),
            dry_run: false,
            check_only: false,
            mode: Mode::default(),
            require_optional: false,
            installed: BTreeSet::new(),
            include: BTreeSet::new(),
            jobs: std::thread::available_parallelism().map_or(1, usize::from),
            alt_prefixes: Vec::new(),
            system_prefix: PathBuf::from("/usr"),
            trust_existing_sources: false,
            retry: RetryPolicy::default(),
            vars: TemplateVars::new(),
        }
    }
}

impl ResolveOptions {
    /// Whether external commands are only printed.
    #[inline]
    pub fn is_dry(&self) -> bool {
        self.dry_run || self.check_only
    }

    /// Whether verification probes execute.
    #[inline]
    pub fn probes_enabled(&self) -> bool {
        !self.dry_run || self.check_only
    }

    pub fn is_preinstalled(&self, name: &str) -> bool {
        self.installed.contains(ALL) || self.installed.contains(name)
    }

    pub fn is_included(&self, name: &str) -> bool {
        self.include.contains(ALL) || self.include.contains(name)
    }
}
