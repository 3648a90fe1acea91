//! Component registry and build orchestration for external prerequisites.
//!
//! The [`Registry`] owns every defined [`Component`], the set resolved so far
//! in this run, and a sticky cache of failures. [`Registry::require`] walks
//! the requirement graph depth-first: each component is verified in place,
//! or retrieved, built, rpath-patched and verified, and finally projected
//! onto the caller's environment sink. Builds run at most once per run and
//! a failed component keeps failing with the same error.

pub mod build;
pub mod component;
pub mod concurrency;
pub mod lifecycle;
pub mod options;
pub mod registry;

pub use component::{Component, ComponentState, Projection, NEW_DTAGS};
pub use concurrency::{install_interrupt_handler, interrupt_requested, BuildRootLock};
pub use lifecycle::{validate_transition, Phase};
pub use options::{BuildDeps, Mode, ResolveOptions, ALL};
pub use registry::Registry;

use prereq_fetch::FetchError;
use prereq_runtime::{format_missing, MissingPrereq, RuntimeError};
use prereq_schema::{SchemaError, TemplateError};
use prereq_store::StoreError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Flat classification of a [`CoreError`], looking through cached wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingDefinition,
    DuplicateDefinition,
    DownloadFailure,
    ExtractionError,
    UnsupportedCompression,
    DownloadRequired,
    BuildRequired,
    MissingSystemLibs,
    BuildFailure,
    MissingTargets,
    DependencyCycle,
    InvalidTransition,
    Interrupted,
    BuildRootLocked,
    Configuration,
    Io,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("definition error: {0}")]
    Schema(#[from] SchemaError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no definition for component '{0}'")]
    MissingDefinition(String),
    #[error("component '{0}' is already defined")]
    DuplicateDefinition(String),
    #[error("{0} must be downloaded but downloading is disabled (build-deps)")]
    DownloadRequired(String),
    #[error("{0} must be built but building is disabled (build-deps)")]
    BuildRequired(String),
    #[error("{component} cannot be built, {}", format_missing(.missing).trim_end())]
    MissingSystemLibs {
        component: String,
        missing: Vec<MissingPrereq>,
    },
    #[error("build of {component} failed: {command}")]
    BuildFailure { component: String, command: String },
    #[error("{}", missing_targets(.component, .package.as_deref()))]
    MissingTargets {
        component: String,
        /// OS package to install, when the component is never built here.
        package: Option<String>,
    },
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("invalid state transition for {component}: {from} -> {to}")]
    InvalidTransition {
        component: String,
        from: String,
        to: String,
    },
    #[error("interrupted while building {0}")]
    Interrupted(String),
    #[error("{} is locked by another prereq run", .0.display())]
    BuildRootLocked(PathBuf),
    /// A failure cached for `component` earlier in the run.
    #[error("{component}: {source}")]
    ComponentFailed {
        component: String,
        source: Arc<CoreError>,
    },
}

fn missing_targets(component: &str, package: Option<&str>) -> String {
    match package {
        Some(package) if package == component => {
            format!("{component} is not installed; install it or allow it to be built")
        }
        Some(package) => format!("{component} is not installed; install package {package}"),
        None => format!("{component} was built but its expected targets are missing"),
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ComponentFailed { source, .. } => source.kind(),
            CoreError::Fetch(
                FetchError::DownloadFailure { .. } | FetchError::Http(_),
            ) => ErrorKind::DownloadFailure,
            CoreError::Fetch(FetchError::ExtractionError { .. }) => ErrorKind::ExtractionError,
            CoreError::Fetch(FetchError::UnsupportedCompression(_)) => {
                ErrorKind::UnsupportedCompression
            }
            CoreError::Fetch(FetchError::Io(_) | FetchError::Runtime(_))
            | CoreError::Store(_)
            | CoreError::Runtime(_)
            | CoreError::Io(_) => ErrorKind::Io,
            CoreError::Schema(_) | CoreError::Template(_) => ErrorKind::Configuration,
            CoreError::MissingDefinition(_) => ErrorKind::MissingDefinition,
            CoreError::DuplicateDefinition(_) => ErrorKind::DuplicateDefinition,
            CoreError::DownloadRequired(_) => ErrorKind::DownloadRequired,
            CoreError::BuildRequired(_) => ErrorKind::BuildRequired,
            CoreError::MissingSystemLibs { .. } => ErrorKind::MissingSystemLibs,
            CoreError::BuildFailure { .. } => ErrorKind::BuildFailure,
            CoreError::MissingTargets { .. } => ErrorKind::MissingTargets,
            CoreError::DependencyCycle(_) => ErrorKind::DependencyCycle,
            CoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CoreError::Interrupted(_) => ErrorKind::Interrupted,
            CoreError::BuildRootLocked(_) => ErrorKind::BuildRootLocked,
        }
    }

    /// The shared failure behind a cached error.
    pub fn cached(&self) -> Option<&Arc<CoreError>> {
        match self {
            CoreError::ComponentFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The innermost error, skipping every cached wrapper.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            CoreError::ComponentFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
