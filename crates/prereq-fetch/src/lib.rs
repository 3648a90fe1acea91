//! Source retrieval for prerequisite components.
//!
//! A component's source comes from exactly one `Retriever` variant: a pinned
//! git checkout (`GitSource`) or a checksummed `.tar.gz` archive fetched over
//! HTTP (`ArchiveSource`). Downloads go through the `Downloader` trait with a
//! bounded exponential `RetryPolicy`; patches named in the pin configuration
//! are resolved to local files with `resolve_patches` before retrieval.

pub mod archive;
pub mod git;
pub mod http;
pub mod patches;
pub mod retry;

pub use archive::{extract_tar_gz, file_digest, verify_file, ArchiveSource};
pub use git::GitSource;
pub use http::{download_checked, download_with_retry, Downloader, HttpDownloader, USER_AGENT};
pub use patches::{apply_patches, resolve_patches, ResolvedPatch};
pub use retry::RetryPolicy;

use prereq_runtime::{BuildEnv, CommandRunner, RuntimeError};
use prereq_schema::RetrievalSpec;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("failed to retrieve {component}: {reason}")]
    DownloadFailure { component: String, reason: String },
    #[error("failed to extract {archive}: {reason}")]
    ExtractionError { archive: String, reason: String },
    #[error("unsupported compression for {0}: only .tar.gz and .tgz archives are supported")]
    UnsupportedCompression(String),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl FetchError {
    pub(crate) fn download(component: &str, reason: impl Into<String>) -> Self {
        FetchError::DownloadFailure {
            component: component.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Collaborators and policy shared by every retrieval in one run.
pub struct FetchContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub downloader: &'a dyn Downloader,
    /// Process environment git and patch commands run with.
    pub env: &'a BuildEnv,
    /// Where downloaded archives are cached.
    pub download_dir: PathBuf,
    pub retry: RetryPolicy,
    pub dry_run: bool,
    /// Accept an existing archive destination without re-validating it.
    pub trust_existing: bool,
}

/// One retrieval: where to put the sources and which revision and patches to use.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub component: &'a str,
    pub dest: &'a Path,
    pub commit: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub patches: &'a [ResolvedPatch],
}

/// What a successful retrieval produced, recorded in the retrieval marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub revision: Option<String>,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retriever {
    Git(GitSource),
    Archive(ArchiveSource),
}

impl Retriever {
    pub fn from_spec(spec: &RetrievalSpec) -> Self {
        match spec {
            RetrievalSpec::Git(git) => {
                Retriever::Git(GitSource::new(&git.url, git.submodules, git.branch.as_deref()))
            }
            RetrievalSpec::Archive(archive) => {
                Retriever::Archive(ArchiveSource::new(&archive.url, archive.checksum.clone()))
            }
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Retriever::Git(git) => &git.url,
            Retriever::Archive(archive) => &archive.url,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Retriever::Git(_) => "git",
            Retriever::Archive(_) => "archive",
        }
    }

    pub fn get(
        &mut self,
        ctx: &FetchContext<'_>,
        req: &FetchRequest<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        tracing::debug!(
            "retrieving {} from {} {}",
            req.component,
            self.kind(),
            self.url()
        );
        match self {
            Retriever::Git(git) => git.get(ctx, req),
            Retriever::Archive(archive) => archive.get(ctx, req),
        }
    }
}
