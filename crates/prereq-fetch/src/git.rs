use crate::{apply_patches, FetchContext, FetchError, FetchOutcome, FetchRequest};
use std::path::Path;

/// A git repository checked out at a pinned commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub url: String,
    pub submodules: bool,
    /// Branch to check out before the commit, unless a pin overrides it.
    pub branch: Option<String>,
    resolved_commit: Option<String>,
}

impl GitSource {
    pub fn new(url: &str, submodules: bool, branch: Option<&str>) -> Self {
        Self {
            url: url.to_owned(),
            submodules,
            branch: branch.map(str::to_owned),
            resolved_commit: None,
        }
    }

    /// Commit of the last successful retrieval.
    pub fn resolved_commit(&self) -> Option<&str> {
        self.resolved_commit.as_deref()
    }

    fn git(
        ctx: &FetchContext<'_>,
        cwd: Option<&Path>,
        args: &[&str],
    ) -> Result<bool, FetchError> {
        let argv: Vec<String> = std::iter::once("git")
            .chain(args.iter().copied())
            .map(str::to_owned)
            .collect();
        Ok(ctx.runner.run(&argv, cwd, ctx.env)?)
    }

    /// Check out `rev`, fetching all refs and tags once if it is unknown.
    fn checkout(
        ctx: &FetchContext<'_>,
        component: &str,
        dest: &Path,
        rev: &str,
    ) -> Result<(), FetchError> {
        if Self::git(ctx, Some(dest), &["checkout", rev])? {
            return Ok(());
        }
        tracing::debug!("{component}: {rev} not present locally, fetching");
        if !Self::git(ctx, Some(dest), &["fetch", "-t", "-a"])? {
            return Err(FetchError::download(component, "git fetch failed"));
        }
        if !Self::git(ctx, Some(dest), &["checkout", rev])? {
            return Err(FetchError::download(
                component,
                format!("could not check out {rev}"),
            ));
        }
        Ok(())
    }

    pub fn get(
        &mut self,
        ctx: &FetchContext<'_>,
        req: &FetchRequest<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        let component = req.component;
        let Some(commit) = req.commit else {
            tracing::error!(
                "no commit version pinned for {component}; add it under [commit_versions] \
                 in the pin configuration to retrieve {}",
                self.url
            );
            return Err(FetchError::download(
                component,
                format!("no commit version pinned for {}", self.url),
            ));
        };

        if !req.dest.exists() {
            let dest = req.dest.display().to_string();
            if !Self::git(ctx, None, &["clone", self.url.as_str(), dest.as_str()])? {
                return Err(FetchError::download(
                    component,
                    format!("git clone of {} failed", self.url),
                ));
            }
        }

        if let Some(branch) = req.branch.or(self.branch.as_deref()) {
            Self::checkout(ctx, component, req.dest, branch)?;
        }
        Self::checkout(ctx, component, req.dest, commit)?;

        if !Self::git(ctx, Some(req.dest), &["reset", "--hard", "HEAD"])? {
            return Err(FetchError::download(component, "git reset failed"));
        }

        if self.submodules {
            for args in [&["submodule", "init"][..], &["submodule", "update"][..]] {
                if !Self::git(ctx, Some(req.dest), args)? {
                    return Err(FetchError::download(
                        component,
                        format!("git {} failed", args.join(" ")),
                    ));
                }
            }
        }

        apply_patches(ctx, component, req.dest, req.patches)?;

        self.resolved_commit = Some(commit.to_owned());
        Ok(FetchOutcome {
            revision: Some(commit.to_owned()),
            checksum: None,
        })
    }
}
