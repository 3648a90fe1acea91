use crate::{download_with_retry, FetchContext, FetchError};
use prereq_schema::{PatchLocation, PatchRef};
use std::path::{Path, PathBuf};

/// A patch available on local disk, ready for `git apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPatch {
    pub path: PathBuf,
    pub subdir: Option<String>,
}

/// Turn configured patch entries into local files.
///
/// Remote patches are downloaded to `patch_path(n)`, numbered from zero in
/// the order they appear, and reused when already present. Relative local
/// paths are taken relative to `base_dir`.
pub fn resolve_patches(
    ctx: &FetchContext<'_>,
    component: &str,
    refs: &[PatchRef],
    base_dir: &Path,
    patch_path: impl Fn(usize) -> PathBuf,
) -> Result<Vec<ResolvedPatch>, FetchError> {
    let mut resolved = Vec::with_capacity(refs.len());
    let mut remote = 0;
    for patch in refs {
        let path = match &patch.location {
            PatchLocation::Url(url) => {
                let path = patch_path(remote);
                remote += 1;
                if path.is_file() {
                    tracing::debug!("reusing downloaded patch {}", path.display());
                } else if ctx.dry_run {
                    tracing::info!("Would download patch {url} to {}", path.display());
                } else {
                    if let Some(dir) = path.parent() {
                        std::fs::create_dir_all(dir)?;
                    }
                    download_with_retry(ctx.downloader, url, &path, ctx.retry, component)?;
                }
                path
            }
            PatchLocation::Local(local) => {
                let path = if local.is_absolute() {
                    local.clone()
                } else {
                    base_dir.join(local)
                };
                if !ctx.dry_run && !path.is_file() {
                    return Err(FetchError::download(
                        component,
                        format!("patch file {} not found", path.display()),
                    ));
                }
                path
            }
        };
        resolved.push(ResolvedPatch {
            path,
            subdir: patch.subdir.clone(),
        });
    }
    Ok(resolved)
}

/// Apply patches to a retrieved source tree with `git apply`.
pub fn apply_patches(
    ctx: &FetchContext<'_>,
    component: &str,
    dest: &Path,
    patches: &[ResolvedPatch],
) -> Result<(), FetchError> {
    for patch in patches {
        let mut argv = vec!["git".to_owned(), "apply".to_owned()];
        if let Some(subdir) = &patch.subdir {
            argv.push("--directory".to_owned());
            argv.push(subdir.clone());
        }
        argv.push(patch.path.display().to_string());
        if !ctx.runner.run(&argv, Some(dest), ctx.env)? {
            return Err(FetchError::download(
                component,
                format!("patch {} does not apply", patch.path.display()),
            ));
        }
    }
    Ok(())
}
