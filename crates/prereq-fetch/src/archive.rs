use crate::{
    apply_patches, download_checked, FetchContext, FetchError, FetchOutcome, FetchRequest,
};
use flate2::read::GzDecoder;
use prereq_schema::{Checksum, ChecksumAlgorithm};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const SUPPORTED_SUFFIXES: &[&str] = &[".tar.gz", ".tgz"];

/// A checksummed gzip-tar archive fetched over HTTP(S).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub url: String,
    pub checksum: Checksum,
}

/// Stream `path` through the digest named by `algorithm`; returns lowercase hex.
pub fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, FetchError> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        ChecksumAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}

/// True when the file at `path` exists and matches `checksum`.
pub fn verify_file(path: &Path, checksum: &Checksum) -> Result<bool, FetchError> {
    if !path.is_file() {
        return Ok(false);
    }
    let actual = file_digest(path, checksum.algorithm())?;
    Ok(checksum.matches(&actual))
}

fn extraction_error(archive: &Path, reason: impl ToString) -> FetchError {
    FetchError::ExtractionError {
        archive: archive.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Unpack a `.tar.gz` into `dest`.
///
/// The archive is extracted into a scratch directory beside `dest`; a single
/// top-level directory is renamed to `dest`, otherwise all top-level entries
/// are moved under a freshly created `dest`.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), FetchError> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| extraction_error(archive, e))?;
    let scratch = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)
        .map_err(|e| extraction_error(archive, e))?;

    let file = File::open(archive).map_err(|e| extraction_error(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(io::BufReader::new(file)));
    tar.set_preserve_permissions(true);
    tar.set_unpack_xattrs(false);
    tar.unpack(scratch.path())
        .map_err(|e| extraction_error(archive, e))?;

    let entries: Vec<PathBuf> = fs::read_dir(scratch.path())
        .map_err(|e| extraction_error(archive, e))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(|e| extraction_error(archive, e))?;

    match entries.as_slice() {
        [] => Err(extraction_error(archive, "archive is empty")),
        [root] if root.is_dir() => {
            fs::rename(root, dest).map_err(|e| extraction_error(archive, e))
        }
        _ => {
            fs::create_dir(dest).map_err(|e| extraction_error(archive, e))?;
            for entry in &entries {
                let Some(name) = entry.file_name() else {
                    continue;
                };
                fs::rename(entry, dest.join(name)).map_err(|e| extraction_error(archive, e))?;
            }
            Ok(())
        }
    }
}

impl ArchiveSource {
    pub fn new(url: &str, checksum: Checksum) -> Self {
        Self {
            url: url.to_owned(),
            checksum,
        }
    }

    /// File name the archive is cached under.
    pub fn file_name(&self) -> &str {
        let path = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Where the archive of `component` is cached. Components never share a
    /// cached file, even when their archives have the same name.
    pub fn cache_path(&self, download_dir: &Path, component: &str) -> PathBuf {
        download_dir.join(component).join(self.file_name())
    }

    fn check_download(&self, path: &Path) -> Result<(), String> {
        let actual = file_digest(path, self.checksum.algorithm()).map_err(|e| e.to_string())?;
        if self.checksum.matches(&actual) {
            return Ok(());
        }
        Err(format!(
            "checksum mismatch for {}: expected {}, got {}:{actual}",
            self.url,
            self.checksum,
            self.checksum.algorithm()
        ))
    }

    fn is_supported(&self) -> bool {
        let name = self.file_name();
        SUPPORTED_SUFFIXES.iter().any(|s| name.ends_with(s))
    }

    pub fn get(
        &mut self,
        ctx: &FetchContext<'_>,
        req: &FetchRequest<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        if !self.is_supported() {
            return Err(FetchError::UnsupportedCompression(self.url.clone()));
        }
        let archive = self.cache_path(&ctx.download_dir, req.component);
        let outcome = FetchOutcome {
            revision: None,
            checksum: Some(self.checksum.to_string()),
        };

        if req.dest.exists() {
            if ctx.trust_existing {
                tracing::debug!("trusting existing sources at {}", req.dest.display());
                return Ok(outcome);
            }
            if verify_file(&archive, &self.checksum)? {
                tracing::debug!(
                    "sources at {} match {}",
                    req.dest.display(),
                    archive.display()
                );
                return Ok(outcome);
            }
            if ctx.dry_run {
                tracing::info!("Would remove unverified sources at {}", req.dest.display());
            } else {
                tracing::info!("removing unverified sources at {}", req.dest.display());
                fs::remove_dir_all(req.dest)?;
            }
        }

        if ctx.dry_run {
            tracing::info!("Would download {} to {}", self.url, archive.display());
            tracing::info!(
                "Would unpack {} to {}",
                archive.display(),
                req.dest.display()
            );
            return Ok(outcome);
        }

        if let Some(dir) = archive.parent() {
            fs::create_dir_all(dir)?;
        }
        if archive.is_file() && !verify_file(&archive, &self.checksum)? {
            tracing::warn!("removing {} with bad checksum", archive.display());
            fs::remove_file(&archive)?;
        }

        if !archive.is_file() {
            download_checked(
                ctx.downloader,
                &self.url,
                &archive,
                ctx.retry,
                req.component,
                |path| self.check_download(path),
            )?;
        }

        tracing::info!("unpacking {} to {}", archive.display(), req.dest.display());
        extract_tar_gz(&archive, req.dest)?;
        apply_patches(ctx, req.component, req.dest, req.patches)?;
        Ok(outcome)
    }
}
