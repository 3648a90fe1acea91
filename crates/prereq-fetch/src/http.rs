use crate::{FetchError, RetryPolicy};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub const USER_AGENT: &str = concat!("prereq/", env!("CARGO_PKG_VERSION"));

/// Fetches a URL into a local file.
pub trait Downloader: Send + Sync {
    fn download(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Plain HTTP(S) downloader.
///
/// The body is streamed into a temporary file next to `dest` and renamed
/// into place, so an interrupted transfer never leaves a partial archive.
pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDownloader {
    pub fn new() -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { agent }
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        tracing::debug!("GET {url}");
        let resp = match self.agent.get(url).header("User-Agent", USER_AGENT).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(FetchError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => return Err(FetchError::Http(e.to_string())),
        };

        let code = resp.status().as_u16();
        if code >= 400 {
            return Err(FetchError::Http(format!("HTTP {code} for {url}")));
        }

        let dir = dest.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut reader = resp.into_body().into_reader();
        io::copy(&mut reader, tmp.as_file_mut())
            .map_err(|e| FetchError::Http(format!("reading body of {url}: {e}")))?;
        tmp.as_file_mut().flush()?;
        tmp.persist(dest).map_err(|e| FetchError::Io(e.error))?;
        Ok(())
    }
}

/// Download `url` to `dest`, retrying with exponential backoff.
///
/// A failure after the last attempt becomes `DownloadFailure` for
/// `component`; the sleep only happens between attempts.
pub fn download_with_retry(
    downloader: &dyn Downloader,
    url: &str,
    dest: &Path,
    policy: RetryPolicy,
    component: &str,
) -> Result<(), FetchError> {
    download_checked(downloader, url, dest, policy, component, |_| Ok(()))
}

/// Like [`download_with_retry`], but every downloaded file is handed to
/// `check`. A rejected file is removed and counts as a failed attempt.
pub fn download_checked<F>(
    downloader: &dyn Downloader,
    url: &str,
    dest: &Path,
    policy: RetryPolicy,
    component: &str,
    check: F,
) -> Result<(), FetchError>
where
    F: Fn(&Path) -> Result<(), String>,
{
    let delays = policy.delays();
    let mut last_error = String::new();
    for attempt in 0..policy.attempts() {
        let result = downloader
            .download(url, dest)
            .map_err(|e| e.to_string())
            .and_then(|()| {
                check(dest).inspect_err(|_| {
                    if let Err(e) = fs::remove_file(dest) {
                        tracing::debug!("cannot remove rejected {}: {e}", dest.display());
                    }
                })
            });
        match result {
            Ok(()) => {
                tracing::debug!("downloaded {url} to {}", dest.display());
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    "download of {url} failed (attempt {}/{}): {e}",
                    attempt + 1,
                    policy.attempts()
                );
                last_error = e;
            }
        }
        if let Some(delay) = delays.get(attempt as usize) {
            std::thread::sleep(*delay);
        }
    }
    Err(FetchError::download(
        component,
        format!(
            "giving up on {url} after {} attempts: {last_error}",
            policy.attempts()
        ),
    ))
}
