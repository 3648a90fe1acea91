use crate::CoreError;
use fs2::FileExt;
use prereq_store::PrereqLayout;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive advisory lock on one build root, held while components are
/// retrieved and built in it. Released on drop.
#[derive(Debug)]
pub struct BuildRootLock {
    file: File,
    build_root: PathBuf,
}

impl BuildRootLock {
    /// Lock the build root of `layout` without waiting.
    ///
    /// Fails with [`CoreError::BuildRootLocked`] while another run holds it.
    pub fn acquire(layout: &PrereqLayout) -> Result<Self, CoreError> {
        let build_root = layout.build_root();
        let file = open_lock_file(&layout.lock_file())?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("locked build root {}", build_root.display());
                Ok(Self { file, build_root })
            }
            Err(e) if is_contended(&e) => Err(CoreError::BuildRootLocked(build_root)),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether another run currently holds the build root of `layout`.
    /// Nothing is created when the lock file does not exist yet.
    pub fn is_held(layout: &PrereqLayout) -> Result<bool, CoreError> {
        let path = layout.lock_file();
        if !path.is_file() {
            return Ok(false);
        }
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                file.unlock()?;
                Ok(false)
            }
            Err(e) if is_contended(&e) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn build_root(&self) -> &Path {
        &self.build_root
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl Drop for BuildRootLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("cannot unlock build root {}: {e}", self.build_root.display());
        }
    }
}

static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C lets the running build command finish and stops the build
/// loop before the next one; a second Ctrl-C exits immediately.
pub fn install_interrupt_handler() {
    let result = ctrlc::set_handler(move || {
        if INTERRUPT_REQUESTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\ninterrupt received, stopping before the next build command");
    });
    if let Err(e) = result {
        tracing::debug!("interrupt handler not installed: {e}");
    }
}

/// Checked by the build loop before every build command.
pub fn interrupt_requested() -> bool {
    INTERRUPT_REQUESTED.load(Ordering::SeqCst)
}
