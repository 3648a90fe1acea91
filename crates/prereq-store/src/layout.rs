use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TARGET_TYPE: &str = "release";

/// Directory layout for retrieved sources, build trees, and installs.
///
/// ```text
/// <root>/build/external/<target>/           sources, markers, patches
/// <root>/build/external/<target>/<n>.build  out-of-tree build dirs
/// <prefix>/prereq/<target>/<n>              per-component install prefixes
/// ```
///
/// Nothing is created until [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct PrereqLayout {
    root: PathBuf,
    prefix: PathBuf,
    target_type: String,
}

impl PrereqLayout {
    /// Layout rooted at `root`, installing into `<root>/install`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let prefix = root.join("install");
        Self {
            root,
            prefix,
            target_type: DEFAULT_TARGET_TYPE.to_owned(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_target_type(mut self, target_type: &str) -> Self {
        target_type.clone_into(&mut self.target_type);
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    #[inline]
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    #[inline]
    pub fn build_root(&self) -> PathBuf {
        self.root
            .join("build")
            .join("external")
            .join(&self.target_type)
    }

    /// Shared install root every built component lives under.
    #[inline]
    pub fn prereq_root(&self) -> PathBuf {
        self.prefix.join("prereq").join(&self.target_type)
    }

    #[inline]
    pub fn src_path(&self, name: &str) -> PathBuf {
        self.build_root().join(name)
    }

    #[inline]
    pub fn out_of_tree_path(&self, name: &str) -> PathBuf {
        self.build_root().join(format!("{name}.build"))
    }

    #[inline]
    pub fn prereq_prefix(&self, name: &str) -> PathBuf {
        self.prereq_root().join(name)
    }

    #[inline]
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.build_root().join(format!("_{name}.fetched"))
    }

    /// Local file a downloaded patch is stored in; `index` counts from zero.
    #[inline]
    pub fn patch_path(&self, name: &str, index: usize) -> PathBuf {
        self.build_root().join(format!("{name}_patch_{index:03}"))
    }

    #[inline]
    pub fn download_dir(&self) -> PathBuf {
        self.build_root().join("downloads")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.build_root().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.build_root())?;
        fs::create_dir_all(self.download_dir())?;
        fs::create_dir_all(self.prereq_root())?;
        Ok(())
    }

    /// Wipe and recreate a component's out-of-tree build directory.
    pub fn recreate_build_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let path = self.out_of_tree_path(name);
        if !path.starts_with(self.build_root()) {
            return Err(StoreError::OutsideRoot(path.display().to_string()));
        }
        recreate_dir(&path)?;
        Ok(path)
    }
}

pub fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

pub fn recreate_dir(path: &Path) -> Result<(), StoreError> {
    if path.exists() {
        tracing::debug!("removing stale directory {}", path.display());
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = PrereqLayout::new("/tmp/proj");
        assert_eq!(
            layout.build_root(),
            PathBuf::from("/tmp/proj/build/external/release")
        );
        assert_eq!(
            layout.prereq_root(),
            PathBuf::from("/tmp/proj/install/prereq/release")
        );
        assert_eq!(
            layout.src_path("ofi"),
            PathBuf::from("/tmp/proj/build/external/release/ofi")
        );
        assert_eq!(
            layout.out_of_tree_path("ofi"),
            PathBuf::from("/tmp/proj/build/external/release/ofi.build")
        );
        assert_eq!(
            layout.prereq_prefix("ofi"),
            PathBuf::from("/tmp/proj/install/prereq/release/ofi")
        );
        assert_eq!(
            layout.marker_path("ofi"),
            PathBuf::from("/tmp/proj/build/external/release/_ofi.fetched")
        );
        assert_eq!(
            layout.patch_path("spdk", 2),
            PathBuf::from("/tmp/proj/build/external/release/spdk_patch_002")
        );
    }

    #[test]
    fn custom_prefix_and_target() {
        let layout = PrereqLayout::new("/src")
            .with_prefix("/opt/daos")
            .with_target_type("debug");
        assert_eq!(layout.target_type(), "debug");
        assert_eq!(layout.build_root(), PathBuf::from("/src/build/external/debug"));
        assert_eq!(
            layout.prereq_prefix("argobots"),
            PathBuf::from("/opt/daos/prereq/debug/argobots")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PrereqLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.build_root().is_dir());
        assert!(layout.download_dir().is_dir());
        assert!(layout.prereq_root().is_dir());
        layout.initialize().unwrap();
    }

    #[test]
    fn recreate_build_dir_wipes_contents() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PrereqLayout::new(dir.path());
        let build = layout.out_of_tree_path("mercury");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("CMakeCache.txt"), "stale").unwrap();

        let path = layout.recreate_build_dir("mercury").unwrap();
        assert_eq!(path, build);
        assert!(path.is_dir());
        assert!(!path.join("CMakeCache.txt").exists());
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
