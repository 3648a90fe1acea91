use crate::{BuildEnv, CommandRunner};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A dependency whose libraries a patched object must find at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpathDep {
    pub name: String,
    pub prefix: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpathReport {
    pub patched: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Relative path from directory `from` to `to`; both must be absolute.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

fn origin_entry(folder: &Path, target: &Path) -> String {
    let rel = relative_path(folder, target);
    if rel.as_os_str().is_empty() {
        "$ORIGIN".to_owned()
    } else {
        format!("$ORIGIN/{}", rel.display())
    }
}

fn is_shared_object(name: &str) -> bool {
    name.ends_with(".so") || name.contains(".so.")
}

/// Library directories of an install prefix, `lib64` first.
fn lib_dirs(prefix: &Path) -> Vec<PathBuf> {
    ["lib64", "lib"]
        .iter()
        .map(|d| prefix.join(d))
        .filter(|d| d.is_dir())
        .collect()
}

/// Rewrites the runtime search path of installed shared objects with
/// `patchelf` so an install tree under the shared prerequisite root stays
/// relocatable.
pub struct RpathPatcher<'a> {
    runner: &'a dyn CommandRunner,
    system_prefix: PathBuf,
}

impl<'a> RpathPatcher<'a> {
    pub fn new(runner: &'a dyn CommandRunner, system_prefix: &Path) -> Self {
        Self {
            runner,
            system_prefix: system_prefix.to_path_buf(),
        }
    }

    /// Search path for objects in `folder` of the component installed at `prefix`.
    ///
    /// Starts with the component's own library directory relative to
    /// `$ORIGIN`. Dependencies installed next to the component (under the same
    /// parent directory) are also `$ORIGIN`-relative; any other dependency
    /// outside the system prefix is referenced by absolute path.
    pub fn search_path(&self, prefix: &Path, folder: &Path, deps: &[RpathDep]) -> Vec<String> {
        let mut entries = vec![match lib_dirs(prefix).first() {
            Some(own) => origin_entry(folder, own),
            None => "$ORIGIN".to_owned(),
        }];
        let shared_root = prefix.parent();

        for dep in deps {
            if dep.prefix == self.system_prefix {
                continue;
            }
            let dirs = lib_dirs(&dep.prefix);
            if shared_root.is_some_and(|root| dep.prefix.starts_with(root)) {
                if let Some(dir) = dirs.first() {
                    entries.push(origin_entry(folder, dir));
                }
            } else {
                entries.extend(dirs.iter().map(|d| d.display().to_string()));
            }
        }

        let mut unique = Vec::with_capacity(entries.len());
        for entry in entries {
            if !unique.contains(&entry) {
                unique.push(entry);
            }
        }
        unique
    }

    /// Patch every shared object in `subdirs` of `prefix`.
    ///
    /// Failures are logged and reported as skipped; they never abort.
    pub fn patch(
        &self,
        prefix: &Path,
        subdirs: &[String],
        deps: &[RpathDep],
        env: &BuildEnv,
    ) -> RpathReport {
        let mut report = RpathReport::default();
        if subdirs.is_empty() || !prefix.is_dir() || prefix.starts_with(&self.system_prefix) {
            tracing::debug!("no rpath patching for {}", prefix.display());
            return report;
        }

        for subdir in subdirs {
            let folder = prefix.join(subdir);
            let Ok(entries) = fs::read_dir(&folder) else {
                tracing::debug!("rpath folder {} does not exist", folder.display());
                continue;
            };
            let mut objects: Vec<PathBuf> = entries
                .flatten()
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .filter(|e| is_shared_object(&e.file_name().to_string_lossy()))
                .map(|e| e.path())
                .collect();
            objects.sort();

            let rpath = self.search_path(prefix, &folder, deps).join(":");
            for object in objects {
                let argv = vec![
                    "patchelf".to_owned(),
                    "--set-rpath".to_owned(),
                    rpath.clone(),
                    object.display().to_string(),
                ];
                match self.runner.run(&argv, None, env) {
                    Ok(true) => report.patched.push(object),
                    Ok(false) => {
                        tracing::warn!("skipping rpath patch of {}", object.display());
                        report.skipped.push(object);
                    }
                    Err(e) => {
                        tracing::warn!("skipping rpath patch of {}: {e}", object.display());
                        report.skipped.push(object);
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockRunner;

    fn install(root: &Path, name: &str, libdir: &str, objects: &[&str]) -> PathBuf {
        let prefix = root.join(name);
        let dir = prefix.join(libdir);
        fs::create_dir_all(&dir).unwrap();
        for obj in objects {
            fs::write(dir.join(obj), "").unwrap();
        }
        prefix
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_path(Path::new("/p/mercury/lib"), Path::new("/p/ofi/lib64")),
            PathBuf::from("../../ofi/lib64")
        );
        assert_eq!(
            relative_path(Path::new("/p/a/lib"), Path::new("/p/a/lib")),
            PathBuf::new()
        );
        assert_eq!(
            relative_path(Path::new("/p/a/bin"), Path::new("/p/a/lib")),
            PathBuf::from("../lib")
        );
    }

    #[test]
    fn search_path_mixes_relative_and_absolute() {
        let shared = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let mercury = install(shared.path(), "mercury", "lib", &[]);
        install(shared.path(), "ofi", "lib64", &[]);
        let spdk = install(elsewhere.path(), "spdk", "lib", &[]);

        let runner = MockRunner::new();
        let patcher = RpathPatcher::new(&runner, Path::new("/usr"));
        let deps = vec![
            RpathDep {
                name: "ofi".to_owned(),
                prefix: shared.path().join("ofi"),
            },
            RpathDep {
                name: "spdk".to_owned(),
                prefix: spdk.clone(),
            },
            RpathDep {
                name: "uuid".to_owned(),
                prefix: PathBuf::from("/usr"),
            },
        ];
        let entries = patcher.search_path(&mercury, &mercury.join("lib"), &deps);
        assert_eq!(
            entries,
            vec![
                "$ORIGIN".to_owned(),
                "$ORIGIN/../../ofi/lib64".to_owned(),
                spdk.join("lib").display().to_string(),
            ]
        );
    }

    #[test]
    fn patches_each_shared_object() {
        let shared = tempfile::tempdir().unwrap();
        let prefix = install(
            shared.path(),
            "mercury",
            "lib",
            &["libmercury.so.2.1", "libna.so", "libmercury.a", "README"],
        );
        let runner = MockRunner::new();
        let patcher = RpathPatcher::new(&runner, Path::new("/usr"));
        let report = patcher.patch(&prefix, &["lib".to_owned()], &[], &BuildEnv::new());

        assert_eq!(report.patched.len(), 2);
        assert!(report.skipped.is_empty());
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.argv[..3] == ["patchelf", "--set-rpath", "$ORIGIN"]));
    }

    #[test]
    fn failed_patch_is_skipped_not_fatal() {
        let shared = tempfile::tempdir().unwrap();
        let prefix = install(shared.path(), "m", "lib", &["liba.so", "libb.so"]);
        let runner = MockRunner::new().fail_when("liba.so");
        let patcher = RpathPatcher::new(&runner, Path::new("/usr"));
        let report = patcher.patch(&prefix, &["lib".to_owned()], &[], &BuildEnv::new());
        assert_eq!(report.patched, vec![prefix.join("lib/libb.so")]);
        assert_eq!(report.skipped, vec![prefix.join("lib/liba.so")]);
    }

    #[test]
    fn system_prefix_never_patched() {
        let runner = MockRunner::new();
        let patcher = RpathPatcher::new(&runner, Path::new("/usr"));
        let report = patcher.patch(Path::new("/usr"), &["lib".to_owned()], &[], &BuildEnv::new());
        assert_eq!(report, RpathReport::default());
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn missing_folder_is_ignored() {
        let shared = tempfile::tempdir().unwrap();
        let prefix = install(shared.path(), "m", "lib", &["liba.so"]);
        let runner = MockRunner::new();
        let patcher = RpathPatcher::new(&runner, Path::new("/usr"));
        let report = patcher.patch(&prefix, &["lib64".to_owned()], &[], &BuildEnv::new());
        assert!(report.patched.is_empty());
        assert_eq!(runner.call_count(), 0);
    }
}
