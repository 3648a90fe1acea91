use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Host variables inherited by build commands; everything else is cleared.
pub const HOST_ENV_VARS: &[&str] = &[
    "HOME",
    "TERM",
    "PATH",
    "SSH_AUTH_SOCK",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "PKG_CONFIG_PATH",
    "MODULEPATH",
    "MODULESHOME",
    "MODULESLOADED",
    "CC",
    "CXX",
];

/// Accumulator components project their search paths and flags onto.
///
/// Every `add_*` operation appends only if the value is not already present,
/// so projecting the same component twice is harmless.
pub trait EnvSink {
    fn add_include_path(&mut self, path: &Path);
    fn add_lib_path(&mut self, path: &Path);
    fn add_rpath(&mut self, entry: &str);
    fn add_define(&mut self, define: &str);
    fn add_link_flag(&mut self, flag: &str);
    fn add_compile_flag(&mut self, flag: &str);
    fn add_lib(&mut self, lib: &str);
    /// Append a directory to a `:`-separated variable of the process environment.
    fn append_env_path(&mut self, var: &str, path: &Path);
    /// Publish a template variable, overwriting any previous value.
    fn replace(&mut self, key: &str, value: &str);

    /// Sort compiler/linker flags (as printed by pkg-config) into the sink.
    fn merge_flags(&mut self, flags: &str) {
        let mut tokens = flags.split_whitespace();
        while let Some(tok) = tokens.next() {
            let mut split = |prefix: &str| -> Option<String> {
                let rest = tok.strip_prefix(prefix)?;
                if rest.is_empty() {
                    tokens.next().map(str::to_owned)
                } else {
                    Some(rest.to_owned())
                }
            };
            if let Some(dir) = split("-I") {
                self.add_include_path(Path::new(&dir));
            } else if let Some(dir) = split("-L") {
                self.add_lib_path(Path::new(&dir));
            } else if let Some(lib) = split("-l") {
                self.add_lib(&lib);
            } else if let Some(def) = split("-D") {
                self.add_define(&def);
            } else if tok.starts_with("-Wl,") || tok == "-pthread" {
                self.add_link_flag(tok);
            } else {
                self.add_compile_flag(tok);
            }
        }
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Concrete build environment: search paths, flags, template variables, and
/// the process environment external commands run with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildEnv {
    include_paths: Vec<PathBuf>,
    lib_paths: Vec<PathBuf>,
    rpaths: Vec<String>,
    defines: Vec<String>,
    link_flags: Vec<String>,
    compile_flags: Vec<String>,
    libs: Vec<String>,
    vars: BTreeMap<String, String>,
    process_env: BTreeMap<String, String>,
}

impl BuildEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty environment whose process environment inherits [`HOST_ENV_VARS`].
    pub fn from_host() -> Self {
        let mut env = Self::new();
        for var in HOST_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                env.process_env.insert((*var).to_owned(), value);
            }
        }
        env
    }

    #[inline]
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    #[inline]
    pub fn lib_paths(&self) -> &[PathBuf] {
        &self.lib_paths
    }

    #[inline]
    pub fn rpaths(&self) -> &[String] {
        &self.rpaths
    }

    #[inline]
    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    #[inline]
    pub fn link_flags(&self) -> &[String] {
        &self.link_flags
    }

    #[inline]
    pub fn compile_flags(&self) -> &[String] {
        &self.compile_flags
    }

    #[inline]
    pub fn libs(&self) -> &[String] {
        &self.libs
    }

    #[inline]
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[inline]
    pub fn process_env(&self) -> &BTreeMap<String, String> {
        &self.process_env
    }

    pub fn process_var(&self, key: &str) -> Option<&str> {
        self.process_env.get(key).map(String::as_str)
    }

    pub fn set_process_var(&mut self, key: &str, value: &str) {
        self.process_env.insert(key.to_owned(), value.to_owned());
    }

    /// Entries of a `:`-separated process variable such as `PATH`.
    pub fn env_path(&self, var: &str) -> Vec<PathBuf> {
        self.process_var(var)
            .map(|v| {
                v.split(':')
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Preprocessor arguments: `-I` for every include path, `-D` for every define.
    pub fn cpp_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .include_paths
            .iter()
            .map(|p| format!("-I{}", p.display()))
            .collect();
        args.extend(self.defines.iter().map(|d| format!("-D{d}")));
        args.extend(self.compile_flags.iter().cloned());
        args
    }

    /// Linker arguments: `-L`, rpath, extra link flags, then `-l` libraries.
    pub fn link_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .lib_paths
            .iter()
            .map(|p| format!("-L{}", p.display()))
            .collect();
        args.extend(self.rpaths.iter().map(|r| format!("-Wl,-rpath,{r}")));
        args.extend(self.link_flags.iter().cloned());
        args.extend(self.libs.iter().map(|l| format!("-l{l}")));
        args
    }
}

impl EnvSink for BuildEnv {
    fn add_include_path(&mut self, path: &Path) {
        push_unique(&mut self.include_paths, path.to_path_buf());
    }

    fn add_lib_path(&mut self, path: &Path) {
        push_unique(&mut self.lib_paths, path.to_path_buf());
    }

    fn add_rpath(&mut self, entry: &str) {
        push_unique(&mut self.rpaths, entry.to_owned());
    }

    fn add_define(&mut self, define: &str) {
        push_unique(&mut self.defines, define.to_owned());
    }

    fn add_link_flag(&mut self, flag: &str) {
        push_unique(&mut self.link_flags, flag.to_owned());
    }

    fn add_compile_flag(&mut self, flag: &str) {
        push_unique(&mut self.compile_flags, flag.to_owned());
    }

    fn add_lib(&mut self, lib: &str) {
        push_unique(&mut self.libs, lib.to_owned());
    }

    fn append_env_path(&mut self, var: &str, path: &Path) {
        let entry = path.display().to_string();
        let current = self.process_env.entry(var.to_owned()).or_default();
        if current.split(':').any(|p| p == entry) {
            return;
        }
        if !current.is_empty() {
            current.push(':');
        }
        current.push_str(&entry);
    }

    fn replace(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_owned(), value.to_owned());
    }
}
