use crate::BuildEnv;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Answers "is this target usable in this environment?" questions.
///
/// Implementations must not mutate the environment they are given.
pub trait Probe: Send + Sync {
    fn has_program(&self, env: &BuildEnv, program: &str) -> bool;
    fn has_header(&self, env: &BuildEnv, header: &str) -> bool;
    /// `compiler` overrides the default C compiler for this one check.
    fn has_library(&self, env: &BuildEnv, lib: &str, compiler: Option<&str>) -> bool;
    fn has_function(&self, env: &BuildEnv, lib: &str, function: &str) -> bool;
    /// Output of `pkg-config <args> <package>`, or `None` if the package is unknown.
    fn pkg_config(&self, env: &BuildEnv, package: &str, args: &[&str]) -> Option<String>;
}

/// Resolve a program against the `PATH` of `env`'s process environment.
pub fn find_program(env: &BuildEnv, program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    let search = env.process_var("PATH")?;
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    which::which_in(program, Some(search), cwd).ok()
}

/// Probe that compiles and links small test programs, like a configure script.
#[derive(Debug, Clone, Default)]
pub struct CompilerProbe {
    cc: Option<String>,
}

impl CompilerProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compiler(cc: &str) -> Self {
        Self {
            cc: Some(cc.to_owned()),
        }
    }

    fn compiler(&self, env: &BuildEnv) -> String {
        self.cc
            .clone()
            .or_else(|| env.process_var("CC").map(str::to_owned))
            .unwrap_or_else(|| "cc".to_owned())
    }

    fn try_build(&self, env: &BuildEnv, compiler: &str, source: &str, libs: &[&str]) -> bool {
        let Ok(dir) = tempfile::tempdir() else {
            return false;
        };
        let src = dir.path().join("conftest.c");
        if fs::write(&src, source).is_err() {
            return false;
        }
        let mut words = compiler.split_whitespace();
        let Some(program) = words.next() else {
            return false;
        };

        let mut cmd = Command::new(program);
        cmd.args(words).args(env.cpp_args()).arg(&src);
        if libs.is_empty() {
            cmd.arg("-c").arg("-o").arg(dir.path().join("conftest.o"));
        } else {
            cmd.arg("-o").arg(dir.path().join("conftest"));
            cmd.args(libs.iter().map(|l| format!("-l{l}")));
            cmd.args(env.link_args());
        }
        cmd.env_clear()
            .envs(env.process_env())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let ok = cmd.status().is_ok_and(|s| s.success());
        tracing::debug!(
            "probe with {compiler} (libs: {libs:?}): {}",
            if ok { "yes" } else { "no" }
        );
        ok
    }
}

impl Probe for CompilerProbe {
    fn has_program(&self, env: &BuildEnv, program: &str) -> bool {
        find_program(env, program).is_some()
    }

    fn has_header(&self, env: &BuildEnv, header: &str) -> bool {
        let source = format!("#include <{header}>\nint main(void) {{ return 0; }}\n");
        self.try_build(env, &self.compiler(env), &source, &[])
    }

    fn has_library(&self, env: &BuildEnv, lib: &str, compiler: Option<&str>) -> bool {
        let cc = compiler.map_or_else(|| self.compiler(env), str::to_owned);
        self.try_build(env, &cc, "int main(void) { return 0; }\n", &[lib])
    }

    fn has_function(&self, env: &BuildEnv, lib: &str, function: &str) -> bool {
        let source = format!("char {function}(void);\nint main(void) {{ return (int){function}(); }}\n");
        self.try_build(env, &self.compiler(env), &source, &[lib])
    }

    fn pkg_config(&self, env: &BuildEnv, package: &str, args: &[&str]) -> Option<String> {
        let output = Command::new("pkg-config")
            .args(args)
            .arg(package)
            .env_clear()
            .envs(env.process_env())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            tracing::debug!("pkg-config has no data for {package}");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// Probe that only inspects the filesystem: headers and libraries must exist
/// in the environment's search paths or under one of the system roots.
///
/// `.pc` files are read directly; `Cflags`/`Libs` are expanded from the
/// variables defined in the file.
#[derive(Debug, Clone)]
pub struct FsProbe {
    roots: Vec<PathBuf>,
}

impl Default for FsProbe {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("/usr")],
        }
    }
}

impl FsProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn include_dirs(&self, env: &BuildEnv) -> Vec<PathBuf> {
        let mut dirs = env.include_paths().to_vec();
        dirs.extend(self.roots.iter().map(|r| r.join("include")));
        dirs
    }

    fn lib_dirs(&self, env: &BuildEnv) -> Vec<PathBuf> {
        let mut dirs = env.lib_paths().to_vec();
        for root in &self.roots {
            dirs.push(root.join("lib"));
            dirs.push(root.join("lib64"));
        }
        dirs
    }

    fn pc_dirs(&self, env: &BuildEnv) -> Vec<PathBuf> {
        let mut dirs = env.env_path("PKG_CONFIG_PATH");
        for lib in self.lib_dirs(env) {
            dirs.push(lib.join("pkgconfig"));
        }
        for root in &self.roots {
            dirs.push(root.join("share").join("pkgconfig"));
        }
        dirs
    }
}

fn dir_has_library(dir: &Path, lib: &str) -> bool {
    let stem = format!("lib{lib}");
    if ["so", "a", "dylib"]
        .iter()
        .any(|ext| dir.join(format!("{stem}.{ext}")).exists())
    {
        return true;
    }
    let versioned = format!("{stem}.so.");
    fs::read_dir(dir).is_ok_and(|entries| {
        entries
            .flatten()
            .any(|e| e.file_name().to_string_lossy().starts_with(&versioned))
    })
}

fn expand_pc_vars(value: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        if let Some(v) = vars.get(&after[..end]) {
            out.push_str(v);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Extract `(Cflags, Libs)` from the contents of a `.pc` file.
fn parse_pc(content: &str) -> (String, String) {
    let mut vars = BTreeMap::new();
    let mut cflags = String::new();
    let mut libs = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let eq = line.find('=');
        let colon = line.find(':');
        match (eq, colon) {
            (Some(e), c) if c.map_or(true, |c| e < c) => {
                let value = expand_pc_vars(line[e + 1..].trim(), &vars);
                vars.insert(line[..e].trim().to_owned(), value);
            }
            (_, Some(c)) => {
                let value = expand_pc_vars(line[c + 1..].trim(), &vars);
                match line[..c].trim() {
                    "Cflags" => cflags = value,
                    "Libs" => libs = value,
                    _ => {}
                }
            }
            _ => {}
        }
    }
    (cflags, libs)
}

impl Probe for FsProbe {
    fn has_program(&self, env: &BuildEnv, program: &str) -> bool {
        if find_program(env, program).is_some() {
            return true;
        }
        self.roots
            .iter()
            .any(|r| r.join("bin").join(program).is_file())
    }

    fn has_header(&self, env: &BuildEnv, header: &str) -> bool {
        self.include_dirs(env)
            .iter()
            .any(|d| d.join(header).is_file())
    }

    fn has_library(&self, env: &BuildEnv, lib: &str, _compiler: Option<&str>) -> bool {
        self.lib_dirs(env).iter().any(|d| dir_has_library(d, lib))
    }

    fn has_function(&self, env: &BuildEnv, lib: &str, _function: &str) -> bool {
        self.has_library(env, lib, None)
    }

    fn pkg_config(&self, env: &BuildEnv, package: &str, args: &[&str]) -> Option<String> {
        let file = format!("{package}.pc");
        let path = self
            .pc_dirs(env)
            .into_iter()
            .map(|d| d.join(&file))
            .find(|p| p.is_file())?;
        let content = fs::read_to_string(path).ok()?;
        let (cflags, libs) = parse_pc(&content);
        let mut parts = Vec::new();
        if args.contains(&"--cflags") && !cflags.is_empty() {
            parts.push(cflags);
        }
        if args.contains(&"--libs") && !libs.is_empty() {
            parts.push(libs);
        }
        Some(parts.join(" "))
    }
}
