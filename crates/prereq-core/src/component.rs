use crate::lifecycle::{validate_transition, Phase};
use crate::CoreError;
use prereq_fetch::Retriever;
use prereq_runtime::{BuildEnv, CustomCheck, EnvSink, Probe, Targets};
use prereq_schema::{prefix_var, ComponentDef};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Link flag making the runtime linker honour `LD_LIBRARY_PATH` over rpaths.
pub const NEW_DTAGS: &str = "-Wl,--enable-new-dtags";

const LIB_DIRS: &[&str] = &["lib", "lib64"];

/// Mutable bookkeeping of one component during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentState {
    pub phase: Phase,
    /// Declared pre-installed and not yet disproven by verification.
    pub use_installed: bool,
    /// Verification already passed this run.
    pub targets_found: bool,
    /// Existing installation used instead of building.
    pub prebuilt_path: Option<PathBuf>,
    #[serde(skip)]
    pub(crate) alt_prefix_probed: bool,
    /// Install prefix the component lives or will live under.
    pub prefix: Option<PathBuf>,
    /// Value published as `<NAME>_PREFIX`.
    pub published_prefix: Option<PathBuf>,
    pub src_path: Option<PathBuf>,
    pub build_path: Option<PathBuf>,
    /// Build commands ran this run.
    pub built: bool,
}

/// Inputs shared by every environment projection.
pub struct Projection<'a> {
    /// Environment pkg-config queries run in.
    pub base: &'a BuildEnv,
    pub probe: &'a dyn Probe,
    pub system_prefix: &'a Path,
}

/// One external dependency: static definition, retriever, and run state.
pub struct Component {
    name: String,
    def: ComponentDef,
    retriever: Option<Retriever>,
    targets: Targets,
    pub(crate) state: ComponentState,
}

impl Component {
    pub fn new(
        name: &str,
        def: ComponentDef,
        check: Option<CustomCheck>,
        use_installed: bool,
    ) -> Self {
        let retriever = def.source().as_ref().map(Retriever::from_spec);
        let targets = Targets::from_def(&def, check);
        Self {
            name: name.to_owned(),
            def,
            retriever,
            targets,
            state: ComponentState {
                use_installed,
                ..ComponentState::default()
            },
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn def(&self) -> &ComponentDef {
        &self.def
    }

    #[inline]
    pub fn retriever(&self) -> Option<&Retriever> {
        self.retriever.as_ref()
    }

    #[inline]
    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    #[inline]
    pub fn state(&self) -> &ComponentState {
        &self.state
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub(crate) fn take_retriever(&mut self) -> Option<Retriever> {
        self.retriever.take()
    }

    pub(crate) fn restore_retriever(&mut self, retriever: Retriever) {
        self.retriever = Some(retriever);
    }

    pub(crate) fn transition(&mut self, to: Phase) -> Result<(), CoreError> {
        validate_transition(&self.name, self.state.phase, to)?;
        tracing::debug!("{}: {} -> {to}", self.name, self.state.phase);
        self.state.phase = to;
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self) {
        if self.state.phase != Phase::Failed {
            tracing::debug!("{}: {} -> failed", self.name, self.state.phase);
            self.state.phase = Phase::Failed;
        }
    }

    fn include_dirs(&self) -> impl Iterator<Item = &str> {
        std::iter::once("include").chain(self.def.extra_include_path.iter().map(String::as_str))
    }

    fn lib_dirs(&self) -> impl Iterator<Item = &str> {
        LIB_DIRS
            .iter()
            .copied()
            .chain(self.def.extra_lib_path.iter().map(String::as_str))
    }

    /// pkg-config directories under the component's prefix.
    fn pkg_config_dirs(&self) -> Vec<PathBuf> {
        let Some(prefix) = &self.state.prefix else {
            return Vec::new();
        };
        LIB_DIRS
            .iter()
            .map(|lib| prefix.join(lib).join("pkgconfig"))
            .filter(|dir| dir.is_dir())
            .collect()
    }

    /// Append this component's search paths, rpaths, defines, pkg-config
    /// flags and, unless `needed_libs` is `None`, its libraries onto `sink`.
    pub fn project(
        &self,
        sink: &mut dyn EnvSink,
        needed_libs: Option<&[String]>,
        ctx: &Projection<'_>,
    ) {
        let mut lib_paths = Vec::new();
        let prefix = self.state.prefix.as_deref();

        if let Some(prefix) = prefix.filter(|p| !self.state.use_installed && *p != ctx.system_prefix)
        {
            sink.append_env_path("PATH", &prefix.join("bin"));
            for dir in self.include_dirs() {
                sink.add_include_path(&prefix.join(dir));
            }
            for dir in self.lib_dirs() {
                let full = prefix.join(dir);
                if !full.is_dir() {
                    continue;
                }
                sink.add_rpath(&full.display().to_string());
                sink.append_env_path("LD_LIBRARY_PATH", &full);
                lib_paths.push(full);
            }
            sink.add_link_flag(NEW_DTAGS);
        }
        if prefix == Some(ctx.system_prefix) && !self.def.system {
            sink.add_rpath(&ctx.system_prefix.join("lib").display().to_string());
            sink.add_link_flag(NEW_DTAGS);
        }

        for define in &self.def.defines {
            sink.add_define(define);
        }

        if let Some(published) = &self.state.published_prefix {
            sink.replace(&prefix_var(&self.name), &published.display().to_string());
        }

        let mut pc_env = None;
        if let Some(pc) = &self.def.pkgconfig {
            let mut env = ctx.base.clone();
            for dir in self.pkg_config_dirs() {
                env.append_env_path("PKG_CONFIG_PATH", &dir);
                sink.append_env_path("PKG_CONFIG_PATH", &dir);
            }
            if let Some(flags) = ctx.probe.pkg_config(&env, pc, &["--cflags"]) {
                sink.merge_flags(&flags);
            }
            pc_env = Some((pc, env));
        }

        let Some(libs) = needed_libs else {
            return;
        };
        if let Some((pc, env)) = &pc_env {
            if let Some(flags) = ctx.probe.pkg_config(env, pc, &["--libs"]) {
                sink.merge_flags(&flags);
            }
        }
        for path in &lib_paths {
            sink.add_lib_path(path);
        }
        for lib in libs {
            sink.add_lib(lib);
        }
    }
}
