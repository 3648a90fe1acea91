//! Configure, retrieve, build and verify a single component.
//!
//! Everything here runs inside [`Registry::require`]; the registry has
//! already checked the failure cache and pushed the component on its
//! visiting stack.

use crate::lifecycle::Phase;
use crate::registry::Registry;
use crate::CoreError;
use prereq_fetch::{resolve_patches, FetchContext, FetchRequest, Retriever};
use prereq_runtime::{check_system_prereqs, format_command, BuildEnv, RpathDep, RpathPatcher};
use prereq_schema::{substitute_all, TemplateVars};
use prereq_store::{ensure_dir, RetrievalMarker};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl Registry {
    /// Decide where the component comes from and where it will live.
    ///
    /// Without a retriever the component is taken from the system prefix.
    /// With one, an alternate prefix that already verifies is used as a
    /// prebuilt install; otherwise it gets its own directory under the
    /// shared prerequisite root.
    pub(crate) fn configure(&mut self, name: &str) -> Result<(), CoreError> {
        self.component_mut(name)?.transition(Phase::Configuring)?;
        let comp = self.component(name)?;
        let has_retriever = comp.retriever().is_some();
        let out_of_src = comp.def().out_of_src_build;

        let prebuilt = if has_retriever {
            self.find_alt_prefix(name)?
        } else {
            Some(self.options.system_prefix.clone())
        };
        let prefix = prebuilt
            .clone()
            .unwrap_or_else(|| self.layout.prereq_prefix(name));
        let (src_path, build_path) = if has_retriever {
            let src = self.layout.src_path(name);
            let build = if out_of_src {
                self.layout.out_of_tree_path(name)
            } else {
                src.clone()
            };
            (Some(src), Some(build))
        } else {
            (None, None)
        };
        if out_of_src && !self.options.is_dry() {
            ensure_dir(&self.layout.build_root())?;
        }
        debug!(
            "{name}: prefix {} (prebuilt: {})",
            prefix.display(),
            prebuilt.is_some()
        );

        let state = &mut self.component_mut(name)?.state;
        state.prebuilt_path = prebuilt;
        state.published_prefix = Some(prefix.clone());
        state.prefix = Some(prefix);
        state.src_path = src_path;
        state.build_path = build_path;
        Ok(())
    }

    /// First alternate prefix that holds a verified copy of `name`.
    fn find_alt_prefix(&mut self, name: &str) -> Result<Option<PathBuf>, CoreError> {
        let comp = self.component(name)?;
        if comp.state.alt_prefix_probed {
            return Ok(comp.state.prebuilt_path.clone());
        }
        let candidates: Vec<PathBuf> = self
            .options
            .alt_prefixes
            .iter()
            .filter(|root| {
                root.join("include").is_dir()
                    || root.join("lib").is_dir()
                    || root.join("lib64").is_dir()
            })
            .cloned()
            .collect();

        let mut found = None;
        for root in candidates {
            {
                let state = &mut self.component_mut(name)?.state;
                state.prefix = Some(root.clone());
                state.published_prefix = Some(root.clone());
            }
            let mut probe_env = self.system_env.clone();
            let libs = self.component(name)?.def().libs.clone();
            self.project(name, &mut probe_env, Some(libs.as_slice()))?;
            if self.verify(name, &probe_env)? {
                info!("using {name} from {}", root.display());
                found = Some(root);
                break;
            }
        }

        let state = &mut self.component_mut(name)?.state;
        state.alt_prefix_probed = true;
        if found.is_none() {
            state.prefix = None;
            state.published_prefix = None;
        }
        Ok(found)
    }

    /// Whether the component must be (re)built before verification.
    ///
    /// Starts out true; an allowlisted or already installed component only
    /// rebuilds when its targets turn out to be missing.
    fn has_changes(&mut self, name: &str, env: &BuildEnv) -> Result<bool, CoreError> {
        let comp = self.component(name)?;
        let installed = comp.state.prefix.as_deref().is_some_and(Path::exists);
        if !self.options.is_preinstalled(name) && !installed {
            return Ok(true);
        }
        if self.verify(name, env)? {
            debug!("{name} is up to date");
            return Ok(false);
        }
        info!("{name} is installed but incomplete, rebuilding");
        Ok(true)
    }

    /// Bring the component's install up to date. Returns true when build
    /// commands ran.
    pub(crate) fn build(&mut self, name: &str) -> Result<bool, CoreError> {
        if self.options.mode.is_noop() {
            return Ok(false);
        }
        let libs = self.component(name)?.def().libs.clone();
        let mut envcopy = self.system_env.clone();
        self.project(name, &mut envcopy, Some(libs.as_slice()))?;

        if self.component(name)?.state.prebuilt_path.is_some() {
            self.check_prebuilt(name, &envcopy)?;
            self.component_mut(name)?.transition(Phase::Installed)?;
            return Ok(false);
        }

        let changes = self.has_changes(name, &envcopy)?;
        if changes {
            self.component_mut(name)?.transition(Phase::NeedsBuild)?;
            if !self.options.build_deps.build() {
                if self.options.is_dry() {
                    info!("Would do required build of {name}");
                } else {
                    return Err(CoreError::BuildRequired(name.to_owned()));
                }
            }
            self.component_mut(name)?.transition(Phase::Building)?;
            self.retrieve(name)?;
            self.load_component_pins(name)?;

            let requires = self.component(name)?.def().requires.clone();
            if !requires.is_empty() {
                let deps: Vec<&str> = requires.iter().map(String::as_str).collect();
                self.require_headers(&mut envcopy, &deps)?;
                self.project(name, &mut envcopy, Some(libs.as_slice()))?;
            }
            self.check_system_deps(name)?;
            self.run_build(name, &envcopy)?;
        }

        let requires = self.component(name)?.def().requires.clone();
        if !requires.is_empty() {
            let deps: Vec<&str> = requires.iter().map(String::as_str).collect();
            self.require_headers(&mut envcopy, &deps)?;
        }
        self.project(name, &mut envcopy, Some(libs.as_slice()))?;
        if changes {
            self.patch_rpaths(name, &envcopy)?;
        }
        if !self.verify(name, &envcopy)? && !self.options.is_dry() {
            return Err(CoreError::MissingTargets {
                component: name.to_owned(),
                package: None,
            });
        }

        let comp = self.component_mut(name)?;
        comp.transition(if changes {
            Phase::Verified
        } else {
            Phase::Installed
        })?;
        comp.state.built = changes;
        Ok(changes)
    }

    /// A prebuilt install is never compiled; missing targets point the user
    /// at the OS package instead.
    fn check_prebuilt(&mut self, name: &str, env: &BuildEnv) -> Result<(), CoreError> {
        if self.verify(name, env)? {
            return Ok(());
        }
        let comp = self.component(name)?;
        let package = comp
            .def()
            .package
            .clone()
            .unwrap_or_else(|| name.to_owned());
        if self.options.is_dry() {
            info!("Would fail: {name} is not installed (package {package})");
            return Ok(());
        }
        Err(CoreError::MissingTargets {
            component: name.to_owned(),
            package: Some(package),
        })
    }

    fn fetch_context(&self) -> FetchContext<'_> {
        FetchContext {
            runner: self.runner.as_ref(),
            downloader: self.downloader.as_ref(),
            env: &self.system_env,
            download_dir: self.layout.download_dir(),
            retry: self.options.retry,
            dry_run: self.options.is_dry(),
            trust_existing: self.options.trust_existing_sources,
        }
    }

    /// Fetch sources into the component's source path and record a marker.
    fn retrieve(&mut self, name: &str) -> Result<(), CoreError> {
        let Some(dest) = self.component(name)?.state.src_path.clone() else {
            return Ok(());
        };
        if !self.options.build_deps.download() {
            if dest.exists() {
                info!("building {name} from existing sources");
                return Ok(());
            }
            if self.options.is_dry() {
                info!("Would need to download {name}");
                return Ok(());
            }
            return Err(CoreError::DownloadRequired(name.to_owned()));
        }

        let Some(mut retriever) = self.component_mut(name)?.take_retriever() else {
            return Ok(());
        };
        let result = self.fetch(name, &dest, &mut retriever);
        self.component_mut(name)?.restore_retriever(retriever);
        result
    }

    fn fetch(&self, name: &str, dest: &Path, retriever: &mut Retriever) -> Result<(), CoreError> {
        let marker = self.layout.marker_path(name);
        let dry_run = self.options.is_dry();
        if !dry_run {
            RetrievalMarker::remove(&marker)?;
            ensure_dir(&self.layout.build_root())?;
        }

        info!("retrieving {name}");
        let ctx = self.fetch_context();
        let refs = self.pins.patches(name)?;
        let patches = resolve_patches(&ctx, name, &refs, self.layout.root(), |n| {
            self.layout.patch_path(name, n)
        })?;
        let request = FetchRequest {
            component: name,
            dest,
            commit: self.pins.commit(name),
            branch: self.pins.branch(name),
            patches: &patches,
        };
        let outcome = retriever.get(&ctx, &request)?;

        if !dry_run {
            let mut record = RetrievalMarker::new(name, retriever.url());
            record.revision = outcome.revision;
            record.checksum = outcome.checksum;
            record.write(&marker)?;
        }
        Ok(())
    }

    /// Layer the pin file a component ships (named in `configs`) on top of
    /// the current pins, so its own dependencies can be pinned by it.
    fn load_component_pins(&mut self, name: &str) -> Result<(), CoreError> {
        let Some(file) = self.pins.config_file(name).map(str::to_owned) else {
            return Ok(());
        };
        let Some(src) = self.component(name)?.state.src_path.clone() else {
            return Ok(());
        };
        let path = src.join(&file);
        if path.is_file() {
            debug!("loading pins for {name} from {}", path.display());
            self.pins.merge_file(&path)?;
        } else if !self.options.is_dry() {
            warn!("{name}: pin file {} not found", path.display());
        }
        Ok(())
    }

    /// Libraries and programs needed just to run the build commands.
    fn check_system_deps(&self, name: &str) -> Result<(), CoreError> {
        let def = self.component(name)?.def();
        let progs = def.system_programs();
        if def.required_libs.is_empty() && progs.is_empty() {
            return Ok(());
        }
        if !self.options.probes_enabled() {
            info!("Would check for missing system libraries of {name}");
            return Ok(());
        }
        let missing =
            check_system_prereqs(self.probe.as_ref(), &self.system_env, &def.required_libs, &progs);
        if missing.is_empty() {
            return Ok(());
        }
        Err(CoreError::MissingSystemLibs {
            component: name.to_owned(),
            missing,
        })
    }

    /// Placeholder bindings for one component's build commands.
    pub(crate) fn build_vars(&self, name: &str) -> Result<TemplateVars, CoreError> {
        let state = self.component(name)?.state();
        let mut vars = self.published_vars();
        let jobs = self.options.jobs.max(1);
        let path_var = |p: &Option<PathBuf>| {
            p.as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        vars.insert("PREFIX".to_owned(), self.layout.prefix().display().to_string());
        vars.insert("COMPONENT_PREFIX".to_owned(), path_var(&state.prefix));
        vars.insert("SRC_DIR".to_owned(), path_var(&state.src_path));
        vars.insert("BUILD_DIR".to_owned(), path_var(&state.build_path));
        vars.insert("JOBS".to_owned(), jobs.to_string());
        vars.insert("JOBS_OPT".to_owned(), format!("-j{jobs}"));
        Ok(vars)
    }

    /// Substitute placeholders and give a bare `make` the job count.
    pub(crate) fn expand_command(
        &self,
        argv: &[String],
        vars: &TemplateVars,
    ) -> Result<Vec<String>, CoreError> {
        let mut expanded = substitute_all(argv, vars)?;
        let is_make = expanded.first().is_some_and(|p| p == "make");
        if is_make && !expanded.iter().any(|a| a.starts_with("-j")) {
            let jobs = self.options.jobs.max(1);
            expanded.splice(1..1, ["-j".to_owned(), jobs.to_string()]);
        }
        Ok(expanded)
    }

    fn run_build(&mut self, name: &str, env: &BuildEnv) -> Result<(), CoreError> {
        let dry_run = self.options.is_dry();
        if !dry_run {
            ensure_dir(&self.layout.prereq_root())?;
        }
        let comp = self.component(name)?;
        let build_path = comp.state.build_path.clone();
        if comp.def().out_of_src_build {
            if dry_run {
                info!("Would empty {}", self.layout.out_of_tree_path(name).display());
            } else {
                self.layout.recreate_build_dir(name)?;
            }
        }

        let vars = self.build_vars(name)?;
        let commands = self.component(name)?.def().commands.clone();
        info!("building {name}");
        for command in &commands {
            if self.interrupted() {
                return Err(CoreError::Interrupted(name.to_owned()));
            }
            let argv = self.expand_command(command, &vars)?;
            if !self.runner.run(&argv, build_path.as_deref(), env)? {
                return Err(CoreError::BuildFailure {
                    component: name.to_owned(),
                    command: format_command(&argv),
                });
            }
        }
        Ok(())
    }

    fn patch_rpaths(&self, name: &str, env: &BuildEnv) -> Result<(), CoreError> {
        let comp = self.component(name)?;
        let subdirs = &comp.def().patch_rpath;
        let Some(prefix) = comp.state.prefix.as_deref() else {
            return Ok(());
        };
        if subdirs.is_empty() {
            return Ok(());
        }
        if self.options.is_dry() {
            info!("Would patch rpaths of {name} in {}", prefix.display());
            return Ok(());
        }
        let deps: Vec<RpathDep> = comp
            .def()
            .requires
            .iter()
            .filter_map(|dep| {
                Some(RpathDep {
                    name: dep.clone(),
                    prefix: self.prefix_of(dep)?.to_path_buf(),
                })
            })
            .collect();
        let report = RpathPatcher::new(self.runner.as_ref(), &self.options.system_prefix)
            .patch(prefix, subdirs, &deps, env);
        debug!(
            "{name}: patched {} objects, skipped {}",
            report.patched.len(),
            report.skipped.len()
        );
        Ok(())
    }

    /// A component that needed no build and has nothing on disk publishes
    /// the system prefix instead of its own.
    pub(crate) fn modify_prefix(&mut self, name: &str) -> Result<(), CoreError> {
        let system_prefix = self.options.system_prefix.clone();
        let prereq_prefix = self.layout.prereq_prefix(name);
        let comp = self.component_mut(name)?;
        if comp.def().system {
            return Ok(());
        }
        let Some(src) = comp.state.src_path.as_deref() else {
            return Ok(());
        };
        let published_exists = comp.state.published_prefix.as_deref().is_some_and(Path::exists);
        if src.exists() || prereq_prefix.exists() || published_exists {
            return Ok(());
        }
        debug!("{name}: nothing on disk, publishing {}", system_prefix.display());
        comp.state.published_prefix = Some(system_prefix);
        Ok(())
    }
}
