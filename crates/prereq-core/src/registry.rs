use crate::component::{Component, Projection};
use crate::concurrency::interrupt_requested;
use crate::lifecycle::Phase;
use crate::options::{Mode, ResolveOptions};
use crate::CoreError;
use prereq_fetch::{Downloader, HttpDownloader};
use prereq_runtime::{
    BuildEnv, CommandRunner, CompilerProbe, CustomCheck, EnvSink, ProcessRunner, Probe, Verifier,
};
use prereq_schema::{
    prefix_var, ComponentDef, DefinitionsFile, PinConfig, SchemaError, TemplateVars,
};
use prereq_store::PrereqLayout;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Every defined component plus the per-run resolution state.
///
/// `resolved` marks components whose `require` completed; `errors` holds the
/// first failure of each component, re-raised on every later request;
/// `visiting` is the stack of components currently being resolved.
pub struct Registry {
    pub(crate) layout: PrereqLayout,
    pub(crate) options: ResolveOptions,
    pub(crate) pins: PinConfig,
    pub(crate) system_env: BuildEnv,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) probe: Arc<dyn Probe>,
    pub(crate) downloader: Arc<dyn Downloader>,
    pub(crate) defined: BTreeMap<String, Component>,
    resolved: BTreeMap<String, bool>,
    errors: BTreeMap<String, Arc<CoreError>>,
    visiting: Vec<String>,
    prebuild: Vec<String>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Registry {
    /// Registry with real collaborators: child processes, compiler probes,
    /// HTTP downloads, and the host environment.
    pub fn new(layout: PrereqLayout, options: ResolveOptions) -> Self {
        let runner = Arc::new(ProcessRunner::dry(options.is_dry()));
        Self {
            layout,
            options,
            pins: PinConfig::new(),
            system_env: BuildEnv::from_host(),
            runner,
            probe: Arc::new(CompilerProbe::new()),
            downloader: Arc::new(HttpDownloader::new()),
            defined: BTreeMap::new(),
            resolved: BTreeMap::new(),
            errors: BTreeMap::new(),
            visiting: Vec::new(),
            prebuild: Vec::new(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = downloader;
        self
    }

    #[must_use]
    pub fn with_pins(mut self, pins: PinConfig) -> Self {
        self.pins = pins;
        self
    }

    /// Base environment copied for every build and verification.
    #[must_use]
    pub fn with_system_env(mut self, env: BuildEnv) -> Self {
        self.system_env = env;
        self
    }

    /// Flag checked before each build command in addition to Ctrl-C.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    #[inline]
    pub fn layout(&self) -> &PrereqLayout {
        &self.layout
    }

    #[inline]
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    #[inline]
    pub fn pins(&self) -> &PinConfig {
        &self.pins
    }

    #[inline]
    pub fn system_env(&self) -> &BuildEnv {
        &self.system_env
    }

    pub(crate) fn interrupted(&self) -> bool {
        interrupt_requested() || self.cancel.as_ref().is_some_and(|f| f.load(Ordering::SeqCst))
    }

    pub fn define(&mut self, name: &str, def: ComponentDef) -> Result<(), CoreError> {
        self.insert(name, def, None)
    }

    /// Define a component whose verification also runs `check`.
    pub fn define_with_check(
        &mut self,
        name: &str,
        def: ComponentDef,
        check: CustomCheck,
    ) -> Result<(), CoreError> {
        self.insert(name, def, Some(check))
    }

    fn insert(
        &mut self,
        name: &str,
        def: ComponentDef,
        check: Option<CustomCheck>,
    ) -> Result<(), CoreError> {
        def.validate(name)?;
        if self.defined.contains_key(name) {
            return Err(CoreError::DuplicateDefinition(name.to_owned()));
        }
        let var = prefix_var(name);
        if let Some(first) = self.defined.keys().find(|other| prefix_var(other) == var) {
            return Err(SchemaError::PrefixCollision {
                first: first.clone(),
                second: name.to_owned(),
                var,
            }
            .into());
        }
        let use_installed = self.options.is_preinstalled(name);
        debug!("defining {name} (pre-installed: {use_installed})");
        self.defined.insert(
            name.to_owned(),
            Component::new(name, def, check, use_installed),
        );
        Ok(())
    }

    /// Define every component of a definitions file and remember its
    /// prebuild list.
    pub fn load_definitions(&mut self, file: DefinitionsFile) -> Result<(), CoreError> {
        for (name, def) in file.components {
            self.define(&name, def)?;
        }
        for name in &file.prebuild {
            if !self.defined.contains_key(name) {
                return Err(CoreError::MissingDefinition(name.clone()));
            }
        }
        self.prebuild = file.prebuild;
        Ok(())
    }

    pub fn prebuild_names(&self) -> &[String] {
        &self.prebuild
    }

    /// Require every prebuild component, each on its own copy of the base
    /// environment. Returns whether anything was built.
    pub fn prebuild(&mut self) -> Result<bool, CoreError> {
        let names = self.prebuild.clone();
        let mut changes = false;
        for name in &names {
            let mut env = self.system_env.clone();
            changes |= self.require(&mut env, &[name.as_str()])?;
        }
        Ok(changes)
    }

    pub fn defined_names(&self) -> Vec<&str> {
        self.defined.keys().map(String::as_str).collect()
    }

    pub fn component(&self, name: &str) -> Result<&Component, CoreError> {
        self.defined
            .get(name)
            .ok_or_else(|| CoreError::MissingDefinition(name.to_owned()))
    }

    pub(crate) fn component_mut(&mut self, name: &str) -> Result<&mut Component, CoreError> {
        self.defined
            .get_mut(name)
            .ok_or_else(|| CoreError::MissingDefinition(name.to_owned()))
    }

    /// Published `<NAME>_PREFIX` of a component, once it has been resolved.
    pub fn prefix_of(&self, name: &str) -> Option<&Path> {
        self.defined.get(name)?.state.published_prefix.as_deref()
    }

    /// Cached failure of a component, if it failed this run.
    pub fn error_of(&self, name: &str) -> Option<&Arc<CoreError>> {
        self.errors.get(name)
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.resolved.get(name).copied().unwrap_or(false)
    }

    /// User variables plus every `<NAME>_PREFIX` published so far.
    pub fn published_vars(&self) -> TemplateVars {
        let mut vars = self.options.vars.clone();
        for comp in self.defined.values() {
            if let Some(prefix) = &comp.state.published_prefix {
                vars.insert(prefix_var(comp.name()), prefix.display().to_string());
            }
        }
        vars
    }

    /// Make `names` usable and project them onto `env`.
    ///
    /// Returns true when any of them was built by this call.
    pub fn require(&mut self, env: &mut dyn EnvSink, names: &[&str]) -> Result<bool, CoreError> {
        self.require_with(env, names, false)
    }

    /// Like [`require`](Self::require), but only headers and flags are
    /// projected; no libraries are added to `env`.
    pub fn require_headers(
        &mut self,
        env: &mut dyn EnvSink,
        names: &[&str],
    ) -> Result<bool, CoreError> {
        self.require_with(env, names, true)
    }

    fn require_with(
        &mut self,
        env: &mut dyn EnvSink,
        names: &[&str],
        headers_only: bool,
    ) -> Result<bool, CoreError> {
        let mut changes = false;
        for &name in names {
            let comp = self.component(name)?;
            if let Some(err) = self.errors.get(name) {
                return Err(CoreError::ComponentFailed {
                    component: name.to_owned(),
                    source: Arc::clone(err),
                });
            }
            if let Some(pos) = self.visiting.iter().position(|v| v == name) {
                let mut cycle = self.visiting[pos..].to_vec();
                cycle.push(name.to_owned());
                return Err(CoreError::DependencyCycle(cycle));
            }
            let needed_libs = (!headers_only).then(|| comp.def().libs.clone());

            if self.is_resolved(name) {
                if self.options.mode != Mode::Help {
                    self.project(name, env, needed_libs.as_deref())?;
                }
                continue;
            }

            self.resolved.insert(name.to_owned(), false);
            self.visiting.push(name.to_owned());
            let result = self.resolve(name, env, needed_libs.as_deref());
            self.visiting.pop();

            match result {
                Ok(built) => {
                    self.resolved.insert(name.to_owned(), true);
                    changes |= built;
                }
                Err(err) => return Err(self.record_failure(name, err)),
            }
        }
        Ok(changes)
    }

    fn record_failure(&mut self, name: &str, err: CoreError) -> CoreError {
        self.resolved.remove(name);
        if matches!(err, CoreError::DependencyCycle(_)) {
            if let Some(comp) = self.defined.get_mut(name) {
                comp.state.phase = Phase::Undefined;
            }
            return err;
        }
        tracing::error!("{name}: {err}");
        let shared = Arc::new(err);
        self.errors.insert(name.to_owned(), Arc::clone(&shared));
        if let Some(comp) = self.defined.get_mut(name) {
            comp.mark_failed();
        }
        CoreError::ComponentFailed {
            component: name.to_owned(),
            source: shared,
        }
    }

    fn resolve(
        &mut self,
        name: &str,
        env: &mut dyn EnvSink,
        needed_libs: Option<&[String]>,
    ) -> Result<bool, CoreError> {
        if self.installed_shortcut(name, needed_libs)? {
            self.project(name, env, needed_libs)?;
            return Ok(false);
        }
        self.configure(name)?;
        let built = self.build(name)?;
        if !built {
            self.modify_prefix(name)?;
        }
        self.project(name, env, needed_libs)?;
        Ok(built)
    }

    /// A component declared pre-installed is used as-is when it verifies
    /// against the system environment; otherwise the declaration is dropped.
    fn installed_shortcut(
        &mut self,
        name: &str,
        needed_libs: Option<&[String]>,
    ) -> Result<bool, CoreError> {
        if !self.component(name)?.state.use_installed {
            return Ok(false);
        }
        let system_prefix = self.options.system_prefix.clone();
        let state = &mut self.component_mut(name)?.state;
        state.prefix = Some(system_prefix.clone());
        state.published_prefix = Some(system_prefix);

        let mut probe_env = self.system_env.clone();
        self.project(name, &mut probe_env, needed_libs)?;
        if self.verify(name, &probe_env)? {
            info!("using installed {name}");
            self.component_mut(name)?.transition(Phase::Installed)?;
            return Ok(true);
        }
        debug!("{name} is not usable from the system, dropping its installed flag");
        let comp = self.component_mut(name)?;
        comp.state.use_installed = false;
        comp.state.prefix = None;
        comp.state.published_prefix = None;
        Ok(false)
    }

    /// Run the verifier for `name` against `env`, remembering success.
    pub(crate) fn verify(&mut self, name: &str, env: &BuildEnv) -> Result<bool, CoreError> {
        if self.component(name)?.state.targets_found {
            return Ok(true);
        }
        let vars = self.published_vars();
        let probe = Arc::clone(&self.probe);
        let verifier = Verifier::new(probe.as_ref()).probes_enabled(self.options.probes_enabled());
        let comp = self.component_mut(name)?;
        let found = verifier.verify(
            name,
            comp.targets(),
            env,
            comp.state.prefix.as_deref(),
            &vars,
        );
        comp.state.targets_found = found;
        Ok(found)
    }

    pub(crate) fn project(
        &self,
        name: &str,
        sink: &mut dyn EnvSink,
        needed_libs: Option<&[String]>,
    ) -> Result<(), CoreError> {
        let comp = self.component(name)?;
        comp.project(
            sink,
            needed_libs,
            &Projection {
                base: &self.system_env,
                probe: self.probe.as_ref(),
                system_prefix: &self.options.system_prefix,
            },
        );
        Ok(())
    }

    /// Require `names` on a throwaway copy of the base environment.
    ///
    /// Errors become `Ok(false)` unless `require_optional` is set.
    pub fn check_available(&mut self, names: &[&str]) -> Result<bool, CoreError> {
        let mut scratch = self.system_env.clone();
        match self.require(&mut scratch, names) {
            Ok(_) => Ok(true),
            Err(err) if self.options.require_optional => Err(err),
            Err(err) => {
                debug!("{} unavailable: {err}", names.join(", "));
                Ok(false)
            }
        }
    }

    /// Whether `name` is available and satisfied by its pre-installed copy.
    pub fn is_installed(&mut self, name: &str) -> Result<bool, CoreError> {
        if self.check_available(&[name])? {
            return Ok(self.component(name)?.state.use_installed);
        }
        Ok(false)
    }

    /// Require `names`, then report whether all their source trees exist.
    pub fn has_source(&mut self, names: &[&str]) -> Result<bool, CoreError> {
        let mut scratch = self.system_env.clone();
        self.require(&mut scratch, names)?;
        Ok(names.iter().all(|name| {
            let exists = self.layout.src_path(name).exists();
            if !exists {
                info!("{name} source not found");
            }
            exists
        }))
    }

    /// Whether every optional component among `names` is enabled.
    pub fn included(&self, names: &[&str]) -> bool {
        names.iter().all(|name| {
            let optional = self.defined.get(*name).is_some_and(|c| c.def().optional);
            !optional || self.options.is_included(name)
        })
    }
}
