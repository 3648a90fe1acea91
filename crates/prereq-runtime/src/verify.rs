use crate::{BuildEnv, EnvSink, Probe};
use prereq_schema::{prefix_var, substitute, ComponentDef, TemplateVars};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Component-supplied check run before the standard target checks.
pub type CustomCheck = Arc<dyn Fn(&BuildEnv, &dyn Probe) -> bool + Send + Sync>;

/// What must be resolvable for a component to count as usable.
#[derive(Clone, Default)]
pub struct Targets {
    pub pkgconfig: Option<String>,
    pub progs: Vec<String>,
    pub headers: Vec<String>,
    pub libs: Vec<String>,
    pub libs_cc: Option<String>,
    pub functions: BTreeMap<String, Vec<String>>,
    pub check: Option<CustomCheck>,
}

impl fmt::Debug for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Targets")
            .field("pkgconfig", &self.pkgconfig)
            .field("progs", &self.progs)
            .field("headers", &self.headers)
            .field("libs", &self.libs)
            .field("libs_cc", &self.libs_cc)
            .field("functions", &self.functions)
            .field("check", &self.check.is_some())
            .finish()
    }
}

impl Targets {
    pub fn from_def(def: &ComponentDef, check: Option<CustomCheck>) -> Self {
        Self {
            pkgconfig: def.pkgconfig.clone(),
            progs: def.progs.clone(),
            headers: def.headers.clone(),
            libs: def.libs.clone(),
            libs_cc: def.libs_cc.clone(),
            functions: def.functions.clone(),
            check,
        }
    }
}

/// Checks a component's targets against a disposable copy of an environment.
pub struct Verifier<'a> {
    probe: &'a dyn Probe,
    probes_enabled: bool,
}

impl<'a> Verifier<'a> {
    pub fn new(probe: &'a dyn Probe) -> Self {
        Self {
            probe,
            probes_enabled: true,
        }
    }

    /// With probes disabled (dry-run) every verification reports missing targets.
    #[must_use]
    pub fn probes_enabled(mut self, enabled: bool) -> Self {
        self.probes_enabled = enabled;
        self
    }

    /// Return true when every target of `name` is present.
    ///
    /// `prefix` is bound to `<NAME>_PREFIX` before expanding `libs_cc`;
    /// `vars` supplies any other placeholders it uses.
    pub fn verify(
        &self,
        name: &str,
        targets: &Targets,
        env: &BuildEnv,
        prefix: Option<&Path>,
        vars: &TemplateVars,
    ) -> bool {
        if !self.probes_enabled {
            tracing::info!("Would check for missing build targets of {name}");
            return false;
        }

        let mut probe_env = env.clone();
        if let Some(pc) = &targets.pkgconfig {
            match self.probe.pkg_config(&probe_env, pc, &["--cflags"]) {
                Some(flags) => probe_env.merge_flags(&flags),
                None => tracing::debug!("no pkg-config data for {pc}"),
            }
        }

        if let Some(check) = &targets.check {
            if !check(&probe_env, self.probe) {
                tracing::debug!("{name}: custom check failed");
                return false;
            }
        }

        for prog in &targets.progs {
            if !self.probe.has_program(&probe_env, prog) {
                tracing::debug!("{name}: program '{prog}' not found");
                return false;
            }
        }

        for header in &targets.headers {
            if !self.probe.has_header(&probe_env, header) {
                tracing::debug!("{name}: header '{header}' not found");
                return false;
            }
        }

        if let Some(pc) = &targets.pkgconfig {
            if let Some(flags) = self.probe.pkg_config(&probe_env, pc, &["--libs"]) {
                probe_env.merge_flags(&flags);
            }
        }

        let compiler = match &targets.libs_cc {
            Some(cc) => {
                let mut cc_vars = vars.clone();
                if let Some(prefix) = prefix {
                    cc_vars.insert(prefix_var(name), prefix.display().to_string());
                }
                match substitute(cc, &cc_vars) {
                    Ok(cc) => Some(cc),
                    Err(e) => {
                        tracing::warn!("{name}: cannot expand libs_cc '{cc}': {e}");
                        return false;
                    }
                }
            }
            None => None,
        };

        for lib in &targets.libs {
            if !self.probe.has_library(&probe_env, lib, compiler.as_deref()) {
                tracing::debug!("{name}: library '{lib}' not linkable");
                return false;
            }
        }

        for (lib, functions) in &targets.functions {
            for function in functions {
                if !self.probe.has_function(&probe_env, lib, function) {
                    tracing::debug!("{name}: function '{function}' not found in '{lib}'");
                    return false;
                }
            }
        }

        true
    }
}
