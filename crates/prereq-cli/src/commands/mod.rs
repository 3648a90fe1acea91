pub mod check;
pub mod completions;
pub mod doctor;
pub mod list;
pub mod require;
pub mod show;

use indicatif::{ProgressBar, ProgressStyle};
use prereq_core::{BuildDeps, BuildRootLock, CoreError, Registry, ResolveOptions};
use prereq_schema::{parse_definitions_file, DefinitionsFile, PinConfig};
use prereq_store::PrereqLayout;
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_LOCK_ERROR: u8 = 3;

/// Everything a command needs to set up a registry.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: PathBuf,
    pub pins: PathBuf,
    pub layout: PrereqLayout,
    pub options: ResolveOptions,
}

impl Settings {
    pub fn definitions(&self) -> Result<DefinitionsFile, String> {
        parse_definitions_file(&self.config)
            .map_err(|e| format!("definition error: {}: {e}", self.config.display()))
    }

    /// A missing pin file means nothing is pinned.
    pub fn pin_config(&self) -> Result<PinConfig, String> {
        if !self.pins.exists() {
            return Ok(PinConfig::new());
        }
        PinConfig::load(&self.pins)
            .map_err(|e| format!("pin configuration error: {}: {e}", self.pins.display()))
    }

    pub fn registry(&self) -> Result<Registry, String> {
        let definitions = self.definitions()?;
        let pins = self.pin_config()?;
        let mut registry =
            Registry::new(self.layout.clone(), self.options.clone()).with_pins(pins);
        registry.load_definitions(definitions).map_err(|e| match e {
            CoreError::Schema(_) => e.to_string(),
            other => format!("definition error: {other}"),
        })?;
        Ok(registry)
    }

    /// Settings for commands that only look: nothing is downloaded or built.
    #[must_use]
    pub fn read_only(&self) -> Self {
        let mut settings = self.clone();
        settings.options.build_deps = BuildDeps::No;
        settings
    }
}

/// Take the build root lock without waiting for another run to finish.
pub fn lock_build_root(layout: &PrereqLayout) -> Result<BuildRootLock, String> {
    BuildRootLock::acquire(layout).map_err(|e| format!("build root lock: {e}"))
}

pub fn name_refs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_phase(phase: &str) -> String {
    use console::Style;
    match phase {
        "installed" => Style::new().green().apply_to(phase).to_string(),
        "verified" => Style::new().green().bold().apply_to(phase).to_string(),
        "building" | "needs-build" => Style::new().cyan().apply_to(phase).to_string(),
        "configuring" => Style::new().yellow().apply_to(phase).to_string(),
        "failed" => Style::new().red().bold().apply_to(phase).to_string(),
        "undefined" => Style::new().dim().apply_to(phase).to_string(),
        other => other.to_owned(),
    }
}
