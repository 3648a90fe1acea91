use super::{Settings, EXIT_FAILURE, EXIT_SUCCESS};
use prereq_core::BuildRootLock;
use prereq_runtime::{check_host_tools, format_missing, BuildEnv};
use prereq_schema::DefinitionsFile;
use prereq_store::PrereqLayout;

pub fn run(settings: &Settings, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_tools(&mut checks);
    if let Some(file) = check_definitions(settings, &mut checks, &mut all_pass) {
        check_sources(&settings.layout, &file, &mut checks);
    }
    check_pins(settings, &mut checks, &mut all_pass);
    check_build_root(&settings.layout, &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json_output)
}

fn check_tools(checks: &mut Vec<Check>) {
    let missing = check_host_tools(&BuildEnv::from_host());
    if missing.is_empty() {
        checks.push(Check::pass("host_tools", "Host build tools available"));
    } else {
        checks.push(Check::warn(
            "host_tools",
            format_missing(&missing).trim_end(),
        ));
    }
}

fn check_definitions(
    settings: &Settings,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) -> Option<DefinitionsFile> {
    let file = match settings.definitions() {
        Ok(file) => file,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("definitions", &e));
            return None;
        }
    };
    let undefined: Vec<&str> = file
        .prebuild
        .iter()
        .chain(file.components.values().flat_map(|d| d.requires.iter()))
        .filter(|n| !file.components.contains_key(n.as_str()))
        .map(String::as_str)
        .collect();
    if undefined.is_empty() {
        checks.push(Check::pass(
            "definitions",
            &format!("{} components defined", file.components.len()),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "definitions",
            &format!("Undefined components referenced: {}", undefined.join(", ")),
        ));
    }
    Some(file)
}

fn check_sources(layout: &PrereqLayout, file: &DefinitionsFile, checks: &mut Vec<Check>) {
    let retrievable: Vec<&String> = file
        .components
        .iter()
        .filter(|(_, def)| def.has_source())
        .map(|(name, _)| name)
        .collect();
    let present = retrievable
        .iter()
        .filter(|name| layout.src_path(name).is_dir())
        .count();
    checks.push(Check::info(
        "sources",
        &format!(
            "{present} of {} retrievable sources present",
            retrievable.len()
        ),
    ));
}

fn check_pins(settings: &Settings, checks: &mut Vec<Check>, all_pass: &mut bool) {
    if !settings.pins.exists() {
        checks.push(Check::info(
            "pins",
            &format!("No pin file at {}", settings.pins.display()),
        ));
        return;
    }
    match settings.pin_config() {
        Ok(_) => checks.push(Check::pass("pins", "Pin configuration parses")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("pins", &e));
        }
    }
}

fn check_build_root(layout: &PrereqLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    if !layout.build_root().is_dir() {
        checks.push(Check::info(
            "build_root",
            "Build root not created yet (will be created on first build)",
        ));
        return;
    }
    match BuildRootLock::is_held(layout) {
        Ok(false) => checks.push(Check::pass("build_lock", "Build root lock is free")),
        Ok(true) => checks.push(Check::warn(
            "build_lock",
            "Build root lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "build_lock",
                &format!("Cannot check build root lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Prereq Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_build_root_is_reported_as_warning() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PrereqLayout::new(dir.path());
        let mut checks = Vec::new();
        let mut all_pass = true;

        check_build_root(&layout, &mut checks, &mut all_pass);
        assert_eq!(checks[0].name, "build_root");

        let _held = BuildRootLock::acquire(&layout).unwrap();
        checks.clear();
        check_build_root(&layout, &mut checks, &mut all_pass);
        assert_eq!(checks[0].name, "build_lock");
        assert_eq!(checks[0].status, "warn");
        assert!(all_pass);
    }
}
