use crate::{find_program, BuildEnv, Probe};
use std::fmt;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: String,
    pub install_hint: String,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// Check the system libraries and programs a component needs just to run
/// its build. Returns an empty list when everything is present.
pub fn check_system_prereqs(
    probe: &dyn Probe,
    env: &BuildEnv,
    libs: &[String],
    progs: &[String],
) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    for lib in libs {
        if !probe.has_library(env, lib, None) {
            missing.push(MissingPrereq {
                name: lib.clone(),
                purpose: "system library".to_owned(),
                install_hint: format!("the development package providing lib{lib}"),
            });
        }
    }
    for prog in progs {
        if !probe.has_program(env, prog) {
            missing.push(MissingPrereq {
                name: prog.clone(),
                purpose: "build tool".to_owned(),
                install_hint: format!("the package providing '{prog}'"),
            });
        }
    }
    missing
}

/// Host tools used to retrieve, build, and patch prerequisites.
pub fn check_host_tools(env: &BuildEnv) -> Vec<MissingPrereq> {
    const TOOLS: &[(&str, &str, &str)] = &[
        (
            "git",
            "retrieving git sources",
            "zypper install git | apt install git | dnf install git | pacman -S git",
        ),
        (
            "cc",
            "compiling prerequisites and probing targets",
            "zypper install gcc | apt install build-essential | dnf install gcc | pacman -S gcc",
        ),
        (
            "pkg-config",
            "reading pkg-config metadata",
            "zypper install pkg-config | apt install pkg-config | dnf install pkgconf | pacman -S pkgconf",
        ),
        (
            "patchelf",
            "rewriting rpaths of installed libraries",
            "zypper install patchelf | apt install patchelf | dnf install patchelf | pacman -S patchelf",
        ),
    ];

    TOOLS
        .iter()
        .filter(|(name, _, _)| find_program(env, name).is_none())
        .map(|(name, purpose, hint)| MissingPrereq {
            name: (*name).to_owned(),
            purpose: (*purpose).to_owned(),
            install_hint: (*hint).to_owned(),
        })
        .collect()
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg
}
