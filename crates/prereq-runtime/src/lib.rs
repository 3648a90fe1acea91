//! Execution layer for prerequisite builds.
//!
//! This crate implements everything that touches the host: the `EnvSink`
//! trait and its concrete `BuildEnv` accumulator, the pluggable
//! `CommandRunner` (real processes, dry-run, and a recording mock), the
//! `Probe` trait with compiler-backed and filesystem-backed implementations,
//! the `Verifier` that checks a component's targets, the `RpathPatcher`, and
//! system prerequisite checking.

pub mod env;
pub mod mock;
pub mod prereq;
pub mod probe;
pub mod rpath;
pub mod runner;
pub mod verify;

pub use env::{BuildEnv, EnvSink, HOST_ENV_VARS};
pub use mock::{MockRunner, RecordedCommand};
pub use prereq::{check_host_tools, check_system_prereqs, format_missing, MissingPrereq};
pub use probe::{find_program, CompilerProbe, FsProbe, Probe};
pub use rpath::{relative_path, RpathDep, RpathPatcher, RpathReport};
pub use runner::{format_command, CommandRunner, ProcessRunner};
pub use verify::{CustomCheck, Targets, Verifier};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command execution failed: {0}")]
    ExecFailed(String),
}
